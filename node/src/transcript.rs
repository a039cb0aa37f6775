// Copyright 2026 The takyr Developers
// This file is part of the takyr library.

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:

// http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use chrono::{NaiveDate, Utc};

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
};

/// A per-session log of the CoT a client sent, one file per day.
///
/// Files are named `<date>-<name>.cot` under the configured directory, where
/// `<name>` identifies the session (`<uid>-<callsign>`, `anonymous-<ip>`, or
/// `monitor-<ip>`). Names pass through `sanitize_name`, so nothing a client
/// sends can place the file outside the directory. A write failure closes
/// the file and disables the transcript for the rest of the session.
#[derive(Debug)]
pub struct Transcript {
    /// The transcript directory; `None` means logging is off.
    dir: Option<PathBuf>,
    /// The session name used in the filename.
    name: String,
    file: Option<File>,
    /// The day the open file belongs to.
    date: Option<NaiveDate>,
}

impl Transcript {
    /// Initializes a transcript for the given session name. A `dir` of
    /// `None` disables it.
    pub fn new(dir: Option<PathBuf>, name: &str) -> Self {
        Self { dir, name: sanitize_name(name), file: None, date: None }
    }

    /// Renames the transcript, e.g. when an anonymous session identifies.
    /// The open file is closed; the next write opens the new name.
    pub fn set_name(&mut self, name: &str) {
        self.name = sanitize_name(name);
        self.file = None;
        self.date = None;
    }

    /// Appends one event document.
    pub fn log_event(&mut self, bytes: &[u8]) {
        self.write_all(bytes, None);
    }

    /// Appends one undecodable event document with the failure embedded as a
    /// comment.
    pub fn log_error(&mut self, bytes: &[u8], error: &str) {
        self.write_all(bytes, Some(error));
    }

    /// Closes the file, if open.
    pub fn close(&mut self) {
        self.file = None;
    }

    fn write_all(&mut self, bytes: &[u8], error: Option<&str>) {
        if self.dir.is_none() {
            return;
        }
        let Some(file) = self.ensure_open() else {
            return;
        };

        let result = match error {
            // XML comments cannot contain "--"; collapse it.
            Some(error) => {
                let safe = error.replace("--", "-");
                file.write_all(format!("<!-- {safe} -->\n").as_bytes())
                    .and_then(|_| file.write_all(bytes))
            }
            None => file.write_all(bytes),
        }
        .and_then(|_| file.write_all(b"\n"));

        if let Err(error) = result {
            warn!("Unable to write to the transcript: {error}");
            self.dir = None;
            self.file = None;
        }
    }

    /// Returns the open file, rotating on date change and opening on demand.
    /// An open failure disables the transcript.
    fn ensure_open(&mut self) -> Option<&mut File> {
        let today = Utc::now().date_naive();
        if self.date != Some(today) {
            self.file = None;
        }

        if self.file.is_none() {
            let dir = self.dir.as_ref()?;
            let path = dir.join(format!("{today}-{}.cot", self.name));
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    info!("Opening transcript {}", path.display());
                    self.file = Some(file);
                    self.date = Some(today);
                }
                Err(error) => {
                    warn!("Unable to open transcript {}: {error}", path.display());
                    self.dir = None;
                    return None;
                }
            }
        }

        self.file.as_mut()
    }
}

/// Reduces a session name to filename-safe characters. Anything outside
/// `[A-Za-z0-9._-]` becomes `_`, so separators and parent references cannot
/// survive.
pub fn sanitize_name(raw: &str) -> String {
    let sanitized: String = raw
        .chars()
        .map(|c| match c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
            true => c,
            false => '_',
        })
        .collect();
    match sanitized.is_empty() {
        true => "unnamed".to_string(),
        false => sanitized,
    }
}
