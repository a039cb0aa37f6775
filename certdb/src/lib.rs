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

#![forbid(unsafe_code)]

#[macro_use]
extern crate tracing;

mod serial;
pub use serial::*;

use chrono::{DateTime, NaiveDateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use x509_parser::certificate::X509Certificate;

use std::{fs, io::Write, path::PathBuf};

/// An error raised by the certificate registry.
#[derive(Debug, thiserror::Error)]
pub enum CertDbError {
    #[error("i/o error on certificate database: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid serial number '{0}'")]
    InvalidSerial(String),
    #[error("no certificate with serial {0}")]
    UnknownSerial(SerialNumber),
    #[error("certificate must have exactly one CommonName")]
    AmbiguousCommonName,
}

/// The status of an issued certificate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertStatus {
    /// Valid.
    Valid,
    /// Revoked.
    Revoked,
}

impl CertStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "V",
            Self::Revoked => "R",
        }
    }
}

/// One issued certificate, as recorded in the registry file.
#[derive(Clone, Debug, PartialEq)]
pub struct CertRecord {
    pub status: CertStatus,
    pub issued: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub serial: SerialNumber,
    /// The certificate's CommonName: the canonical user identity.
    pub name: String,
}

/// The registry of issued certificates.
///
/// The backing file is line-oriented, one record per line:
/// `status \t issued \t expires \t serial(40 hex) \t common-name`. The whole
/// file is held in memory indexed by serial; mutations rewrite the file
/// atomically (write then rename), so readers never observe a torn file.
#[derive(Debug)]
pub struct CertDb {
    /// Where the registry file lives.
    path: PathBuf,
    /// The records, indexed by normalized serial.
    records: RwLock<IndexMap<SerialNumber, CertRecord>>,
}

impl CertDb {
    /// Loads the registry from the given path. A missing file is an empty
    /// registry; lines that do not split into exactly five fields are
    /// skipped.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CertDbError> {
        let path = path.into();
        let mut records = IndexMap::new();

        if path.exists() {
            for line in fs::read_to_string(&path)?.lines() {
                let fields: Vec<&str> = line.trim().split('\t').collect();
                if fields.len() != 5 {
                    continue;
                }
                let (status, issued, expires, serial, name) =
                    (fields[0], fields[1], fields[2], fields[3], fields[4]);

                let status = match status {
                    "V" => CertStatus::Valid,
                    "R" => CertStatus::Revoked,
                    _ => continue,
                };
                let (Some(issued), Some(expires)) = (parse_db_time(issued), parse_db_time(expires))
                else {
                    warn!("Skipping a certificate record with malformed timestamps: {line}");
                    continue;
                };
                let Ok(serial) = SerialNumber::from_hex(serial) else {
                    warn!("Skipping a certificate record with a malformed serial: {line}");
                    continue;
                };

                records.insert(serial.clone(), CertRecord {
                    status,
                    issued,
                    expires,
                    serial,
                    name: name.to_string(),
                });
            }
        }

        Ok(Self { path, records: RwLock::new(records) })
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns `true` if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Returns the record with the given serial, if any. Accepts hex with or
    /// without leading zeros, any case.
    pub fn by_serial(&self, serial: &str) -> Option<CertRecord> {
        let serial = SerialNumber::from_hex(serial).ok()?;
        self.records.read().get(&serial).cloned()
    }

    /// Returns every record whose CommonName matches.
    pub fn by_name(&self, name: &str) -> Vec<CertRecord> {
        self.records.read().values().filter(|record| record.name == name).cloned().collect()
    }

    /// Registers a newly-issued certificate and rewrites the file.
    pub fn add_certificate(&self, cert: &X509Certificate<'_>) -> Result<(), CertDbError> {
        let mut names = cert.subject().iter_common_name();
        let name = match (names.next(), names.next()) {
            (Some(name), None) => {
                name.as_str().map_err(|_| CertDbError::AmbiguousCommonName)?.to_string()
            }
            _ => return Err(CertDbError::AmbiguousCommonName),
        };

        let record = CertRecord {
            status: CertStatus::Valid,
            issued: asn1_to_utc(cert.validity().not_before.timestamp()),
            expires: asn1_to_utc(cert.validity().not_after.timestamp()),
            serial: SerialNumber::from_bytes(cert.raw_serial()),
            name,
        };

        let mut records = self.records.write();
        records.insert(record.serial.clone(), record);
        self.write(&records)
    }

    /// Marks the certificate revoked, sets its expiry to the revocation
    /// time, and rewrites the file.
    pub fn revoke_certificate(
        &self,
        serial: &SerialNumber,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), CertDbError> {
        let mut records = self.records.write();
        let record =
            records.get_mut(serial).ok_or_else(|| CertDbError::UnknownSerial(serial.clone()))?;
        record.status = CertStatus::Revoked;
        record.expires = at.unwrap_or_else(Utc::now);
        self.write(&records)
    }

    /// Revokes every valid certificate issued to the given CommonName with a
    /// single rewrite, returning the serials revoked.
    pub fn revoke_by_name(&self, name: &str) -> Result<Vec<SerialNumber>, CertDbError> {
        let now = Utc::now();
        let mut records = self.records.write();
        let mut revoked = Vec::new();

        for record in records.values_mut() {
            if record.name == name && record.status == CertStatus::Valid {
                record.status = CertStatus::Revoked;
                record.expires = now;
                revoked.push(record.serial.clone());
            }
        }

        if !revoked.is_empty() {
            self.write(&records)?;
        }
        Ok(revoked)
    }

    /// Rewrites the registry file atomically.
    fn write(&self, records: &IndexMap<SerialNumber, CertRecord>) -> Result<(), CertDbError> {
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            for record in records.values() {
                writeln!(
                    tmp,
                    "{}\t{}\t{}\t{}\t{}",
                    record.status.as_str(),
                    format_db_time(record.issued),
                    format_db_time(record.expires),
                    record.serial.to_padded_hex(),
                    record.name,
                )?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// Parses the naive ISO timestamps the registry file carries.
fn parse_db_time(value: &str) -> Option<DateTime<Utc>> {
    value.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

fn format_db_time(value: DateTime<Utc>) -> String {
    value.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Converts an ASN.1 validity timestamp (unix seconds) to UTC.
fn asn1_to_utc(timestamp: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or_default()
}
