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

use crate::CertDbError;

use std::fmt;

/// A certificate serial number.
///
/// Serial numbers are 160-bit integers, stored on disk as 40 hex digits.
/// Internally the value is normalized lowercase hex with leading zeros
/// stripped, so lookups are insensitive to padding and case.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SerialNumber(String);

impl SerialNumber {
    /// Parses a serial number from hex digits.
    pub fn from_hex(hex: &str) -> Result<Self, CertDbError> {
        let hex = hex.trim();
        if hex.is_empty() || !hex.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(CertDbError::InvalidSerial(hex.to_string()));
        }
        let normalized = hex.trim_start_matches('0').to_ascii_lowercase();
        match normalized.is_empty() {
            true => Ok(Self("0".to_string())),
            false => Ok(Self(normalized)),
        }
    }

    /// Builds a serial number from big-endian bytes, as presented by a peer
    /// certificate.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
        Self::from_hex(&hex).unwrap_or_else(|_| Self("0".to_string()))
    }

    /// Returns the normalized hex digits.
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Returns the on-disk form: hex, zero-padded to 40 digits.
    pub fn to_padded_hex(&self) -> String {
        format!("{:0>40}", self.0)
    }

    /// Returns the value in decimal, however wide it is.
    pub fn to_decimal(&self) -> String {
        // Repeated division by 10 over the base-16 digit array.
        let mut digits: Vec<u8> =
            self.0.bytes().map(|byte| (byte as char).to_digit(16).unwrap() as u8).collect();
        let mut out = Vec::new();

        while !digits.is_empty() {
            let mut remainder = 0u32;
            let mut quotient = Vec::with_capacity(digits.len());
            for &digit in &digits {
                let current = remainder * 16 + digit as u32;
                let q = (current / 10) as u8;
                remainder = current % 10;
                if !quotient.is_empty() || q != 0 {
                    quotient.push(q);
                }
            }
            out.push(b'0' + remainder as u8);
            digits = quotient;
        }

        if out.is_empty() {
            out.push(b'0');
        }
        out.reverse();
        String::from_utf8(out).expect("decimal digits are ascii")
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
