// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Conversion between the client codepage and the UTF-8 paths handed to the
//! operations table.

use pktfs_proto::ErrorCode;
use serde::{Deserialize, Serialize};

pub trait Charset: Send + Sync {
    fn name(&self) -> &'static str;

    /// Client bytes to a UTF-8 string
    fn decode(&self, bytes: &[u8]) -> Result<String, ErrorCode>;

    /// UTF-8 string to client bytes. Unmappable characters become `?`.
    fn encode(&self, text: &str) -> Vec<u8>;
}

/// ISO-8859-1, the native codepage
#[derive(Clone, Copy, Debug, Default)]
pub struct Latin1;

impl Charset for Latin1 {
    fn name(&self) -> &'static str {
        "latin1"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, ErrorCode> {
        Ok(bytes.iter().map(|&b| char::from(b)).collect())
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        text.chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect()
    }
}

/// Pass-through for clients that already speak UTF-8
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8;

impl Charset for Utf8 {
    fn name(&self) -> &'static str {
        "utf8"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, ErrorCode> {
        String::from_utf8(bytes.to_vec()).map_err(|_| ErrorCode::InvalidComponentName)
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharsetKind {
    #[default]
    Latin1,
    Utf8,
}

impl CharsetKind {
    pub fn build(self) -> Box<dyn Charset> {
        match self {
            CharsetKind::Latin1 => Box::new(Latin1),
            CharsetKind::Utf8 => Box::new(Utf8),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin1_roundtrip() {
        let bytes = b"Gr\xfc\xdfe.txt";
        let text = Latin1.decode(bytes).expect("decode");
        assert_eq!(text, "Grüße.txt");
        assert_eq!(Latin1.encode(&text), bytes.to_vec());
    }

    #[test]
    fn test_latin1_unmappable() {
        assert_eq!(Latin1.encode("a€b"), b"a?b".to_vec());
    }

    #[test]
    fn test_utf8_rejects_invalid() {
        assert_eq!(Utf8.decode(b"\xff"), Err(ErrorCode::InvalidComponentName));
        assert_eq!(Utf8.decode("ü".as_bytes()).expect("decode"), "ü");
    }
}
