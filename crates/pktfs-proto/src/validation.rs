// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Schema validation and length-prefixed framing for control messages

use std::io::{self, Read, Write};

use ssz::{Decode, Encode};
use thiserror::Error;

use crate::messages::*;

/// Upper bound on one framed message
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Validation error
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("schema validation failed: {0}")]
    Schema(String),
    #[error("SSZ decoding failed: {0}")]
    SszDecode(String),
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Validate a decoded request against its logical schema
pub fn validate_request(request: &ControlRequest) -> Result<(), ValidationError> {
    let version = match request {
        ControlRequest::Packet((version, _)) | ControlRequest::StartupInfo(version) => version,
    };
    if version != b"1" {
        return Err(ValidationError::Schema(format!(
            "unsupported version {:?}",
            String::from_utf8_lossy(version)
        )));
    }
    if let ControlRequest::Packet((_, packet)) = request {
        validate_packet(packet)?;
    }
    Ok(())
}

/// Structural checks that do not need filesystem state
pub fn validate_packet(packet: &Packet) -> Result<(), ValidationError> {
    match packet {
        Packet::LocateObject(args) if args.mode > crate::codes::EXCLUSIVE_LOCK => Err(
            ValidationError::Schema(format!("invalid lock mode {}", args.mode)),
        ),
        Packet::ChangeMode(args) if args.mode > crate::codes::EXCLUSIVE_LOCK => Err(
            ValidationError::Schema(format!("invalid lock mode {}", args.mode)),
        ),
        Packet::Seek(args) | Packet::SetFileSize(args)
            if args.origin > crate::codes::OFFSET_END =>
        {
            Err(ValidationError::Schema(format!(
                "invalid seek origin {}",
                args.origin
            )))
        }
        Packet::ExamineAll(args)
            if args.data_type < crate::codes::ED_NAME || args.data_type > crate::codes::ED_OWNER =>
        {
            Err(ValidationError::Schema(format!(
                "invalid examine data type {}",
                args.data_type
            )))
        }
        _ => Ok(()),
    }
}

/// Write one message with its u32 little-endian length prefix
pub fn write_frame<W: Write, T: Encode>(writer: &mut W, message: &T) -> Result<(), FrameError> {
    let bytes = message.as_ssz_bytes();
    if bytes.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(bytes.len()));
    }
    writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read one length-prefixed message
pub fn read_frame<R: Read, T: Decode>(reader: &mut R) -> Result<T, FrameError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge(len));
    }
    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer)?;
    T::from_ssz_bytes(&buffer)
        .map_err(|e| ValidationError::SszDecode(format!("{:?}", e)).into())
}
