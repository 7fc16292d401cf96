// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Binary wire format primitives.
//!
//! ```text
//! Envelope := Magic(4) VersionByte(1) TimestampBE(8) PayloadLenBE(4) Payload[PayloadLen] SigLenBE(2) Sig[SigLen]
//! Strings  := LenBE(4) UTF8Bytes[Len]
//! ```
//!
//! All integers are big-endian. This module owns only the generic
//! read/write primitives and the envelope frame; each cache module encodes
//! its own payload (`TargetEntry`, `ActionEntry`, graph `Node`/`Edge`, ...)
//! using these primitives, since the payload shapes differ per cache.

use std::path::Path;

use crate::envelope::{IntegrityKey, SignedEnvelope};
use crate::error::Error;

/// Errors specific to decoding malformed or truncated byte streams. These
/// are always surfaced to callers as `Error::CacheCorrupted`.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of buffer")]
    Eof,
    #[error("invalid magic bytes")]
    BadMagic,
    #[error("unsupported version byte {0}")]
    UnsupportedVersion(u8),
    #[error("invalid utf-8 string")]
    InvalidUtf8,
}

impl CodecError {
    pub fn into_corrupted(self, component: &'static str) -> Error {
        Error::CacheCorrupted {
            component,
            reason: self.to_string(),
        }
    }
}

/// Append-only byte buffer writer with the framing helpers the wire format
/// needs.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// `LenBE(4) UTF8Bytes[Len]`.
    pub fn write_string(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-based reader with bounds checking; every method returns
/// `CodecError::Eof` rather than panicking on truncated input.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

#[allow(clippy::expect_used)]
impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.checked_add(n).ok_or(CodecError::Eof)?;
        if end > self.buf.len() {
            return Err(CodecError::Eof);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().expect("2 bytes")))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        self.take(n)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Frame `payload` (already-encoded bytes for a specific cache format) into
/// a signed, timestamped `Envelope` with the given 4-byte magic and version.
pub fn encode_envelope(
    magic: [u8; 4],
    version: u8,
    envelope: &SignedEnvelope,
) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_bytes(&magic);
    w.write_u8(version);
    w.write_u64(envelope.timestamp);
    w.write_u32(envelope.payload.len() as u32);
    w.write_bytes(&envelope.payload);
    w.write_u16(envelope.signature.len() as u16);
    w.write_bytes(&envelope.signature);
    w.into_bytes()
}

/// Inverse of `encode_envelope`. Returns the magic, version, and a
/// `SignedEnvelope` the caller must still `verify()`/`is_expired()` before
/// trusting the payload. This function does not reject an unrecognized
/// version byte itself — deciding which versions are supported, and
/// treating an unknown one as a miss to be rewritten, belongs to the cache
/// module that owns the payload shape.
#[allow(clippy::expect_used)]
pub fn decode_envelope(bytes: &[u8]) -> Result<([u8; 4], u8, SignedEnvelope), CodecError> {
    let mut r = Reader::new(bytes);
    let magic_bytes = r.read_bytes(4)?;
    let magic: [u8; 4] = magic_bytes.try_into().expect("4 bytes");
    let version = r.read_u8()?;
    let timestamp = r.read_u64()?;
    let payload_len = r.read_u32()? as usize;
    let payload = r.read_bytes(payload_len)?.to_vec();
    let sig_len = r.read_u16()? as usize;
    let signature = r.read_bytes(sig_len)?.to_vec();
    Ok((
        magic,
        version,
        SignedEnvelope {
            payload,
            timestamp,
            signature,
        },
    ))
}

/// Atomically write `bytes` to `path` via a temp file + rename, matching
/// the blob store's crash-safety discipline.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("tmp-{}", std::process::id()));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// Sign a freshly-encoded payload and wrap it in the on-disk envelope
/// frame, writing it atomically to `path`.
pub fn write_signed_file(
    path: &Path,
    magic: [u8; 4],
    version: u8,
    payload: Vec<u8>,
    key: &IntegrityKey,
    now: std::time::SystemTime,
) -> Result<(), Error> {
    let envelope = crate::envelope::sign(payload, key, now);
    let bytes = encode_envelope(magic, version, &envelope);
    write_atomic(path, &bytes).map_err(|source| Error::IoError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[path = "codec_tests.rs"]
mod tests;
