// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::Path;
use std::time::SystemTime;

use super::*;
use crate::envelope::IntegrityKey;

fn key() -> IntegrityKey {
    IntegrityKey::derive(Path::new("/ws"), b"secret")
}

#[test]
fn writer_reader_round_trip_scalars() {
    let mut w = Writer::new();
    w.write_u8(7);
    w.write_u16(1234);
    w.write_u32(0xDEAD_BEEF);
    w.write_u64(0x0102_0304_0506_0708);
    w.write_string("hello");

    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert_eq!(r.read_u8().unwrap(), 7);
    assert_eq!(r.read_u16().unwrap(), 1234);
    assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
    assert_eq!(r.read_u64().unwrap(), 0x0102_0304_0506_0708);
    assert_eq!(r.read_string().unwrap(), "hello");
    assert_eq!(r.remaining(), 0);
}

#[test]
fn reader_reports_eof_on_truncated_buffer() {
    let mut r = Reader::new(&[0x00, 0x01]);
    assert!(r.read_u32().is_err());
}

#[test]
fn reader_rejects_string_len_exceeding_buffer() {
    let mut w = Writer::new();
    w.write_u32(100); // claims 100 bytes follow
    w.write_bytes(b"short");
    let bytes = w.into_bytes();
    let mut r = Reader::new(&bytes);
    assert!(r.read_string().is_err());
}

#[test]
fn envelope_round_trips_through_wire_format() {
    let payload = b"cache payload".to_vec();
    let envelope = crate::envelope::sign(payload.clone(), &key(), SystemTime::now());
    let bytes = encode_envelope(*b"TCRH", 1, &envelope);

    let (magic, version, decoded) = decode_envelope(&bytes).unwrap();
    assert_eq!(&magic, b"TCRH");
    assert_eq!(version, 1);
    assert_eq!(decoded.payload, payload);
    assert!(crate::envelope::verify(&decoded, &key()));
}

#[test]
fn decode_envelope_fails_on_truncated_input() {
    let envelope = crate::envelope::sign(b"x".to_vec(), &key(), SystemTime::now());
    let mut bytes = encode_envelope(*b"ACRH", 1, &envelope);
    bytes.truncate(bytes.len() - 3);
    assert!(decode_envelope(&bytes).is_err());
}

#[test]
fn write_signed_file_then_read_back_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.bin");
    write_signed_file(
        &path,
        *b"TCRH",
        1,
        b"payload".to_vec(),
        &key(),
        SystemTime::now(),
    )
    .unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let (magic, _version, envelope) = decode_envelope(&bytes).unwrap();
    assert_eq!(&magic, b"TCRH");
    assert!(crate::envelope::verify(&envelope, &key()));
}
