#![allow(dead_code)]
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use std::sync::Once;

use evtx_timeline::{DecodedRecord, decode_event_xml};
use jiff::Timestamp;

static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
pub fn ensure_env_logger_initialized() {
    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}

pub fn samples_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("samples")
        .canonicalize()
        .unwrap()
}

pub fn security_4624_xml() -> &'static str {
    include_str!("../samples/security_4624.xml")
}

pub fn security_1102_xml() -> &'static str {
    include_str!("../samples/security_1102.xml")
}

pub fn application_unnamed_xml() -> &'static str {
    include_str!("../samples/application_unnamed.xml")
}

pub fn decode(xml: &str) -> DecodedRecord {
    decode_event_xml(xml, Timestamp::UNIX_EPOCH).expect("sample to decode")
}

/// A file with an `.evtx` extension that is not an event log.
pub fn write_garbage_evtx(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    let mut f = File::create(&path).unwrap();
    f.write_all(b"ElfFile? no, just some bytes").unwrap();
    path
}

/// A file header with no chunks behind it, the smallest container `evtx` accepts.
pub fn write_empty_evtx(dir: &Path, name: &str) -> PathBuf {
    let mut header = vec![0_u8; 4096];
    header[..8].copy_from_slice(b"ElfFile\0");
    header[40..42].copy_from_slice(&4096_u16.to_le_bytes());

    let path = dir.join(name);
    File::create(&path).unwrap().write_all(&header).unwrap();
    path
}
