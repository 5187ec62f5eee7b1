#![allow(dead_code)]
// Shared helpers for the end-to-end suites

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uberlog::Logger;

/// The real writer binary built alongside the tests
pub fn writer_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_uberlogger"))
}

/// A logger wired to the freshly built writer binary. Test binaries live in
/// `target/debug/deps/`, so the default sibling lookup would miss it.
pub fn new_logger() -> Logger {
    let logger = Logger::new();
    logger.set_writer_path(writer_bin());
    logger
}

pub fn read_log(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap_or_default()
}

/// Deterministic printable payload of exactly `len` bytes: counting decimals
/// with occasional newlines, like a real log body.
pub fn make_msg(len: usize, seed: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + 8);
    let mut seed = seed;
    let mut i = 0usize;
    while out.len() < len {
        out.extend_from_slice(format!("{seed} ").as_bytes());
        seed += 1;
        i += 1;
        if (i + seed) % 20 == 0 {
            out.push(b'\n');
        }
    }
    out.truncate(len);
    out
}

/// Poll until the file's content equals `expected`, for writers that finish
/// on their own schedule (crash-safety path).
pub fn wait_for_content(path: &Path, expected: &[u8], timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if read_log(path) == expected {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
