// End-to-end tests of the producer API against the real writer process

mod common;

use common::{make_msg, new_logger, read_log};
use tempfile::tempdir;
use uberlog::logger::EOL;
use uberlog::message::max_payload;
use uberlog::platform::{my_pid, shm_object_name, ShmRegion};
use uberlog::{log_warn, Level};

const TEST_PREFIX: &[u8; 42] = b"2015-07-15T14:53:51.979+0200 [I] 00001fdc ";

#[test]
fn test_process_lifecycle() {
    // Ten full open/log/close cycles, each leaving exactly the raw payload
    for _ in 0..10 {
        let dir = tempdir().unwrap();
        let path = dir.path().join("utest.log");

        let log = new_logger();
        log.open(&path).expect("open");
        log.log_raw(b"hello");
        log.close();

        assert_eq!(read_log(&path), b"hello");
    }
}

#[test]
fn test_open_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("utest.log");

    let log = new_logger();
    log.open(&path).expect("open");
    log.open(&path).expect("second open is a no-op");
    log.log_raw(b"once");
    log.close();
    log.close();

    assert_eq!(read_log(&path), b"once");
}

#[test]
fn test_close_unlinks_the_ring() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("utest.log");

    let log = new_logger();
    log.open(&path).expect("open");
    let abs = log.filename();
    log.close();

    // The named region is gone; only the writer's dying mapping may remain
    assert!(ShmRegion::attach(my_pid(), &abs, 1024 * 1024).is_err());
    let name = shm_object_name(my_pid(), &abs);
    assert!(!std::path::Path::new(&format!("/dev/shm/{}", &name[1..])).exists());
}

#[test]
fn test_drop_closes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("utest.log");

    {
        let log = new_logger();
        log.open(&path).expect("open");
        log.log_raw(b"dropped, not lost");
    }

    assert_eq!(read_log(&path), b"dropped, not lost");
}

#[test]
fn test_formatted_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("utest.log");

    let log = new_logger();
    log.open(&path).expect("open");
    log.override_prefix(TEST_PREFIX);

    let mut expect = Vec::new();
    for size in 0..=1000usize {
        let msg = String::from_utf8(make_msg(size, size)).unwrap();
        log_warn!(log, "{}", msg);
        expect.extend_from_slice(TEST_PREFIX);
        expect.extend_from_slice(msg.as_bytes());
        expect.extend_from_slice(EOL);
    }
    log.close();

    assert_eq!(read_log(&path), expect);
}

#[test]
fn test_level_filter_end_to_end() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("utest.log");

    let log = new_logger();
    log.open(&path).expect("open");
    log.override_prefix(TEST_PREFIX);
    log.set_level(Level::Error);

    log_warn!(log, "should not appear");
    log.log(Level::Error, format_args!("kept"));
    log.close();

    let mut expect = TEST_PREFIX.to_vec();
    expect.extend_from_slice(b"kept");
    expect.extend_from_slice(EOL);
    assert_eq!(read_log(&path), expect);
}

// Ring stress in the shape the writer's staging buffer cares about: one run
// in a ring smaller than the buffer and one larger, with one payload size
// (5297) that bypasses the buffer entirely.
fn ring_stress(ring_size: usize) {
    let sizes = [1usize, 2, 3, 59, 113, 307, 709, 5297];
    let cap = max_payload(ring_size);

    let dir = tempdir().unwrap();
    let path = dir.path().join("utest.log");

    let log = new_logger();
    log.set_ring_buffer_size(ring_size);
    log.open(&path).expect("open");

    let mut expect = Vec::new();
    let mut cursor = 0usize;
    for i in 0..1000 {
        while sizes[cursor] > cap {
            cursor = (cursor + 1) % sizes.len();
        }
        let msg = make_msg(sizes[cursor], i);
        log.log_raw(&msg);
        expect.extend_from_slice(&msg);
        cursor = (cursor + 1) % sizes.len();
    }
    log.close();

    assert_eq!(read_log(&path), expect);
}

#[test]
fn test_ring_stress_small_ring() {
    ring_stress(512);
}

#[test]
fn test_ring_stress_large_ring() {
    ring_stress(8192);
}

#[test]
fn test_payload_at_frame_bound_is_kept_whole() {
    let ring_size = 512;
    let dir = tempdir().unwrap();
    let path = dir.path().join("utest.log");

    let log = new_logger();
    log.set_ring_buffer_size(ring_size);
    log.open(&path).expect("open");

    let msg = make_msg(max_payload(ring_size), 7);
    log.log_raw(&msg);
    log.close();

    assert_eq!(read_log(&path), msg);
}

#[test]
fn test_payload_past_frame_bound_is_truncated() {
    let ring_size = 512;
    let dir = tempdir().unwrap();
    let path = dir.path().join("utest.log");

    let log = new_logger();
    log.set_ring_buffer_size(ring_size);
    log.open(&path).expect("open");

    let msg = make_msg(max_payload(ring_size) + 1, 7);
    log.log_raw(&msg);
    log.close();

    assert_eq!(read_log(&path), &msg[..max_payload(ring_size)]);
}

#[test]
fn test_open_fails_when_writer_is_missing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("utest.log");

    let log = uberlog::Logger::new();
    log.set_writer_path("/nonexistent/uberlogger");
    assert!(log.open(&path).is_err());

    // The failed open must not leak the ring's name
    let abs = std::path::absolute(&path).unwrap();
    assert!(ShmRegion::attach(my_pid(), &abs, 1024 * 1024).is_err());
}
