// SPDX-License-Identifier: Apache-2.0 OR MIT
// Producer-side logging API
//
// A Logger owns the shared ring and the writer child process. Producing a
// record is: format into a stack buffer, stamp the 42-byte prefix in place,
// frame it, stage header and payload into the ring, publish both with one
// cursor store. Everything committed that way survives a producer crash,
// because the writer process drains the ring on its own schedule.

use std::fmt;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use thiserror::Error;

use crate::level::Level;
use crate::message::{max_payload, Command as RingCommand, MessageHead, MESSAGE_HEAD_LEN};
use crate::platform::{my_pid, my_tid, out_of_band_warning, sleep_ms, ShmRegion};
use crate::ring::RingBuffer;
use crate::timekeeper::{format_uint_hex, TimeKeeper};

/// End-of-line appended to every formatted record, fixed at compile time
#[cfg(windows)]
pub const EOL: &[u8] = b"\r\n";
#[cfg(not(windows))]
pub const EOL: &[u8] = b"\n";

/// Byte length of the record prefix: 28-byte timestamp, space, `[L]`, space,
/// 8 hex thread-id chars, space
pub const PREFIX_LEN: usize = 42;

const DEFAULT_RING_SIZE: usize = 1024 * 1024;
const DEFAULT_MAX_FILE_SIZE: u64 = 30 * 1024 * 1024;
const DEFAULT_MAX_ARCHIVES: usize = 3;
const WRITER_INIT_TIMEOUT_MS: u32 = 10_000;
const CLOSE_TIMEOUT_MS: u32 = 10_000;

// Formatting happens on the stack up to this size (prefix and EOL included);
// longer records spill to the heap
const STACK_RECORD_SIZE: usize = 200;

/// Failures surfaced by [`Logger::open`]. Everything past open is handled
/// out-of-band: the producer never learns about writer-side trouble.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot resolve log path '{path}': {source}")]
    ResolvePath {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot create shared memory ring: {0}")]
    RingSetup(#[from] nix::Error),
    #[error("cannot spawn log writer '{path}': {source}")]
    SpawnWriter {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The public logging handle.
///
/// `open` maps the shared ring and spawns the writer process; `close` (also
/// run on drop) asks the writer to finish and tears the ring down. All
/// logging calls are safe from multiple threads; the ring stays
/// single-producer because the enqueue path is serialized internally.
pub struct Logger {
    level: AtomicU8,
    /// When set, every record is also copied to stdout
    tee_stdout: AtomicBool,
    time: TimeKeeper,
    state: Mutex<State>,
}

struct State {
    filename: PathBuf,
    writer_path: Option<PathBuf>,
    ring_size: usize,
    max_file_size: u64,
    max_archives: usize,
    messages_sent: u64,
    is_open: bool,
    stdout_mode: bool,
    shm: Option<ShmRegion>,
    ring: RingBuffer,
    child: Option<Child>,
    prefix_override: Option<[u8; PREFIX_LEN]>,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            level: AtomicU8::new(Level::Info.as_u8()),
            tee_stdout: AtomicBool::new(false),
            time: TimeKeeper::new(),
            state: Mutex::new(State {
                filename: PathBuf::new(),
                writer_path: None,
                ring_size: DEFAULT_RING_SIZE,
                max_file_size: DEFAULT_MAX_FILE_SIZE,
                max_archives: DEFAULT_MAX_ARCHIVES,
                messages_sent: 0,
                is_open: false,
                stdout_mode: false,
                shm: None,
                ring: RingBuffer::unattached(),
                child: None,
                prefix_override: None,
            }),
        }
    }

    /// Set the ring size used to communicate with the writer process,
    /// rounded up to the next power of two. The ring also caps the largest
    /// single record. Must be called before `open`; afterwards the call
    /// warns and does nothing.
    pub fn set_ring_buffer_size(&self, size: usize) {
        let mut st = self.state.lock().unwrap();
        if st.is_open {
            out_of_band_warning(format_args!("set_ring_buffer_size must be called before open"));
            return;
        }
        st.ring_size = size.next_power_of_two();
    }

    /// Set the rotation policy. Must be called before `open`.
    pub fn set_archive_settings(&self, max_file_size: u64, max_archives: usize) {
        let mut st = self.state.lock().unwrap();
        if st.is_open {
            out_of_band_warning(format_args!("set_archive_settings must be called before open"));
            return;
        }
        st.max_file_size = max_file_size;
        st.max_archives = max_archives;
    }

    /// Override the writer executable. By default a sibling `uberlogger` of
    /// the current executable is used, falling back to `$PATH`.
    pub fn set_writer_path(&self, path: impl Into<PathBuf>) {
        let mut st = self.state.lock().unwrap();
        if st.is_open {
            out_of_band_warning(format_args!("set_writer_path must be called before open"));
            return;
        }
        st.writer_path = Some(path.into());
    }

    /// May be called at any time, from any thread.
    pub fn set_level(&self, level: Level) {
        self.level.store(level.as_u8(), Ordering::Relaxed);
    }

    pub fn get_level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed)).unwrap_or(Level::Info)
    }

    /// Also copy every record to stdout. No effect in stdout-only mode.
    pub fn tee_stdout(&self, enabled: bool) {
        self.tee_stdout.store(enabled, Ordering::Relaxed);
    }

    pub fn filename(&self) -> PathBuf {
        self.state.lock().unwrap().filename.clone()
    }

    pub fn messages_sent(&self) -> u64 {
        self.state.lock().unwrap().messages_sent
    }

    /// Create the shared ring and spawn the writer process for `path`.
    /// Opening an already-open logger is a no-op.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let mut st = self.state.lock().unwrap();
        if st.is_open {
            return Ok(());
        }

        let path = std::path::absolute(path.as_ref()).map_err(|source| Error::ResolvePath {
            path: path.as_ref().to_path_buf(),
            source,
        })?;

        let shm = match ShmRegion::create(my_pid(), &path, st.ring_size) {
            Ok(shm) => shm,
            Err(err) => {
                out_of_band_warning(format_args!("failed to create shared memory ring: {err}"));
                return Err(Error::RingSetup(err));
            }
        };
        let mut ring = RingBuffer::unattached();
        // SAFETY: the mapping is shm_size_for_ring(ring_size) bytes, which
        // covers the ring plus both cursors, and we are its creator.
        unsafe { ring.init(shm.ptr(), st.ring_size, true) };

        let writer = st
            .writer_path
            .clone()
            .unwrap_or_else(default_writer_path);
        let child = Command::new(&writer)
            .arg(my_pid().to_string())
            .arg(st.ring_size.to_string())
            .arg(&path)
            .arg(st.max_file_size.to_string())
            .arg(st.max_archives.to_string())
            .spawn()
            .map_err(|source| {
                out_of_band_warning(format_args!(
                    "failed to spawn log writer '{}': {source}",
                    writer.display()
                ));
                Error::SpawnWriter {
                    path: writer.clone(),
                    source,
                }
            })?; // the shm mapping unwinds with this error and is unlinked

        st.filename = path;
        st.shm = Some(shm);
        st.ring = ring;
        st.child = Some(child);
        st.is_open = true;
        st.stdout_mode = false;
        st.messages_sent = 0;
        Ok(())
    }

    /// Open without a writer process: records go to stdout instead of a
    /// file. Useful in unit tests of the formatting path.
    pub fn open_stdout(&self) {
        let mut st = self.state.lock().unwrap();
        if st.is_open {
            return;
        }
        st.is_open = true;
        st.stdout_mode = true;
        st.messages_sent = 0;
    }

    /// Ask the writer to finish, wait for it (bounded), and tear down the
    /// ring. Idempotent; also run on drop.
    pub fn close(&self) {
        let mut st = self.state.lock().unwrap();
        if !st.is_open {
            return;
        }
        if st.stdout_mode {
            st.is_open = false;
            st.stdout_mode = false;
            return;
        }

        send_frame(&st.ring, RingCommand::Close, &[]);

        if let Some(mut child) = st.child.take() {
            if !wait_for_exit(&mut child, CLOSE_TIMEOUT_MS) {
                out_of_band_warning(format_args!(
                    "timed out waiting for log writer to exit; releasing it"
                ));
                // The writer's own parent-death watch will finish the drain
            }
        }

        if let Some(mut shm) = st.shm.take() {
            shm.unlink();
        }
        st.ring = RingBuffer::unattached();
        st.is_open = false;
    }

    /// Enqueue raw bytes as one record. Blocks (with back-off) rather than
    /// drop when the ring is full; payloads larger than the ring's single
    /// frame bound are truncated with a warning.
    pub fn log_raw(&self, data: &[u8]) {
        let mut st = self.state.lock().unwrap();
        self.log_raw_locked(&mut st, data);
    }

    fn log_raw_locked(&self, st: &mut State, data: &[u8]) {
        if !st.is_open {
            out_of_band_warning(format_args!("log_raw called but log is not open"));
            return;
        }

        if st.stdout_mode {
            let _ = std::io::stdout().write_all(data);
            st.messages_sent += 1;
            return;
        }

        if self.tee_stdout.load(Ordering::Relaxed) {
            let _ = std::io::stdout().write_all(data);
        }

        let cap = max_payload(st.ring.size());
        let data = if data.len() > cap {
            out_of_band_warning(format_args!(
                "log message of {} bytes exceeds the ring's frame limit of {cap}; truncating",
                data.len()
            ));
            &data[..cap]
        } else {
            data
        };

        send_frame(&st.ring, RingCommand::LogMsg, data);
        st.messages_sent += 1;

        if st.messages_sent == 1 {
            // At process startup the writer has probably not yet opened the
            // shared memory. If we die during that window, the ring vanishes
            // with us and the messages inside it are lost. Waiting for the
            // first frame to be drained proves the writer holds a second
            // reference, which closes the window for every later message
            // too. Doing it here rather than at open gives the writer time
            // to come up while we do useful work.
            if !wait_for_ring_empty(&st.ring, WRITER_INIT_TIMEOUT_MS) {
                out_of_band_warning(format_args!(
                    "timed out waiting for the log writer to consume messages"
                ));
            }
        }
    }

    /// Format a record at `level`: 42-byte prefix, the formatted message,
    /// platform end-of-line. `Fatal` panics after the record is committed.
    pub fn log(&self, level: Level, args: fmt::Arguments) {
        if level.as_u8() < self.level.load(Ordering::Relaxed) {
            return;
        }

        let mut rec = RecordBuf::new();
        let _ = rec.write_fmt(args);
        rec.push(EOL);

        {
            let mut st = self.state.lock().unwrap();
            let buf = rec.as_mut_slice();
            match st.prefix_override {
                Some(p) => buf[..PREFIX_LEN].copy_from_slice(&p),
                None => {
                    self.time.format((&mut buf[..28]).try_into().unwrap());
                    buf[28] = b' ';
                    buf[29] = b'[';
                    buf[30] = level.as_char() as u8;
                    buf[31] = b']';
                    buf[32] = b' ';
                    format_uint_hex(&mut buf[33..41], my_tid());
                    buf[41] = b' ';
                }
            }
            self.log_raw_locked(&mut st, buf);
        }

        if level == Level::Fatal {
            let msg = rec.as_mut_slice();
            let payload = &msg[PREFIX_LEN..msg.len() - EOL.len()];
            panic!("fatal: {}", String::from_utf8_lossy(payload));
        }
    }

    pub fn debug(&self, args: fmt::Arguments) {
        self.log(Level::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments) {
        self.log(Level::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments) {
        self.log(Level::Warn, args);
    }

    pub fn error(&self, args: fmt::Arguments) {
        self.log(Level::Error, args);
    }

    pub fn fatal(&self, args: fmt::Arguments) {
        self.log(Level::Fatal, args);
    }

    /// Pin the 42-byte record prefix to a fixed value, making formatted
    /// output byte-reproducible. Test seam; not part of the stable API.
    #[doc(hidden)]
    pub fn override_prefix(&self, prefix: &[u8; PREFIX_LEN]) {
        self.state.lock().unwrap().prefix_override = Some(*prefix);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.close();
    }
}

fn default_writer_path() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("uberlogger");
            if sibling.is_file() {
                return sibling;
            }
        }
    }
    PathBuf::from("uberlogger")
}

/// Stage a frame (header then payload) and publish it with a single commit.
/// Waits for space with a tiered back-off: yield for the first thousand
/// attempts, 1 ms for the next thousand, 5 ms from then on, warning once
/// around the two second mark. Records are never dropped here.
fn send_frame(ring: &RingBuffer, cmd: RingCommand, payload: &[u8]) {
    let frame_len = MESSAGE_HEAD_LEN + payload.len();
    let mut spins: u32 = 0;
    while ring.available_for_write() < frame_len {
        spins += 1;
        if spins == 2001 {
            out_of_band_warning(format_args!(
                "log ring buffer still full after ~2s; writer may be stalled (still waiting)"
            ));
        }
        let ms = if spins <= 1000 {
            0
        } else if spins <= 2000 {
            1
        } else {
            5
        };
        sleep_ms(ms);
    }

    let head = MessageHead::new(cmd, payload.len());
    ring.write_no_commit(0, &head.encode());
    if !payload.is_empty() {
        ring.write_no_commit(MESSAGE_HEAD_LEN, payload);
    }
    ring.commit(frame_len);
}

fn wait_for_ring_empty(ring: &RingBuffer, timeout_ms: u32) -> bool {
    let start = Instant::now();
    while ring.available_for_read() != 0 {
        if start.elapsed().as_millis() >= timeout_ms as u128 {
            return false;
        }
        sleep_ms(1);
    }
    true
}

fn wait_for_exit(child: &mut Child, timeout_ms: u32) -> bool {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => {}
            Err(_) => return false,
        }
        if start.elapsed().as_millis() >= timeout_ms as u128 {
            return false;
        }
        sleep_ms(1);
    }
}

/// Record assembly buffer: 42 bytes reserved for the prefix, then the
/// formatted payload. Stays on the stack for typical records and moves to
/// the heap when the record outgrows it.
struct RecordBuf {
    stack: [u8; STACK_RECORD_SIZE],
    heap: Option<Vec<u8>>,
    len: usize,
}

impl RecordBuf {
    fn new() -> Self {
        Self {
            stack: [0; STACK_RECORD_SIZE],
            heap: None,
            len: PREFIX_LEN,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        if let Some(v) = &mut self.heap {
            v.extend_from_slice(bytes);
        } else if self.len + bytes.len() <= STACK_RECORD_SIZE {
            self.stack[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        } else {
            let mut v = Vec::with_capacity((self.len + bytes.len()) * 2);
            v.extend_from_slice(&self.stack[..self.len]);
            v.extend_from_slice(bytes);
            self.heap = Some(v);
        }
        self.len += bytes.len();
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.heap {
            Some(v) => &mut v[..],
            None => &mut self.stack[..self.len],
        }
    }
}

impl fmt::Write for RecordBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push(s.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let log = Logger::new();
        assert_eq!(log.get_level(), Level::Info);
        assert_eq!(log.messages_sent(), 0);
        let st = log.state.lock().unwrap();
        assert_eq!(st.ring_size, 1024 * 1024);
        assert_eq!(st.max_file_size, 30 * 1024 * 1024);
        assert_eq!(st.max_archives, 3);
    }

    #[test]
    fn test_ring_size_rounds_to_power_of_two() {
        let log = Logger::new();
        log.set_ring_buffer_size(1000);
        assert_eq!(log.state.lock().unwrap().ring_size, 1024);
        log.set_ring_buffer_size(4096);
        assert_eq!(log.state.lock().unwrap().ring_size, 4096);
    }

    #[test]
    fn test_setters_rejected_after_open() {
        let log = Logger::new();
        log.open_stdout();
        log.set_ring_buffer_size(2048);
        log.set_archive_settings(1, 1);
        let (ring_size, max_file_size) = {
            let st = log.state.lock().unwrap();
            (st.ring_size, st.max_file_size)
        };
        assert_eq!(ring_size, 1024 * 1024);
        assert_eq!(max_file_size, 30 * 1024 * 1024);
        log.close();
    }

    #[test]
    fn test_level_filter_suppresses_records() {
        let log = Logger::new();
        log.open_stdout();
        log.set_level(Level::Error);
        log.info(format_args!("dropped"));
        assert_eq!(log.messages_sent(), 0);
        log.error(format_args!("kept"));
        assert_eq!(log.messages_sent(), 1);
        log.close();
    }

    #[test]
    fn test_close_is_idempotent() {
        let log = Logger::new();
        log.open_stdout();
        log.close();
        log.close();
        assert_eq!(log.messages_sent(), 0);
    }

    #[test]
    fn test_log_raw_warns_when_closed() {
        let log = Logger::new();
        log.log_raw(b"nobody is listening");
        assert_eq!(log.messages_sent(), 0);
    }

    #[test]
    #[should_panic(expected = "fatal: boom")]
    fn test_fatal_panics_after_commit() {
        let log = Logger::new();
        log.open_stdout();
        log.fatal(format_args!("boom"));
    }

    #[test]
    fn test_record_buf_stays_on_stack() {
        let mut rec = RecordBuf::new();
        rec.push(b"short payload");
        rec.push(EOL);
        assert!(rec.heap.is_none());
        assert_eq!(rec.len, PREFIX_LEN + 13 + EOL.len());
        let slice = rec.as_mut_slice();
        assert_eq!(&slice[PREFIX_LEN..PREFIX_LEN + 13], b"short payload");
    }

    #[test]
    fn test_record_buf_spills_to_heap() {
        let mut rec = RecordBuf::new();
        let big = vec![b'x'; 500];
        rec.push(&big);
        rec.push(EOL);
        assert!(rec.heap.is_some());
        assert_eq!(rec.len, PREFIX_LEN + 500 + EOL.len());
        let slice = rec.as_mut_slice();
        assert_eq!(&slice[PREFIX_LEN..PREFIX_LEN + 500], &big[..]);
        assert_eq!(&slice[PREFIX_LEN + 500..], EOL);
    }

    #[test]
    fn test_record_buf_spill_straddles_boundary() {
        let mut rec = RecordBuf::new();
        // Fill just under the stack limit, then push across it
        rec.push(&vec![b'a'; STACK_RECORD_SIZE - PREFIX_LEN - 1]);
        assert!(rec.heap.is_none());
        rec.push(b"bc");
        assert!(rec.heap.is_some());
        let len = rec.len;
        let slice = rec.as_mut_slice();
        assert_eq!(slice.len(), len);
        assert_eq!(&slice[len - 3..], b"abc");
    }
}
