// SPDX-License-Identifier: Apache-2.0 OR MIT
// The writer process: drains the shared ring into the log file
//
// Runs as a child of the producer. Because it holds its own mapping of the
// ring and its own file descriptor, it can finish writing everything the
// producer committed even after the producer is gone.

use std::path::PathBuf;

use crate::logfile::LogFile;
use crate::message::{Command, MessageHead, MESSAGE_HEAD_LEN};
use crate::platform::{out_of_band_warning, sleep_ms, ParentWatch, ShmRegion};
use crate::ring::RingBuffer;

/// Size of the coalescing buffer between the ring and the file. Exists so
/// the writer does not issue a write syscall per log message; above about
/// 1 KiB the returns diminish while cache pollution grows.
pub const WRITE_BUF_SIZE: usize = 1024;

/// Idle back-off cap for the drain loop
pub const MAX_SLEEP_MS: u32 = 1024;

/// Sleep used while waiting for the producer's ring to become attachable
pub const WAIT_FOR_OPEN_SLEEP_MS: u32 = 1;

/// Writer configuration, handed over on the command line by the producer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub parent_pid: u32,
    pub ring_size: usize,
    pub filename: PathBuf,
    pub max_file_size: u64,
    pub max_archives: usize,
    pub debug_messages: bool,
}

/// State of one writer process.
pub struct Writer {
    cfg: WriterConfig,
    shm: Option<ShmRegion>,
    ring: RingBuffer,
    log: LogFile,
    write_buf: Box<[u8]>,
    received_close: bool,
}

impl Writer {
    pub fn new(cfg: WriterConfig) -> Self {
        let log = LogFile::new(cfg.filename.clone(), cfg.max_file_size, cfg.max_archives);
        Self {
            cfg,
            shm: None,
            ring: RingBuffer::unattached(),
            log,
            write_buf: vec![0u8; WRITE_BUF_SIZE].into_boxed_slice(),
            received_close: false,
        }
    }

    /// Main loop: attach to the ring, drain it, adapt the sleep to the load,
    /// and leave when the producer says close or dies. One final drain runs
    /// after the loop so that frames committed right before a producer crash
    /// still reach the file.
    pub fn run(&mut self) {
        self.debug_msg(format_args!(
            "writer for '{}' starting ({} byte ring, {} max file bytes, {} archives)",
            self.cfg.filename.display(),
            self.cfg.ring_size,
            self.cfg.max_file_size,
            self.cfg.max_archives
        ));

        let watch = ParentWatch::spawn(self.cfg.parent_pid);

        // Open the file immediately, for predictability's sake
        self.log.open();

        let mut sleep = 0u32;
        while !self.received_close && !watch.parent_dead() {
            let mut idle = false;
            if self.shm.is_none() {
                self.attach_ring();
            }
            if self.shm.is_some() && self.read_messages() == 0 {
                idle = true;
            }

            sleep = if idle {
                (sleep.max(1) * 2).min(MAX_SLEEP_MS)
            } else if self.shm.is_some() {
                0
            } else {
                WAIT_FOR_OPEN_SLEEP_MS
            };

            watch.poll();
            sleep_ms(sleep);
        }

        // Crash-safety drain: pick up whatever is still committed in the ring
        if self.shm.is_some() {
            self.read_messages();
        }

        self.shm = None;
        self.ring = RingBuffer::unattached();
        self.log.close();

        if self.received_close {
            self.debug_msg(format_args!("writer stopping: received close"));
        }
        if watch.parent_dead() {
            self.debug_msg(format_args!("writer stopping: parent is dead"));
        }
        watch.join();
    }

    fn attach_ring(&mut self) {
        // The producer creates the object before spawning us, but be ready
        // to retry in case we won the race anyway
        if let Ok(shm) = ShmRegion::attach(self.cfg.parent_pid, &self.cfg.filename, self.cfg.ring_size)
        {
            // SAFETY: the mapping covers ring_size plus both cursors; the
            // producer initialized the cursors before we could attach.
            unsafe { self.ring.init(shm.ptr(), self.cfg.ring_size, false) };
            self.shm = Some(shm);
        }
    }

    /// One non-blocking drain pass. Returns the number of log messages
    /// consumed. Messages are coalesced into the write buffer; a payload
    /// larger than the buffer skips it and goes to the file straight from
    /// the mapped ring, in at most two spans.
    fn read_messages(&mut self) -> u64 {
        let mut bufpos = 0usize;
        let mut nmessages = 0u64;

        loop {
            let avail = self.ring.available_for_read();
            if avail < MESSAGE_HEAD_LEN {
                break;
            }

            let mut head_bytes = [0u8; MESSAGE_HEAD_LEN];
            if self.ring.read(&mut head_bytes) != MESSAGE_HEAD_LEN {
                panic!("ring read of message head failed");
            }
            let head = match MessageHead::decode(&head_bytes) {
                Some(head) => head,
                None => panic!("unexpected command in log ring"),
            };

            match head.cmd {
                Command::Close => {
                    // Not terminal for this pass: frames committed before
                    // the close are still behind us in the ring
                    self.received_close = true;
                }
                Command::LogMsg => {
                    nmessages += 1;
                    if head.payload_len > avail - MESSAGE_HEAD_LEN {
                        panic!("message payload not available in log ring");
                    }

                    if head.payload_len > WRITE_BUF_SIZE - bufpos {
                        if !self.log.write(&self.write_buf[..bufpos]) {
                            out_of_band_warning(format_args!("failed to write to log file"));
                        }
                        bufpos = 0;
                    }

                    if head.payload_len <= WRITE_BUF_SIZE {
                        let n = self
                            .ring
                            .read(&mut self.write_buf[bufpos..bufpos + head.payload_len]);
                        if n != head.payload_len {
                            panic!("unable to read all of message payload");
                        }
                        bufpos += n;
                    } else {
                        // Too large to stage: write directly from the ring
                        debug_assert_eq!(bufpos, 0);
                        let (span1, span2) = self.ring.read_no_copy(head.payload_len);
                        let mut ok = self.log.write(span1);
                        if ok && !span2.is_empty() {
                            ok = self.log.write(span2);
                        }
                        if !ok {
                            out_of_band_warning(format_args!("failed to write to log file"));
                        }
                        self.ring.advance_read(head.payload_len);
                    }
                }
            }
        }

        if bufpos != 0 && !self.log.write(&self.write_buf[..bufpos]) {
            out_of_band_warning(format_args!("failed to write to log file"));
        }

        nmessages
    }

    fn debug_msg(&self, args: std::fmt::Arguments) {
        if self.cfg.debug_messages {
            println!("uberlogger: {args}");
        }
    }
}
