// SPDX-License-Identifier: Apache-2.0 OR MIT
// Wait-free SPSC byte ring over a shared memory mapping
//
// The layout is the payload region followed by the two cursors, so one
// mapping carries everything: [payload bytes; size][read: usize][write: usize]

use std::sync::atomic::{AtomicUsize, Ordering};

/// Single-producer single-consumer byte ring.
///
/// The buffer size must be a power of two; both cursors are kept masked into
/// `[0, size)`, and one byte of slack distinguishes empty from full, so the
/// usable capacity is `size - 1`.
///
/// Multi-part messages are written with [`write_no_commit`] at increasing
/// offsets and published with a single [`commit`] covering the total length.
/// Until that commit, the consumer cannot see any of the staged bytes, which
/// is what makes a message an all-or-nothing unit across a process crash.
///
/// [`write_no_commit`]: RingBuffer::write_no_commit
/// [`commit`]: RingBuffer::commit
pub struct RingBuffer {
    buf: *mut u8,
    size: usize,
}

// SAFETY: the ring is shared between exactly one producer and one consumer,
// possibly in different processes. Each side stores only its own cursor
// (release) and loads the peer's cursor (acquire); payload bytes are only
// touched in the window those cursors carve out for each side.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Bytes occupied by the read and write cursors at the buffer's tail
    pub const HEAD_SIZE: usize = 2 * std::mem::size_of::<usize>();

    /// A ring not yet attached to any memory
    pub const fn unattached() -> Self {
        Self {
            buf: std::ptr::null_mut(),
            size: 0,
        }
    }

    pub fn is_attached(&self) -> bool {
        !self.buf.is_null()
    }

    /// Payload region size. Usable capacity is one byte less.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Attach to a memory region of at least `size + HEAD_SIZE` bytes.
    /// If `reset` is set, both cursors are zeroed (creator side only).
    ///
    /// # Panics
    /// Panics if `size` is not a power of two.
    ///
    /// # Safety
    /// `buf` must be valid for reads and writes of `size + HEAD_SIZE` bytes
    /// for the ring's whole lifetime, and the region must not be accessed by
    /// anything other than one producer and one consumer ring view.
    pub unsafe fn init(&mut self, buf: *mut u8, size: usize, reset: bool) {
        assert!(size.is_power_of_two(), "ring buffer size must be a power of 2");
        self.buf = buf;
        self.size = size;
        if reset {
            self.read_cursor().store(0, Ordering::Release);
            self.write_cursor().store(0, Ordering::Release);
        }
    }

    fn read_cursor(&self) -> &AtomicUsize {
        unsafe { &*(self.buf.add(self.size) as *const AtomicUsize) }
    }

    fn write_cursor(&self) -> &AtomicUsize {
        unsafe { &*(self.buf.add(self.size + std::mem::size_of::<usize>()) as *const AtomicUsize) }
    }

    pub fn available_for_read(&self) -> usize {
        let readp = self.read_cursor().load(Ordering::Acquire);
        let writep = self.write_cursor().load(Ordering::Acquire);
        writep.wrapping_sub(readp) & (self.size - 1)
    }

    pub fn available_for_write(&self) -> usize {
        self.size - 1 - self.available_for_read()
    }

    /// The largest amount that can ever be published at once (empty ring)
    pub fn max_available_for_write(&self) -> usize {
        self.size - 1
    }

    /// Copy `data` in and publish it immediately.
    pub fn write(&self, data: &[u8]) {
        self.write_no_commit(0, data);
        self.commit(data.len());
    }

    /// Copy `data` to `write + offset` without publishing.
    ///
    /// # Panics
    /// Panics if `offset + data.len()` exceeds the available write space.
    pub fn write_no_commit(&self, offset: usize, data: &[u8]) {
        assert!(
            offset + data.len() <= self.available_for_write(),
            "attempt to write more than available bytes to ring buffer"
        );
        let writep = (self.write_cursor().load(Ordering::Acquire) + offset) & (self.size - 1);
        unsafe {
            if writep + data.len() > self.size {
                let part1 = self.size - writep;
                std::ptr::copy_nonoverlapping(data.as_ptr(), self.buf.add(writep), part1);
                std::ptr::copy_nonoverlapping(
                    data.as_ptr().add(part1),
                    self.buf,
                    data.len() - part1,
                );
            } else {
                std::ptr::copy_nonoverlapping(data.as_ptr(), self.buf.add(writep), data.len());
            }
        }
    }

    /// Publish `len` previously staged bytes with one release store. This is
    /// the atomic hand-off point: a crash before this call leaves the
    /// consumer seeing nothing.
    ///
    /// # Panics
    /// Panics if `len` exceeds the available write space.
    pub fn commit(&self, len: usize) {
        assert!(
            len <= self.available_for_write(),
            "attempt to commit more than available bytes to ring buffer"
        );
        let writep = self.write_cursor().load(Ordering::Acquire);
        self.write_cursor()
            .store((writep + len) & (self.size - 1), Ordering::Release);
    }

    /// Copy up to `dst.len()` readable bytes out and advance the read cursor.
    /// Returns the number of bytes copied.
    pub fn read(&self, dst: &mut [u8]) -> usize {
        let copy = dst.len().min(self.available_for_read());
        let readp = self.read_cursor().load(Ordering::Acquire);
        unsafe {
            if readp + copy > self.size {
                let part1 = self.size - readp;
                std::ptr::copy_nonoverlapping(self.buf.add(readp), dst.as_mut_ptr(), part1);
                std::ptr::copy_nonoverlapping(self.buf, dst.as_mut_ptr().add(part1), copy - part1);
            } else {
                std::ptr::copy_nonoverlapping(self.buf.add(readp), dst.as_mut_ptr(), copy);
            }
        }
        self.read_cursor()
            .store((readp + copy) & (self.size - 1), Ordering::Release);
        copy
    }

    /// Advance the read cursor without copying.
    ///
    /// # Panics
    /// Panics if `len` exceeds the available read space.
    pub fn advance_read(&self, len: usize) {
        assert!(
            len <= self.available_for_read(),
            "attempt to consume more than available bytes from ring buffer"
        );
        let readp = self.read_cursor().load(Ordering::Acquire);
        self.read_cursor()
            .store((readp + len) & (self.size - 1), Ordering::Release);
    }

    /// Borrow the next `len` readable bytes in place, as one or two spans
    /// (two when the data wraps). Does not advance the read cursor; follow
    /// with [`advance_read`] once the spans have been consumed.
    ///
    /// # Panics
    /// Panics if `len` exceeds the available read space.
    ///
    /// [`advance_read`]: RingBuffer::advance_read
    pub fn read_no_copy(&self, len: usize) -> (&[u8], &[u8]) {
        assert!(
            len <= self.available_for_read(),
            "attempt to view more than available bytes in ring buffer"
        );
        let readp = self.read_cursor().load(Ordering::Acquire);
        unsafe {
            if readp + len <= self.size {
                (std::slice::from_raw_parts(self.buf.add(readp), len), &[])
            } else {
                let part1 = self.size - readp;
                (
                    std::slice::from_raw_parts(self.buf.add(readp), part1),
                    std::slice::from_raw_parts(self.buf, len - part1),
                )
            }
        }
    }
}
