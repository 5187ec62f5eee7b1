// SPDX-License-Identifier: Apache-2.0 OR MIT
// Platform layer: process identity, shared memory, sleep, parent liveness

use nix::fcntl::OFlag;
use nix::sys::mman::{mmap, munmap, shm_open, shm_unlink, MapFlags, ProtFlags};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use std::num::NonZeroUsize;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use siphasher::sip::SipHasher24;
use std::hash::Hasher;

use crate::ring::RingBuffer;

/// PID of the calling process
#[inline]
pub fn my_pid() -> u32 {
    std::process::id()
}

/// Kernel thread id of the calling thread, cached per thread
pub fn my_tid() -> u32 {
    thread_local! {
        static TID: u32 = os_tid();
    }
    TID.with(|t| *t)
}

#[cfg(target_os = "linux")]
fn os_tid() -> u32 {
    (unsafe { libc::gettid() }) as u32
}

#[cfg(not(target_os = "linux"))]
fn os_tid() -> u32 {
    use std::hash::{Hash, Hasher};
    let mut h = std::collections::hash_map::DefaultHasher::new();
    thread::current().id().hash(&mut h);
    h.finish() as u32
}

/// Sleep for `ms` milliseconds. Zero yields the CPU without sleeping.
pub fn sleep_ms(ms: u32) {
    if ms == 0 {
        thread::yield_now();
    } else {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Emit a warning that does not go into the log itself, such as a failure to
/// start the writer process. These go to stdout.
pub fn out_of_band_warning(args: std::fmt::Arguments) {
    println!("uberlog: {args}");
}

/// Name of the shared memory object that a producer and its writer rendezvous
/// on. Derived from `(parent_pid, log_path)` with two keyed SipHash-2-4
/// digests, so the name is stable across the two processes but unguessable,
/// and two producers only collide when both pid and path match.
pub fn shm_object_name(parent_pid: u32, log_path: &Path) -> String {
    let mut key1: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
    let mut key2: [u8; 16] = [15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0];
    key1[..4].copy_from_slice(&parent_pid.to_ne_bytes());
    key2[..4].copy_from_slice(&parent_pid.to_ne_bytes());

    let path_bytes = path_bytes(log_path);
    let mut h1 = SipHasher24::new_with_key(&key1);
    h1.write(path_bytes);
    let mut h2 = SipHasher24::new_with_key(&key2);
    h2.write(path_bytes);

    format!(
        "/uberlog-shm-{}-{:016x}{:016x}",
        parent_pid,
        h1.finish(),
        h2.finish()
    )
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> &[u8] {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes()
}

/// Size of the shared mapping backing a ring of `ring_size` payload bytes:
/// the ring plus its two cursors, rounded up to a 4 KiB page. Going right up
/// to the edge of mapped memory also makes off-by-one errors fault loudly.
pub fn shm_size_for_ring(ring_size: usize) -> usize {
    (ring_size + RingBuffer::HEAD_SIZE + 4095) & !4095
}

/// A mapped POSIX shared memory object holding one ring.
///
/// The producer creates it; the writer attaches to the existing object. Drop
/// unmaps. Only the creator unlinks the name: explicitly via [`unlink`] at
/// close, or on drop as a safety net.
///
/// [`unlink`]: ShmRegion::unlink
pub struct ShmRegion {
    name: String,
    _fd: OwnedFd, // keeps the object handle alive until unmap
    addr: NonNull<libc::c_void>,
    size: usize,
    is_owner: bool,
    unlinked: bool,
}

// SAFETY: the mapping is plain shared memory; all cross-process access rules
// are enforced by RingBuffer's cursor discipline, not by this handle.
unsafe impl Send for ShmRegion {}

impl ShmRegion {
    /// Create the shared memory object for a ring (producer side).
    pub fn create(parent_pid: u32, log_path: &Path, ring_size: usize) -> Result<Self, nix::Error> {
        let name = shm_object_name(parent_pid, log_path);
        let size = shm_size_for_ring(ring_size);

        // Remove any stale object left over from a crashed previous instance
        let _ = shm_unlink(name.as_str());

        let fd = shm_open(
            name.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        )?;
        ftruncate(&fd, size as i64)?;

        let addr = Self::map(&fd, size)?;
        Ok(Self {
            name,
            _fd: fd,
            addr,
            size,
            is_owner: true,
            unlinked: false,
        })
    }

    /// Attach to an existing shared memory object (writer side).
    pub fn attach(parent_pid: u32, log_path: &Path, ring_size: usize) -> Result<Self, nix::Error> {
        let name = shm_object_name(parent_pid, log_path);
        let size = shm_size_for_ring(ring_size);

        let fd = shm_open(name.as_str(), OFlag::O_RDWR, Mode::empty())?;
        let addr = Self::map(&fd, size)?;
        Ok(Self {
            name,
            _fd: fd,
            addr,
            size,
            is_owner: false,
            unlinked: false,
        })
    }

    fn map(fd: &OwnedFd, size: usize) -> Result<NonNull<libc::c_void>, nix::Error> {
        unsafe {
            mmap(
                None,
                NonZeroUsize::new(size).expect("shared memory size is zero"),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )
        }
    }

    pub fn ptr(&self) -> *mut u8 {
        self.addr.as_ptr() as *mut u8
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unlink the object's name. Creator only; idempotent. Existing mappings
    /// (ours and the writer's) stay valid until unmapped.
    pub fn unlink(&mut self) {
        if self.is_owner && !self.unlinked {
            let _ = shm_unlink(self.name.as_str());
            self.unlinked = true;
        }
    }
}

impl Drop for ShmRegion {
    fn drop(&mut self) {
        self.unlink();
        unsafe {
            let _ = munmap(self.addr, self.size);
        }
    }
}

/// Polling form of parent-death detection: once our parent exits we are
/// reparented, so a parent pid of 0 or 1 means the original parent is gone.
pub fn parent_died() -> bool {
    let ppid = nix::unistd::getppid().as_raw();
    ppid == 0 || ppid == 1
}

/// Watches the writer's parent process for death.
///
/// Preferred mechanism is a pidfd plus a watcher thread parked in `poll(2)`,
/// which fires as soon as the parent exits. When `pidfd_open` is unavailable
/// the watch degrades to the reparenting check in [`parent_died`], driven by
/// [`poll`] from the writer's main loop.
///
/// [`poll`]: ParentWatch::poll
pub struct ParentWatch {
    dead: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl ParentWatch {
    pub fn spawn(parent_pid: u32) -> Self {
        let dead = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = match pidfd_open(parent_pid) {
            PidfdOpen::Opened(fd) => {
                let dead = Arc::clone(&dead);
                let stop = Arc::clone(&stop);
                Some(thread::spawn(move || watch_pidfd(fd, &dead, &stop)))
            }
            // Mirrors the handle-wait convention: if the process cannot be
            // opened, it is already dead.
            PidfdOpen::AlreadyDead => {
                dead.store(true, Ordering::Release);
                None
            }
            PidfdOpen::Unsupported => None,
        };

        Self { dead, stop, thread }
    }

    /// Cheap per-iteration liveness check; keeps working even without the
    /// watcher thread.
    pub fn poll(&self) {
        if !self.dead.load(Ordering::Relaxed) && parent_died() {
            self.dead.store(true, Ordering::Release);
        }
    }

    pub fn parent_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn join(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

enum PidfdOpen {
    Opened(OwnedFd),
    AlreadyDead,
    Unsupported,
}

#[cfg(target_os = "linux")]
fn pidfd_open(pid: u32) -> PidfdOpen {
    let ret = unsafe { libc::syscall(libc::SYS_pidfd_open, pid as libc::pid_t, 0 as libc::c_uint) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            PidfdOpen::AlreadyDead
        } else {
            PidfdOpen::Unsupported
        }
    } else {
        PidfdOpen::Opened(unsafe { OwnedFd::from_raw_fd(ret as RawFd) })
    }
}

#[cfg(not(target_os = "linux"))]
fn pidfd_open(_pid: u32) -> PidfdOpen {
    PidfdOpen::Unsupported
}

fn watch_pidfd(fd: OwnedFd, dead: &AtomicBool, stop: &AtomicBool) {
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    // Bounded poll timeout so join() never waits long
    while !stop.load(Ordering::Acquire) {
        let r = unsafe { libc::poll(&mut pfd, 1, 200) };
        if r > 0 {
            dead.store(true, Ordering::Release);
            break;
        }
        if r < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                break;
            }
        }
    }
}
