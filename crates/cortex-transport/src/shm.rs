//! Shared-memory carrier: two mmap'd byte rings with named semaphores.
//!
//! Each direction (host→adapter, adapter→host) is one POSIX shared-memory
//! object holding a 64-byte header and a 512 KiB single-producer
//! single-consumer byte ring, plus two named semaphores: a data doorbell the
//! writer posts and a space doorbell the reader posts. Create/open are
//! asymmetric; the harness creates and unlinks the objects, the adapter
//! opens them by name.
//!
//! This module owns the workspace's unsafe code: the ring header is accessed
//! through the mapping as atomics, data moves with raw pointer copies, and
//! the semaphores are raw `sem_t` handles (the ecosystem has no safe wrapper
//! for named semaphores).

use std::{
    ffi::CString,
    fs::File,
    os::fd::OwnedFd,
    sync::atomic::{AtomicU32, Ordering},
    time::Duration,
};

use memmap2::MmapMut;
use nix::{
    fcntl::OFlag,
    sys::{mman, stat::Mode},
};

use crate::{Deadline, Result, Timeout, Transport, errors::TransportError};

/// Ring header size; the data region starts at this offset.
const RING_HEADER_LEN: usize = 64;

/// Ring data capacity. Must be a power of two so the wrapping 32-bit
/// head/tail counters index correctly.
const RING_CAPACITY: usize = 512 * 1024;

/// Total region size per direction.
const REGION_LEN: usize = RING_HEADER_LEN + RING_CAPACITY;

/// How long a send waits on a full ring before declaring the peer stalled.
const SEND_STALL: Duration = Duration::from_secs(10);

const _: () = assert!(RING_CAPACITY.is_power_of_two());

/// Ring bookkeeping at the head of each mapped region.
///
/// `head` counts bytes ever written and `tail` bytes ever read (both
/// wrapping); `head - tail` is the fill level. The region is created by
/// `ftruncate`, whose zero fill is the valid empty state.
#[repr(C)]
struct RingHeader {
    head: AtomicU32,
    tail: AtomicU32,
    closed: AtomicU32,
    _pad: [u8; RING_HEADER_LEN - 12],
}

/// A named POSIX semaphore handle.
struct NamedSem {
    sem: *mut libc::sem_t,
}

// SAFETY: sem_t operations are thread-safe by POSIX; the raw pointer is an
// opaque process-local handle.
unsafe impl Send for NamedSem {}

impl NamedSem {
    fn sem_open(name: &CString, oflag: libc::c_int) -> Result<Self> {
        // SAFETY: `name` is a valid NUL-terminated string; mode and initial
        // value are passed per the sem_open contract when O_CREAT is set.
        let sem = unsafe {
            libc::sem_open(name.as_ptr(), oflag, 0o600 as libc::c_uint, 0 as libc::c_uint)
        };
        if sem == libc::SEM_FAILED {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }
        Ok(Self { sem })
    }

    fn create(name: &CString) -> Result<Self> {
        match Self::sem_open(name, libc::O_CREAT | libc::O_EXCL) {
            Ok(sem) => Ok(sem),
            Err(TransportError::Io(e)) if e.raw_os_error() == Some(libc::EEXIST) => {
                // Stale semaphore from a crashed run; reclaim the name.
                Self::unlink(name);
                Self::sem_open(name, libc::O_CREAT | libc::O_EXCL)
            }
            Err(e) => Err(e),
        }
    }

    fn open(name: &CString) -> Result<Self> {
        Self::sem_open(name, 0)
    }

    fn post(&self) -> Result<()> {
        // SAFETY: `self.sem` came from a successful sem_open and has not
        // been closed (close happens only in Drop).
        if unsafe { libc::sem_post(self.sem) } != 0 {
            return Err(TransportError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Wait for a post. `None` blocks indefinitely. Returns `false` on
    /// timeout.
    fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        match timeout {
            None => loop {
                // SAFETY: valid open semaphore handle.
                if unsafe { libc::sem_wait(self.sem) } == 0 {
                    return Ok(true);
                }
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() != Some(libc::EINTR) {
                    return Err(TransportError::Io(err));
                }
            },
            Some(timeout) => {
                // sem_timedwait takes an absolute CLOCK_REALTIME deadline.
                let mut now = libc::timespec { tv_sec: 0, tv_nsec: 0 };
                // SAFETY: `now` is a valid out-pointer.
                if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
                    return Err(TransportError::Io(std::io::Error::last_os_error()));
                }
                let nanos = now.tv_nsec as i64 + timeout.subsec_nanos() as i64;
                let deadline = libc::timespec {
                    tv_sec: now.tv_sec + timeout.as_secs() as libc::time_t
                        + (nanos / 1_000_000_000) as libc::time_t,
                    tv_nsec: (nanos % 1_000_000_000) as libc::c_long,
                };
                loop {
                    // SAFETY: valid semaphore and deadline pointers.
                    if unsafe { libc::sem_timedwait(self.sem, &deadline) } == 0 {
                        return Ok(true);
                    }
                    let err = std::io::Error::last_os_error();
                    match err.raw_os_error() {
                        Some(libc::ETIMEDOUT) => return Ok(false),
                        Some(libc::EINTR) => {}
                        _ => return Err(TransportError::Io(err)),
                    }
                }
            }
        }
    }

    fn unlink(name: &CString) {
        // SAFETY: valid NUL-terminated name; failure (already gone) is fine.
        unsafe {
            libc::sem_unlink(name.as_ptr());
        }
    }
}

impl Drop for NamedSem {
    fn drop(&mut self) {
        // SAFETY: handle is open; double-close is prevented by ownership.
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

/// Object names for one direction of a region pair.
struct RingNames {
    shm: String,
    data_sem: CString,
    space_sem: CString,
}

fn ring_names(base: &str, dir: &str) -> Result<RingNames> {
    let make = |suffix: &str| {
        CString::new(format!("/{base}-{dir}{suffix}"))
            .map_err(|_| TransportError::Config("shm name contains a NUL byte".to_owned()))
    };
    Ok(RingNames { shm: format!("/{base}-{dir}"), data_sem: make("-d")?, space_sem: make("-s")? })
}

/// One direction: mapped region plus its doorbells.
struct Ring {
    map: MmapMut,
    data_sem: NamedSem,
    space_sem: NamedSem,
    names: RingNames,
}

impl Ring {
    fn create(base: &str, dir: &str) -> Result<Self> {
        let names = ring_names(base, dir)?;
        let fd = match mman::shm_open(
            names.shm.as_str(),
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        ) {
            Ok(fd) => fd,
            Err(nix::errno::Errno::EEXIST) => {
                // Stale region from a crashed run; reclaim the name.
                let _ = mman::shm_unlink(names.shm.as_str());
                mman::shm_open(
                    names.shm.as_str(),
                    OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
                    Mode::S_IRUSR | Mode::S_IWUSR,
                )
                .map_err(std::io::Error::from)?
            }
            Err(e) => return Err(TransportError::Io(e.into())),
        };
        nix::unistd::ftruncate(&fd, REGION_LEN as i64).map_err(std::io::Error::from)?;
        let map = Self::map(fd)?;
        let data_sem = NamedSem::create(&names.data_sem)?;
        let space_sem = NamedSem::create(&names.space_sem)?;
        Ok(Self { map, data_sem, space_sem, names })
    }

    fn open(base: &str, dir: &str) -> Result<Self> {
        let names = ring_names(base, dir)?;
        let fd = mman::shm_open(names.shm.as_str(), OFlag::O_RDWR, Mode::empty())
            .map_err(std::io::Error::from)?;
        let map = Self::map(fd)?;
        let data_sem = NamedSem::open(&names.data_sem)?;
        let space_sem = NamedSem::open(&names.space_sem)?;
        Ok(Self { map, data_sem, space_sem, names })
    }

    fn map(fd: OwnedFd) -> Result<MmapMut> {
        let file = File::from(fd);
        // SAFETY: the region is a private named object sized by ftruncate;
        // no other mapping of it is treated as a Rust slice.
        let map = unsafe { MmapMut::map_mut(&file) }?;
        if map.len() < REGION_LEN {
            return Err(TransportError::Config(format!(
                "shm region is {} bytes, expected {REGION_LEN}",
                map.len()
            )));
        }
        Ok(map)
    }

    fn header(&self) -> &RingHeader {
        // SAFETY: the mapping is page-aligned and at least REGION_LEN bytes;
        // RingHeader is repr(C) with every field an atomic, so any bit
        // pattern is valid and cross-process concurrent access is defined.
        unsafe { &*self.map.as_ptr().cast::<RingHeader>() }
    }

    fn mark_closed(&self) {
        self.header().closed.store(1, Ordering::Release);
        let _ = self.data_sem.post();
        let _ = self.space_sem.post();
    }

    /// Deliver the whole buffer, waiting on the space doorbell when full.
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < buf.len() {
            let header = self.header();
            if header.closed.load(Ordering::Acquire) != 0 {
                return Err(TransportError::ConnectionReset);
            }
            let head = header.head.load(Ordering::Relaxed);
            let tail = header.tail.load(Ordering::Acquire);
            let used = head.wrapping_sub(tail) as usize;
            let space = RING_CAPACITY - used;
            if space == 0 {
                if !self.space_sem.wait(Some(SEND_STALL))? {
                    return Err(TransportError::Timeout);
                }
                continue;
            }

            let n = space.min(buf.len() - written);
            let start = head as usize % RING_CAPACITY;
            let first = n.min(RING_CAPACITY - start);
            let data = self.data_ptr();
            // SAFETY: start+first <= RING_CAPACITY and the second copy
            // writes the wrapped remainder at the ring base; both stay
            // inside the mapped data region, which the reader only touches
            // between tail and head.
            unsafe {
                std::ptr::copy_nonoverlapping(buf.as_ptr().add(written), data.add(start), first);
                std::ptr::copy_nonoverlapping(
                    buf.as_ptr().add(written + first),
                    data,
                    n - first,
                );
            }
            self.header().head.store(head.wrapping_add(n as u32), Ordering::Release);
            self.data_sem.post()?;
            written += n;
        }
        Ok(())
    }

    /// Receive at least one byte, waiting on the data doorbell under the
    /// deadline.
    fn read(&mut self, buf: &mut [u8], deadline: &Deadline) -> Result<usize> {
        loop {
            let header = self.header();
            let head = header.head.load(Ordering::Acquire);
            let tail = header.tail.load(Ordering::Relaxed);
            let avail = head.wrapping_sub(tail) as usize;

            if avail > 0 {
                let n = avail.min(buf.len());
                let start = tail as usize % RING_CAPACITY;
                let first = n.min(RING_CAPACITY - start);
                let data = self.data_ptr();
                // SAFETY: mirrors the writer's bounds; the writer only
                // touches bytes outside [tail, head).
                unsafe {
                    std::ptr::copy_nonoverlapping(data.add(start), buf.as_mut_ptr(), first);
                    std::ptr::copy_nonoverlapping(data, buf.as_mut_ptr().add(first), n - first);
                }
                self.header().tail.store(tail.wrapping_add(n as u32), Ordering::Release);
                self.space_sem.post()?;
                return Ok(n);
            }

            if header.closed.load(Ordering::Acquire) != 0 {
                return Err(TransportError::Eof);
            }
            if deadline.expired() {
                return Err(TransportError::Timeout);
            }
            let remaining = deadline.remaining();
            let wait = if remaining.is_forever() {
                None
            } else {
                Some(Duration::from_millis(u64::from(remaining.millis())))
            };
            // A timeout here falls through to the loop head, which re-checks
            // for racing data before reporting it.
            let _ = self.data_sem.wait(wait)?;
        }
    }

    fn data_ptr(&mut self) -> *mut u8 {
        // SAFETY: offset is within the mapping (REGION_LEN > RING_HEADER_LEN).
        unsafe { self.map.as_mut_ptr().add(RING_HEADER_LEN) }
    }

    fn unlink(&self) {
        let _ = mman::shm_unlink(self.names.shm.as_str());
        NamedSem::unlink(&self.names.data_sem);
        NamedSem::unlink(&self.names.space_sem);
    }
}

/// Shared-memory transport endpoint.
///
/// The creating side owns the names: its `Drop` unlinks the regions and
/// semaphores.
pub struct ShmTransport {
    tx: Ring,
    rx: Ring,
    owner: bool,
    closed: bool,
}

impl ShmTransport {
    /// Create the region pair (harness side). Sends on `h2a`, receives on
    /// `a2h`.
    pub fn create(base: &str) -> Result<Self> {
        let tx = Ring::create(base, "h2a")?;
        let rx = Ring::create(base, "a2h")?;
        tracing::debug!(base, "shm region pair created");
        Ok(Self { tx, rx, owner: true, closed: false })
    }

    /// Open an existing region pair (adapter side). Sends on `a2h`, receives
    /// on `h2a`.
    pub fn open(base: &str) -> Result<Self> {
        let rx = Ring::open(base, "h2a")?;
        let tx = Ring::open(base, "a2h")?;
        tracing::debug!(base, "shm region pair opened");
        Ok(Self { tx, rx, owner: false, closed: false })
    }
}

impl Transport for ShmTransport {
    fn send(&mut self, buf: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.tx.write(buf)
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Timeout) -> Result<usize> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Deadline::after(timeout);
        self.rx.read(buf, &deadline)
    }

    fn poll_recv(&mut self, timeout: Timeout) -> Result<bool> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let header = self.rx.header();
        let head = header.head.load(Ordering::Acquire);
        let tail = header.tail.load(Ordering::Relaxed);
        if head != tail || header.closed.load(Ordering::Acquire) != 0 {
            return Ok(true);
        }

        let wait = if timeout.is_forever() {
            None
        } else {
            Some(Duration::from_millis(u64::from(timeout.millis())))
        };
        if !self.rx.data_sem.wait(wait)? {
            return Ok(false);
        }
        // The doorbell was consumed without reading; re-post it so the
        // subsequent read does not stall waiting for a signal that already
        // fired.
        self.rx.data_sem.post()?;
        Ok(true)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.tx.mark_closed();
        self.rx.mark_closed();
    }
}

impl Drop for ShmTransport {
    fn drop(&mut self) {
        self.close();
        if self.owner {
            self.tx.unlink();
            self.rx.unlink();
        }
    }
}
