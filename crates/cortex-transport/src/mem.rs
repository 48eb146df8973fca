//! In-process loopback transport.
//!
//! Two queue-backed endpoints joined back-to-back, with condvar-based timed
//! blocking. This is the reference [`Transport`] implementation: protocol
//! tests use it to exercise fragmentation, corruption, and timeout behavior
//! deterministically, without file descriptors or a second process.

use std::{
    collections::VecDeque,
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use crate::{Result, Timeout, Transport, errors::TransportError};

/// One direction of the loopback: a byte queue plus its closed flag.
#[derive(Default)]
struct Lane {
    buf: VecDeque<u8>,
    closed: bool,
}

struct Channel {
    lane: Mutex<Lane>,
    readable: Condvar,
}

impl Channel {
    fn new() -> Arc<Self> {
        Arc::new(Self { lane: Mutex::new(Lane::default()), readable: Condvar::new() })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Lane>> {
        // A poisoned lock means a peer thread panicked mid-operation; treat
        // the carrier as gone.
        self.lane.lock().map_err(|_| TransportError::ConnectionReset)
    }
}

/// One endpoint of an in-memory duplex pipe.
pub struct MemPipe {
    tx: Arc<Channel>,
    rx: Arc<Channel>,
    closed: bool,
}

impl MemPipe {
    /// Create a connected pair of endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a_to_b = Channel::new();
        let b_to_a = Channel::new();
        let a = Self { tx: Arc::clone(&a_to_b), rx: Arc::clone(&b_to_a), closed: false };
        let b = Self { tx: b_to_a, rx: a_to_b, closed: false };
        (a, b)
    }
}

impl Transport for MemPipe {
    fn send(&mut self, buf: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut lane = self.tx.lock()?;
        if lane.closed {
            return Err(TransportError::ConnectionReset);
        }
        lane.buf.extend(buf);
        drop(lane);
        self.tx.readable.notify_all();
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Timeout) -> Result<usize> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut lane = self.rx.lock()?;
        loop {
            if !lane.buf.is_empty() {
                let n = buf.len().min(lane.buf.len());
                for slot in buf.iter_mut().take(n) {
                    // Cannot fail: n is bounded by the queue length.
                    *slot = lane.buf.pop_front().unwrap_or_default();
                }
                return Ok(n);
            }
            if lane.closed {
                return Err(TransportError::Eof);
            }

            if timeout.is_forever() {
                lane = self
                    .rx
                    .readable
                    .wait(lane)
                    .map_err(|_| TransportError::ConnectionReset)?;
            } else {
                // One bounded wait covers the whole call: data either shows
                // up and we return above, or the wait times out.
                let dur = Duration::from_millis(u64::from(timeout.millis()));
                let (guard, wait) = self
                    .rx
                    .readable
                    .wait_timeout(lane, dur)
                    .map_err(|_| TransportError::ConnectionReset)?;
                lane = guard;
                if wait.timed_out() && lane.buf.is_empty() {
                    if lane.closed {
                        return Err(TransportError::Eof);
                    }
                    return Err(TransportError::Timeout);
                }
            }
        }
    }

    fn poll_recv(&mut self, timeout: Timeout) -> Result<bool> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut lane = self.rx.lock()?;
        if !lane.buf.is_empty() || lane.closed {
            return Ok(true);
        }
        if timeout.is_forever() {
            while lane.buf.is_empty() && !lane.closed {
                lane = self
                    .rx
                    .readable
                    .wait(lane)
                    .map_err(|_| TransportError::ConnectionReset)?;
            }
            return Ok(true);
        }
        let dur = Duration::from_millis(u64::from(timeout.millis()));
        let (lane, _) = self
            .rx
            .readable
            .wait_timeout(lane, dur)
            .map_err(|_| TransportError::ConnectionReset)?;
        Ok(!lane.buf.is_empty() || lane.closed)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for channel in [&self.tx, &self.rx] {
            if let Ok(mut lane) = channel.lane.lock() {
                lane.closed = true;
            }
            channel.readable.notify_all();
        }
    }
}

impl Drop for MemPipe {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn bytes_cross_the_pair() {
        let (mut a, mut b) = MemPipe::pair();
        a.send(b"hello adapter").unwrap();

        let mut buf = [0u8; 64];
        let n = b.recv(&mut buf, Timeout::POLL).unwrap();
        assert_eq!(&buf[..n], b"hello adapter");
    }

    #[test]
    fn recv_times_out_on_silence() {
        let (_a, mut b) = MemPipe::pair();
        let started = Instant::now();
        let err = b.recv(&mut [0u8; 8], Timeout::from_ms(30)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn close_wakes_peer_with_eof() {
        let (mut a, mut b) = MemPipe::pair();
        let waiter = std::thread::spawn(move || b.recv(&mut [0u8; 8], Timeout::FOREVER));
        std::thread::sleep(Duration::from_millis(20));
        a.close();
        assert!(matches!(waiter.join().unwrap(), Err(TransportError::Eof)));
    }

    #[test]
    fn buffered_bytes_drain_before_eof() {
        let (mut a, mut b) = MemPipe::pair();
        a.send(&[1, 2, 3]).unwrap();
        a.close();

        let mut buf = [0u8; 2];
        assert_eq!(b.recv(&mut buf, Timeout::POLL).unwrap(), 2);
        assert_eq!(b.recv(&mut buf, Timeout::POLL).unwrap(), 1);
        assert!(matches!(b.recv(&mut buf, Timeout::POLL), Err(TransportError::Eof)));
    }

    #[test]
    fn send_after_peer_close_is_reset() {
        let (mut a, mut b) = MemPipe::pair();
        b.close();
        assert!(matches!(a.send(b"x"), Err(TransportError::ConnectionReset)));
    }

    #[test]
    fn close_is_idempotent() {
        let (mut a, _b) = MemPipe::pair();
        a.close();
        a.close();
        assert!(matches!(a.send(b"x"), Err(TransportError::Closed)));
    }
}
