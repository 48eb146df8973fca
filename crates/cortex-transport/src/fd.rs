//! File-descriptor transport shared by the pipe, TCP, and serial carriers.
//!
//! Descriptors stay in blocking mode; receive deadlines come from `poll(2)`
//! on readability before each read. Send loops over short writes until the
//! whole buffer is delivered.

use std::os::fd::{AsFd, OwnedFd};

use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, PollTimeout},
};

use crate::{Result, Timeout, Transport, errors::TransportError};

/// A [`Transport`] over one or two POSIX file descriptors.
///
/// Duplex sockets use one descriptor duplicated for each direction; a
/// stdio-launched adapter uses stdin for receive and stdout for send.
#[derive(Debug)]
pub struct FdTransport {
    rx: Option<OwnedFd>,
    tx: Option<OwnedFd>,
}

impl FdTransport {
    /// Wrap a full-duplex descriptor (socket or tty), duplicating it so each
    /// direction owns a descriptor and `close` drops both.
    pub fn from_duplex(fd: OwnedFd) -> Result<Self> {
        let tx = nix::unistd::dup(&fd).map_err(std::io::Error::from)?;
        Ok(Self { rx: Some(fd), tx: Some(tx) })
    }

    /// Wrap separate receive and send descriptors.
    #[must_use]
    pub fn from_split(rx: OwnedFd, tx: OwnedFd) -> Self {
        Self { rx: Some(rx), tx: Some(tx) }
    }

    fn rx_fd(&self) -> Result<&OwnedFd> {
        self.rx.as_ref().ok_or(TransportError::Closed)
    }

    fn tx_fd(&self) -> Result<&OwnedFd> {
        self.tx.as_ref().ok_or(TransportError::Closed)
    }
}

fn poll_timeout(timeout: Timeout) -> PollTimeout {
    if timeout.is_forever() {
        return PollTimeout::NONE;
    }
    let ms = i32::try_from(timeout.millis()).unwrap_or(i32::MAX);
    PollTimeout::try_from(ms).unwrap_or(PollTimeout::MAX)
}

/// Wait until `fd` is readable or the timeout elapses.
///
/// HUP/ERR conditions fall through to the subsequent `read`, which reports
/// them as EOF or reset after any buffered bytes drain.
pub(crate) fn wait_readable(fd: &impl AsFd, timeout: Timeout) -> Result<()> {
    loop {
        let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLIN)];
        match nix::poll::poll(&mut fds, poll_timeout(timeout)) {
            Ok(0) => return Err(TransportError::Timeout),
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => {}
            Err(e) => return Err(TransportError::Io(e.into())),
        }
    }
}

impl Transport for FdTransport {
    fn send(&mut self, buf: &[u8]) -> Result<()> {
        let fd = self.tx_fd()?;
        let mut sent = 0;
        while sent < buf.len() {
            match nix::unistd::write(fd, &buf[sent..]) {
                Ok(0) => return Err(TransportError::ConnectionReset),
                Ok(n) => sent += n,
                Err(Errno::EINTR) => {}
                Err(Errno::EPIPE | Errno::ECONNRESET) => {
                    return Err(TransportError::ConnectionReset);
                }
                Err(e) => return Err(TransportError::Io(e.into())),
            }
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8], timeout: Timeout) -> Result<usize> {
        let fd = self.rx_fd()?;
        wait_readable(fd, timeout)?;
        loop {
            match nix::unistd::read(fd, buf) {
                Ok(0) => return Err(TransportError::Eof),
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => {}
                Err(Errno::ECONNRESET) => return Err(TransportError::ConnectionReset),
                Err(e) => return Err(TransportError::Io(e.into())),
            }
        }
    }

    fn poll_recv(&mut self, timeout: Timeout) -> Result<bool> {
        let fd = self.rx_fd()?;
        match wait_readable(fd, timeout) {
            Ok(()) => Ok(true),
            Err(TransportError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) {
        drop(self.rx.take());
        drop(self.tx.take());
    }
}
