//! Duplex socket pair for locally spawned adapters.
//!
//! The launcher creates the pair, keeps one end, and attaches the other to
//! the child as stdin and stdout. Socket buffers are tuned large enough that
//! a whole window fits in flight before the peer reads, which avoids a
//! same-thread send/recv deadlock in the lock-step request/response pattern.

use std::os::fd::OwnedFd;

use nix::sys::socket::{self, AddressFamily, SockFlag, SockType};

use crate::{Result, fd::FdTransport};

/// Send/receive buffer size requested on each end (at least double the
/// 128 KiB floor the window math needs).
pub const SOCKET_BUF_BYTES: usize = 256 * 1024;

/// Create a connected `AF_UNIX` stream socket pair with tuned buffers.
///
/// The first descriptor stays with the harness; the second is attached to
/// the spawned child as its standard streams.
pub fn duplex_socketpair() -> Result<(OwnedFd, OwnedFd)> {
    let (a, b) = socket::socketpair(
        AddressFamily::Unix,
        SockType::Stream,
        None,
        SockFlag::empty(),
    )
    .map_err(std::io::Error::from)?;

    for fd in [&a, &b] {
        // Best effort: the kernel may clamp, and a smaller buffer only costs
        // extra scheduling, not correctness.
        let _ = socket::setsockopt(fd, socket::sockopt::SndBuf, &SOCKET_BUF_BYTES);
        let _ = socket::setsockopt(fd, socket::sockopt::RcvBuf, &SOCKET_BUF_BYTES);
    }

    Ok((a, b))
}

/// The adapter's transport when launched with `local://`: receive on stdin,
/// send on stdout.
///
/// The descriptors are duplicated so closing the transport does not tear
/// down the process's actual standard streams.
pub fn stdio_transport() -> Result<FdTransport> {
    let rx = nix::unistd::dup(std::io::stdin()).map_err(std::io::Error::from)?;
    let tx = nix::unistd::dup(std::io::stdout()).map_err(std::io::Error::from)?;
    Ok(FdTransport::from_split(rx, tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Timeout, Transport};

    #[test]
    fn pair_is_connected_both_ways() {
        let (a, b) = duplex_socketpair().unwrap();
        let mut a = FdTransport::from_duplex(a).unwrap();
        let mut b = FdTransport::from_duplex(b).unwrap();

        a.send(b"ping").unwrap();
        b.send(b"pong").unwrap();

        let mut buf = [0u8; 8];
        let n = b.recv(&mut buf, Timeout::from_ms(1000)).unwrap();
        assert_eq!(&buf[..n], b"ping");
        let n = a.recv(&mut buf, Timeout::from_ms(1000)).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }
}
