//! TCP carriers: active connect, and bind-and-accept-once.
//!
//! Both directions yield the same poll-based [`FdTransport`] after setup, so
//! the protocol layer cannot tell which side dialed. The server form follows
//! the single-peer model: the listening socket is closed as soon as the one
//! expected peer is accepted.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    os::fd::OwnedFd,
    time::Duration,
};

use socket2::{Domain, Protocol, Socket, Type};

use crate::{Result, Timeout, errors::TransportError, fd};

/// Default connect and accept deadline.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u32 = 5000;

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|source| TransportError::Connect { addr: format!("{host}:{port}"), source })?
        .collect();
    if addrs.is_empty() {
        return Err(TransportError::Connect {
            addr: format!("{host}:{port}"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no addresses resolved"),
        });
    }
    Ok(addrs)
}

fn new_stream_socket(addr: &SocketAddr) -> std::io::Result<Socket> {
    let domain = Domain::for_address(*addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_tcp_nodelay(true)?;
    Ok(socket)
}

/// Connect to `host:port` within `timeout`.
pub fn connect(host: &str, port: u16, timeout: Timeout) -> Result<fd::FdTransport> {
    let addrs = resolve(host, port)?;
    let mut last_err = None;

    for addr in &addrs {
        let attempt = new_stream_socket(addr).and_then(|socket| {
            if timeout.is_forever() {
                socket.connect(&(*addr).into())?;
            } else {
                socket.connect_timeout(
                    &(*addr).into(),
                    Duration::from_millis(u64::from(timeout.millis())),
                )?;
            }
            Ok(socket)
        });
        match attempt {
            Ok(socket) => {
                tracing::debug!(%addr, "tcp connected");
                return fd::FdTransport::from_duplex(OwnedFd::from(socket));
            }
            Err(source) => last_err = Some(source),
        }
    }

    Err(TransportError::Connect {
        addr: format!("{host}:{port}"),
        source: last_err
            .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "connect failed")),
    })
}

/// Bind `0.0.0.0:port` and accept exactly one peer within `timeout`.
///
/// `SO_REUSEADDR` is set so a benchmark rerun does not trip over the
/// previous run's TIME_WAIT socket. The listener is closed before this
/// function returns.
pub fn accept_once(port: u16, timeout: Timeout) -> Result<fd::FdTransport> {
    let bind_addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = (|| -> std::io::Result<Socket> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&bind_addr.into())?;
        socket.listen(1)?;
        Ok(socket)
    })()
    .map_err(|source| TransportError::Accept { source })?;

    // Accept is a separate, bounded operation with its own deadline.
    match fd::wait_readable(&listener, timeout) {
        Ok(()) => {}
        Err(TransportError::Timeout) => return Err(TransportError::Timeout),
        Err(e) => return Err(e),
    }

    let (peer, peer_addr) =
        listener.accept().map_err(|source| TransportError::Accept { source })?;
    peer.set_tcp_nodelay(true).map_err(|source| TransportError::Accept { source })?;
    tracing::debug!(peer = ?peer_addr.as_socket(), "tcp peer accepted");

    drop(listener);
    fd::FdTransport::from_duplex(OwnedFd::from(peer))
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::Transport;

    // Loopback tests pick a port by binding port 0 first; `accept_once`
    // takes an explicit port, so probe for a free one.
    fn free_port() -> u16 {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    }

    #[test]
    fn connect_and_accept_round_trip() {
        let port = free_port();
        let server = std::thread::spawn(move || {
            let mut t = accept_once(port, Timeout::from_ms(5000)).unwrap();
            let mut buf = [0u8; 16];
            let n = t.recv(&mut buf, Timeout::from_ms(5000)).unwrap();
            t.send(&buf[..n]).unwrap();
        });

        // The listener may not be up yet; retry briefly.
        let mut client = None;
        for _ in 0..50 {
            match connect("127.0.0.1", port, Timeout::from_ms(1000)) {
                Ok(t) => {
                    client = Some(t);
                    break;
                }
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
        let mut client = client.expect("server never came up");

        client.send(b"echo me").unwrap();
        let mut buf = [0u8; 16];
        let n = client.recv(&mut buf, Timeout::from_ms(5000)).unwrap();
        assert_eq!(&buf[..n], b"echo me");

        server.join().unwrap();
    }

    #[test]
    fn accept_times_out_without_peer() {
        let port = free_port();
        let started = Instant::now();
        let err = accept_once(port, Timeout::from_ms(50)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn connect_to_dead_port_fails() {
        let port = free_port();
        assert!(matches!(
            connect("127.0.0.1", port, Timeout::from_ms(500)),
            Err(TransportError::Connect { .. })
        ));
    }

    #[test]
    fn connect_to_unresolvable_host_fails() {
        assert!(matches!(
            connect("no-such-host.invalid", 1, Timeout::from_ms(500)),
            Err(TransportError::Connect { .. })
        ));
    }
}
