//! Transport URI parsing.
//!
//! Accepted forms:
//!
//! - `local://`: host spawns the adapter child over a duplex socket pair
//! - `tcp://HOST:PORT`: active connect
//! - `tcp://:PORT`: bind and accept once
//! - `serial:///dev/ttyUSB0?baud=N`: POSIX tty (default baud 115200)
//! - `shm://NAME`: shared-memory region pair (host creates, adapter opens)
//!
//! Query options: `timeout_ms` (connect/open), `accept_timeout_ms`, `baud`.

use std::{path::PathBuf, str::FromStr};

use crate::errors::TransportError;

/// Highest baud the serial carrier accepts.
pub const MAX_BAUD: u32 = 921_600;

/// Default serial baud rate.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Where a transport URI points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Spawned co-process over an inherited duplex socket pair.
    Local,
    /// Active TCP connect.
    TcpConnect {
        /// Peer hostname or address literal.
        host: String,
        /// Peer port.
        port: u16,
    },
    /// Bind and accept exactly one TCP peer.
    TcpListen {
        /// Local port to bind.
        port: u16,
    },
    /// POSIX serial device.
    Serial {
        /// Absolute tty path.
        path: PathBuf,
        /// Baud rate, 1..=[`MAX_BAUD`].
        baud: u32,
    },
    /// Named shared-memory region pair.
    Shm {
        /// Region base name (no slashes).
        name: String,
    },
}

/// Options recognized in the URI query string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UriOptions {
    /// Connect timeout for TCP; open timeout for serial.
    pub timeout_ms: Option<u32>,
    /// Server-side accept deadline.
    pub accept_timeout_ms: Option<u32>,
}

/// A parsed transport URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportUri {
    /// Carrier and address.
    pub endpoint: Endpoint,
    /// Query options.
    pub options: UriOptions,
}

impl TransportUri {
    /// Parse a URI string.
    pub fn parse(uri: &str) -> Result<Self, TransportError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| TransportError::InvalidUri(format!("{uri}: missing scheme")))?;

        let (body, query) = match rest.split_once('?') {
            Some((body, query)) => (body, Some(query)),
            None => (rest, None),
        };

        let mut options = UriOptions::default();
        let mut baud = None;
        if let Some(query) = query {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').ok_or_else(|| {
                    TransportError::InvalidUri(format!("{uri}: option {pair:?} has no value"))
                })?;
                let parsed: u32 = value.parse().map_err(|_| {
                    TransportError::InvalidUri(format!("{uri}: option {key}={value:?} is not a number"))
                })?;
                match key {
                    "timeout_ms" => options.timeout_ms = Some(parsed),
                    "accept_timeout_ms" => options.accept_timeout_ms = Some(parsed),
                    "baud" => baud = Some(parsed),
                    _ => {
                        return Err(TransportError::InvalidUri(format!(
                            "{uri}: unknown option {key:?}"
                        )));
                    }
                }
            }
        }

        let endpoint = match scheme {
            "local" => {
                if !body.is_empty() {
                    return Err(TransportError::InvalidUri(format!(
                        "{uri}: local:// takes no address"
                    )));
                }
                Endpoint::Local
            }
            "tcp" => {
                let (host, port) = body.rsplit_once(':').ok_or_else(|| {
                    TransportError::InvalidUri(format!("{uri}: tcp needs HOST:PORT or :PORT"))
                })?;
                let port: u16 = port.parse().map_err(|_| {
                    TransportError::InvalidUri(format!("{uri}: bad port {port:?}"))
                })?;
                if host.is_empty() {
                    Endpoint::TcpListen { port }
                } else {
                    Endpoint::TcpConnect { host: host.to_owned(), port }
                }
            }
            "serial" => {
                // serial:///dev/tty...; the body keeps its leading slash.
                if !body.starts_with('/') {
                    return Err(TransportError::InvalidUri(format!(
                        "{uri}: serial path must be absolute"
                    )));
                }
                let baud = baud.unwrap_or(DEFAULT_BAUD);
                if baud == 0 || baud > MAX_BAUD {
                    return Err(TransportError::Config(format!(
                        "baud {baud} outside 1..={MAX_BAUD}"
                    )));
                }
                Endpoint::Serial { path: PathBuf::from(body), baud }
            }
            "shm" => {
                if body.is_empty() || body.contains('/') {
                    return Err(TransportError::InvalidUri(format!(
                        "{uri}: shm name must be a single non-empty segment"
                    )));
                }
                Endpoint::Shm { name: body.to_owned() }
            }
            other => {
                return Err(TransportError::InvalidUri(format!("unknown scheme {other:?}")));
            }
        };

        if baud.is_some() && !matches!(endpoint, Endpoint::Serial { .. }) {
            return Err(TransportError::InvalidUri(format!(
                "{uri}: baud only applies to serial"
            )));
        }

        Ok(Self { endpoint, options })
    }
}

impl FromStr for TransportUri {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_local() {
        let uri = TransportUri::parse("local://").unwrap();
        assert_eq!(uri.endpoint, Endpoint::Local);
        assert_eq!(uri.options, UriOptions::default());
    }

    #[test]
    fn parse_tcp_connect() {
        let uri = TransportUri::parse("tcp://bench-rig:9000?timeout_ms=2500").unwrap();
        assert_eq!(
            uri.endpoint,
            Endpoint::TcpConnect { host: "bench-rig".to_owned(), port: 9000 }
        );
        assert_eq!(uri.options.timeout_ms, Some(2500));
    }

    #[test]
    fn parse_tcp_listen() {
        let uri = TransportUri::parse("tcp://:7001?accept_timeout_ms=100").unwrap();
        assert_eq!(uri.endpoint, Endpoint::TcpListen { port: 7001 });
        assert_eq!(uri.options.accept_timeout_ms, Some(100));
    }

    #[test]
    fn parse_serial_with_baud() {
        let uri = TransportUri::parse("serial:///dev/ttyACM0?baud=921600").unwrap();
        assert_eq!(
            uri.endpoint,
            Endpoint::Serial { path: PathBuf::from("/dev/ttyACM0"), baud: 921_600 }
        );
    }

    #[test]
    fn serial_defaults_to_115200() {
        let uri = TransportUri::parse("serial:///dev/ttyUSB0").unwrap();
        assert!(matches!(uri.endpoint, Endpoint::Serial { baud: DEFAULT_BAUD, .. }));
    }

    #[test]
    fn parse_shm() {
        let uri = TransportUri::parse("shm://cortex0").unwrap();
        assert_eq!(uri.endpoint, Endpoint::Shm { name: "cortex0".to_owned() });
    }

    #[test]
    fn reject_bad_uris() {
        for bad in [
            "nope",
            "ftp://x:1",
            "tcp://noport",
            "tcp://host:99999",
            "serial://relative/tty",
            "serial:///dev/tty?baud=0",
            "serial:///dev/tty?baud=1000000",
            "shm://",
            "shm://a/b",
            "local://extra",
            "tcp://h:1?baud=9600",
            "tcp://h:1?bogus=1",
            "tcp://h:1?timeout_ms=abc",
        ] {
            assert!(TransportUri::parse(bad).is_err(), "{bad} should not parse");
        }
    }
}
