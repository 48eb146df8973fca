//! Serial/UART carrier over POSIX termios.
//!
//! Raw 8N1 with `VMIN=0 VTIME=0`; read timeouts come from `poll(2)` like
//! every other descriptor carrier, not from the line discipline. Intended
//! for embedded debugging; at 921600 baud a 40 KiB window takes ~0.4 s, so
//! this carrier cannot feed large windows at benchmark rates.

use std::{
    fs::OpenOptions,
    os::{fd::OwnedFd, unix::fs::OpenOptionsExt},
    path::Path,
};

use nix::sys::termios::{
    self, BaudRate, ControlFlags, SetArg, SpecialCharacterIndices,
};

use crate::{Result, errors::TransportError, fd::FdTransport, uri::MAX_BAUD};

/// Map a numeric rate onto the termios baud table.
fn baud_rate(baud: u32) -> Result<BaudRate> {
    if baud == 0 || baud > MAX_BAUD {
        return Err(TransportError::Config(format!("baud {baud} outside 1..={MAX_BAUD}")));
    }
    let rate = match baud {
        50 => BaudRate::B50,
        75 => BaudRate::B75,
        110 => BaudRate::B110,
        134 => BaudRate::B134,
        150 => BaudRate::B150,
        200 => BaudRate::B200,
        300 => BaudRate::B300,
        600 => BaudRate::B600,
        1200 => BaudRate::B1200,
        1800 => BaudRate::B1800,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19_200 => BaudRate::B19200,
        38_400 => BaudRate::B38400,
        57_600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        460_800 => BaudRate::B460800,
        921_600 => BaudRate::B921600,
        other => {
            return Err(TransportError::Config(format!(
                "baud {other} is not a standard termios rate"
            )));
        }
    };
    Ok(rate)
}

/// Open and configure a tty as a transport.
pub fn open(path: &Path, baud: u32) -> Result<FdTransport> {
    let rate = baud_rate(baud)?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)?;
    let fd = OwnedFd::from(file);

    let mut tio = termios::tcgetattr(&fd).map_err(std::io::Error::from)?;
    termios::cfmakeraw(&mut tio);
    // cfmakeraw gives 8 data bits, no parity; force one stop bit and keep
    // the receiver running regardless of modem lines.
    tio.control_flags &= !ControlFlags::CSTOPB;
    tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    termios::cfsetspeed(&mut tio, rate).map_err(std::io::Error::from)?;
    termios::tcsetattr(&fd, SetArg::TCSANOW, &tio).map_err(std::io::Error::from)?;
    termios::tcflush(&fd, termios::FlushArg::TCIOFLUSH).map_err(std::io::Error::from)?;

    tracing::debug!(path = %path.display(), baud, "serial port configured");
    FdTransport::from_duplex(fd)
}
