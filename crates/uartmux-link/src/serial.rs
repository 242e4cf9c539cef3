use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{LinkError, Result};
use crate::traits::{poll_readable, poll_writable, set_nonblocking, Endpoint};

/// The physical serial link carrying multiplexed frames.
///
/// Opened in raw mode at a fixed baud rate. Reads and writes go straight to
/// the device; cloning yields an independent descriptor so the inbound and
/// outbound directions can own their own handle.
pub struct SerialLink {
    file: File,
    path: PathBuf,
    baud: u32,
}

impl SerialLink {
    /// Open `path` as a raw serial device at `baud`.
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed = speed_for(baud).ok_or(LinkError::UnsupportedBaud(baud))?;

        // O_NONBLOCK keeps open(2) from waiting for carrier until CLOCAL is set.
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&path)
            .map_err(|e| LinkError::Open {
                path: path.clone(),
                source: e,
            })?;

        make_raw(file.as_raw_fd(), Some(speed))
            .and_then(|()| set_nonblocking(file.as_raw_fd(), false))
            .map_err(|e| LinkError::Configure {
                path: path.clone(),
                source: e,
            })?;

        // SAFETY: the descriptor is open and owned by `file`.
        if unsafe { libc::tcflush(file.as_raw_fd(), libc::TCIFLUSH) } != 0 {
            debug!(?path, error = %std::io::Error::last_os_error(), "input flush failed");
        }

        info!(?path, baud, "opened serial link");
        Ok(Self { file, path, baud })
    }

    /// The device path this link was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The configured baud rate.
    pub fn baud(&self) -> u32 {
        self.baud
    }
}

impl Read for SerialLink {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for SerialLink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Endpoint for SerialLink {
    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        poll_readable(self.file.as_raw_fd(), timeout)
    }

    fn wait_writable(&self, timeout: Duration) -> Result<bool> {
        poll_writable(self.file.as_raw_fd(), timeout)
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
            path: self.path.clone(),
            baud: self.baud,
        })
    }
}

impl std::fmt::Debug for SerialLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialLink")
            .field("path", &self.path)
            .field("baud", &self.baud)
            .finish()
    }
}

/// Put a terminal descriptor into raw 8N1 mode, optionally setting its speed.
pub(crate) fn make_raw(fd: RawFd, speed: Option<libc::speed_t>) -> std::io::Result<()> {
    // SAFETY: termios is plain data; tcgetattr fully initializes it on success.
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };

    // SAFETY: `fd` is an open descriptor and `tio` is a valid termios.
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: `tio` was initialized by tcgetattr above.
    unsafe { libc::cfmakeraw(&mut tio) };
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;

    if let Some(speed) = speed {
        // SAFETY: `tio` is a valid termios and `speed` a termios speed constant.
        if unsafe { libc::cfsetispeed(&mut tio, speed) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        // SAFETY: as above.
        if unsafe { libc::cfsetospeed(&mut tio, speed) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    // SAFETY: `fd` is open and `tio` is fully initialized.
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Map a numeric baud rate to its termios speed constant.
pub fn speed_for(baud: u32) -> Option<libc::speed_t> {
    let speed = match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        #[cfg(target_os = "linux")]
        460800 => libc::B460800,
        #[cfg(target_os = "linux")]
        500000 => libc::B500000,
        #[cfg(target_os = "linux")]
        921600 => libc::B921600,
        #[cfg(target_os = "linux")]
        1000000 => libc::B1000000,
        #[cfg(target_os = "linux")]
        1500000 => libc::B1500000,
        #[cfg(target_os = "linux")]
        2000000 => libc::B2000000,
        #[cfg(target_os = "linux")]
        3000000 => libc::B3000000,
        #[cfg(target_os = "linux")]
        4000000 => libc::B4000000,
        _ => return None,
    };
    Some(speed)
}
