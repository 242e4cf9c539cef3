use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// A byte endpoint the multiplexer can drive from a dedicated thread.
///
/// Both the physical link and every logical stream implement this. The
/// multiplexer clones an endpoint once per direction, so one clone is only
/// ever read and the other only ever written.
pub trait Endpoint: Read + Write + Send + Sized + 'static {
    /// Wait up to `timeout` for the endpoint to become readable.
    ///
    /// Returns `Ok(false)` on timeout. Hang-up and error conditions report
    /// `Ok(true)` so the following read surfaces them.
    fn wait_readable(&self, timeout: Duration) -> Result<bool>;

    /// Wait up to `timeout` for room to write without blocking.
    ///
    /// Returns `Ok(false)` on timeout. Error conditions report `Ok(true)`
    /// so the following write surfaces them.
    fn wait_writable(&self, timeout: Duration) -> Result<bool>;

    /// Create another handle to the same underlying endpoint.
    fn try_clone(&self) -> Result<Self>;
}

#[cfg(unix)]
impl Endpoint for std::os::unix::net::UnixStream {
    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        use std::os::fd::AsRawFd;

        poll_readable(self.as_raw_fd(), timeout)
    }

    fn wait_writable(&self, timeout: Duration) -> Result<bool> {
        use std::os::fd::AsRawFd;

        poll_writable(self.as_raw_fd(), timeout)
    }

    fn try_clone(&self) -> Result<Self> {
        std::os::unix::net::UnixStream::try_clone(self).map_err(Into::into)
    }
}

/// `poll(2)` a single descriptor for input.
#[cfg(unix)]
pub(crate) fn poll_readable(fd: std::os::fd::RawFd, timeout: Duration) -> Result<bool> {
    poll_one(fd, libc::POLLIN, timeout)
}

/// `poll(2)` a single descriptor for output room.
#[cfg(unix)]
pub(crate) fn poll_writable(fd: std::os::fd::RawFd, timeout: Duration) -> Result<bool> {
    poll_one(fd, libc::POLLOUT, timeout)
}

#[cfg(unix)]
fn poll_one(fd: std::os::fd::RawFd, events: libc::c_short, timeout: Duration) -> Result<bool> {
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };

    loop {
        // SAFETY: `pfd` is a valid, writable pollfd and the count matches.
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
        if rc == 0 {
            return Ok(false);
        }
        return Ok(pfd.revents & (events | libc::POLLHUP | libc::POLLERR) != 0);
    }
}

/// Set or clear `O_NONBLOCK` on a descriptor.
#[cfg(unix)]
pub(crate) fn set_nonblocking(fd: std::os::fd::RawFd, nonblocking: bool) -> std::io::Result<()> {
    // SAFETY: `fd` is an open descriptor.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
