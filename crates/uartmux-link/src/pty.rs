use std::ffi::CStr;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{LinkError, Result};
use crate::serial::make_raw;
use crate::traits::{poll_readable, poll_writable, set_nonblocking, Endpoint};

const TTY_NAME_CAPACITY: usize = 128;

/// A pseudo-terminal pair published under a stable symlink.
///
/// Consumers open the symlink as if it were a serial device; the multiplexer
/// talks to the master side through [`PortHandle`]s. The slave side is kept
/// open for the port's lifetime so the master never reports `EIO` while no
/// consumer is attached.
pub struct VirtualPort {
    master: File,
    _slave: File,
    slave_path: PathBuf,
    symlink: PathBuf,
    published: bool,
}

impl VirtualPort {
    /// Allocate a pty pair and publish its slave at `symlink`.
    ///
    /// Any existing entry at `symlink` is replaced.
    pub fn open(symlink: impl AsRef<Path>) -> Result<Self> {
        let symlink = symlink.as_ref().to_path_buf();
        let (master, slave) = open_pty_pair()?;

        make_raw(slave.as_raw_fd(), None).map_err(LinkError::Pty)?;
        set_nonblocking(master.as_raw_fd(), true).map_err(LinkError::Pty)?;
        let slave_path = tty_name(slave.as_raw_fd()).map_err(LinkError::Pty)?;

        if std::fs::symlink_metadata(&symlink).is_ok() {
            std::fs::remove_file(&symlink).map_err(|e| LinkError::Symlink {
                path: symlink.clone(),
                source: e,
            })?;
            info!(path = ?symlink, "unlinked stale port entry");
        }

        std::os::unix::fs::symlink(&slave_path, &symlink).map_err(|e| LinkError::Symlink {
            path: symlink.clone(),
            source: e,
        })?;
        info!(slave = ?slave_path, path = ?symlink, "created symlink");

        Ok(Self {
            master,
            _slave: slave,
            slave_path,
            symlink,
            published: true,
        })
    }

    /// Get a new handle to the master side.
    pub fn handle(&self) -> Result<PortHandle> {
        Ok(PortHandle {
            file: self.master.try_clone()?,
        })
    }

    /// The published symlink path.
    pub fn symlink(&self) -> &Path {
        &self.symlink
    }

    /// The pty slave device the symlink points at.
    pub fn slave_path(&self) -> &Path {
        &self.slave_path
    }

    /// Remove the symlink and release the pty pair.
    pub fn close(mut self) -> Result<()> {
        self.unpublish()
    }

    fn unpublish(&mut self) -> Result<()> {
        if !self.published {
            return Ok(());
        }
        self.published = false;

        match std::fs::read_link(&self.symlink) {
            Ok(target) if target == self.slave_path => {
                std::fs::remove_file(&self.symlink).map_err(|e| LinkError::Symlink {
                    path: self.symlink.clone(),
                    source: e,
                })?;
                info!(path = ?self.symlink, "unlinked");
            }
            _ => {
                debug!(
                    path = ?self.symlink,
                    "port path identity changed; skipping cleanup"
                );
            }
        }
        Ok(())
    }
}

impl Drop for VirtualPort {
    fn drop(&mut self) {
        if let Err(err) = self.unpublish() {
            debug!(path = ?self.symlink, error = %err, "port cleanup failed");
        }
    }
}

impl std::fmt::Debug for VirtualPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualPort")
            .field("symlink", &self.symlink)
            .field("slave", &self.slave_path)
            .finish()
    }
}

/// A handle to the master side of a [`VirtualPort`].
///
/// The master is non-blocking: a write to a port whose consumer has stopped
/// reading fails with `WouldBlock` instead of stalling the caller.
pub struct PortHandle {
    file: File,
}

impl Read for PortHandle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for PortHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl Endpoint for PortHandle {
    fn wait_readable(&self, timeout: Duration) -> Result<bool> {
        poll_readable(self.file.as_raw_fd(), timeout)
    }

    fn wait_writable(&self, timeout: Duration) -> Result<bool> {
        poll_writable(self.file.as_raw_fd(), timeout)
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            file: self.file.try_clone()?,
        })
    }
}

impl std::fmt::Debug for PortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortHandle")
            .field("fd", &self.file.as_raw_fd())
            .finish()
    }
}

fn open_pty_pair() -> Result<(File, File)> {
    let mut master: libc::c_int = -1;
    let mut slave: libc::c_int = -1;

    // SAFETY: both out-pointers are valid; name, termios and winsize may be null.
    let rc = unsafe {
        libc::openpty(
            &mut master,
            &mut slave,
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
        )
    };
    if rc != 0 {
        return Err(LinkError::Pty(std::io::Error::last_os_error()));
    }

    // SAFETY: openpty succeeded, so both descriptors are open and owned by us.
    let pair = unsafe { (File::from_raw_fd(master), File::from_raw_fd(slave)) };
    Ok(pair)
}

fn tty_name(fd: RawFd) -> std::io::Result<PathBuf> {
    let mut buf = [0 as libc::c_char; TTY_NAME_CAPACITY];

    // SAFETY: `buf` is writable for its full length.
    let rc = unsafe { libc::ttyname_r(fd, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return Err(std::io::Error::from_raw_os_error(rc));
    }

    // SAFETY: ttyname_r NUL-terminates the name on success.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(PathBuf::from(name.to_string_lossy().into_owned()))
}

#[cfg(test)]
mod tests {
    use std::fs::OpenOptions;
    use std::time::Instant;

    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("uartmux-pty-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn read_available(handle: &mut PortHandle, want: usize) -> Vec<u8> {
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut out = Vec::new();
        let mut buf = [0u8; 64];
        while out.len() < want && Instant::now() < deadline {
            if !handle.wait_readable(Duration::from_millis(50)).unwrap() {
                continue;
            }
            match handle.read(&mut buf) {
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(err) => panic!("read failed: {err}"),
            }
        }
        out
    }

    #[test]
    fn open_publishes_symlink_to_slave() {
        let dir = temp_dir("publish");
        let path = dir.join("gps0");

        let port = VirtualPort::open(&path).unwrap();
        let target = std::fs::read_link(&path).unwrap();
        assert_eq!(target, port.slave_path());
        assert_eq!(port.symlink(), path.as_path());

        port.close().unwrap();
        assert!(std::fs::symlink_metadata(&path).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn open_replaces_existing_entry() {
        let dir = temp_dir("replace");
        let path = dir.join("imu0");
        std::fs::write(&path, b"stale").unwrap();

        let port = VirtualPort::open(&path).unwrap();
        assert_eq!(std::fs::read_link(&path).unwrap(), port.slave_path());

        drop(port);
        assert!(std::fs::symlink_metadata(&path).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn close_keeps_replaced_path() {
        let dir = temp_dir("identity");
        let path = dir.join("roboclaw0");

        let port = VirtualPort::open(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, b"replacement").unwrap();

        port.close().unwrap();
        assert!(path.exists(), "close must not remove a path it no longer owns");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn bytes_flow_between_consumer_and_handle() {
        let dir = temp_dir("flow");
        let path = dir.join("ttyNC0");
        let port = VirtualPort::open(&path).unwrap();
        let mut handle = port.handle().unwrap();

        let mut consumer = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        consumer.write_all(b"from-consumer").unwrap();
        assert_eq!(read_available(&mut handle, 13), b"from-consumer");

        handle.write_all(b"to-consumer").unwrap();
        let mut buf = [0u8; 11];
        consumer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"to-consumer");

        drop(consumer);
        port.close().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn idle_port_is_not_readable() {
        let dir = temp_dir("idle");
        let port = VirtualPort::open(dir.join("idle0")).unwrap();
        let handle = port.handle().unwrap();

        assert!(!handle.wait_readable(Duration::from_millis(10)).unwrap());

        port.close().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
