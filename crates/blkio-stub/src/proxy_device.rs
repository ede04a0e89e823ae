//! Proxy device handles.
//!
//! A `ProxyDevice` is the stub's connection to whoever fills the ring:
//! it can be mapped, it becomes readable when slots were submitted, and
//! it accepts "slot N done" signals.
//!
//! # Implementors
//!
//! - `CharDevProxy` (default): the kernel proxy's control device.
//!   Readiness is `POLLIN` on the device, done is an ioctl.
//!
//! - `LoopbackProxy`: an in-process proxy over a memfd, woken through an
//!   eventfd. Used when both sides of the ring live in user space.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::debug;

use blkio_core::entry::SlotId;
use blkio_core::error::{BlkioError, Result};

use crate::proxy_ring::ProxyRing;
use crate::proxy_sys;

/// The device-handle side of the proxy contract.
pub trait ProxyDevice: AsFd + Send + Sync {
    /// Wait up to `timeout` for submitted slots.
    ///
    /// `Ok(true)` on readiness, `Ok(false)` on timeout.
    fn wait_ready(&self, timeout: Duration) -> Result<bool>;

    /// Tell the proxy that slot `id` has been tagged done.
    fn send_done(&self, id: SlotId) -> Result<()>;

    /// Map the shared request ring.
    fn map_ring(&self, capacity: usize) -> Result<ProxyRing> {
        ProxyRing::map(self.as_fd(), capacity)
    }
}

/// Poll `fd` for `POLLIN` for at most `timeout`.
pub(crate) fn poll_readable(fd: BorrowedFd<'_>, timeout: Duration) -> Result<bool> {
    let ms = timeout.as_millis().min(u16::MAX as u128) as u16;
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::from(ms)) {
        Ok(0) => Ok(false),
        Ok(_) => {
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            // A hung-up proxy stays readable forever; report it as a
            // wait failure so the caller backs off.
            if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL | PollFlags::POLLHUP) {
                return Err(BlkioError::Wait(io::Error::new(
                    io::ErrorKind::Other,
                    format!("poll revents {:?}", revents),
                )));
            }
            Ok(revents.contains(PollFlags::POLLIN))
        }
        Err(errno) => Err(BlkioError::Wait(io::Error::from(errno))),
    }
}

/// Handle on the kernel proxy's control device.
pub struct CharDevProxy {
    fd: OwnedFd,
    path: String,
}

impl CharDevProxy {
    /// Open the control device read/write.
    pub fn open(path: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(path)
            .map_err(|source| BlkioError::Handle {
                path: path.to_string(),
                source,
            })?;
        debug!(path, fd = file.as_raw_fd(), "proxy device opened");
        Ok(Self {
            fd: OwnedFd::from(file),
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl AsFd for CharDevProxy {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl ProxyDevice for CharDevProxy {
    fn wait_ready(&self, timeout: Duration) -> Result<bool> {
        // The proxy refreshes its pending state when it is polled.
        poll_readable(self.fd.as_fd(), timeout)
    }

    fn send_done(&self, id: SlotId) -> Result<()> {
        let raw = id.0;
        unsafe { proxy_sys::blkio_proxy_ioc_done(self.fd.as_raw_fd(), &raw) }
            .map(|_| ())
            .map_err(|errno| BlkioError::Signal {
                id,
                source: io::Error::from(errno),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_device_is_handle_error() {
        match CharDevProxy::open("/dev/__blkio_no_such_proxy__") {
            Err(BlkioError::Handle { path, source }) => {
                assert_eq!(path, "/dev/__blkio_no_such_proxy__");
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("opened a missing device"),
        }
    }

    #[test]
    fn test_done_ioctl_on_non_proxy_fails() {
        let dev = CharDevProxy::open("/dev/null").unwrap();
        assert_eq!(dev.path(), "/dev/null");
        assert!(matches!(
            dev.send_done(SlotId(0)),
            Err(BlkioError::Signal { id: SlotId(0), .. })
        ));
    }

    #[test]
    fn test_poll_readable_times_out() {
        let (rx, _tx) = std::os::unix::net::UnixStream::pair().unwrap();
        let ready = poll_readable(rx.as_fd(), Duration::from_millis(10)).unwrap();
        assert!(!ready);
    }

    #[test]
    fn test_poll_readable_sees_data() {
        use std::io::Write;
        let (rx, mut tx) = std::os::unix::net::UnixStream::pair().unwrap();
        tx.write_all(b"x").unwrap();
        assert!(poll_readable(rx.as_fd(), Duration::from_millis(100)).unwrap());
    }

    #[test]
    fn test_poll_readable_reports_hangup() {
        let (rx, tx) = std::os::unix::net::UnixStream::pair().unwrap();
        drop(tx);
        assert!(matches!(
            poll_readable(rx.as_fd(), Duration::from_millis(100)),
            Err(BlkioError::Wait(_))
        ));
    }
}
