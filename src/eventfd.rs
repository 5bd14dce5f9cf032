use std::{
    io,
    os::unix::io::{
        AsFd,
        AsRawFd,
        BorrowedFd,
        IntoRawFd,
        RawFd,
    },
};

use bitflags::bitflags;
use log::debug;

use crate::fd_guard::FdGuard;
use crate::util::{
    cvt,
    read_u64,
    write_u64,
};


/// Largest value the kernel accepts for one write
const MAX_WRITE: u64 = u64::MAX - 1;


bitflags! {
    /// Flags for [`EventFd::new`]
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    pub struct EventFdFlags: i32 {
        /// Set close-on-exec on the new descriptor
        const CLOEXEC = libc::EFD_CLOEXEC;

        /// Fail reads and writes with `WouldBlock` instead of waiting
        const NONBLOCK = libc::EFD_NONBLOCK;

        /// Reads decrement the counter by one and return `1`
        const SEMAPHORE = libc::EFD_SEMAPHORE;
    }
}


/// A kernel-managed 64-bit counter behind a file descriptor
///
/// Writing adds to the counter, reading takes from it. The descriptor is
/// readable while the counter is non-zero, which makes it a cheap wakeup
/// source for `poll`/`epoll` loops.
///
/// # Examples
///
/// ```
/// use linuxfd::{
///     EventFd,
///     EventFdFlags,
/// };
///
/// let efd = EventFd::new(0, EventFdFlags::NONBLOCK)
///     .expect("Failed to create eventfd");
///
/// efd.write(2).unwrap();
/// efd.write(3).unwrap();
/// assert_eq!(5, efd.read().unwrap());
/// ```
#[derive(Debug)]
pub struct EventFd {
    fd   : FdGuard,
    flags: EventFdFlags,
}

impl EventFd {
    /// Creates an eventfd whose counter starts at `initval`
    ///
    /// # Errors
    ///
    /// Returns the error from [`eventfd`](libc::eventfd) as is.
    pub fn new(initval: u32, flags: EventFdFlags) -> io::Result<Self> {
        let fd = cvt(unsafe { libc::eventfd(initval, flags.bits()) })?;
        debug!("created eventfd {} (initval {}, {:?})", fd, initval, flags);

        Ok(EventFd {
            fd: FdGuard::new(fd),
            flags,
        })
    }

    /// Takes from the counter
    ///
    /// In semaphore mode the counter is decremented by one and `1` is
    /// returned. Otherwise the whole counter is returned and reset to zero.
    ///
    /// # Errors
    ///
    /// A zero counter blocks, or fails with [`io::ErrorKind::WouldBlock`] if
    /// the descriptor is non-blocking. Errors from [`read`](libc::read) are
    /// returned as is.
    pub fn read(&self) -> io::Result<u64> {
        read_u64(*self.fd)
    }

    /// Adds `value` to the counter
    ///
    /// Values above `u64::MAX - 1` are clamped to it.
    ///
    /// # Errors
    ///
    /// If the addition would overflow the counter, the write blocks, or
    /// fails with [`io::ErrorKind::WouldBlock`] if the descriptor is
    /// non-blocking. Errors from [`write`](libc::write) are returned as is.
    pub fn write(&self, value: u64) -> io::Result<()> {
        write_u64(*self.fd, value.min(MAX_WRITE))
    }

    /// Whether reads behave like a counting semaphore
    pub fn is_semaphore(&self) -> bool {
        self.flags.contains(EventFdFlags::SEMAPHORE)
    }

    /// Whether the descriptor was created non-blocking
    pub fn is_nonblocking(&self) -> bool {
        self.flags.contains(EventFdFlags::NONBLOCK)
    }

    /// Whether close-on-exec is set
    pub fn is_close_on_exec(&self) -> bool {
        self.flags.contains(EventFdFlags::CLOEXEC)
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for EventFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl IntoRawFd for EventFd {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}


#[cfg(test)]
mod tests {
    use std::io;

    use super::{
        EventFd,
        EventFdFlags,
    };

    #[test]
    fn read_should_return_and_reset_the_counter() {
        let efd = EventFd::new(1, EventFdFlags::NONBLOCK).unwrap();

        efd.write(2).unwrap();
        assert_eq!(3, efd.read().unwrap());

        let error = efd.read().unwrap_err();
        assert_eq!(io::ErrorKind::WouldBlock, error.kind());
    }

    #[test]
    fn semaphore_reads_should_count_down_by_one() {
        let efd = EventFd::new(0, EventFdFlags::NONBLOCK | EventFdFlags::SEMAPHORE).unwrap();

        for _ in 0..3 {
            efd.write(1).unwrap();
        }
        for _ in 0..3 {
            assert_eq!(1, efd.read().unwrap());
        }

        let error = efd.read().unwrap_err();
        assert_eq!(io::ErrorKind::WouldBlock, error.kind());
    }

    #[test]
    fn write_should_clamp_to_the_largest_accepted_value() {
        let efd = EventFd::new(0, EventFdFlags::NONBLOCK).unwrap();

        efd.write(u64::MAX).unwrap();
        assert_eq!(u64::MAX - 1, efd.read().unwrap());
    }

    #[test]
    fn write_should_not_overflow_the_counter() {
        let efd = EventFd::new(0, EventFdFlags::NONBLOCK).unwrap();

        efd.write(u64::MAX - 1).unwrap();
        let error = efd.write(1).unwrap_err();
        assert_eq!(io::ErrorKind::WouldBlock, error.kind());
    }

    #[test]
    fn flags_should_be_reported() {
        let efd = EventFd::new(0, EventFdFlags::CLOEXEC | EventFdFlags::SEMAPHORE).unwrap();

        assert!(efd.is_semaphore());
        assert!(efd.is_close_on_exec());
        assert!(!efd.is_nonblocking());
    }
}
