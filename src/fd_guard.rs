use std::{
    ops::Deref,
    os::unix::io::{
        AsFd,
        AsRawFd,
        BorrowedFd,
        FromRawFd,
        IntoRawFd,
        RawFd,
    },
    sync::atomic::{
        AtomicBool,
        Ordering,
    },
};

use log::debug;


/// A RAII guard around a `RawFd` that closes it automatically on drop.
#[derive(Debug)]
pub struct FdGuard {
    pub(crate) fd           : RawFd,
    pub(crate) close_on_drop: AtomicBool,
}

impl FdGuard {
    /// Takes ownership of `fd`
    pub(crate) fn new(fd: RawFd) -> Self {
        FdGuard {
            fd,
            close_on_drop: AtomicBool::new(true),
        }
    }

    /// Indicate that the wrapped file descriptor should _not_ be closed
    /// when the guard is dropped.
    ///
    /// This should be called in cases where ownership of the wrapped file
    /// descriptor has been "moved" out of the guard.
    ///
    /// This is factored out into a separate function to ensure that it's
    /// always used consistently.
    #[inline]
    pub fn should_not_close(&self) {
        self.close_on_drop.store(false, Ordering::Release);
    }

    /// Closes the descriptor now and reports the result of `close`
    pub(crate) fn close(&self) -> std::io::Result<()> {
        self.should_not_close();
        match unsafe { libc::close(self.fd) } {
            0 => Ok(()),
            _ => Err(std::io::Error::last_os_error()),
        }
    }
}

impl Deref for FdGuard {
    type Target = RawFd;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.fd
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        if self.close_on_drop.load(Ordering::Acquire) {
            debug!("closing fd {}", self.fd);
            unsafe { libc::close(self.fd); }
        }
    }
}

impl FromRawFd for FdGuard {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        FdGuard::new(fd)
    }
}

impl IntoRawFd for FdGuard {
    fn into_raw_fd(self) -> RawFd {
        self.should_not_close();
        self.fd
    }
}

impl AsRawFd for FdGuard {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

impl AsFd for FdGuard {
    #[inline]
    fn as_fd(&self) -> BorrowedFd<'_> {
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }
}

impl PartialEq for FdGuard {
    fn eq(&self, other: &FdGuard) -> bool {
        self.fd == other.fd
    }
}


#[cfg(test)]
mod tests {
    use std::os::unix::io::IntoRawFd;

    use super::FdGuard;

    #[test]
    fn drop_should_close_the_descriptor() {
        let mut fds = [0; 2];
        assert_eq!(0, unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) });
        let [read_end, write_end] = fds;

        // With the only write end closed, reading the pipe reports EOF.
        drop(FdGuard::new(write_end));

        let mut byte = 0u8;
        let n = unsafe {
            libc::read(read_end, &mut byte as *mut u8 as *mut libc::c_void, 1)
        };
        assert_eq!(0, n);
        unsafe { libc::close(read_end); }
    }

    #[test]
    fn into_raw_fd_should_release_ownership() {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        let raw = FdGuard::new(fd).into_raw_fd();

        assert_eq!(fd, raw);
        assert_ne!(-1, unsafe { libc::fcntl(raw, libc::F_GETFD) });
        unsafe { libc::close(raw); }
    }
}
