use std::{
    io,
    mem::{
        self,
        MaybeUninit,
    },
    os::unix::io::{
        AsFd,
        AsRawFd,
        BorrowedFd,
        IntoRawFd,
        RawFd,
    },
    ptr,
};

use bitflags::bitflags;
use libc::c_int;
use log::debug;

use crate::fd_guard::FdGuard;
use crate::util::{
    cvt,
    read_into_buffer,
    set_cloexec,
    set_nonblocking,
};


bitflags! {
    /// Flags for [`SignalFd::new`] and [`SignalFd::modify`]
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    pub struct SignalFdFlags: i32 {
        /// Set close-on-exec on the descriptor
        const CLOEXEC = libc::SFD_CLOEXEC;

        /// Fail reads with `WouldBlock` instead of waiting
        const NONBLOCK = libc::SFD_NONBLOCK;
    }
}


/// A file descriptor that accepts signals
///
/// The descriptor becomes readable when one of its signals is pending for the
/// calling thread or the process; reading consumes that signal. The signals
/// have to be blocked with [`block_signals`] first, otherwise their default
/// disposition still applies.
///
/// # Examples
///
/// ```
/// use linuxfd::{
///     block_signals,
///     SignalFd,
///     SignalFdFlags,
/// };
///
/// block_signals(&[libc::SIGUSR1]).expect("Failed to block SIGUSR1");
/// let sfd = SignalFd::new(vec![libc::SIGUSR1], SignalFdFlags::NONBLOCK)
///     .expect("Failed to create signalfd");
///
/// unsafe { libc::raise(libc::SIGUSR1) };
/// let info = sfd.read().expect("Failed to read signal");
/// assert_eq!(libc::SIGUSR1 as u32, info.signo);
/// ```
#[derive(Debug)]
pub struct SignalFd {
    fd     : FdGuard,
    signals: Vec<c_int>,
    flags  : SignalFdFlags,
}

impl SignalFd {
    /// Creates a signalfd accepting `signals`
    ///
    /// Duplicates in `signals` are ignored.
    ///
    /// # Errors
    ///
    /// An invalid signal number fails with `EINVAL` before any descriptor is
    /// created. Errors from [`signalfd`](libc::signalfd) are returned as is.
    pub fn new<I>(signals: I, flags: SignalFdFlags) -> io::Result<Self>
        where I: IntoIterator<Item = c_int>
    {
        let signals = normalize(signals);
        let set = sigset(&signals)?;

        let fd = cvt(unsafe { libc::signalfd(-1, &set, flags.bits()) })?;
        debug!("created signalfd {} for {:?} ({:?})", fd, signals, flags);

        Ok(SignalFd {
            fd: FdGuard::new(fd),
            signals,
            flags,
        })
    }

    /// Replaces the accepted signals, keeping the descriptor
    ///
    /// `flags` replaces the descriptor's flags; `None` keeps them.
    ///
    /// # Errors
    ///
    /// Fails like [`SignalFd::new`], in which case nothing changes, or with
    /// the error from [`fcntl`] while applying `flags`. By then the new
    /// signals are in effect and reported by [`SignalFd::signals`], and the
    /// flag getters report what was applied before the failure.
    ///
    /// [`fcntl`]: libc::fcntl
    pub fn modify<I>(&mut self, signals: I, flags: Option<SignalFdFlags>)
        -> io::Result<()>
        where I: IntoIterator<Item = c_int>
    {
        let signals = normalize(signals);
        let set = sigset(&signals)?;
        let flags = flags.unwrap_or(self.flags);

        // The kernel only updates the mask of an existing signalfd and ignores
        // the flags passed along with it.
        cvt(unsafe { libc::signalfd(*self.fd, &set, flags.bits()) })?;
        debug!("signalfd {} now accepts {:?}", *self.fd, signals);
        self.signals = signals;

        let nonblocking = flags.contains(SignalFdFlags::NONBLOCK);
        set_nonblocking(*self.fd, nonblocking)?;
        self.flags.set(SignalFdFlags::NONBLOCK, nonblocking);

        let cloexec = flags.contains(SignalFdFlags::CLOEXEC);
        set_cloexec(*self.fd, cloexec)?;
        self.flags.set(SignalFdFlags::CLOEXEC, cloexec);

        Ok(())
    }

    /// Consumes one pending signal and describes it
    ///
    /// Multiple pending signals take multiple reads.
    ///
    /// # Errors
    ///
    /// With no signal pending, this blocks, or fails with
    /// [`io::ErrorKind::WouldBlock`] if the descriptor is non-blocking.
    /// Errors from [`read`](libc::read) are returned as is; a short read fails
    /// with `EIO`.
    pub fn read(&self) -> io::Result<SigInfo> {
        let mut buffer = [0u8; mem::size_of::<libc::signalfd_siginfo>()];

        let num_bytes = read_into_buffer(*self.fd, &mut buffer);
        if num_bytes == -1 {
            return Err(io::Error::last_os_error());
        }
        if num_bytes as usize != buffer.len() {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }

        // The byte buffer has alignment 1, hence `read_unaligned`.
        let info = unsafe {
            ptr::read_unaligned(buffer.as_ptr() as *const libc::signalfd_siginfo)
        };

        Ok(SigInfo::from(&info))
    }

    /// The accepted signals, sorted
    pub fn signals(&self) -> &[c_int] {
        &self.signals
    }

    /// Whether reads fail instead of waiting
    pub fn is_nonblocking(&self) -> bool {
        self.flags.contains(SignalFdFlags::NONBLOCK)
    }

    /// Whether close-on-exec is set
    pub fn is_close_on_exec(&self) -> bool {
        self.flags.contains(SignalFdFlags::CLOEXEC)
    }
}

impl AsRawFd for SignalFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for SignalFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl IntoRawFd for SignalFd {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}


/// A signal read from a [`SignalFd`]
///
/// Mirrors `struct signalfd_siginfo`; see [signalfd(2)] for which fields
/// are meaningful for which signal.
///
/// [signalfd(2)]: https://man7.org/linux/man-pages/man2/signalfd.2.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SigInfo {
    /// Signal number
    pub signo: u32,
    /// Error number (unused)
    pub errno: i32,
    /// Signal code
    pub code: i32,
    /// PID of sender
    pub pid: u32,
    /// Real UID of sender
    pub uid: u32,
    /// File descriptor (`SIGIO`)
    pub fd: i32,
    /// Kernel timer ID (POSIX timers)
    pub tid: u32,
    /// Band event (`SIGIO`)
    pub band: u32,
    /// POSIX timer overrun count
    pub overrun: u32,
    /// Trap number that caused the signal
    pub trapno: u32,
    /// Exit status or signal (`SIGCHLD`)
    pub status: i32,
    /// Integer sent by `sigqueue`
    pub int: i32,
    /// Pointer sent by `sigqueue`
    pub ptr: u64,
    /// User CPU time consumed (`SIGCHLD`)
    pub utime: u64,
    /// System CPU time consumed (`SIGCHLD`)
    pub stime: u64,
    /// Address that generated the signal (hardware-generated signals)
    pub addr: u64,
}

impl From<&libc::signalfd_siginfo> for SigInfo {
    fn from(info: &libc::signalfd_siginfo) -> Self {
        SigInfo {
            signo  : info.ssi_signo,
            errno  : info.ssi_errno,
            code   : info.ssi_code,
            pid    : info.ssi_pid,
            uid    : info.ssi_uid,
            fd     : info.ssi_fd,
            tid    : info.ssi_tid,
            band   : info.ssi_band,
            overrun: info.ssi_overrun,
            trapno : info.ssi_trapno,
            status : info.ssi_status,
            int    : info.ssi_int,
            ptr    : info.ssi_ptr,
            utime  : info.ssi_utime,
            stime  : info.ssi_stime,
            addr   : info.ssi_addr,
        }
    }
}


/// Blocks `signals` for the calling thread
///
/// Signals meant for a [`SignalFd`] have to be blocked, so they stay pending
/// instead of being handled. Threads spawned afterwards inherit the mask.
///
/// # Errors
///
/// An invalid signal number fails with `EINVAL`; errors from
/// [`pthread_sigmask`](libc::pthread_sigmask) are returned as is.
pub fn block_signals(signals: &[c_int]) -> io::Result<()> {
    let set = sigset(signals)?;

    match unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, ptr::null_mut()) } {
        0     => Ok(()),
        errno => Err(io::Error::from_raw_os_error(errno)),
    }
}


fn normalize<I>(signals: I) -> Vec<c_int>
    where I: IntoIterator<Item = c_int>
{
    let mut signals: Vec<_> = signals.into_iter().collect();
    signals.sort_unstable();
    signals.dedup();
    signals
}

fn sigset(signals: &[c_int]) -> io::Result<libc::sigset_t> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    cvt(unsafe { libc::sigemptyset(set.as_mut_ptr()) })?;
    let mut set = unsafe { set.assume_init() };

    for &signal in signals {
        cvt(unsafe { libc::sigaddset(&mut set, signal) })?;
    }

    Ok(set)
}


#[cfg(test)]
mod tests {
    use std::{
        io,
        os::unix::io::AsRawFd,
    };

    use super::{
        block_signals,
        SignalFd,
        SignalFdFlags,
    };

    #[test]
    fn signals_should_be_sorted_and_deduplicated() {
        let sfd = SignalFd::new(
            vec![libc::SIGTERM, libc::SIGHUP, libc::SIGTERM],
            SignalFdFlags::CLOEXEC,
        ).unwrap();

        assert_eq!(&[libc::SIGHUP, libc::SIGTERM], sfd.signals());
        assert!(sfd.is_close_on_exec());
        assert!(!sfd.is_nonblocking());
    }

    #[test]
    fn new_should_reject_invalid_signals() {
        let error = SignalFd::new(vec![1000], SignalFdFlags::empty()).unwrap_err();
        assert_eq!(Some(libc::EINVAL), error.raw_os_error());
    }

    #[test]
    fn read_should_return_a_raised_signal() {
        // Test threads are independent, and a raised signal targets only the
        // calling thread.
        block_signals(&[libc::SIGUSR1]).unwrap();
        let sfd = SignalFd::new(vec![libc::SIGUSR1], SignalFdFlags::NONBLOCK).unwrap();

        let error = sfd.read().unwrap_err();
        assert_eq!(io::ErrorKind::WouldBlock, error.kind());

        assert_eq!(0, unsafe { libc::raise(libc::SIGUSR1) });

        let info = sfd.read().unwrap();
        assert_eq!(libc::SIGUSR1 as u32, info.signo);
        assert_eq!(unsafe { libc::getpid() } as u32, info.pid);

        let error = sfd.read().unwrap_err();
        assert_eq!(io::ErrorKind::WouldBlock, error.kind());
    }

    #[test]
    fn modify_should_replace_the_signal_set() {
        block_signals(&[libc::SIGUSR2]).unwrap();
        let mut sfd = SignalFd::new(vec![libc::SIGWINCH], SignalFdFlags::empty()).unwrap();

        sfd.modify(vec![libc::SIGUSR2], Some(SignalFdFlags::NONBLOCK)).unwrap();
        assert_eq!(&[libc::SIGUSR2], sfd.signals());
        assert!(sfd.is_nonblocking());

        assert_eq!(0, unsafe { libc::raise(libc::SIGUSR2) });

        let info = sfd.read().unwrap();
        assert_eq!(libc::SIGUSR2 as u32, info.signo);
    }

    #[test]
    fn failed_modify_should_leave_signals_and_flags_alone() {
        let mut sfd = SignalFd::new(vec![libc::SIGHUP], SignalFdFlags::CLOEXEC).unwrap();

        let error = sfd
            .modify(vec![libc::SIGINT, 1000], Some(SignalFdFlags::NONBLOCK))
            .unwrap_err();

        assert_eq!(Some(libc::EINVAL), error.raw_os_error());
        assert_eq!(&[libc::SIGHUP], sfd.signals());
        assert!(sfd.is_close_on_exec());
        assert!(!sfd.is_nonblocking());
    }

    #[test]
    fn modify_should_clear_flags_that_are_not_given() {
        let mut sfd = SignalFd::new(
            vec![libc::SIGHUP],
            SignalFdFlags::NONBLOCK | SignalFdFlags::CLOEXEC,
        ).unwrap();

        sfd.modify(vec![libc::SIGHUP], Some(SignalFdFlags::empty())).unwrap();

        assert!(!sfd.is_nonblocking());
        assert!(!sfd.is_close_on_exec());
        let fd_flags = unsafe { libc::fcntl(sfd.as_raw_fd(), libc::F_GETFD) };
        assert_eq!(0, fd_flags & libc::FD_CLOEXEC);
    }

    #[test]
    fn modify_should_keep_flags_when_none_are_given() {
        let mut sfd = SignalFd::new(vec![libc::SIGHUP], SignalFdFlags::NONBLOCK).unwrap();

        sfd.modify(vec![libc::SIGINT, libc::SIGHUP], None).unwrap();

        assert_eq!(&[libc::SIGHUP, libc::SIGINT], sfd.signals());
        assert!(sfd.is_nonblocking());
        let error = sfd.read().unwrap_err();
        assert_eq!(io::ErrorKind::WouldBlock, error.kind());
    }
}
