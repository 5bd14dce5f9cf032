use std::{
    convert::TryFrom,
    io,
    mem::MaybeUninit,
    os::unix::io::{
        AsFd,
        AsRawFd,
        BorrowedFd,
        IntoRawFd,
        RawFd,
    },
    time::Duration,
};

use bitflags::bitflags;
use log::debug;

use crate::fd_guard::FdGuard;
use crate::util::{
    cvt,
    read_u64,
};


bitflags! {
    /// Flags for [`TimerFd::new`]
    #[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default)]
    pub struct TimerFdFlags: i32 {
        /// Set close-on-exec on the new descriptor
        const CLOEXEC = libc::TFD_CLOEXEC;

        /// Fail reads with `WouldBlock` instead of waiting
        const NONBLOCK = libc::TFD_NONBLOCK;
    }
}


/// Clock a [`TimerFd`] measures time with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Clock {
    /// The settable system-wide real time clock
    ///
    /// May jump when the administrator changes the time. Absolute expiration
    /// times are UNIX times.
    Realtime,

    /// A clock that only moves forward
    ///
    /// Only affected by incremental adjustments (`adjtime`, NTP).
    Monotonic,
}

impl Clock {
    fn id(self) -> libc::clockid_t {
        match self {
            Clock::Realtime  => libc::CLOCK_REALTIME,
            Clock::Monotonic => libc::CLOCK_MONOTONIC,
        }
    }
}


/// Setting of a [`TimerFd`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TimerSpec {
    /// Time until the next expiration; zero if the timer is disarmed
    pub value: Duration,

    /// Period after the first expiration; zero for a one-shot timer
    pub interval: Duration,
}

impl TimerSpec {
    /// Whether the timer will expire at all
    pub fn is_armed(&self) -> bool {
        self.value != Duration::from_secs(0)
    }

    fn from_raw(spec: &libc::itimerspec) -> Self {
        TimerSpec {
            value   : duration(&spec.it_value),
            interval: duration(&spec.it_interval),
        }
    }
}

fn duration(time: &libc::timespec) -> Duration {
    // The kernel never reports negative times for a timerfd.
    Duration::new(time.tv_sec.max(0) as u64, time.tv_nsec.max(0) as u32)
}

fn timespec(duration: Duration) -> io::Result<libc::timespec> {
    let tv_sec = libc::time_t::try_from(duration.as_secs()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{:?} does not fit into a timespec", duration),
        )
    })?;

    Ok(libc::timespec {
        tv_sec,
        tv_nsec: duration.subsec_nanos() as libc::c_long,
    })
}


/// A timer that notifies through a file descriptor
///
/// The descriptor becomes readable when the timer expires; reading returns
/// the number of expirations since the last read.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use linuxfd::{
///     Clock,
///     TimerFd,
///     TimerFdFlags,
/// };
///
/// let tfd = TimerFd::new(Clock::Monotonic, TimerFdFlags::empty())
///     .expect("Failed to create timerfd");
///
/// tfd.settime(Duration::from_millis(10), Duration::from_secs(0), false)
///     .expect("Failed to arm timer");
/// assert_eq!(1, tfd.read().unwrap());
/// ```
#[derive(Debug)]
pub struct TimerFd {
    fd   : FdGuard,
    clock: Clock,
    flags: TimerFdFlags,
}

impl TimerFd {
    /// Creates a disarmed timer on `clock`
    ///
    /// # Errors
    ///
    /// Returns the error from [`timerfd_create`](libc::timerfd_create) as is.
    pub fn new(clock: Clock, flags: TimerFdFlags) -> io::Result<Self> {
        let fd = cvt(unsafe { libc::timerfd_create(clock.id(), flags.bits()) })?;
        debug!("created timerfd {} on {:?} ({:?})", fd, clock, flags);

        Ok(TimerFd {
            fd: FdGuard::new(fd),
            clock,
            flags,
        })
    }

    /// Starts or stops the timer, returning its previous setting
    ///
    /// The timer first expires after `value`, then every `interval` unless
    /// that is zero. A zero `value` disarms the timer. With `absolute` set,
    /// `value` is a point in time on the timer's clock rather than a delay;
    /// for [`Clock::Realtime`] that is a UNIX time.
    ///
    /// # Errors
    ///
    /// A duration with more seconds than `time_t` holds fails with
    /// [`io::ErrorKind::InvalidInput`] and leaves the timer as it was.
    /// Errors from [`timerfd_settime`](libc::timerfd_settime) are returned
    /// as is.
    pub fn settime(&self, value: Duration, interval: Duration, absolute: bool)
        -> io::Result<TimerSpec>
    {
        let flags = if absolute { libc::TFD_TIMER_ABSTIME } else { 0 };
        let new_value = libc::itimerspec {
            it_interval: timespec(interval)?,
            it_value   : timespec(value)?,
        };
        let mut old_value = MaybeUninit::<libc::itimerspec>::uninit();

        cvt(unsafe {
            libc::timerfd_settime(*self.fd, flags, &new_value, old_value.as_mut_ptr())
        })?;
        debug!(
            "timerfd {} set to {:?} every {:?} (absolute: {})",
            *self.fd, value, interval, absolute,
        );

        let old_value = unsafe { old_value.assume_init() };
        Ok(TimerSpec::from_raw(&old_value))
    }

    /// Returns the current setting
    ///
    /// The value is always relative, even for a timer armed with an absolute
    /// time.
    ///
    /// # Errors
    ///
    /// Returns the error from [`timerfd_gettime`](libc::timerfd_gettime) as
    /// is.
    pub fn gettime(&self) -> io::Result<TimerSpec> {
        let mut curr_value = MaybeUninit::<libc::itimerspec>::uninit();

        cvt(unsafe { libc::timerfd_gettime(*self.fd, curr_value.as_mut_ptr()) })?;

        let curr_value = unsafe { curr_value.assume_init() };
        Ok(TimerSpec::from_raw(&curr_value))
    }

    /// Returns the number of expirations since the last read
    ///
    /// # Errors
    ///
    /// Before the next expiration this blocks, or fails with
    /// [`io::ErrorKind::WouldBlock`] if the descriptor is non-blocking.
    /// Errors from [`read`](libc::read) are returned as is; a short read fails
    /// with `EIO`.
    pub fn read(&self) -> io::Result<u64> {
        read_u64(*self.fd)
    }

    /// The clock this timer measures time with
    pub fn clock(&self) -> Clock {
        self.clock
    }

    /// Whether reads fail instead of waiting
    pub fn is_nonblocking(&self) -> bool {
        self.flags.contains(TimerFdFlags::NONBLOCK)
    }

    /// Whether close-on-exec is set
    pub fn is_close_on_exec(&self) -> bool {
        self.flags.contains(TimerFdFlags::CLOEXEC)
    }
}

impl AsRawFd for TimerFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for TimerFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl IntoRawFd for TimerFd {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}
