#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

//! Safe wrappers for Linux's notification file descriptors
//!
//! This crate wraps four kernel facilities that report through a readable
//! file descriptor, so each of them can be waited on with
//! `select`/`poll`/`epoll` next to any other descriptor:
//!
//! - [`EventFd`]: a kernel-managed counter, for event notification
//!   ([eventfd(2)]).
//! - [`SignalFd`]: accepts signals targeted at the caller ([signalfd(2)]).
//! - [`TimerFd`]: a timer that becomes readable when it expires
//!   ([timerfd_create(2)]).
//! - [`Inotify`]: file system change notification ([inotify(7)]).
//!
//! The inotify event buffer can also be decoded on its own, see [`decode`].
//!
//! The crate logs through the [`log`] facade and never installs a logger.
//!
//! [eventfd(2)]: https://man7.org/linux/man-pages/man2/eventfd.2.html
//! [signalfd(2)]: https://man7.org/linux/man-pages/man2/signalfd.2.html
//! [timerfd_create(2)]: https://man7.org/linux/man-pages/man2/timerfd_create.2.html
//! [inotify(7)]: https://man7.org/linux/man-pages/man7/inotify.7.html
//! [`log`]: https://docs.rs/log


mod eventfd;
mod events;
mod fd_guard;
mod inotify;
mod signalfd;
mod timerfd;
mod util;
mod watches;

#[cfg(feature = "stream")]
mod stream;


pub use crate::eventfd::{
    EventFd,
    EventFdFlags,
};
pub use crate::events::{
    decode,
    Event,
    EventMask,
    EventOwned,
    Events,
    MalformedStream,
    HEADER_SIZE,
};
pub use crate::inotify::Inotify;
pub use crate::signalfd::{
    block_signals,
    SigInfo,
    SignalFd,
    SignalFdFlags,
};
pub use crate::timerfd::{
    Clock,
    TimerFd,
    TimerFdFlags,
    TimerSpec,
};
pub use crate::watches::{
    WatchDescriptor,
    WatchMask,
    Watches,
};

#[cfg(feature = "stream")]
pub use self::stream::EventStream;
