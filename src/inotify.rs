use std::{
    collections::HashMap,
    io,
    os::unix::io::{
        AsFd,
        AsRawFd,
        BorrowedFd,
        FromRawFd,
        IntoRawFd,
        OwnedFd,
        RawFd,
    },
    path::PathBuf,
    sync::{
        Arc,
        Mutex,
    },
};

use inotify_sys as ffi;
use log::{
    debug,
    warn,
};

use crate::events::{
    decode_with_fd,
    EventMask,
    Events,
};
use crate::fd_guard::FdGuard;
use crate::util::{
    read_into_buffer,
    set_nonblocking,
};
use crate::watches::{
    lock,
    path_of,
    sorted_paths,
    WatchDescriptor,
    WatchedPaths,
    Watches,
};

#[cfg(feature = "stream")]
use crate::stream::EventStream;


/// Idiomatic Rust wrapper around Linux's inotify API
///
/// Owns an inotify instance. Watches are managed through [`Inotify::watches`],
/// events are read with [`Inotify::read_events`] or
/// [`Inotify::read_events_blocking`].
///
/// # Examples
///
/// ```
/// use linuxfd::{
///     Inotify,
///     WatchMask,
/// };
///
/// let mut inotify = Inotify::init()
///     .expect("Error while initializing inotify instance");
///
/// // The file doesn't exist, so the error is ignored here.
/// let _ = inotify.watches().add(
///     "path/to/file",
///     WatchMask::MODIFY | WatchMask::CLOSE,
/// );
///
/// let mut buffer = [0; 1024];
/// match inotify.read_events(&mut buffer) {
///     Ok(events) => for event in events {
///         // Handle event
///     },
///     Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {}
///     Err(error) => panic!("Error while reading events: {}", error),
/// }
/// ```
#[derive(Debug)]
pub struct Inotify {
    fd   : Arc<FdGuard>,
    paths: WatchedPaths,
}

impl Inotify {
    /// Creates an [`Inotify`] instance
    ///
    /// Calls [`inotify_init1`] with `IN_CLOEXEC` and `IN_NONBLOCK`. Blocking
    /// is then decided per read: [`Inotify::read_events_blocking`] clears
    /// `O_NONBLOCK` for the duration of its read.
    ///
    /// # Errors
    ///
    /// Returns the error from [`inotify_init1`] as is.
    ///
    /// [`inotify_init1`]: inotify_sys::inotify_init1
    pub fn init() -> io::Result<Inotify> {
        let fd = unsafe {
            ffi::inotify_init1(ffi::IN_CLOEXEC | ffi::IN_NONBLOCK)
        };

        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        debug!("created inotify instance on fd {}", fd);

        Ok(Inotify {
            fd   : Arc::new(FdGuard::new(fd)),
            paths: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Gets an interface that allows adding and removing watches.
    /// See [`Watches::add`] and [`Watches::remove`].
    pub fn watches(&self) -> Watches {
        Watches::new(self.fd.clone(), self.paths.clone())
    }

    /// Returns the path a live watch was added for
    ///
    /// `None` if the watch was removed, belongs to another instance, or the
    /// kernel reported it as [`EventMask::IGNORED`] in an event read by this
    /// instance.
    pub fn path_of(&self, wd: &WatchDescriptor) -> Option<PathBuf> {
        path_of(&self.fd, &self.paths, wd)
    }

    /// Returns the paths of all live watches, sorted
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        sorted_paths(&self.paths)
    }

    /// Waits until events are available, then returns them
    ///
    /// Blocks the current thread until at least one event is available. Use
    /// [`Inotify::read_events`] to avoid that.
    ///
    /// # Errors
    ///
    /// Returns any error from [`read`], or from [`fcntl`] while clearing
    /// `O_NONBLOCK`, as is, and an error of kind
    /// [`io::ErrorKind::InvalidData`] wrapping a [`MalformedStream`] if the
    /// kernel's buffer cannot be decoded. Failing to set `O_NONBLOCK` again
    /// afterwards is only logged, so events already read are still returned.
    ///
    /// [`read`]: libc::read
    /// [`fcntl`]: libc::fcntl
    /// [`MalformedStream`]: crate::MalformedStream
    pub fn read_events_blocking<'a>(&mut self, buffer: &'a mut [u8])
        -> io::Result<Events<'a>>
    {
        set_nonblocking(**self.fd, false)?;
        let result = self.read_events(buffer);

        // Events already taken from the kernel must not be lost over this.
        if let Err(error) = set_nonblocking(**self.fd, true) {
            warn!("failed to make inotify fd {} non-blocking again: {}", **self.fd, error);
        }

        result
    }

    /// Returns one read's worth of events
    ///
    /// Reads once into `buffer` and decodes what the kernel delivered. If no
    /// events are queued, this fails with [`io::ErrorKind::WouldBlock`]
    /// instead of waiting. If `buffer` is too small for the next event, the
    /// kernel fails the read with `EINVAL`.
    ///
    /// # Errors
    ///
    /// Returns the error from [`read`] as is, and an error of kind
    /// [`io::ErrorKind::InvalidData`] wrapping a [`MalformedStream`] if the
    /// buffer cannot be decoded.
    ///
    /// [`read`]: libc::read
    /// [`MalformedStream`]: crate::MalformedStream
    pub fn read_events<'a>(&mut self, buffer: &'a mut [u8])
        -> io::Result<Events<'a>>
    {
        let num_bytes = read_into_buffer(**self.fd, buffer);
        if num_bytes == -1 {
            return Err(io::Error::last_os_error());
        }

        // Not expected from inotify, but an empty read is just no events.
        let num_bytes = num_bytes as usize;
        let buffer: &'a [u8] = buffer;

        let events = decode_with_fd(Arc::downgrade(&self.fd), &buffer[..num_bytes])?;

        let mut paths = lock(&self.paths);
        for event in &events {
            if event.mask.contains(EventMask::IGNORED) {
                paths.remove(&event.wd.id);
            }
        }

        Ok(Events::new(events))
    }

    /// Creates a stream of owned events
    ///
    /// `buffer` is reused across reads and has to fit at least one event.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be registered with the
    /// runtime's reactor.
    #[cfg(feature = "stream")]
    pub fn into_event_stream<T>(self, buffer: T) -> io::Result<EventStream<T>>
        where T: AsMut<[u8]> + AsRef<[u8]>
    {
        EventStream::new(self.fd, self.paths, buffer)
    }

    /// Closes the inotify instance
    ///
    /// Dropping the instance closes it as well; this method only exists to
    /// observe the result of [`close`]. Descriptors still held by
    /// [`Watches`] handles become invalid.
    ///
    /// # Errors
    ///
    /// Returns the error from [`close`] as is.
    ///
    /// [`close`]: libc::close
    pub fn close(self) -> io::Result<()> {
        self.fd.close()
    }
}

impl AsRawFd for Inotify {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.fd.fd
    }
}

impl FromRawFd for Inotify {
    unsafe fn from_raw_fd(fd: RawFd) -> Self {
        Inotify {
            fd   : Arc::new(FdGuard::from_raw_fd(fd)),
            paths: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl IntoRawFd for Inotify {
    #[inline]
    fn into_raw_fd(self) -> RawFd {
        self.fd.should_not_close();
        self.fd.fd
    }
}

impl AsFd for Inotify {
    #[inline]
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl From<Inotify> for OwnedFd {
    fn from(fd: Inotify) -> OwnedFd {
        unsafe { OwnedFd::from_raw_fd(fd.into_raw_fd()) }
    }
}

impl From<OwnedFd> for Inotify {
    fn from(fd: OwnedFd) -> Inotify {
        unsafe { Inotify::from_raw_fd(fd.into_raw_fd()) }
    }
}
