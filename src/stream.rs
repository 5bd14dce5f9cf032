use std::{
    collections::VecDeque,
    io,
    os::unix::io::{
        AsRawFd,
        RawFd,
    },
    path::PathBuf,
    pin::Pin,
    sync::Arc,
    task::{
        Context,
        Poll,
    },
};

use futures_core::{
    ready,
    Stream,
};
use tokio::io::{
    unix::AsyncFd,
    Interest,
};

use crate::events::{
    decode_with_fd,
    EventMask,
    EventOwned,
};
use crate::fd_guard::FdGuard;
use crate::util::read_into_buffer;
use crate::watches::{
    lock,
    path_of,
    sorted_paths,
    WatchDescriptor,
    WatchedPaths,
    Watches,
};


/// Stream of inotify events
///
/// Allows for streaming events returned by [`Inotify::into_event_stream`].
/// Each read is decoded as a whole before any of its events is yielded; a
/// read that cannot be decoded yields a single error and none of its events.
///
/// [`Inotify::into_event_stream`]: crate::Inotify::into_event_stream
#[derive(Debug)]
pub struct EventStream<T> {
    fd     : AsyncFd<ArcFdGuard>,
    paths  : WatchedPaths,
    buffer : T,
    pending: VecDeque<EventOwned>,
}

impl<T> EventStream<T>
where
    T: AsMut<[u8]> + AsRef<[u8]>,
{
    pub(crate) fn new(fd: Arc<FdGuard>, paths: WatchedPaths, buffer: T)
        -> io::Result<Self>
    {
        // SAFETY: The `Arc` keeps the descriptor open for as long as the
        // registration holds it, and `ArcFdGuard` always reports the same fd.
        let fd = unsafe {
            AsyncFd::register_with_interest(ArcFdGuard(fd), Interest::READABLE)?
        };

        Ok(EventStream {
            fd,
            paths,
            buffer,
            pending: VecDeque::new(),
        })
    }

    /// Returns an instance of `Watches` to add and remove watches.
    /// See [`Watches::add`] and [`Watches::remove`].
    pub fn watches(&self) -> Watches {
        Watches::new(self.fd.get_ref().0.clone(), self.paths.clone())
    }

    /// Returns the path a live watch was added for
    ///
    /// Same as [`Inotify::path_of`]; an [`EventMask::IGNORED`] event forgets
    /// the path once the stream yields it.
    ///
    /// [`Inotify::path_of`]: crate::Inotify::path_of
    pub fn path_of(&self, wd: &WatchDescriptor) -> Option<PathBuf> {
        path_of(&self.fd.get_ref().0, &self.paths, wd)
    }

    /// Returns the paths of all live watches, sorted
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        sorted_paths(&self.paths)
    }
}

impl<T> Stream for EventStream<T>
where
    T: AsMut<[u8]> + AsRef<[u8]> + Unpin,
{
    type Item = io::Result<EventOwned>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<Self::Item>>
    {
        let self_ = self.get_mut();

        loop {
            if let Some(event) = self_.pending.pop_front() {
                if event.mask.contains(EventMask::IGNORED) {
                    lock(&self_.paths).remove(&event.wd.id);
                }
                return Poll::Ready(Some(Ok(event)));
            }

            let num_bytes = ready!(read(&self_.fd, self_.buffer.as_mut(), cx))?;
            if num_bytes == 0 {
                // End of file
                return Poll::Ready(None);
            }

            let events = decode_with_fd(
                Arc::downgrade(&self_.fd.get_ref().0),
                &self_.buffer.as_ref()[..num_bytes],
            );
            match events {
                Ok(events) => {
                    self_.pending.extend(events.iter().map(|event| event.to_owned()));
                }
                Err(error) => return Poll::Ready(Some(Err(error.into()))),
            }
        }
    }
}

impl<T> AsRawFd for EventStream<T> {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}


/// Shared inotify descriptor, registered with the tokio reactor
#[derive(Debug)]
struct ArcFdGuard(Arc<FdGuard>);

impl AsRawFd for ArcFdGuard {
    #[inline]
    fn as_raw_fd(&self) -> RawFd {
        self.0.fd
    }
}


fn read(fd: &AsyncFd<ArcFdGuard>, buffer: &mut [u8], cx: &mut Context<'_>)
    -> Poll<io::Result<usize>>
{
    loop {
        let mut guard = ready!(fd.poll_read_ready(cx))?;

        let result = guard.try_io(|fd| {
            let read = read_into_buffer(fd.as_raw_fd(), buffer);

            if read == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(read as usize)
        });

        // A spurious wakeup clears readiness; wait for the next one.
        if let Ok(result) = result {
            return Poll::Ready(result);
        }
    }
}
