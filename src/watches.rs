use std::{
    cmp::Ordering,
    collections::HashMap,
    ffi::CString,
    hash::{
        Hash,
        Hasher,
    },
    io,
    os::raw::c_int,
    os::unix::ffi::OsStrExt,
    path::{
        Path,
        PathBuf,
    },
    sync::{
        Arc,
        Mutex,
        Weak,
    },
};

use bitflags::bitflags;
use inotify_sys as ffi;
use log::debug;

use crate::fd_guard::FdGuard;


bitflags! {
    /// What a watch reports, and how it is set up
    ///
    /// Passed to [`Watches::add`] to select the events to watch for, and how
    /// to watch for them.
    ///
    /// # Examples
    ///
    /// ```
    /// use linuxfd::{
    ///     Inotify,
    ///     WatchMask,
    /// };
    ///
    /// let inotify = Inotify::init().unwrap();
    /// let mask = WatchMask::CREATE | WatchMask::DELETE | WatchMask::ONLYDIR;
    /// inotify.watches().add("/tmp", mask)
    ///     .expect("Failed to watch /tmp");
    /// ```
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct WatchMask: u32 {
        /// Read from a file
        const ACCESS = ffi::IN_ACCESS;

        /// Metadata changed
        const ATTRIB = ffi::IN_ATTRIB;

        /// Writable file closed
        const CLOSE_WRITE = ffi::IN_CLOSE_WRITE;

        /// Read-only file or directory closed
        const CLOSE_NOWRITE = ffi::IN_CLOSE_NOWRITE;

        /// Entry created in watched directory
        const CREATE = ffi::IN_CREATE;

        /// Entry deleted from watched directory
        const DELETE = ffi::IN_DELETE;

        /// Watched file or directory was deleted
        const DELETE_SELF = ffi::IN_DELETE_SELF;

        /// Write to a file
        const MODIFY = ffi::IN_MODIFY;

        /// Watched file or directory was moved
        const MOVE_SELF = ffi::IN_MOVE_SELF;

        /// Entry moved out of watched directory
        const MOVED_FROM = ffi::IN_MOVED_FROM;

        /// Entry moved into watched directory
        const MOVED_TO = ffi::IN_MOVED_TO;

        /// File or directory opened
        const OPEN = ffi::IN_OPEN;

        /// All of the events above
        const ALL_EVENTS = ffi::IN_ALL_EVENTS;

        /// [`MOVED_FROM`](Self::MOVED_FROM) and [`MOVED_TO`](Self::MOVED_TO)
        const MOVE = ffi::IN_MOVE;

        /// [`CLOSE_WRITE`](Self::CLOSE_WRITE) and
        /// [`CLOSE_NOWRITE`](Self::CLOSE_NOWRITE)
        const CLOSE = ffi::IN_CLOSE;

        /// Watch a symbolic link itself rather than its target
        const DONT_FOLLOW = ffi::IN_DONT_FOLLOW;

        /// Skip events for entries unlinked from the watched directory
        const EXCL_UNLINK = ffi::IN_EXCL_UNLINK;

        /// Add to the mask of an existing watch instead of replacing it
        const MASK_ADD = ffi::IN_MASK_ADD;

        /// Only deliver one event, then remove the watch
        const ONESHOT = ffi::IN_ONESHOT;

        /// Fail unless the path is a directory
        const ONLYDIR = ffi::IN_ONLYDIR;
    }
}


/// Paths of the live watches of one inotify instance, by watch id
pub(crate) type WatchedPaths = Arc<Mutex<HashMap<c_int, PathBuf>>>;


/// Handle for adding and removing the watches of one [`Inotify`] instance
///
/// Cheap to clone; all clones share the instance's descriptor.
///
/// [`Inotify`]: crate::Inotify
#[derive(Clone, Debug)]
pub struct Watches {
    pub(crate) fd   : Arc<FdGuard>,
    pub(crate) paths: WatchedPaths,
}

impl Watches {
    pub(crate) fn new(fd: Arc<FdGuard>, paths: WatchedPaths) -> Self {
        Watches {
            fd,
            paths,
        }
    }

    /// Adds or updates a watch for the given path
    ///
    /// Calls [`inotify_add_watch`] and returns a descriptor for the watch.
    /// Adding a path whose inode is already watched (the same path again, or
    /// a hard link to it) updates that watch and returns a descriptor equal
    /// to the existing one.
    ///
    /// The path is remembered until the watch goes away; see
    /// [`Inotify::path_of`].
    ///
    /// # Errors
    ///
    /// Returns the error from [`inotify_add_watch`] as is. A path containing
    /// a NUL byte fails with [`io::ErrorKind::InvalidInput`].
    ///
    /// [`inotify_add_watch`]: inotify_sys::inotify_add_watch
    /// [`Inotify::path_of`]: crate::Inotify::path_of
    pub fn add<P>(&self, path: P, mask: WatchMask)
        -> io::Result<WatchDescriptor>
        where P: AsRef<Path>
    {
        let path = path.as_ref();
        let c_path = CString::new(path.as_os_str().as_bytes())?;

        let wd = unsafe {
            ffi::inotify_add_watch(
                **self.fd,
                c_path.as_ptr() as *const _,
                mask.bits(),
            )
        };

        if wd == -1 {
            return Err(io::Error::last_os_error());
        }

        debug!("watching {} as wd {} (mask {:?})", path.display(), wd, mask);
        self.lock_paths().insert(wd, path.to_path_buf());

        Ok(WatchDescriptor { id: wd, fd: Arc::downgrade(&self.fd) })
    }

    /// Removes a watch
    ///
    /// Removes the watch by calling [`inotify_rm_watch`]. The kernel follows
    /// up with an [`EventMask::IGNORED`] event for the descriptor.
    ///
    /// # Errors
    ///
    /// Returns the error from [`inotify_rm_watch`] as is, or an error of kind
    /// [`io::ErrorKind::InvalidInput`] if `wd` belongs to another inotify
    /// instance.
    ///
    /// [`inotify_rm_watch`]: inotify_sys::inotify_rm_watch
    /// [`EventMask::IGNORED`]: crate::EventMask::IGNORED
    pub fn remove(&self, wd: WatchDescriptor) -> io::Result<()> {
        if wd.fd.upgrade().as_ref() != Some(&self.fd) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "watch descriptor belongs to another inotify instance",
            ));
        }

        let result = unsafe { ffi::inotify_rm_watch(**self.fd, wd.id) };
        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        debug!("removed wd {}", wd.id);
        self.lock_paths().remove(&wd.id);

        Ok(())
    }

    fn lock_paths(&self) -> std::sync::MutexGuard<'_, HashMap<c_int, PathBuf>> {
        lock(&self.paths)
    }
}

/// Locks the path registry, recovering it if a panicking thread poisoned it
pub(crate) fn lock(paths: &WatchedPaths)
    -> std::sync::MutexGuard<'_, HashMap<c_int, PathBuf>>
{
    paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Path recorded for `wd`, if it is a live watch of the instance behind `fd`
pub(crate) fn path_of(fd: &Arc<FdGuard>, paths: &WatchedPaths, wd: &WatchDescriptor)
    -> Option<PathBuf>
{
    if wd.fd.upgrade().as_ref() != Some(fd) {
        return None;
    }

    lock(paths).get(&wd.id).cloned()
}

pub(crate) fn sorted_paths(paths: &WatchedPaths) -> Vec<PathBuf> {
    let mut paths: Vec<_> = lock(paths).values().cloned().collect();
    paths.sort();
    paths
}


/// Identifies one watch of one inotify instance
///
/// Can be obtained from [`Watches::add`] or from an [`Event`], and passed to
/// [`Watches::remove`] to stop watching.
///
/// [`Event`]: crate::Event
#[derive(Clone, Debug)]
pub struct WatchDescriptor {
    pub(crate) id: c_int,
    pub(crate) fd: Weak<FdGuard>,
}

impl WatchDescriptor {
    /// The kernel's number for this watch
    ///
    /// Only unique within one inotify instance.
    pub fn get_watch_descriptor_id(&self) -> c_int {
        self.id
    }
}

impl Eq for WatchDescriptor {}

impl PartialEq for WatchDescriptor {
    fn eq(&self, other: &Self) -> bool {
        let self_fd  = self.fd.upgrade();
        let other_fd = other.fd.upgrade();

        self.id == other.id && self_fd.is_some() && self_fd == other_fd
    }
}

impl Ord for WatchDescriptor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for WatchDescriptor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for WatchDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Only the id: the weak fd might be gone, and the hash must not
        // change when it goes.
        self.id.hash(state);
    }
}
