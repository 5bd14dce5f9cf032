use std::{
    error::Error,
    ffi::{
        OsStr,
        OsString,
    },
    fmt,
    io,
    mem,
    os::unix::ffi::OsStrExt,
    sync::Weak,
    vec,
};

use bitflags::bitflags;
use inotify_sys as ffi;
use log::{
    trace,
    warn,
};

use crate::fd_guard::FdGuard;
use crate::watches::WatchDescriptor;


/// Size of the fixed part of every record in an inotify buffer
///
/// Each record is this header followed by `len` bytes of NUL-padded name.
pub const HEADER_SIZE: usize = mem::size_of::<ffi::inotify_event>();


/// Decodes a buffer filled by a read from an inotify file descriptor
///
/// Returns the events in the order the kernel queued them. An empty buffer
/// decodes to no events. Names are cut at their first NUL byte, so the
/// padding the kernel appends is never visible; a record without a name
/// carries an empty one.
///
/// The watch descriptors of the returned events are not tied to any
/// [`Inotify`] instance. Use [`WatchDescriptor::get_watch_descriptor_id`] to
/// inspect them.
///
/// # Errors
///
/// Returns [`MalformedStream`] if the buffer ends inside a record, either in
/// its header or in the name its header announces. No events are returned
/// in that case.
///
/// # Examples
///
/// ```
/// let events = linuxfd::decode(&[])
///     .expect("An empty buffer is a valid stream");
/// assert!(events.is_empty());
/// ```
///
/// [`Inotify`]: crate::Inotify
pub fn decode(buffer: &[u8]) -> Result<Vec<Event<&OsStr>>, MalformedStream> {
    decode_with_fd(Weak::new(), buffer)
}

pub(crate) fn decode_with_fd(fd: Weak<FdGuard>, buffer: &[u8])
    -> Result<Vec<Event<&OsStr>>, MalformedStream>
{
    let mut cursor = Cursor::new(buffer);
    let mut events = Vec::new();

    while !cursor.is_at_end() {
        let event = cursor.next_event(fd.clone()).map_err(|error| {
            warn!("rejecting inotify buffer of {} bytes: {}", buffer.len(), error);
            error
        })?;

        trace!(
            "decoded inotify event: wd={} mask={:?} cookie={} name={:?}",
            event.wd.id, event.mask, event.cookie, event.name,
        );
        events.push(event);
    }

    Ok(events)
}


/// Bounds-checked reader over an inotify buffer
struct Cursor<'a> {
    buffer: &'a [u8],
    pos   : usize,
}

impl<'a> Cursor<'a> {
    fn new(buffer: &'a [u8]) -> Self {
        Cursor {
            buffer,
            pos: 0,
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos == self.buffer.len()
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], MalformedStream> {
        let available = self.buffer.len() - self.pos;
        if needed > available {
            return Err(MalformedStream {
                offset: self.pos,
                needed,
                available,
            });
        }

        let bytes = &self.buffer[self.pos..self.pos + needed];
        self.pos += needed;

        Ok(bytes)
    }

    fn next_event(&mut self, fd: Weak<FdGuard>)
        -> Result<Event<&'a OsStr>, MalformedStream>
    {
        // Field offsets follow `struct inotify_event`: wd, mask, cookie, len.
        let header = self.take(HEADER_SIZE)?;
        let wd     = i32::from_ne_bytes(field(header, 0));
        let mask   = u32::from_ne_bytes(field(header, 4));
        let cookie = u32::from_ne_bytes(field(header, 8));
        let len    = u32::from_ne_bytes(field(header, 12));

        let name = self.take(len as usize)?;
        let name = match name.iter().position(|&b| b == 0) {
            Some(end) => &name[..end],
            None      => name,
        };

        Ok(Event {
            wd    : WatchDescriptor { id: wd, fd },
            mask  : EventMask::from_bits_retain(mask),
            cookie,
            name  : OsStr::from_bytes(name),
        })
    }
}

fn field(header: &[u8], at: usize) -> [u8; 4] {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&header[at..at + 4]);
    bytes
}


/// The events of one read, in delivery order
///
/// Returned by [`Inotify::read_events_blocking`] and
/// [`Inotify::read_events`]. The whole buffer has been decoded by the time this is handed out.
///
/// [`Inotify::read_events_blocking`]: crate::Inotify::read_events_blocking
/// [`Inotify::read_events`]: crate::Inotify::read_events
#[derive(Debug)]
pub struct Events<'a> {
    events: vec::IntoIter<Event<&'a OsStr>>,
}

impl<'a> Events<'a> {
    pub(crate) fn new(events: Vec<Event<&'a OsStr>>) -> Self {
        Events {
            events: events.into_iter(),
        }
    }
}

impl<'a> Iterator for Events<'a> {
    type Item = Event<&'a OsStr>;

    fn next(&mut self) -> Option<Self::Item> {
        self.events.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.events.size_hint()
    }
}

impl<'a> ExactSizeIterator for Events<'a> {}


/// One record of an inotify buffer
///
/// Watches are set up with [`Watches::add`]. Events come from
/// [`Inotify::read_events_blocking`], [`Inotify::read_events`], [`decode`]
/// or, with the `stream` feature, an event stream.
///
/// [`Watches::add`]: crate::Watches::add
/// [`Inotify::read_events_blocking`]: crate::Inotify::read_events_blocking
/// [`Inotify::read_events`]: crate::Inotify::read_events
/// [`decode`]: crate::decode
#[derive(Clone, Debug)]
pub struct Event<S> {
    /// The watch that produced the event
    ///
    /// Equal to the [`WatchDescriptor`] that [`Watches::add`] returned for
    /// the watch, and accepted by [`Watches::remove`].
    ///
    /// [`Watches::add`]: crate::Watches::add
    /// [`Watches::remove`]: crate::Watches::remove
    pub wd: WatchDescriptor,

    /// What happened
    pub mask: EventMask,

    /// Links the halves of a rename
    ///
    /// A rename produces a [`MOVED_FROM`] and a [`MOVED_TO`] event carrying
    /// the same cookie.
    ///
    /// [`MOVED_FROM`]: EventMask::MOVED_FROM
    /// [`MOVED_TO`]: EventMask::MOVED_TO
    pub cookie: u32,

    /// The name of the directory entry the event concerns
    ///
    /// Only set for events about an entry inside a watched directory. Events
    /// about the watched object itself carry an empty name.
    pub name: S,
}

impl<'a> Event<&'a OsStr> {
    /// Copies the name out of the read buffer
    #[must_use = "cloning is often expensive and is not expected to have side effects"]
    pub fn to_owned(&self) -> EventOwned {
        Event {
            wd    : self.wd.clone(),
            mask  : self.mask,
            cookie: self.cookie,
            name  : self.name.to_os_string(),
        }
    }
}

/// An [`Event`] that owns its name
pub type EventOwned = Event<OsString>;


/// The buffer handed to the decoder does not hold a whole number of records
///
/// Either fewer bytes than a record header remained, or a header announced a
/// name longer than the rest of the buffer. Retrying the decode cannot help.
///
/// When the decode happens inside [`Inotify::read_events`], this error is
/// returned wrapped in an [`io::Error`] of kind [`InvalidData`]:
///
/// ```
/// use std::io;
/// use linuxfd::MalformedStream;
///
/// fn is_malformed(error: &io::Error) -> bool {
///     error
///         .get_ref()
///         .and_then(|inner| inner.downcast_ref::<MalformedStream>())
///         .is_some()
/// }
/// # let error: io::Error = linuxfd::decode(&[0; 5]).unwrap_err().into();
/// # assert!(is_malformed(&error));
/// ```
///
/// [`Inotify::read_events`]: crate::Inotify::read_events
/// [`InvalidData`]: io::ErrorKind::InvalidData
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MalformedStream {
    /// Position in the buffer at which the missing bytes should have started
    pub offset: usize,

    /// Number of bytes the record required from that position
    pub needed: usize,

    /// Number of bytes that were actually left
    pub available: usize,
}

impl fmt::Display for MalformedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed inotify event stream: {} bytes needed at offset {}, \
            only {} available",
            self.needed, self.offset, self.available,
        )
    }
}

impl Error for MalformedStream {}

impl From<MalformedStream> for io::Error {
    fn from(error: MalformedStream) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, error)
    }
}


bitflags! {
    /// Kind of an inotify event
    ///
    /// Found in the `mask` field of [`Event`]. Bits the kernel sets that have
    /// no constant here are kept as they are.
    ///
    /// # Examples
    ///
    /// ```
    /// use linuxfd::EventMask;
    ///
    /// let mask = EventMask::CREATE | EventMask::ISDIR;
    /// assert_eq!(vec!["CREATE", "ISDIR"], mask.names());
    /// ```
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct EventMask: u32 {
        /// Read from a file
        const ACCESS = ffi::IN_ACCESS;

        /// Write to a file
        const MODIFY = ffi::IN_MODIFY;

        /// Metadata (permissions, timestamps, link count, ...) changed
        const ATTRIB = ffi::IN_ATTRIB;

        /// Writable file closed
        const CLOSE_WRITE = ffi::IN_CLOSE_WRITE;

        /// Read-only file or directory closed
        const CLOSE_NOWRITE = ffi::IN_CLOSE_NOWRITE;

        /// File or directory opened
        const OPEN = ffi::IN_OPEN;

        /// Entry was moved out of the watched directory
        ///
        /// Paired with a [`MOVED_TO`](Self::MOVED_TO) event through the
        /// cookie.
        const MOVED_FROM = ffi::IN_MOVED_FROM;

        /// Entry was moved into the watched directory
        const MOVED_TO = ffi::IN_MOVED_TO;

        /// Entry was created in the watched directory
        const CREATE = ffi::IN_CREATE;

        /// Entry was deleted from the watched directory
        const DELETE = ffi::IN_DELETE;

        /// Watched file or directory was itself deleted
        const DELETE_SELF = ffi::IN_DELETE_SELF;

        /// Watched file or directory was itself moved
        const MOVE_SELF = ffi::IN_MOVE_SELF;

        /// File system containing the watched object was unmounted
        ///
        /// An [`IGNORED`](Self::IGNORED) event for the same watch follows.
        const UNMOUNT = ffi::IN_UNMOUNT;

        /// Event queue overflowed and events were dropped
        ///
        /// Carries watch descriptor `-1`.
        const Q_OVERFLOW = ffi::IN_Q_OVERFLOW;

        /// Watch was removed, explicitly or because its target went away
        const IGNORED = ffi::IN_IGNORED;

        /// Subject of the event is a directory
        const ISDIR = ffi::IN_ISDIR;
    }
}

impl EventMask {
    /// Names of all known flags set in this mask, lowest bit first
    pub fn names(self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}


#[cfg(test)]
mod tests {
    use std::{
        ffi::OsStr,
        io,
        mem,
    };

    use inotify_sys as ffi;

    use super::{
        decode,
        EventMask,
        MalformedStream,
        HEADER_SIZE,
    };


    struct Record<'a> {
        wd    : i32,
        mask  : u32,
        cookie: u32,
        name  : &'a str,
    }

    /// Lays records out the way the kernel does, padding names with NUL bytes
    /// up to a multiple of the header size.
    fn encode(records: &[Record]) -> Vec<u8> {
        let mut buffer = Vec::new();

        for record in records {
            let len = if record.name.is_empty() {
                0
            }
            else {
                (record.name.len() + 1 + HEADER_SIZE - 1) / HEADER_SIZE * HEADER_SIZE
            };

            buffer.extend_from_slice(&record.wd.to_ne_bytes());
            buffer.extend_from_slice(&record.mask.to_ne_bytes());
            buffer.extend_from_slice(&record.cookie.to_ne_bytes());
            buffer.extend_from_slice(&(len as u32).to_ne_bytes());

            let name_start = buffer.len();
            buffer.extend_from_slice(record.name.as_bytes());
            buffer.resize(name_start + len, 0);
        }

        buffer
    }

    fn header(wd: i32, mask: u32, cookie: u32, len: u32) -> Vec<u8> {
        encode(&[Record { wd, mask, cookie, name: "" }])
            .into_iter()
            .take(12)
            .chain(len.to_ne_bytes().iter().copied())
            .collect()
    }


    #[test]
    fn header_size_should_match_the_kernel_struct() {
        assert_eq!(16, HEADER_SIZE);
        assert_eq!(HEADER_SIZE, mem::size_of::<ffi::inotify_event>());
    }

    #[test]
    fn decode_should_return_nothing_for_an_empty_buffer() {
        let events = decode(&[]).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn decode_should_keep_records_in_delivery_order() {
        let buffer = encode(&[
            Record { wd: 1, mask: ffi::IN_CREATE, cookie: 0, name: "a" },
            Record { wd: 2, mask: ffi::IN_MODIFY, cookie: 0, name: "" },
            Record { wd: 1, mask: ffi::IN_DELETE, cookie: 0, name: "a-much-longer-name.txt" },
        ]);

        let events = decode(&buffer).unwrap();

        assert_eq!(3, events.len());
        let ids: Vec<_> = events.iter().map(|e| e.wd.get_watch_descriptor_id()).collect();
        assert_eq!(vec![1, 2, 1], ids);
        assert_eq!(EventMask::CREATE, events[0].mask);
        assert_eq!(EventMask::MODIFY, events[1].mask);
        assert_eq!(EventMask::DELETE, events[2].mask);
        assert_eq!(OsStr::new("a-much-longer-name.txt"), events[2].name);
    }

    #[test]
    fn decode_should_return_an_empty_name_for_zero_length_names() {
        let buffer = encode(&[
            Record { wd: 7, mask: ffi::IN_ATTRIB, cookie: 0, name: "" },
        ]);
        assert_eq!(HEADER_SIZE, buffer.len());

        let events = decode(&buffer).unwrap();

        assert_eq!(1, events.len());
        assert_eq!(OsStr::new(""), events[0].name);
    }

    #[test]
    fn decode_should_strip_name_padding() {
        let mut buffer = header(3, ffi::IN_CREATE, 0, 16);
        buffer.extend_from_slice(b"file.txt\0\0\0\0\0\0\0\0");

        let events = decode(&buffer).unwrap();

        assert_eq!(1, events.len());
        assert_eq!(OsStr::new("file.txt"), events[0].name);
    }

    #[test]
    fn decode_should_use_the_whole_field_if_there_is_no_terminator() {
        let mut buffer = header(3, ffi::IN_CREATE, 0, 8);
        buffer.extend_from_slice(b"exactly8");

        let events = decode(&buffer).unwrap();

        assert_eq!(OsStr::new("exactly8"), events[0].name);
    }

    #[test]
    fn decode_should_reject_a_name_running_past_the_buffer() {
        let mut buffer = header(1, ffi::IN_CREATE, 0, 20);
        buffer.extend_from_slice(b"short");

        let error = decode(&buffer).unwrap_err();

        assert_eq!(
            MalformedStream { offset: HEADER_SIZE, needed: 20, available: 5 },
            error,
        );
    }

    #[test]
    fn decode_should_reject_a_truncated_header() {
        let mut buffer = encode(&[
            Record { wd: 1, mask: ffi::IN_OPEN, cookie: 0, name: "" },
        ]);
        buffer.extend_from_slice(&[0; 5]);

        let error = decode(&buffer).unwrap_err();

        assert_eq!(HEADER_SIZE, error.offset);
        assert_eq!(HEADER_SIZE, error.needed);
        assert_eq!(5, error.available);
    }

    #[test]
    fn decode_should_reproduce_encoded_records() {
        let records = [
            Record { wd: 4, mask: ffi::IN_MOVED_FROM, cookie: 42, name: "old" },
            Record { wd: 4, mask: ffi::IN_MOVED_TO, cookie: 42, name: "new-name-spanning-two-blocks" },
            Record { wd: -1, mask: ffi::IN_Q_OVERFLOW, cookie: 0, name: "" },
            Record { wd: 5, mask: ffi::IN_IGNORED, cookie: 0, name: "" },
        ];

        let buffer = encode(&records);
        let events = decode(&buffer).unwrap();

        assert_eq!(records.len(), events.len());
        for (record, event) in records.iter().zip(&events) {
            assert_eq!(record.wd, event.wd.get_watch_descriptor_id());
            assert_eq!(record.mask, event.mask.bits());
            assert_eq!(record.cookie, event.cookie);
            assert_eq!(OsStr::new(record.name), event.name);
        }
    }

    #[test]
    fn decode_should_keep_unknown_mask_bits() {
        let unknown = 0x0001_0000;
        let buffer = encode(&[
            Record { wd: 1, mask: ffi::IN_MODIFY | unknown, cookie: 0, name: "" },
        ]);

        let events = decode(&buffer).unwrap();

        assert_eq!(ffi::IN_MODIFY | unknown, events[0].mask.bits());
        assert_eq!(vec!["MODIFY"], events[0].mask.names());
    }

    #[test]
    fn decode_should_not_read_the_next_record_as_a_name() {
        // The second record starts with a non-zero byte right where a name
        // of the first one would be.
        let buffer = encode(&[
            Record { wd: 0, mask: 0, cookie: 0, name: "" },
            Record { wd: 1, mask: ffi::IN_CREATE, cookie: 0, name: "next" },
        ]);

        let events = decode(&buffer).unwrap();

        assert_eq!(2, events.len());
        assert_eq!(OsStr::new(""), events[0].name);
        assert_eq!(1, events[1].wd.get_watch_descriptor_id());
        assert_eq!(OsStr::new("next"), events[1].name);
    }

    #[test]
    fn malformed_stream_should_convert_to_invalid_data() {
        let error: io::Error = decode(&[0; 3]).unwrap_err().into();

        assert_eq!(io::ErrorKind::InvalidData, error.kind());
        let inner = error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<MalformedStream>());
        assert_eq!(
            Some(&MalformedStream { offset: 0, needed: HEADER_SIZE, available: 3 }),
            inner,
        );
    }

    #[test]
    fn names_should_list_flags_in_bit_order() {
        let mask = EventMask::ISDIR | EventMask::CREATE | EventMask::ACCESS;
        assert_eq!(vec!["ACCESS", "CREATE", "ISDIR"], mask.names());
    }
}
