use std::{
    io,
    mem,
    os::unix::io::RawFd,
};

use libc::{
    c_int,
    c_void,
    size_t,
};


/// Reads as many bytes as the kernel hands out into `buffer`
///
/// Returns the raw return value of `read`, which is `-1` on error.
pub fn read_into_buffer(fd: RawFd, buffer: &mut [u8]) -> isize {
    unsafe {
        libc::read(
            fd,
            buffer.as_mut_ptr() as *mut c_void,
            buffer.len() as size_t
        )
    }
}

/// Maps the `-1` convention of most syscalls to an `io::Error`
pub fn cvt(result: c_int) -> io::Result<c_int> {
    match result {
        -1 => Err(io::Error::last_os_error()),
        _  => Ok(result),
    }
}

/// Reads one native-endian `u64`, as delivered by eventfd and timerfd
///
/// A read that transfers anything other than eight bytes fails with `EIO`.
pub fn read_u64(fd: RawFd) -> io::Result<u64> {
    let mut buffer = [0u8; mem::size_of::<u64>()];

    match read_into_buffer(fd, &mut buffer) {
        -1 => Err(io::Error::last_os_error()),
        8  => Ok(u64::from_ne_bytes(buffer)),
        _  => Err(io::Error::from_raw_os_error(libc::EIO)),
    }
}

/// Writes one native-endian `u64`, as expected by eventfd
pub fn write_u64(fd: RawFd, value: u64) -> io::Result<()> {
    let buffer = value.to_ne_bytes();

    let written = unsafe {
        libc::write(
            fd,
            buffer.as_ptr() as *const c_void,
            buffer.len() as size_t,
        )
    };

    match written {
        -1 => Err(io::Error::last_os_error()),
        8  => Ok(()),
        _  => Err(io::Error::from_raw_os_error(libc::EIO)),
    }
}

/// Sets or clears `O_NONBLOCK` on `fd`
pub fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFL) })?;

    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    }
    else {
        flags & !libc::O_NONBLOCK
    };

    cvt(unsafe { libc::fcntl(fd, libc::F_SETFL, flags) })?;
    Ok(())
}

/// Sets or clears `FD_CLOEXEC` on `fd`
pub fn set_cloexec(fd: RawFd, cloexec: bool) -> io::Result<()> {
    let flags = cvt(unsafe { libc::fcntl(fd, libc::F_GETFD) })?;

    let flags = if cloexec {
        flags | libc::FD_CLOEXEC
    }
    else {
        flags & !libc::FD_CLOEXEC
    };

    cvt(unsafe { libc::fcntl(fd, libc::F_SETFD, flags) })?;
    Ok(())
}
