//! Waits on an eventfd, a signalfd and a timerfd at once
//!
//! The timer fires every three seconds. Pressing Ctrl-C delivers `SIGINT`
//! through the signalfd, which notifies the eventfd, which ends the loop.

use std::{
    io,
    os::unix::io::AsRawFd,
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use linuxfd::{
    block_signals,
    Clock,
    EventFd,
    EventFdFlags,
    SignalFd,
    SignalFdFlags,
    TimerFd,
    TimerFdFlags,
};


fn main() -> Result<(), io::Error> {
    let efd = EventFd::new(0, EventFdFlags::NONBLOCK)?;
    let sfd = SignalFd::new(vec![libc::SIGINT], SignalFdFlags::NONBLOCK)?;
    let tfd = TimerFd::new(Clock::Realtime, TimerFdFlags::NONBLOCK)?;

    tfd.settime(Duration::from_secs(3), Duration::from_secs(3), false)?;
    block_signals(sfd.signals())?;

    let mut fds = [
        poll_fd(efd.as_raw_fd()),
        poll_fd(sfd.as_raw_fd()),
        poll_fd(tfd.as_raw_fd()),
    ];

    loop {
        let ready = unsafe {
            libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1)
        };
        if ready == -1 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(error);
        }

        if fds[0].revents & libc::POLLIN != 0 {
            efd.read()?;
            println!("[{:.3}] event file received update, exiting...", now());
            return Ok(());
        }
        if fds[1].revents & libc::POLLIN != 0 {
            let info = sfd.read()?;
            if info.signo == libc::SIGINT as u32 {
                println!("[{:.3}] SIGINT received, notifying event file", now());
                efd.write(1)?;
            }
        }
        if fds[2].revents & libc::POLLIN != 0 {
            let expirations = tfd.read()?;
            println!("[{:.3}] timer expired ({}x)", now(), expirations);
        }
    }
}

fn poll_fd(fd: libc::c_int) -> libc::pollfd {
    libc::pollfd {
        fd,
        events : libc::POLLIN,
        revents: 0,
    }
}

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|time| time.as_secs_f64())
        .unwrap_or(0.0)
}
