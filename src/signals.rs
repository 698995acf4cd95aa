//! `SIGTERM`/`SIGINT` handling for an embedder's shutdown path (spec §5:
//! "shutdown cancels all in-flight operations, drains the dispatcher queue
//! with a 10s budget, then force-closes sessions"). Catalyst is a library
//! with no binary of its own; an embedder's `main` calls `install` and
//! reacts to the notification by draining its `Dispatcher`.
use std::io;
use std::sync::Mutex;

use crossbeam_channel as chan;

/// Signal notifications are sent via this channel.
static NOTIFY: Mutex<Option<chan::Sender<()>>> = Mutex::new(None);

/// Install global signal handlers for `SIGTERM` and `SIGINT`.
pub fn install(notify: chan::Sender<()>) -> io::Result<()> {
    if let Ok(mut channel) = NOTIFY.try_lock() {
        if channel.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "signal handler is already installed",
            ));
        }
        *channel = Some(notify);

        unsafe { install_handlers() }?;
    } else {
        return Err(io::Error::new(
            io::ErrorKind::WouldBlock,
            "unable to install signal handler",
        ));
    }
    Ok(())
}

/// # Safety
///
/// Calls `libc` functions safely; `handler` only touches the `NOTIFY`
/// mutex via `try_lock`, so it can't deadlock if interrupted mid-signal.
unsafe fn install_handlers() -> io::Result<()> {
    if libc::signal(libc::SIGTERM, handler as libc::sighandler_t) == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    if libc::signal(libc::SIGINT, handler as libc::sighandler_t) == libc::SIG_ERR {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

extern "C" fn handler(sig: libc::c_int) {
    if sig != libc::SIGTERM && sig != libc::SIGINT {
        return;
    }
    if let Ok(guard) = NOTIFY.try_lock() {
        if let Some(c) = &*guard {
            c.try_send(()).ok();
        }
    }
}
