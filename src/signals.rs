use std::{io, mem::MaybeUninit, ptr, thread};

use crossbeam_channel::{bounded, Receiver};
use log::{debug, error, info};
use nix::sys::signal::{SigSet, Signal};

use crate::models::ControlMessage;

/// Blocks SIGINT, SIGTERM and SIGHUP on the calling thread and turns their
/// arrival into a [`ControlMessage::Shutdown`]. SIGHUP is left alone when it
/// was already ignored at startup (`nohup`).
///
/// Call before spawning any other thread: threads inherit the mask, so the
/// signals are only ever consumed by the waiter thread started here.
pub fn install() -> nix::Result<Receiver<ControlMessage>> {
    let mask = shutdown_signals(is_ignored(Signal::SIGHUP));
    mask.thread_block()?;

    let (sender, receiver) = bounded(1);
    thread::Builder::new()
        .name("signal-waiter".to_string())
        .spawn(move || loop {
            match mask.wait() {
                Ok(signal) => {
                    debug!("Received {}.", signal.as_str());
                    // A full channel means a shutdown is already pending.
                    let _ = sender.try_send(ControlMessage::Shutdown(signal.as_str().to_string()));
                }
                Err(e) => {
                    error!("Waiting for signals failed: {}", e);
                    break;
                }
            }
        })
        .map_err(|e| {
            error!("Failed to spawn signal thread: {}", e);
            errno_of(&e)
        })?;

    Ok(receiver)
}

/// Signals that request a shutdown. A blocked signal is still delivered to
/// `sigwait` even when its disposition is SIG_IGN, so an ignored SIGHUP must
/// stay out of the set.
fn shutdown_signals(hangup_ignored: bool) -> SigSet {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGINT);
    mask.add(Signal::SIGTERM);
    if hangup_ignored {
        info!("SIGHUP is ignored, the supervisor will outlive its terminal.");
    } else {
        mask.add(Signal::SIGHUP);
    }
    mask
}

/// The OS error behind `e`, or EAGAIN when it carries none.
fn errno_of(e: &io::Error) -> nix::Error {
    nix::Error::from_raw(e.raw_os_error().unwrap_or(libc::EAGAIN))
}

/// Whether the current disposition of `signal` is SIG_IGN. Only queries.
fn is_ignored(signal: Signal) -> bool {
    let mut current = MaybeUninit::<libc::sigaction>::uninit();
    unsafe {
        if libc::sigaction(signal as libc::c_int, ptr::null(), current.as_mut_ptr()) != 0 {
            return false;
        }
        current.assume_init().sa_sigaction == libc::SIG_IGN
    }
}
