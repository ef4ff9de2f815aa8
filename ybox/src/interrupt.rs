//! SIGINT/SIGTERM handling for the short-lived CLI processes.
//!
//! Every suspension point (lock polling, status-file polling, waits on
//! engine subprocesses) checks [`interrupted`] so that a signal unwinds
//! through the normal error path, releasing file locks held by guards on
//! the way out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static INSTALL: Once = Once::new();

extern "C" fn handle_signal(_sig: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT/SIGTERM handlers once per process.
pub fn install_handlers() {
    INSTALL.call_once(|| unsafe {
        use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
        let action = SigAction::new(
            SigHandler::Handler(handle_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for sig in [Signal::SIGINT, Signal::SIGTERM] {
            if let Err(err) = signal::sigaction(sig, &action) {
                tracing::warn!("failed to install {} handler: {}", sig, err);
            }
        }
    });
}

/// Whether a termination signal has been received.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}
