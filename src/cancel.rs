//! Process-wide cancellation flag fed by SIGINT/SIGTERM.
//!
//! The signal handler only stores into an atomic; the walk polls `is_cancelled()` between
//! units of work. Nothing else in the crate can set the flag.

use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::OnceCell;

use crate::errors::WalkError;

static CANCELLED: AtomicBool = AtomicBool::new(false);
static INSTALLED: OnceCell<()> = OnceCell::new();

/// Anything the walk can poll for "stop before starting new work".
pub trait CancelSignal {
    fn is_cancelled(&self) -> bool;
}

/// Handle on the process-wide interruption flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancellationController;

impl CancellationController {
    /// Register the interrupt handlers. Subsequent calls are no-ops.
    pub fn install() -> Result<Self, WalkError> {
        INSTALLED.get_or_try_init(install_handlers)?;
        Ok(CancellationController)
    }

    /// Non-blocking read of the flag. Once set it stays set for the life of the process.
    pub fn is_cancelled(&self) -> bool {
        CANCELLED.load(Ordering::SeqCst)
    }
}

impl CancelSignal for CancellationController {
    fn is_cancelled(&self) -> bool {
        CancellationController::is_cancelled(self)
    }
}

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    // Only async-signal-safe work here.
    CANCELLED.store(true, Ordering::SeqCst);
}

#[cfg(unix)]
fn install_handlers() -> Result<(), WalkError> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let action = SigAction::new(
        SigHandler::Handler(on_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler touches nothing but a static AtomicBool.
        unsafe { sigaction(sig, &action) }.map_err(|errno| WalkError::Process {
            what: format!("installing {} handler", sig.as_str()),
            source: std::io::Error::from(errno),
        })?;
    }
    tracing::debug!("interrupt handlers installed");
    Ok(())
}

#[cfg(not(unix))]
fn install_handlers() -> Result<(), WalkError> {
    tracing::warn!("interrupt handling is not supported on this platform; Ctrl-C will abort immediately");
    Ok(())
}
