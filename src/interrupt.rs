//! Ctrl-C handling.
//!
//! The first Ctrl-C only raises a flag.  Transactions check it before their
//! swap phase starts and the orchestrator checks it between migrations, so an
//! interrupt never lands in the middle of a commit.  A second Ctrl-C exits
//! immediately, unless a commit is swapping files into place; then the exit
//! waits until the swap phase ends.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
static SWAPPING: AtomicUsize = AtomicUsize::new(0);
static EXIT_DEFERRED: AtomicBool = AtomicBool::new(false);

const EXIT_CODE: i32 = 130;

/// The process-wide interrupt flag.
pub fn flag() -> Arc<AtomicBool> {
    Arc::clone(FLAG.get_or_init(|| Arc::new(AtomicBool::new(false))))
}

/// What a Ctrl-C does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Response {
    /// First interrupt: stop after the current step.
    Stop,
    /// Repeated interrupt during a swap phase: exit once it ends.
    Defer,
    /// Repeated interrupt otherwise.
    Exit,
}

fn respond(flag: &AtomicBool, swapping: bool) -> Response {
    if !flag.swap(true, Ordering::SeqCst) {
        Response::Stop
    } else if swapping {
        Response::Defer
    } else {
        Response::Exit
    }
}

/// Install the Ctrl-C handler.
///
/// # Errors
///
/// Returns an error if a handler is already installed.
pub fn install() -> Result<(), ctrlc::Error> {
    let flag = flag();
    ctrlc::set_handler(move || match respond(&flag, is_swapping()) {
        Response::Stop => {
            tracing::warn!("interrupt received; stopping after the current step");
        }
        Response::Defer => {
            EXIT_DEFERRED.store(true, Ordering::SeqCst);
            tracing::warn!("interrupt received while committing; exiting once files are in place");
        }
        Response::Exit => std::process::exit(EXIT_CODE),
    })
}

/// Whether `flag` has been raised.
#[must_use]
pub fn is_set(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}

/// Whether any commit is in its swap phase.
#[must_use]
pub fn is_swapping() -> bool {
    SWAPPING.load(Ordering::SeqCst) > 0
}

/// Marks a commit's swap phase for as long as it is held.
///
/// Dropping the last one performs an exit that a Ctrl-C deferred meanwhile.
#[derive(Debug)]
#[must_use = "the swap phase ends when this is dropped"]
pub struct SwapPhase(());

/// Enter a swap phase.
pub fn swap_phase() -> SwapPhase {
    SWAPPING.fetch_add(1, Ordering::SeqCst);
    SwapPhase(())
}

impl Drop for SwapPhase {
    fn drop(&mut self) {
        let was_last = SWAPPING.fetch_sub(1, Ordering::SeqCst) == 1;
        if was_last && EXIT_DEFERRED.swap(false, Ordering::SeqCst) {
            std::process::exit(EXIT_CODE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_is_shared() {
        let a = flag();
        let b = flag();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn is_set_reads_flag() {
        let local = AtomicBool::new(false);
        assert!(!is_set(&local));
        local.store(true, Ordering::SeqCst);
        assert!(is_set(&local));
    }

    #[test]
    fn second_interrupt_waits_for_swap_phase() {
        let local = AtomicBool::new(false);
        assert_eq!(respond(&local, true), Response::Stop);
        assert!(is_set(&local));
        assert_eq!(respond(&local, true), Response::Defer);
        assert_eq!(respond(&local, false), Response::Exit);
    }

    #[test]
    fn swap_phase_is_visible_while_held() {
        let phase = swap_phase();
        assert!(is_swapping());
        drop(phase);
    }
}
