use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::{debug, warn};
use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};
use once_cell::sync::OnceCell;
use signal_hook::consts::SIGINT;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Terminations in progress anywhere in the process.
static CLEANUPS: AtomicUsize = AtomicUsize::new(0);

/// Routes SIGINT into a flag polled by every blocking sandbox operation.
///
/// A second SIGINT while the flag is already raised terminates the process,
/// unless a sandbox is being terminated. Then it only raises the flag again.
pub fn install_interrupt_flag() -> io::Result<()> {
    static INSTALLED: OnceCell<()> = OnceCell::new();
    INSTALLED.get_or_try_init(|| {
        let action = || {
            let again = INTERRUPTED.swap(true, Ordering::SeqCst);
            if again && CLEANUPS.load(Ordering::SeqCst) == 0 {
                signal_hook::low_level::exit(130);
            }
        };
        // SAFETY: the action only touches atomics and calls `_exit`.
        unsafe { signal_hook::low_level::register(SIGINT, action) }?;
        debug!("interrupt flag installed");
        Ok::<(), io::Error>(())
    })?;
    Ok(())
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Holds SIGINT blocked for the calling thread until dropped.
pub struct InterruptBlock {
    old: Option<SigSet>,
}

impl InterruptBlock {
    pub fn new() -> Self {
        let mut set = SigSet::empty();
        set.add(Signal::SIGINT);
        let mut old = SigSet::empty();
        match pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut old)) {
            Ok(()) => Self { old: Some(old) },
            Err(err) => {
                warn!("failed to block SIGINT: {}", err);
                Self { old: None }
            }
        }
    }
}

impl Default for InterruptBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptBlock {
    fn drop(&mut self) {
        if let Some(ref old) = self.old {
            let _ = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(old), None);
        }
    }
}

/// A termination in progress.
///
/// SIGINT is blocked on this thread, and a SIGINT delivered to any other
/// thread no longer shuts the process down, until the guard is dropped.
pub(crate) struct Cleanup {
    block: Option<InterruptBlock>,
}

impl Cleanup {
    pub(crate) fn enter() -> Self {
        CLEANUPS.fetch_add(1, Ordering::SeqCst);
        Self {
            block: Some(InterruptBlock::new()),
        }
    }
}

impl Drop for Cleanup {
    fn drop(&mut self) {
        // a SIGINT left pending by the mask must still see us in progress
        drop(self.block.take());
        CLEANUPS.fetch_sub(1, Ordering::SeqCst);
    }
}
