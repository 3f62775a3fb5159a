//! Scoped Ctrl+C handling.
//!
//! The process-wide handler is installed lazily the first time a scope is
//! entered and stays registered for the process lifetime (the `ctrlc` crate
//! does not support uninstalling). Behavior is contextual:
//!
//! - no active scope: terminate immediately, like the default handler;
//! - upload scope: first Ctrl+C sets the shared abort flag so in-flight
//!   parts can drain, a second Ctrl+C terminates immediately;
//! - watch scope: sets the interrupted flag; the poll loop notices it and
//!   returns cleanly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

const SIGINT_EXIT_CODE: i32 = 130;

enum Scope {
    Upload(Arc<AtomicBool>),
    Watch(Arc<AtomicBool>),
}

static INSTALL: Once = Once::new();
static ACTIVE_SCOPE: Mutex<Option<Scope>> = Mutex::new(None);

fn install_handler() {
    INSTALL.call_once(|| {
        let _ = ctrlc::set_handler(|| {
            let scope = ACTIVE_SCOPE.lock().unwrap();
            match scope.as_ref() {
                Some(Scope::Upload(flag)) => {
                    if flag.swap(true, Ordering::SeqCst) {
                        // Second Ctrl+C: stop waiting for in-flight parts.
                        std::process::exit(SIGINT_EXIT_CODE);
                    }
                    eprintln!("\n  Upload cancelling… (press Ctrl+C again to force exit)");
                }
                Some(Scope::Watch(flag)) => {
                    flag.store(true, Ordering::SeqCst);
                }
                None => std::process::exit(SIGINT_EXIT_CODE),
            }
        });
    });
}

/// RAII guard for a Ctrl+C scope. Dropping it deactivates the scope.
pub struct InterruptGuard {
    flag: Arc<AtomicBool>,
}

impl InterruptGuard {
    /// Enter an upload scope: cooperative cancellation with a force-exit
    /// escape hatch on the second Ctrl+C.
    pub fn upload() -> Self {
        install_handler();
        let flag = Arc::new(AtomicBool::new(false));
        *ACTIVE_SCOPE.lock().unwrap() = Some(Scope::Upload(Arc::clone(&flag)));
        Self { flag }
    }

    /// Enter a watch scope: Ctrl+C interrupts the poll loop without
    /// terminating the process.
    pub fn watch() -> Self {
        install_handler();
        let flag = Arc::new(AtomicBool::new(false));
        *ACTIVE_SCOPE.lock().unwrap() = Some(Scope::Watch(Arc::clone(&flag)));
        Self { flag }
    }

    /// The flag workers poll. Shared so upload tasks can hold their own clone.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        *ACTIVE_SCOPE.lock().unwrap() = None;
    }
}
