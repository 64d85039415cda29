//! Crash diagnostics scoped to a single foreign call.
//!
//! While a [`FaultGuard`] is alive, SIGSEGV, SIGBUS and SIGILL are routed to
//! a handler that writes `loaded command <name> crashed with signal: <n>.`
//! to stderr. The handler is installed with `SA_RESETHAND`, so after the
//! diagnostic the signal's default disposition is back in place: a genuine
//! fault re-executes and terminates the process instead of continuing in an
//! undefined state. A signal raised explicitly (not by a faulting
//! instruction) returns normally and is counted in [`faults_trapped`].
//!
//! The guarded name lives in process-global state. Guarded calls nest on one
//! thread; guarded calls on different threads at the same time are not
//! supported and will misattribute diagnostics.

use std::ffi::{c_char, c_int, CStr, CString};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use tracing::{error, trace};

/// Shown when the plugin did not provide a display name.
pub(crate) const UNKNOWN_NAME: &str = "????";

static GUARDED_NAME: AtomicPtr<c_char> = AtomicPtr::new(std::ptr::null_mut());
static FAULTS_TRAPPED: AtomicUsize = AtomicUsize::new(0);

/// Number of fault-class signals trapped since process start.
#[must_use]
pub fn faults_trapped() -> usize {
    FAULTS_TRAPPED.load(Ordering::SeqCst)
}

/// Name recorded by the innermost live guard.
#[must_use]
pub fn current_guarded_name() -> Option<String> {
    let name = GUARDED_NAME.load(Ordering::SeqCst);
    if name.is_null() {
        return None;
    }
    // Safety: the pointer belongs to a live guard's CString.
    Some(unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned())
}

/// Run `call` with fault diagnostics attributed to `name`.
///
/// This is the only way to install the handlers: guards created here are
/// always released innermost first, which the saved dispositions and the
/// saved name depend on.
pub fn with_guard<R>(name: Option<&str>, call: impl FnOnce() -> R) -> R {
    let guard = FaultGuard::install(name);
    let before = faults_trapped();
    let result = call();
    if faults_trapped() != before {
        error!(command = %guard.name(), "fault-class signal trapped during foreign call");
    }
    result
}

/// Signal handlers and guarded name for the duration of one foreign call.
///
/// Must be dropped in reverse order of installation.
struct FaultGuard {
    name: CString,
    previous_name: *mut c_char,
    #[cfg(unix)]
    previous_actions: Vec<(c_int, libc::sigaction)>,
}

impl FaultGuard {
    fn install(name: Option<&str>) -> Self {
        let name = name
            .and_then(|n| CString::new(n).ok())
            .unwrap_or_else(|| CString::new(UNKNOWN_NAME).unwrap_or_default());
        let previous_name = GUARDED_NAME.swap(name.as_ptr().cast_mut(), Ordering::SeqCst);
        trace!(command = %name.to_string_lossy(), "fault guard installed");

        Self {
            #[cfg(unix)]
            previous_actions: imp::install(),
            name,
            previous_name,
        }
    }

    fn name(&self) -> String {
        self.name.to_string_lossy().into_owned()
    }
}

impl Drop for FaultGuard {
    fn drop(&mut self) {
        #[cfg(unix)]
        imp::restore(&self.previous_actions);
        GUARDED_NAME.store(self.previous_name, Ordering::SeqCst);
    }
}

/// Fixed-capacity line assembled without allocating, for use inside the
/// signal handler.
struct DiagnosticLine {
    buf: [u8; 256],
    len: usize,
}

impl DiagnosticLine {
    fn new() -> Self {
        Self {
            buf: [0; 256],
            len: 0,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        let take = bytes.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + take].copy_from_slice(&bytes[..take]);
        self.len += take;
    }

    fn push_decimal(&mut self, value: c_int) {
        let mut digits = [0u8; 12];
        let mut n = i64::from(value).unsigned_abs();
        let mut i = digits.len();
        loop {
            i -= 1;
            digits[i] = b'0' + (n % 10) as u8;
            n /= 10;
            if n == 0 {
                break;
            }
        }
        if value < 0 {
            self.push(b"-");
        }
        self.push(&digits[i..]);
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

fn format_diagnostic(name: &[u8], signal: c_int) -> DiagnosticLine {
    let mut line = DiagnosticLine::new();
    line.push(b"loaded command ");
    line.push(name);
    line.push(b" crashed with signal: ");
    line.push_decimal(signal);
    line.push(b".\n");
    line
}

#[cfg(unix)]
mod imp {
    use super::{format_diagnostic, FAULTS_TRAPPED, GUARDED_NAME, UNKNOWN_NAME};
    use std::ffi::{c_int, CStr};
    use std::sync::atomic::Ordering;

    const FAULT_SIGNALS: [c_int; 3] = [libc::SIGSEGV, libc::SIGBUS, libc::SIGILL];

    extern "C" fn trap_fault(signal: c_int) {
        FAULTS_TRAPPED.fetch_add(1, Ordering::SeqCst);
        let name = GUARDED_NAME.load(Ordering::SeqCst);
        let name = if name.is_null() {
            UNKNOWN_NAME.as_bytes()
        } else {
            // Safety: the pointer belongs to a live guard's CString.
            unsafe { CStr::from_ptr(name) }.to_bytes()
        };
        let line = format_diagnostic(name, signal);
        let bytes = line.as_bytes();
        // Safety: write(2) is async-signal-safe and the buffer is on our stack.
        unsafe {
            libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
        }
    }

    pub(super) fn install() -> Vec<(c_int, libc::sigaction)> {
        FAULT_SIGNALS
            .iter()
            .filter_map(|&signal| {
                // Safety: both structs are fully initialized before use and
                // the handler only touches atomics and write(2).
                unsafe {
                    let mut action: libc::sigaction = std::mem::zeroed();
                    action.sa_sigaction = trap_fault as extern "C" fn(c_int) as libc::sighandler_t;
                    action.sa_flags = libc::SA_RESETHAND | libc::SA_ONSTACK;
                    libc::sigemptyset(&mut action.sa_mask);

                    let mut previous: libc::sigaction = std::mem::zeroed();
                    (libc::sigaction(signal, &action, &mut previous) == 0)
                        .then_some((signal, previous))
                }
            })
            .collect()
    }

    pub(super) fn restore(previous: &[(c_int, libc::sigaction)]) {
        for (signal, action) in previous.iter().rev() {
            // Safety: `action` was filled in by sigaction(2).
            unsafe {
                libc::sigaction(*signal, action, std::ptr::null_mut());
            }
        }
    }

    #[cfg(test)]
    pub(super) fn current_handler(signal: c_int) -> libc::sighandler_t {
        // Safety: querying the current disposition only.
        unsafe {
            let mut current: libc::sigaction = std::mem::zeroed();
            libc::sigaction(signal, std::ptr::null(), &mut current);
            current.sa_sigaction
        }
    }

    #[cfg(test)]
    pub(super) fn trap_fault_address() -> libc::sighandler_t {
        trap_fault as extern "C" fn(c_int) as libc::sighandler_t
    }
}

/// Serializes tests that observe process-wide signal dispositions or the
/// guarded name.
#[cfg(test)]
pub(crate) fn serial() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
