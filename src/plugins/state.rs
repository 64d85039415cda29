use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::ptr::NonNull;

use tracing::{debug, warn};

use super::abi::{DocFn, InitFn, NativeFunctionTable};
use super::fault::{with_guard, UNKNOWN_NAME};
use super::host_api::HOST_API;
use super::loader::ModuleHandle;
use crate::error::{LoadCommandError, Result};
use crate::host::ExecutionContext;

/// Deallocator paired with a foreign allocation.
pub type ReleaseFn = unsafe extern "C" fn(ptr: *mut c_void);

/// Error text allocated by a plugin, owned by the host from the moment it is
/// taken out of the table.
///
/// The buffer records the routine that releases it, so it is always freed
/// by the allocator family that produced it.
pub struct ForeignErrorBuffer {
    ptr: NonNull<c_char>,
    release: ReleaseFn,
}

impl ForeignErrorBuffer {
    /// Take ownership of `ptr`.
    ///
    /// # Safety
    /// `ptr` must be null or a NUL-terminated string allocated by the
    /// allocator that `release` belongs to, and nothing else may free it.
    pub unsafe fn adopt(ptr: *mut c_char, release: ReleaseFn) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, release })
    }

    #[must_use]
    pub fn to_string_lossy(&self) -> String {
        // Safety: adopted buffers are NUL-terminated by contract.
        unsafe { CStr::from_ptr(self.ptr.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

impl Drop for ForeignErrorBuffer {
    fn drop(&mut self) {
        // Safety: `release` is the deallocator recorded at adoption.
        unsafe { (self.release)(self.ptr.as_ptr().cast()) }
    }
}

/// Documentation strings a plugin may publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Documentation {
    pub terse: Option<String>,
    pub full: Option<String>,
}

/// Native function table of one loaded command, plus the error text it
/// produced last.
///
/// The init entry point runs exactly once, in [`new`]. The destructor entry
/// point, if any, runs exactly once, on drop. Every pass and the destructor
/// run inside the fault boundary; table population does not.
///
/// Not thread-safe: all calls must come from the thread executing scripts.
///
/// [`new`]: LoadedCommandState::new
pub struct LoadedCommandState {
    table: Box<NativeFunctionTable>,
    error: Option<ForeignErrorBuffer>,
    /// Keeps the library mapped while the table points into it.
    _module: Option<Box<dyn ModuleHandle>>,
}

impl LoadedCommandState {
    /// Populate a table through `init` and take ownership of it.
    ///
    /// # Safety
    /// `init` must follow the plugin ABI, and `module`, when present, must
    /// be the library `init` was resolved from.
    pub unsafe fn new(init: InitFn, module: Option<Box<dyn ModuleHandle>>) -> Self {
        let mut table = Box::new(NativeFunctionTable::empty(&HOST_API));
        init(&mut *table);

        let mut state = Self {
            table,
            error: None,
            _module: module,
        };
        state.adopt_error();
        debug!(
            command = %state.display_name(),
            deferred = state.has_deferred_pass(),
            teardown = state.has_teardown(),
            "native function table populated"
        );
        state
    }

    /// Display name published by the plugin, `????` when absent.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.table.name.is_null() {
            return UNKNOWN_NAME.to_string();
        }
        // Safety: the plugin publishes a NUL-terminated static name.
        unsafe { CStr::from_ptr(self.table.name) }
            .to_string_lossy()
            .into_owned()
    }

    #[must_use]
    pub fn has_immediate_pass(&self) -> bool {
        self.table.initial_pass.is_some()
    }

    #[must_use]
    pub fn has_deferred_pass(&self) -> bool {
        self.table.final_pass.is_some()
    }

    #[must_use]
    pub fn has_teardown(&self) -> bool {
        self.table.destructor.is_some()
    }

    /// Run the immediate pass with `args`.
    ///
    /// Returns `Ok(true)` on success, `Ok(false)` when the plugin reported
    /// failure (see [`last_error`]). A table without an immediate pass
    /// succeeds trivially.
    ///
    /// # Errors
    /// Returns [`LoadCommandError::InvalidArgument`] if an argument contains
    /// an interior NUL; the plugin is not called in that case.
    ///
    /// [`last_error`]: LoadedCommandState::last_error
    pub fn run_immediate_pass(
        &mut self,
        args: &[String],
        context: &mut ExecutionContext,
    ) -> Result<bool> {
        let Some(initial_pass) = self.table.initial_pass else {
            return Ok(true);
        };

        self.clear_error();
        let name = self.display_name();

        let owned = args
            .iter()
            .enumerate()
            .map(|(index, arg)| {
                CString::new(arg.as_str()).map_err(|_| LoadCommandError::InvalidArgument {
                    command: name.clone(),
                    index,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut argv = ForeignArgv::new(owned);
        let argc = c_int::try_from(argv.len()).unwrap_or(c_int::MAX);

        let info = self.info_ptr();
        let ctx = (context as *mut ExecutionContext).cast::<c_void>();
        // Safety: `info` is our boxed table, `ctx` stays exclusively borrowed
        // for the call, and `argv` outlives it.
        let status = with_guard(Some(name.as_str()), || unsafe {
            initial_pass(info, ctx, argc, argv.as_mut_ptr())
        });
        drop(argv);

        self.adopt_error();
        debug!(command = %name, status, "immediate pass returned");
        Ok(status != 0)
    }

    /// Run the deferred pass, if the table has one.
    pub fn run_deferred_pass(&mut self, context: &mut ExecutionContext) {
        let Some(final_pass) = self.table.final_pass else {
            return;
        };
        let name = self.display_name();
        let info = self.info_ptr();
        let ctx = (context as *mut ExecutionContext).cast::<c_void>();
        // Safety: see `run_immediate_pass`.
        with_guard(Some(name.as_str()), || unsafe { final_pass(info, ctx) });
        self.adopt_error();
        debug!(command = %name, "deferred pass completed");
    }

    /// Error text from the most recent pass, valid until the next immediate
    /// pass.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.error.as_ref().map(ForeignErrorBuffer::to_string_lossy)
    }

    /// Documentation the plugin publishes, if any.
    #[must_use]
    pub fn documentation(&self) -> Documentation {
        let name = self.display_name();
        let fetch = |doc: Option<DocFn>| {
            doc.and_then(|doc| {
                // Safety: doc functions return static strings or null.
                let ptr = with_guard(Some(name.as_str()), || unsafe { doc() });
                (!ptr.is_null())
                    .then(|| unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
            })
        };
        Documentation {
            terse: fetch(self.table.terse_documentation),
            full: fetch(self.table.full_documentation),
        }
    }

    fn info_ptr(&mut self) -> *mut c_void {
        (&mut *self.table as *mut NativeFunctionTable).cast()
    }

    fn clear_error(&mut self) {
        self.adopt_error();
        self.error = None;
    }

    /// Move any error text the plugin left in the table into host ownership.
    fn adopt_error(&mut self) {
        let raw = std::mem::replace(&mut self.table.error, std::ptr::null_mut());
        if raw.is_null() {
            return;
        }
        let release = self.release_fn();
        // Safety: plugins allocate `error` with `HostApi::malloc`.
        self.error = unsafe { ForeignErrorBuffer::adopt(raw, release) };
    }

    fn release_fn(&self) -> ReleaseFn {
        // Safety: `host_api` is set before init and points at a static.
        unsafe { self.table.host_api.as_ref() }.map_or(HOST_API.free, |api| api.free)
    }
}

impl Drop for LoadedCommandState {
    fn drop(&mut self) {
        // Already surfaced through `last_error`; released only after teardown.
        let reported = self.error.take();
        if let Some(destructor) = self.table.destructor {
            let name = self.display_name();
            let info = self.info_ptr();
            // Safety: the table is still alive and its library still mapped.
            with_guard(Some(name.as_str()), || unsafe { destructor(info) });
            debug!(command = %name, "native command torn down");
        }
        drop(reported);

        self.adopt_error();
        if let Some(error) = self.error.take() {
            warn!(message = %error.to_string_lossy(), "discarding error left by teardown");
        }
    }
}

/// Argument vector in the foreign calling convention: one independently
/// owned NUL-terminated string per argument, reclaimed on drop.
struct ForeignArgv {
    ptrs: Vec<*mut c_char>,
}

impl ForeignArgv {
    fn new(args: Vec<CString>) -> Self {
        Self {
            ptrs: args.into_iter().map(CString::into_raw).collect(),
        }
    }

    fn len(&self) -> usize {
        self.ptrs.len()
    }

    fn as_mut_ptr(&mut self) -> *mut *mut c_char {
        if self.ptrs.is_empty() {
            std::ptr::null_mut()
        } else {
            self.ptrs.as_mut_ptr()
        }
    }
}

impl Drop for ForeignArgv {
    fn drop(&mut self) {
        for ptr in self.ptrs.drain(..) {
            // Safety: every pointer came from `CString::into_raw`.
            drop(unsafe { CString::from_raw(ptr) });
        }
    }
}
