//! Binary interface shared between the host and loaded command libraries
//!
//! A command library exports `<Name>Init` (or `_<Name>Init`) with the
//! [`InitFn`] signature. The host hands it a zeroed [`NativeFunctionTable`]
//! whose `host_api` field is already set; the library fills in the rest.

use std::ffi::{c_char, c_int, c_void};

/// Populates a fresh table. Called exactly once per loaded command.
pub type InitFn = unsafe extern "C" fn(table: *mut NativeFunctionTable);

/// Immediate pass. `info` is the table itself, `context` is the opaque host
/// execution context. Returns non-zero on success.
pub type InitialPassFn = unsafe extern "C" fn(
    info: *mut c_void,
    context: *mut c_void,
    argc: c_int,
    argv: *mut *mut c_char,
) -> c_int;

/// Deferred pass, run once at the end of the scope after a successful
/// immediate pass.
pub type FinalPassFn = unsafe extern "C" fn(info: *mut c_void, context: *mut c_void);

/// Teardown, run once when the last handle to the command goes away.
pub type DestructorFn = unsafe extern "C" fn(info: *mut c_void);

/// Returns a static, NUL-terminated documentation string.
pub type DocFn = unsafe extern "C" fn() -> *const c_char;

/// Function table populated by a command library.
///
/// Optional entry points are `None` when the library leaves them null, so
/// absence is checked before every call.
///
/// `error` must be allocated with [`HostApi::malloc`]; the host takes
/// ownership of it after each foreign call and releases it with
/// [`HostApi::free`].
#[repr(C)]
pub struct NativeFunctionTable {
    pub host_api: *const HostApi,
    pub initial_pass: Option<InitialPassFn>,
    pub final_pass: Option<FinalPassFn>,
    pub destructor: Option<DestructorFn>,
    pub error: *mut c_char,
    pub name: *const c_char,
    pub terse_documentation: Option<DocFn>,
    pub full_documentation: Option<DocFn>,
    pub client_data: *mut c_void,
}

impl NativeFunctionTable {
    /// A zero-initialized table pointing at `host_api`.
    #[must_use]
    pub fn empty(host_api: *const HostApi) -> Self {
        Self {
            host_api,
            initial_pass: None,
            final_pass: None,
            destructor: None,
            error: std::ptr::null_mut(),
            name: std::ptr::null(),
            terse_documentation: None,
            full_documentation: None,
            client_data: std::ptr::null_mut(),
        }
    }
}

/// Capabilities the host offers to command libraries.
///
/// Every `context` argument is the pointer the host passed into the pass
/// being executed.
#[repr(C)]
pub struct HostApi {
    /// Returns a NUL-terminated view of a definition, or null when unset.
    /// The view stays valid until the same name is looked up again.
    pub get_definition:
        unsafe extern "C" fn(context: *mut c_void, name: *const c_char) -> *const c_char,
    pub add_definition:
        unsafe extern "C" fn(context: *mut c_void, name: *const c_char, value: *const c_char),
    pub remove_definition: unsafe extern "C" fn(context: *mut c_void, name: *const c_char),
    pub is_on: unsafe extern "C" fn(context: *mut c_void, name: *const c_char) -> c_int,
    pub display_status: unsafe extern "C" fn(context: *mut c_void, message: *const c_char),
    pub malloc: unsafe extern "C" fn(size: usize) -> *mut c_void,
    pub free: unsafe extern "C" fn(ptr: *mut c_void),
}
