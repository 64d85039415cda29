//! Host callbacks exposed to command libraries through [`HostApi`].
//!
//! Every callback tolerates null pointers and invalid UTF-8 by doing
//! nothing, since a panic here would unwind into foreign code.

use std::ffi::{c_char, c_int, c_void, CStr};

use tracing::info;

use super::abi::HostApi;
use crate::host::ExecutionContext;

/// The one capability table handed to every loaded command.
pub static HOST_API: HostApi = HostApi {
    get_definition,
    add_definition,
    remove_definition,
    is_on,
    display_status,
    malloc: host_malloc,
    free: host_free,
};

/// Reborrow the opaque context pointer passed into a pass.
///
/// # Safety
/// `context` must be null or the pointer the host passed to the running
/// pass, with no other live borrow of the context.
unsafe fn context<'a>(context: *mut c_void) -> Option<&'a mut ExecutionContext> {
    context.cast::<ExecutionContext>().as_mut()
}

/// # Safety
/// `text` must be null or a valid NUL-terminated string.
unsafe fn text<'a>(text: *const c_char) -> Option<&'a str> {
    if text.is_null() {
        return None;
    }
    CStr::from_ptr(text).to_str().ok()
}

unsafe extern "C" fn get_definition(ctx: *mut c_void, name: *const c_char) -> *const c_char {
    let (Some(ctx), Some(name)) = (context(ctx), text(name)) else {
        return std::ptr::null();
    };
    ctx.foreign_view(name)
        .map_or(std::ptr::null(), CStr::as_ptr)
}

unsafe extern "C" fn add_definition(ctx: *mut c_void, name: *const c_char, value: *const c_char) {
    if let (Some(ctx), Some(name), Some(value)) = (context(ctx), text(name), text(value)) {
        ctx.definitions_mut().set(name, value);
    }
}

unsafe extern "C" fn remove_definition(ctx: *mut c_void, name: *const c_char) {
    if let (Some(ctx), Some(name)) = (context(ctx), text(name)) {
        ctx.definitions_mut().remove(name);
    }
}

unsafe extern "C" fn is_on(ctx: *mut c_void, name: *const c_char) -> c_int {
    match (context(ctx), text(name)) {
        (Some(ctx), Some(name)) => c_int::from(ctx.definitions().is_on(name)),
        _ => 0,
    }
}

unsafe extern "C" fn display_status(_ctx: *mut c_void, message: *const c_char) {
    if message.is_null() {
        return;
    }
    let message = CStr::from_ptr(message).to_string_lossy();
    info!(target: "loadcmd::plugin", "{message}");
}

unsafe extern "C" fn host_malloc(size: usize) -> *mut c_void {
    libc::malloc(size)
}

unsafe extern "C" fn host_free(ptr: *mut c_void) {
    libc::free(ptr);
}

/// Copy `message` into a buffer allocated with [`HostApi::malloc`], the way
/// a plugin fills its error field.
///
/// # Safety
/// The returned pointer must be released with [`HostApi::free`].
#[must_use]
pub unsafe fn alloc_c_string(api: &HostApi, message: &str) -> *mut c_char {
    let bytes = message.as_bytes();
    let ptr = (api.malloc)(bytes.len() + 1).cast::<u8>();
    if ptr.is_null() {
        return std::ptr::null_mut();
    }
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
    *ptr.add(bytes.len()) = 0;
    ptr.cast()
}
