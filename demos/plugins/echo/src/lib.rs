//! Echo - a minimal command library for `load_command`
//!
//! `Echo(a b c)` stores `a b c` in `ECHO_LAST` and prints it as a status
//! line. At the end of the scope it reports how many times it ran.

use std::ffi::{c_char, c_int, c_void, CStr, CString};

use loadcmd::plugins::abi::NativeFunctionTable;
use loadcmd::plugins::host_api::alloc_c_string;

struct EchoState {
    calls: u32,
}

unsafe fn table<'a>(info: *mut c_void) -> &'a mut NativeFunctionTable {
    &mut *info.cast::<NativeFunctionTable>()
}

unsafe fn state<'a>(table: &NativeFunctionTable) -> Option<&'a mut EchoState> {
    table.client_data.cast::<EchoState>().as_mut()
}

unsafe fn status(table: &NativeFunctionTable, context: *mut c_void, message: &str) {
    if let Ok(message) = CString::new(message) {
        ((*table.host_api).display_status)(context, message.as_ptr());
    }
}

unsafe extern "C" fn initial_pass(
    info: *mut c_void,
    context: *mut c_void,
    argc: c_int,
    argv: *mut *mut c_char,
) -> c_int {
    let table = table(info);
    if argc <= 0 || argv.is_null() {
        table.error = alloc_c_string(&*table.host_api, "Echo called with no arguments");
        return 0;
    }

    let words: Vec<String> = (0..argc as usize)
        .map(|i| CStr::from_ptr(*argv.add(i)).to_string_lossy().into_owned())
        .collect();
    let line = words.join(" ");

    if let Ok(value) = CString::new(line.as_str()) {
        ((*table.host_api).add_definition)(context, c"ECHO_LAST".as_ptr(), value.as_ptr());
    }
    status(table, context, &line);

    if let Some(state) = state(table) {
        state.calls += 1;
    }
    1
}

unsafe extern "C" fn final_pass(info: *mut c_void, context: *mut c_void) {
    let table = table(info);
    let calls = state(table).map_or(0, |state| state.calls);
    status(table, context, &format!("Echo ran {calls} time(s)"));
}

unsafe extern "C" fn destructor(info: *mut c_void) {
    let table = table(info);
    if !table.client_data.is_null() {
        drop(Box::from_raw(table.client_data.cast::<EchoState>()));
        table.client_data = std::ptr::null_mut();
    }
}

unsafe extern "C" fn terse_documentation() -> *const c_char {
    c"Print the arguments as a status line.".as_ptr()
}

unsafe extern "C" fn full_documentation() -> *const c_char {
    c"Echo(<word>...)\nJoins the words with spaces, stores them in ECHO_LAST and prints them."
        .as_ptr()
}

/// Entry point looked up by the host as `EchoInit`.
///
/// # Safety
/// `table` must point at a table prepared by the host.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "C" fn EchoInit(table: *mut NativeFunctionTable) {
    let Some(table) = table.as_mut() else {
        return;
    };
    table.name = c"Echo".as_ptr();
    table.initial_pass = Some(initial_pass);
    table.final_pass = Some(final_pass);
    table.destructor = Some(destructor);
    table.terse_documentation = Some(terse_documentation);
    table.full_documentation = Some(full_documentation);
    table.client_data = Box::into_raw(Box::new(EchoState { calls: 0 })).cast();
}
