//! End-to-end tests of the load directive against in-process command
//! libraries.
//!
//! A fake module loader maps files on disk to sets of exported init
//! functions, so the full find/open/resolve/register/invoke path runs
//! without building shared libraries.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use loadcmd::config::Config;
use loadcmd::directive::{LoadCommandDirective, DIRECTIVE_NAME};
use loadcmd::plugins::abi::{InitFn, NativeFunctionTable};
use loadcmd::plugins::host_api::alloc_c_string;
use loadcmd::plugins::loader::{ModuleHandle, ModuleLoader};
use loadcmd::{ExecutionContext, LoadCommandError};
use tempfile::{tempdir, TempDir};

struct FakeModule {
    exports: Vec<(&'static str, InitFn)>,
}

impl ModuleHandle for FakeModule {
    fn init_symbol(&self, symbol: &str) -> Option<InitFn> {
        self.exports
            .iter()
            .find(|(name, _)| *name == symbol)
            .map(|(_, init)| *init)
    }
}

#[derive(Default)]
struct FakeLoader {
    modules: HashMap<PathBuf, Vec<(&'static str, InitFn)>>,
}

impl ModuleLoader for FakeLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleHandle>, LoadCommandError> {
        let exports = self
            .modules
            .get(path)
            .cloned()
            .ok_or_else(|| LoadCommandError::Load {
                path: path.to_path_buf(),
                diagnostic: Some("file is not a shared library".to_string()),
            })?;
        Ok(Box::new(FakeModule { exports }))
    }
}

struct Fixture {
    dir: TempDir,
    loader: FakeLoader,
    config: Config,
}

impl Fixture {
    fn new() -> Self {
        let mut config = Config::default();
        config.modules.prefix = "lib".to_string();
        config.modules.suffix = ".so".to_string();
        Self {
            dir: tempdir().unwrap(),
            loader: FakeLoader::default(),
            config,
        }
    }

    /// Put `libcm<name>.so` on disk and make it export `exports`.
    fn library(&mut self, name: &str, exports: Vec<(&'static str, InitFn)>) -> PathBuf {
        let path = self.dir.path().join(format!("libcm{name}.so"));
        fs::write(&path, b"\x7fELF").unwrap();
        self.loader.modules.insert(path.clone(), exports);
        path
    }

    fn search_dir(&self) -> String {
        self.dir.path().to_string_lossy().into_owned()
    }

    fn context(self) -> (ExecutionContext, TempDir) {
        let mut context = ExecutionContext::from_config(&self.config);
        LoadCommandDirective::with_loader(&self.config, Rc::new(self.loader)).install(&mut context);
        (context, self.dir)
    }
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_string()).collect()
}

unsafe extern "C" fn always_succeed(
    _info: *mut c_void,
    _ctx: *mut c_void,
    _argc: c_int,
    _argv: *mut *mut c_char,
) -> c_int {
    1
}

unsafe extern "C" fn reject_two_args(
    info: *mut c_void,
    _ctx: *mut c_void,
    argc: c_int,
    _argv: *mut *mut c_char,
) -> c_int {
    if argc != 2 {
        return 1;
    }
    let table = &mut *info.cast::<NativeFunctionTable>();
    table.error = alloc_c_string(&*table.host_api, "bad arg");
    0
}

unsafe extern "C" fn foo_init(table: *mut NativeFunctionTable) {
    (*table).initial_pass = Some(always_succeed);
    (*table).name = c"Foo".as_ptr();
}

#[test]
fn test_missing_module_fails_lookup_and_reports_nothing() {
    let fixture = Fixture::new();
    let search = fixture.search_dir();
    let (mut ctx, _dir) = fixture.context();

    let err = ctx
        .invoke(DIRECTIVE_NAME, &strings(&["Foo", &search]))
        .unwrap_err();

    assert!(matches!(err, LoadCommandError::Lookup { .. }));
    assert!(err.to_string().contains("\"libcmFoo.so\""));
    assert!(!ctx.definitions().contains("LOADED_COMMAND_Foo"));
    assert!(!ctx.commands().contains("Foo"));
}

#[test]
fn test_missing_init_symbol_still_reports_path() {
    let mut fixture = Fixture::new();
    let path = fixture.library("Foo", vec![("BarInit", foo_init as InitFn)]);
    let search = fixture.search_dir();
    let (mut ctx, _dir) = fixture.context();

    let err = ctx
        .invoke(DIRECTIVE_NAME, &strings(&["Foo", &search]))
        .unwrap_err();

    assert!(matches!(err, LoadCommandError::SymbolResolution { .. }));
    assert!(err.to_string().contains("No init function found"));
    assert_eq!(
        ctx.definitions().get("LOADED_COMMAND_Foo"),
        Some(path.to_string_lossy().as_ref())
    );
    assert!(!ctx.commands().contains("Foo"));
}

#[test]
fn test_successful_load_registers_command() {
    let mut fixture = Fixture::new();
    let path = fixture.library("Foo", vec![("FooInit", foo_init as InitFn)]);
    let search = fixture.search_dir();
    let (mut ctx, _dir) = fixture.context();

    ctx.invoke(DIRECTIVE_NAME, &strings(&["Foo", &search]))
        .unwrap();

    assert!(ctx.commands().contains("Foo"));
    assert_eq!(
        ctx.definitions().get("LOADED_COMMAND_Foo"),
        Some(path.to_string_lossy().as_ref())
    );
    ctx.invoke("Foo", &strings(&["anything"])).unwrap();
}

#[test]
fn test_underscore_prefixed_init_is_accepted() {
    let mut fixture = Fixture::new();
    fixture.library("Foo", vec![("_FooInit", foo_init as InitFn)]);
    let search = fixture.search_dir();
    let (mut ctx, _dir) = fixture.context();

    ctx.invoke(DIRECTIVE_NAME, &strings(&["Foo", &search]))
        .unwrap();
    assert!(ctx.commands().contains("Foo"));
}

#[test]
fn test_plugin_error_text_is_the_host_message() {
    unsafe extern "C" fn init(table: *mut NativeFunctionTable) {
        (*table).initial_pass = Some(reject_two_args);
        (*table).name = c"Picky".as_ptr();
    }

    let mut fixture = Fixture::new();
    fixture.library("Picky", vec![("PickyInit", init as InitFn)]);
    let search = fixture.search_dir();
    let (mut ctx, _dir) = fixture.context();
    ctx.invoke(DIRECTIVE_NAME, &strings(&["Picky", &search]))
        .unwrap();

    let err = ctx.invoke("Picky", &strings(&["a", "b"])).unwrap_err();
    assert_eq!(err.to_string(), "bad arg");

    // A later successful call carries no stale error.
    ctx.invoke("Picky", &strings(&["a"])).unwrap();
}

#[test]
fn test_failed_reload_clears_stale_report() {
    let mut fixture = Fixture::new();
    fixture.library("Foo", vec![("FooInit", foo_init as InitFn)]);
    let search = fixture.search_dir();
    let (mut ctx, dir) = fixture.context();

    ctx.invoke(DIRECTIVE_NAME, &strings(&["Foo", &search]))
        .unwrap();
    assert!(ctx.definitions().contains("LOADED_COMMAND_Foo"));

    fs::remove_file(dir.path().join("libcmFoo.so")).unwrap();
    let err = ctx
        .invoke(DIRECTIVE_NAME, &strings(&["Foo", &search]))
        .unwrap_err();
    assert!(matches!(err, LoadCommandError::Lookup { .. }));
    assert!(!ctx.definitions().contains("LOADED_COMMAND_Foo"));
}

#[test]
fn test_wildcard_search_path_finds_nested_module() {
    let mut fixture = Fixture::new();
    let nested = fixture.dir.path().join("vendor").join("lib");
    fs::create_dir_all(&nested).unwrap();
    let path = nested.join("libcmFoo.so");
    fs::write(&path, b"\x7fELF").unwrap();
    fixture
        .loader
        .modules
        .insert(path.clone(), vec![("FooInit", foo_init as InitFn)]);

    let pattern = format!("{}/*/lib", fixture.search_dir());
    let (mut ctx, _dir) = fixture.context();

    ctx.invoke(DIRECTIVE_NAME, &strings(&["Foo", &pattern]))
        .unwrap();
    assert_eq!(
        ctx.definitions().get("LOADED_COMMAND_Foo"),
        Some(path.to_string_lossy().as_ref())
    );
}

#[test]
fn test_deferred_pass_runs_once_per_successful_invocation() {
    static FINALS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn final_pass(_info: *mut c_void, _ctx: *mut c_void) {
        FINALS.fetch_add(1, Ordering::SeqCst);
    }
    unsafe extern "C" fn init(table: *mut NativeFunctionTable) {
        (*table).initial_pass = Some(reject_two_args);
        (*table).final_pass = Some(final_pass);
    }

    let mut fixture = Fixture::new();
    fixture.library("Later", vec![("LaterInit", init as InitFn)]);
    let search = fixture.search_dir();
    let (mut ctx, _dir) = fixture.context();
    ctx.invoke(DIRECTIVE_NAME, &strings(&["Later", &search]))
        .unwrap();

    ctx.invoke("Later", &strings(&["ok"])).unwrap();
    assert!(ctx.invoke("Later", &strings(&["x", "y"])).is_err());
    assert_eq!(FINALS.load(Ordering::SeqCst), 0);

    ctx.end_scope();
    assert_eq!(FINALS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_teardown_runs_once_after_all_clones_are_gone() {
    static INITS: AtomicUsize = AtomicUsize::new(0);
    static TEARDOWNS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn destructor(_info: *mut c_void) {
        TEARDOWNS.fetch_add(1, Ordering::SeqCst);
    }
    unsafe extern "C" fn init(table: *mut NativeFunctionTable) {
        INITS.fetch_add(1, Ordering::SeqCst);
        (*table).initial_pass = Some(always_succeed);
        (*table).destructor = Some(destructor);
    }

    let mut fixture = Fixture::new();
    fixture.library("Once", vec![("OnceInit", init as InitFn)]);
    let search = fixture.search_dir();
    let (mut ctx, _dir) = fixture.context();
    ctx.invoke(DIRECTIVE_NAME, &strings(&["Once", &search]))
        .unwrap();

    for _ in 0..5 {
        ctx.invoke("Once", &[]).unwrap();
    }
    let held = ctx.commands().instantiate("Once").unwrap();
    assert_eq!(INITS.load(Ordering::SeqCst), 1);

    ctx.commands_mut().remove("Once");
    assert_eq!(TEARDOWNS.load(Ordering::SeqCst), 0);

    drop(held);
    assert_eq!(TEARDOWNS.load(Ordering::SeqCst), 1);

    drop(ctx);
    assert_eq!(INITS.load(Ordering::SeqCst), 1);
    assert_eq!(TEARDOWNS.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reloading_replaces_command_and_tears_down_old_state() {
    static TEARDOWNS: AtomicUsize = AtomicUsize::new(0);

    unsafe extern "C" fn destructor(_info: *mut c_void) {
        TEARDOWNS.fetch_add(1, Ordering::SeqCst);
    }
    unsafe extern "C" fn init(table: *mut NativeFunctionTable) {
        (*table).initial_pass = Some(always_succeed);
        (*table).destructor = Some(destructor);
    }

    let mut fixture = Fixture::new();
    fixture.library("Twice", vec![("TwiceInit", init as InitFn)]);
    let search = fixture.search_dir();
    let (mut ctx, _dir) = fixture.context();

    ctx.invoke(DIRECTIVE_NAME, &strings(&["Twice", &search]))
        .unwrap();
    ctx.invoke(DIRECTIVE_NAME, &strings(&["Twice", &search]))
        .unwrap();
    assert_eq!(TEARDOWNS.load(Ordering::SeqCst), 1);

    drop(ctx);
    assert_eq!(TEARDOWNS.load(Ordering::SeqCst), 2);
}

#[test]
fn test_loaded_command_documentation_is_visible_to_host() {
    unsafe extern "C" fn terse() -> *const c_char {
        c"Documented command.".as_ptr()
    }
    unsafe extern "C" fn init(table: *mut NativeFunctionTable) {
        (*table).initial_pass = Some(always_succeed);
        (*table).terse_documentation = Some(terse);
    }

    let mut fixture = Fixture::new();
    fixture.library("Doc", vec![("DocInit", init as InitFn)]);
    let search = fixture.search_dir();
    let (mut ctx, _dir) = fixture.context();
    ctx.invoke(DIRECTIVE_NAME, &strings(&["Doc", &search]))
        .unwrap();

    let docs = ctx.commands().documentation("Doc").unwrap();
    assert_eq!(docs.terse.as_deref(), Some("Documented command."));
    assert_eq!(docs.full, None);
    assert!(ctx.commands().documentation(DIRECTIVE_NAME).is_none());
    assert!(ctx.commands().documentation("Missing").is_none());
}

#[test]
fn test_parent_components_collapse_in_reported_path() {
    let mut fixture = Fixture::new();
    let path = fixture.library("Foo", vec![("FooInit", foo_init as InitFn)]);
    fs::create_dir(fixture.dir.path().join("sub")).unwrap();
    let search = format!("{}/sub/..", fixture.search_dir());
    let (mut ctx, _dir) = fixture.context();

    ctx.invoke(DIRECTIVE_NAME, &strings(&["Foo", &search]))
        .unwrap();
    assert_eq!(
        ctx.definitions().get("LOADED_COMMAND_Foo"),
        Some(path.to_string_lossy().as_ref())
    );
}
