use libloading::Library;
use std::path::Path;
use tracing::debug;

use super::abi::InitFn;
use crate::error::{LoadCommandError, Result};

/// Opens module files. The platform loader is the production implementation;
/// tests substitute their own.
pub trait ModuleLoader {
    /// Open the module at `path`.
    ///
    /// # Errors
    /// Returns [`LoadCommandError::Load`] with the platform diagnostic when
    /// the file cannot be opened as a shared library.
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleHandle>>;
}

/// An open module. Dropping the handle may unmap the library, so it must
/// outlive every function pointer resolved from it.
pub trait ModuleHandle {
    /// Look up an exported initializer by exact symbol name.
    fn init_symbol(&self, symbol: &str) -> Option<InitFn>;
}

/// Loads modules with the platform dynamic loader
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLoader;

impl ModuleLoader for DynamicLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleHandle>> {
        // Safety: running a library's initializers is inherent to loading
        // native commands; the caller chose this file.
        let library = unsafe { Library::new(path) }.map_err(|e| LoadCommandError::Load {
            path: path.to_path_buf(),
            diagnostic: Some(e.to_string()),
        })?;
        debug!(path = %path.display(), "opened module");
        Ok(Box::new(library))
    }
}

impl ModuleHandle for Library {
    fn init_symbol(&self, symbol: &str) -> Option<InitFn> {
        // Safety: the symbol is trusted to have the `InitFn` signature, the
        // one ABI every command library must export.
        unsafe { self.get::<InitFn>(symbol.as_bytes()) }
            .ok()
            .map(|sym| *sym)
    }
}

/// Canonical initializer symbol for `command`.
#[must_use]
pub fn init_symbol_name(command: &str) -> String {
    format!("{command}Init")
}

/// Resolve the initializer of `command`: `<command>Init` first, then
/// `_<command>Init` only if the canonical symbol is absent.
///
/// # Errors
/// Returns [`LoadCommandError::SymbolResolution`] when neither is exported.
pub fn resolve_init(module: &dyn ModuleHandle, command: &str, path: &Path) -> Result<InitFn> {
    let canonical = init_symbol_name(command);
    if let Some(init) = module.init_symbol(&canonical) {
        debug!(symbol = %canonical, "resolved init function");
        return Ok(init);
    }

    let alternate = format!("_{canonical}");
    if let Some(init) = module.init_symbol(&alternate) {
        debug!(symbol = %alternate, "resolved init function");
        return Ok(init);
    }

    Err(LoadCommandError::SymbolResolution {
        command: command.to_string(),
        path: path.to_path_buf(),
    })
}

/// File name of the module implementing `command`:
/// `<prefix>cm<command><suffix>`.
#[must_use]
pub fn module_file_name(prefix: &str, command: &str, suffix: &str) -> String {
    format!("{prefix}cm{command}{suffix}")
}
