//! The `load_command` directive: find a command library, open it and
//! register the command it implements.

use std::path::PathBuf;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{LoadCommandError, Result};
use crate::host::search::SearchPath;
use crate::host::{Command, ExecutionContext, SHARED_MODULE_PREFIX, SHARED_MODULE_SUFFIX};
use crate::plugins::loader::{module_file_name, resolve_init, DynamicLoader, ModuleLoader};
use crate::plugins::proxy::LoadedCommand;
use crate::plugins::state::LoadedCommandState;

/// Name the directive is registered under by [`LoadCommandDirective::install`].
pub const DIRECTIVE_NAME: &str = "load_command";

/// Loads `<prefix>cm<Name><suffix>` from a search path and registers `Name`.
#[derive(Clone)]
pub struct LoadCommandDirective {
    loader: Rc<dyn ModuleLoader>,
    report_prefix: String,
    default_dirs: Vec<String>,
    system_path: bool,
}

impl LoadCommandDirective {
    /// A directive using the platform loader.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_loader(config, Rc::new(DynamicLoader))
    }

    #[must_use]
    pub fn with_loader(config: &Config, loader: Rc<dyn ModuleLoader>) -> Self {
        Self {
            loader,
            report_prefix: config.modules.report_prefix.clone(),
            default_dirs: config.search.default_dirs.clone(),
            system_path: config.search.system_path,
        }
    }

    /// Register this directive in `context` under [`DIRECTIVE_NAME`].
    pub fn install(self, context: &mut ExecutionContext) {
        context
            .commands_mut()
            .register(DIRECTIVE_NAME, Box::new(self));
    }

    /// Variable that reports the file `command` was loaded from.
    #[must_use]
    pub fn report_variable(&self, command: &str) -> String {
        format!("{}_{}", self.report_prefix, command)
    }

    /// Expected module file name for `command` under the context's affixes.
    ///
    /// # Errors
    /// Returns [`LoadCommandError::MissingDefinition`] if either affix is unset.
    pub fn module_name(&self, command: &str, context: &ExecutionContext) -> Result<String> {
        let defs = context.definitions();
        Ok(module_file_name(
            defs.require(SHARED_MODULE_PREFIX)?,
            command,
            defs.require(SHARED_MODULE_SUFFIX)?,
        ))
    }

    /// Expand `patterns` into the directories that will be searched.
    #[must_use]
    pub fn search_path<S: AsRef<str>>(&self, patterns: &[S]) -> SearchPath {
        let mut path = SearchPath::expand(patterns);
        for dir in SearchPath::expand(&self.default_dirs).dirs() {
            path.push(dir.clone());
        }
        if self.system_path {
            path.extend_from_system_path();
        }
        path
    }

    /// Locate the module for `command` without opening it.
    ///
    /// # Errors
    /// Returns [`LoadCommandError::Lookup`] if no directory holds the file.
    pub fn locate<S: AsRef<str>>(
        &self,
        command: &str,
        patterns: &[S],
        context: &ExecutionContext,
    ) -> Result<PathBuf> {
        let module = self.module_name(command, context)?;
        let path = self.search_path(patterns);
        debug!(module = %module, dirs = path.dirs().len(), "searching for command module");
        path.find(&module)
            .ok_or(LoadCommandError::Lookup { module })
    }

    /// Run the directive: `args[0]` is the command name, the rest are
    /// search directories or patterns. An empty argument list does nothing.
    ///
    /// The report variable is cleared first and set only once the library
    /// has been opened, so it may be set even when symbol resolution fails.
    ///
    /// # Errors
    /// Returns the lookup, load or symbol resolution failure; nothing is
    /// registered in that case.
    pub fn execute(&self, args: &[String], context: &mut ExecutionContext) -> Result<()> {
        let Some((command, patterns)) = args.split_first() else {
            return Ok(());
        };

        let report_var = self.report_variable(command);
        context.definitions_mut().remove(&report_var);

        let full_path = self.locate(command, patterns, context).inspect_err(|e| {
            warn!(command = %command, error = %e, "command module not found");
        })?;

        let module = self.loader.open(&full_path).inspect_err(|e| {
            warn!(command = %command, error = %e, "command module failed to open");
        })?;

        context
            .definitions_mut()
            .set(report_var, full_path.to_string_lossy().into_owned());

        let init = resolve_init(module.as_ref(), command, &full_path)?;

        // Safety: `init` was resolved from `module`, which the state keeps
        // alive for as long as the table is in use.
        let state = unsafe { LoadedCommandState::new(init, Some(module)) };
        context
            .commands_mut()
            .register(command.clone(), Box::new(LoadedCommand::new(state)));

        info!(command = %command, path = %full_path.display(), "registered native command");
        Ok(())
    }
}

impl Command for LoadCommandDirective {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn initial_pass(&mut self, args: &[String], context: &mut ExecutionContext) -> Result<()> {
        self.execute(args, context)
    }
}
