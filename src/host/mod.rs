//! Minimal script host: variable store, command registry and the per-scope
//! execution context that loaded commands run against.
//!
//! Everything here runs on a single thread. Loaded commands share their
//! native state through `Rc`, so none of these types are `Send`.

pub mod search;

use std::collections::HashMap;
use std::ffi::{CStr, CString};

use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{LoadCommandError, Result};
use crate::plugins::state::Documentation;

/// Definition holding the shared-module file name prefix.
pub const SHARED_MODULE_PREFIX: &str = "SHARED_MODULE_PREFIX";

/// Definition holding the shared-module file name suffix.
pub const SHARED_MODULE_SUFFIX: &str = "SHARED_MODULE_SUFFIX";

/// A command the host can dispatch to.
pub trait Command {
    /// Create a new instance for one invocation. Implementations that wrap
    /// shared state share it rather than copying it.
    fn clone_command(&self) -> Box<dyn Command>;

    /// Help text published by the command, if it has any.
    fn documentation(&self) -> Option<Documentation> {
        None
    }

    /// Run the command with already-expanded arguments.
    ///
    /// # Errors
    /// Returns an error carrying the message the host should report.
    fn initial_pass(&mut self, args: &[String], context: &mut ExecutionContext) -> Result<()>;
}

/// Work scheduled during an immediate pass, run when the scope ends.
pub type DeferredAction = Box<dyn FnOnce(&mut ExecutionContext)>;

/// String variables visible to scripts and to loaded commands
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    values: HashMap<String, String>,
}

impl Definitions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Look up a definition the caller cannot proceed without.
    ///
    /// # Errors
    /// Returns [`LoadCommandError::MissingDefinition`] when `name` is unset.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| LoadCommandError::MissingDefinition(name.to_string()))
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.values.remove(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Whether the definition holds a true constant: `1`, `ON`, `YES`,
    /// `TRUE`, `Y` (any case) or a non-zero integer.
    #[must_use]
    pub fn is_on(&self, name: &str) -> bool {
        self.get(name).is_some_and(is_true_constant)
    }
}

fn is_true_constant(value: &str) -> bool {
    let upper = value.trim().to_ascii_uppercase();
    match upper.as_str() {
        "1" | "ON" | "YES" | "TRUE" | "Y" => true,
        other => other.parse::<i64>().is_ok_and(|n| n != 0),
    }
}

/// Commands registered for the remainder of script execution
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Box<dyn Command>>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `command` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, command: Box<dyn Command>) {
        let name = name.into();
        if self.commands.insert(name.clone(), command).is_some() {
            debug!(command = %name, "replaced registered command");
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    /// A fresh instance of the registered command, ready for one invocation.
    #[must_use]
    pub fn instantiate(&self, name: &str) -> Option<Box<dyn Command>> {
        self.commands.get(name).map(|command| command.clone_command())
    }

    /// Documentation of the command registered under `name`.
    #[must_use]
    pub fn documentation(&self, name: &str) -> Option<Documentation> {
        self.commands.get(name)?.documentation()
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Command>> {
        self.commands.remove(name)
    }
}

/// Per-evaluation state threaded through every command call.
///
/// Deferred actions run in scheduling order when [`end_scope`] is called.
/// Dropping the context first discards them without running any.
///
/// [`end_scope`]: ExecutionContext::end_scope
#[derive(Default)]
pub struct ExecutionContext {
    definitions: Definitions,
    commands: CommandRegistry,
    deferred: Vec<DeferredAction>,
    /// NUL-terminated copies handed out to foreign code
    foreign_views: HashMap<String, CString>,
}

impl ExecutionContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A context whose shared-module affixes come from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut context = Self::new();
        context
            .definitions
            .set(SHARED_MODULE_PREFIX, config.modules.prefix.clone());
        context
            .definitions
            .set(SHARED_MODULE_SUFFIX, config.modules.suffix.clone());
        context
    }

    #[must_use]
    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    pub fn definitions_mut(&mut self) -> &mut Definitions {
        &mut self.definitions
    }

    #[must_use]
    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn commands_mut(&mut self) -> &mut CommandRegistry {
        &mut self.commands
    }

    /// Dispatch `name` with `args` through a fresh clone of the registered
    /// command.
    ///
    /// # Errors
    /// Returns [`LoadCommandError::UnknownCommand`] for an unregistered name,
    /// otherwise whatever the command reports.
    pub fn invoke(&mut self, name: &str, args: &[String]) -> Result<()> {
        let mut command = self
            .commands
            .instantiate(name)
            .ok_or_else(|| LoadCommandError::UnknownCommand(name.to_string()))?;
        trace!(command = name, argc = args.len(), "invoking command");
        command.initial_pass(args, self)
    }

    pub fn schedule_deferred(&mut self, action: DeferredAction) {
        self.deferred.push(action);
    }

    #[must_use]
    pub fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    /// Run every deferred action, including ones scheduled while draining.
    pub fn end_scope(&mut self) {
        while !self.deferred.is_empty() {
            let batch = std::mem::take(&mut self.deferred);
            debug!(count = batch.len(), "running deferred actions");
            for action in batch {
                action(self);
            }
        }
    }

    /// A NUL-terminated copy of a definition for foreign callers. The copy
    /// lives until the same name is requested again or the context drops.
    pub(crate) fn foreign_view(&mut self, name: &str) -> Option<&CStr> {
        let value = CString::new(self.definitions.get(name)?).ok()?;
        self.foreign_views.insert(name.to_string(), value);
        self.foreign_views.get(name).map(CString::as_c_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone)]
    struct Recorder {
        calls: Rc<RefCell<Vec<Vec<String>>>>,
    }

    impl Command for Recorder {
        fn clone_command(&self) -> Box<dyn Command> {
            Box::new(self.clone())
        }

        fn initial_pass(&mut self, args: &[String], _context: &mut ExecutionContext) -> Result<()> {
            self.calls.borrow_mut().push(args.to_vec());
            Ok(())
        }
    }

    #[test]
    fn test_is_on_constants() {
        let mut defs = Definitions::new();
        for (value, expected) in [
            ("ON", true),
            ("yes", true),
            ("1", true),
            ("42", true),
            ("y", true),
            ("OFF", false),
            ("0", false),
            ("", false),
            ("NOTFOUND", false),
        ] {
            defs.set("FLAG", value);
            assert_eq!(defs.is_on("FLAG"), expected, "value {value:?}");
        }
        assert!(!defs.is_on("UNSET"));
    }

    #[test]
    fn test_require_reports_missing_name() {
        let defs = Definitions::new();
        let err = defs.require(SHARED_MODULE_PREFIX).unwrap_err();
        assert!(matches!(err, LoadCommandError::MissingDefinition(name) if name == SHARED_MODULE_PREFIX));
    }

    #[test]
    fn test_invoke_dispatches_clone() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut context = ExecutionContext::new();
        context.commands_mut().register(
            "rec",
            Box::new(Recorder {
                calls: Rc::clone(&calls),
            }),
        );

        context.invoke("rec", &["a".to_string()]).unwrap();
        context.invoke("rec", &[]).unwrap();

        assert_eq!(calls.borrow().len(), 2);
        assert_eq!(calls.borrow()[0], vec!["a".to_string()]);
    }

    #[test]
    fn test_invoke_unknown_command() {
        let mut context = ExecutionContext::new();
        let err = context.invoke("missing", &[]).unwrap_err();
        assert!(matches!(err, LoadCommandError::UnknownCommand(_)));
    }

    #[test]
    fn test_end_scope_runs_actions_once_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut context = ExecutionContext::new();

        for i in 0..3 {
            let log = Rc::clone(&log);
            context.schedule_deferred(Box::new(move |_: &mut ExecutionContext| log.borrow_mut().push(i)));
        }
        assert_eq!(context.pending_deferred(), 3);

        context.end_scope();
        context.end_scope();

        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert_eq!(context.pending_deferred(), 0);
    }

    #[test]
    fn test_actions_scheduled_while_draining_also_run() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut context = ExecutionContext::new();

        let outer_log = Rc::clone(&log);
        context.schedule_deferred(Box::new(move |ctx: &mut ExecutionContext| {
            outer_log.borrow_mut().push("outer");
            let inner_log = Rc::clone(&outer_log);
            ctx.schedule_deferred(Box::new(move |_: &mut ExecutionContext| inner_log.borrow_mut().push("inner")));
        }));

        context.end_scope();
        assert_eq!(*log.borrow(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_discarded_context_runs_nothing() {
        let ran = Rc::new(RefCell::new(false));
        {
            let mut context = ExecutionContext::new();
            let ran = Rc::clone(&ran);
            context.schedule_deferred(Box::new(move |_: &mut ExecutionContext| *ran.borrow_mut() = true));
        }
        assert!(!*ran.borrow());
    }

    #[test]
    fn test_foreign_view_tracks_latest_value() {
        let mut context = ExecutionContext::new();
        assert!(context.foreign_view("X").is_none());

        context.definitions_mut().set("X", "first");
        assert_eq!(context.foreign_view("X").unwrap().to_str().unwrap(), "first");

        context.definitions_mut().set("X", "second");
        assert_eq!(context.foreign_view("X").unwrap().to_str().unwrap(), "second");
    }
}
