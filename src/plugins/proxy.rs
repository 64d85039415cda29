use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use super::state::{Documentation, LoadedCommandState};
use crate::error::{LoadCommandError, Result};
use crate::host::{Command, ExecutionContext};

/// Host-facing handle to a loaded native command.
///
/// Clones share one [`LoadedCommandState`]; the native teardown runs when
/// the last clone (or pending deferred pass) lets go of it.
#[derive(Clone)]
pub struct LoadedCommand {
    state: Rc<RefCell<LoadedCommandState>>,
}

impl LoadedCommand {
    #[must_use]
    pub fn new(state: LoadedCommandState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Whether `other` wraps the very same native state.
    #[must_use]
    pub fn shares_state_with(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Number of live holders of the native state.
    #[must_use]
    pub fn holders(&self) -> usize {
        Rc::strong_count(&self.state)
    }

    #[must_use]
    pub fn display_name(&self) -> String {
        self.state.borrow().display_name()
    }

}

impl Command for LoadedCommand {
    fn clone_command(&self) -> Box<dyn Command> {
        Box::new(self.clone())
    }

    fn documentation(&self) -> Option<Documentation> {
        Some(self.state.borrow().documentation())
    }

    fn initial_pass(&mut self, args: &[String], context: &mut ExecutionContext) -> Result<()> {
        let succeeded = self.state.borrow_mut().run_immediate_pass(args, context)?;

        if succeeded {
            if self.state.borrow().has_deferred_pass() {
                let state = Rc::clone(&self.state);
                context.schedule_deferred(Box::new(move |ctx: &mut ExecutionContext| {
                    state.borrow_mut().run_deferred_pass(ctx);
                }));
                debug!(command = %self.display_name(), "deferred pass scheduled");
            }
            return Ok(());
        }

        let state = self.state.borrow();
        Err(LoadCommandError::PluginReported {
            command: state.display_name(),
            message: state.last_error().unwrap_or_default(),
        })
    }
}
