//! loadcmd - load natively compiled commands into a script host at runtime
//!
//! A command library `<prefix>cm<Name><suffix>` is found on a search path,
//! opened, and asked to fill in a native function table through its
//! `<Name>Init` entry point. The table is wrapped in a command the host can
//! clone and dispatch to, with an immediate pass per invocation and an
//! optional deferred pass at the end of the scope.
//!
//! # Modules
//!
//! - [`directive`]: the `load_command` directive
//! - [`plugins`]: native ABI, loader, loaded state, command proxy, fault boundary
//! - [`host`]: definitions, command registry and execution context
//! - [`config`]: configuration management and serialization
//! - [`error`]: error taxonomy
//!
//! # Threading
//!
//! Loaded commands must be invoked from a single thread. The fault boundary
//! records the running command in process-global state, and shared native
//! state is reference counted without locking.

pub mod config;
pub mod directive;
pub mod error;
pub mod host;
pub mod plugins;

pub use directive::LoadCommandDirective;
pub use error::LoadCommandError;
pub use host::{Command, ExecutionContext};
pub use plugins::proxy::LoadedCommand;
