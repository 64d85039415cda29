//! Native command plugins.
//!
//! - [`abi`]: the table layout and entry-point signatures a library exports
//! - [`loader`]: opening libraries and resolving `<Name>Init`
//! - [`state`]: ownership of a populated table and its error buffer
//! - [`proxy`]: the shareable command handle the host dispatches to
//! - [`fault`]: crash diagnostics around each foreign call
//! - [`host_api`]: callbacks offered to plugins
pub mod abi;
pub mod fault;
pub mod host_api;
pub mod loader;
pub mod proxy;
pub mod state;
