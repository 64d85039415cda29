//! Error types for loading and running native commands.

use std::path::PathBuf;

/// Errors surfaced to the host by the load directive and by loaded commands.
///
/// Faults trapped during a foreign call are not represented here; the fault
/// boundary reports them on stderr.
#[derive(Debug, thiserror::Error)]
pub enum LoadCommandError {
    /// The module file was not found on the expanded search path.
    #[error("Attempt to load command failed from file \"{module}\"")]
    Lookup { module: String },

    /// The platform loader refused to open the module file.
    #[error(
        "Attempt to load the library {} failed.{}",
        .path.display(),
        additional_info(.diagnostic)
    )]
    Load {
        path: PathBuf,
        diagnostic: Option<String>,
    },

    /// Neither `<Name>Init` nor `_<Name>Init` is exported by the module.
    #[error("Attempt to load command failed. No init function found.")]
    SymbolResolution { command: String, path: PathBuf },

    /// The foreign immediate pass returned failure; the message is whatever
    /// the plugin left in its error buffer.
    #[error("{message}")]
    PluginReported { command: String, message: String },

    #[error("required definition `{0}` is not set")]
    MissingDefinition(String),

    #[error("argument {index} for `{command}` contains an interior NUL byte")]
    InvalidArgument { command: String, index: usize },

    #[error("unknown command `{0}`")]
    UnknownCommand(String),
}

fn additional_info(diagnostic: &Option<String>) -> String {
    match diagnostic {
        Some(text) => format!(" Additional error info is:\n{text}"),
        None => String::new(),
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, LoadCommandError>;
