//! Search path expansion and module file lookup

use std::fs;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Registry keys are never queried; each token collapses to this path.
const REGISTRY_PLACEHOLDER: &str = "/registry";

static REGISTRY_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(HKEY[^\]]*)\]").unwrap_or_else(|e| panic!("registry token pattern: {e}"))
});

/// Replace every `[HKEY_...]` token in `entry` with a fixed placeholder.
#[must_use]
pub fn expand_registry_values(entry: &str) -> String {
    REGISTRY_TOKEN
        .replace_all(entry, REGISTRY_PLACEHOLDER)
        .into_owned()
}

/// Expand directory wildcards in `pattern`, appending matches to `out`.
///
/// The first `/*` splits the pattern. Each subdirectory of the leading part
/// is joined with the remainder and expanded again. A pattern without `/*`
/// is appended unchanged, whether or not it exists.
pub fn glob_dirs(pattern: &str, out: &mut Vec<PathBuf>) {
    let Some(pos) = pattern.find("/*") else {
        out.push(PathBuf::from(pattern));
        return;
    };

    let start = &pattern[..pos];
    let rest = &pattern[pos + 2..];

    let Ok(entries) = fs::read_dir(start) else {
        debug!(directory = start, "wildcard base is not readable");
        return;
    };

    let mut names: Vec<String> = entries
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    for name in names {
        glob_dirs(&format!("{start}/{name}{rest}"), out);
    }
}

/// Ordered list of directories searched for a module file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    /// Build a search path from raw script arguments, expanding registry
    /// tokens and directory wildcards in order.
    #[must_use]
    pub fn expand<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut dirs = Vec::new();
        for pattern in patterns {
            let expanded = expand_registry_values(pattern.as_ref());
            glob_dirs(&expanded, &mut dirs);
        }
        Self { dirs }
    }

    pub fn push(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push(dir.into());
    }

    /// Append the directories listed in `PATH`.
    pub fn extend_from_system_path(&mut self) {
        if let Some(path) = std::env::var_os("PATH") {
            self.dirs.extend(std::env::split_paths(&path));
        }
    }

    #[must_use]
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Absolute path of the first regular file named `file_name`.
    #[must_use]
    pub fn find(&self, file_name: &str) -> Option<PathBuf> {
        self.dirs.iter().find_map(|dir| {
            let candidate = dir.join(file_name);
            debug!(candidate = %candidate.display(), "probing for module");
            candidate.is_file().then(|| absolute(&candidate))
        })
    }
}

/// Absolute form of `path` with `.` dropped and each `..` folded into the
/// component before it. Purely lexical: symlinks are not resolved.
fn absolute(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut collapsed = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match collapsed.components().next_back() {
                Some(Component::Normal(_)) => {
                    collapsed.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => collapsed.push(component),
            },
            other => collapsed.push(other),
        }
    }
    collapsed
}
