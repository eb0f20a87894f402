//! Launch description and executable resolution for supervised processes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// What to run for one supervised tool server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LaunchSpec {
    /// Unique process name, used in logs and health output.
    pub name: String,
    /// Executable: an absolute path, or a bare name looked up in the tools
    /// directory and then on `PATH`.
    pub command: String,
    /// Command-line arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables layered over the parent environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Loopback port the tool server listens on, exported as `PORT`.
    #[serde(default)]
    pub port: Option<u16>,
}

impl LaunchSpec {
    /// Minimal spec with no arguments, environment or port.
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            port: None,
        }
    }

    /// Replace the argument list.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Add one environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Environment overlay passed to the child, including `PORT`.
    pub fn merged_env(&self) -> BTreeMap<String, String> {
        let mut env = self.env.clone();
        if let Some(port) = self.port {
            env.entry("PORT".to_owned())
                .or_insert_with(|| port.to_string());
        }
        env
    }
}

/// Resolve `command` to an executable path.
///
/// Absolute paths are returned unchanged without checking the filesystem,
/// so a missing absolute binary surfaces as a spawn error. Bare names are
/// looked up in `tools_dir` first, then in every `PATH` entry. Returns
/// `None` when nothing matches.
pub fn resolve_executable(command: &str, tools_dir: &Path) -> Option<PathBuf> {
    let path = Path::new(command);
    if path.is_absolute() {
        return Some(path.to_path_buf());
    }

    let local = tools_dir.join(command);
    if local.is_file() {
        return Some(local);
    }

    let search_path = std::env::var_os("PATH")?;
    std::env::split_paths(&search_path)
        .map(|dir| dir.join(command))
        .find(|candidate| candidate.is_file())
}
