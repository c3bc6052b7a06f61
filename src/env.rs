//! Build environment shared by all builders of a run.

use crate::command::{self, CommandOutput};
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::layout::Layout;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Default packaging script template, written to the working root on first run
pub const DEFAULT_TEMPLATE: &str = include_str!("../templates/setup.py.in");

/// Options chosen on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Parallel make jobs, plain `make` when unset
    pub jobs: Option<u32>,
    pub login: Option<String>,
    pub passwd: Option<String>,
    /// Upload to the release channel instead of the testing one
    pub release: bool,
    /// Where finished eggs are copied, no copy when unset
    pub dest_egg_dir: Option<PathBuf>,
    /// Python interpreter running setup.py
    pub python: String,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            jobs: None,
            login: None,
            passwd: None,
            release: false,
            dest_egg_dir: None,
            python: "python3".to_string(),
        }
    }
}

impl BuildOptions {
    /// Upload channel for the current mode
    pub fn channel(&self) -> &'static str {
        if self.release { "openalea" } else { "vplants" }
    }

    /// Both credentials, when given and non-empty
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.login.as_deref(), self.passwd.as_deref()) {
            (Some(login), Some(passwd)) if !login.is_empty() && !passwd.is_empty() => {
                Some((login, passwd))
            }
            _ => None,
        }
    }
}

/// Directories prepended to PATH and PYTHONPATH for every subprocess.
///
/// Later entries are prepended in front of earlier ones, so the most recently
/// installed dependency wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPaths {
    path: Vec<PathBuf>,
    python_path: Vec<PathBuf>,
}

impl SearchPaths {
    pub fn prepend_path(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.path.contains(&dir) {
            self.path.insert(0, dir);
        }
    }

    pub fn prepend_python_path(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.python_path.contains(&dir) {
            self.python_path.insert(0, dir);
        }
    }

    pub fn path(&self) -> &[PathBuf] {
        &self.path
    }

    pub fn python_path(&self) -> &[PathBuf] {
        &self.python_path
    }

    /// Set PATH and PYTHONPATH of `cmd` to the overlay followed by the
    /// inherited values
    pub fn apply(&self, cmd: &mut Command) {
        if let Some(value) = overlay("PATH", &self.path) {
            cmd.env("PATH", value);
        }
        if let Some(value) = overlay("PYTHONPATH", &self.python_path) {
            cmd.env("PYTHONPATH", value);
        }
    }
}

fn overlay(var: &str, dirs: &[PathBuf]) -> Option<OsString> {
    if dirs.is_empty() {
        return None;
    }
    let inherited = std::env::var_os(var);
    let all = dirs
        .iter()
        .cloned()
        .chain(inherited.iter().flat_map(std::env::split_paths));
    match std::env::join_paths(all) {
        Ok(joined) => Some(joined),
        Err(e) => {
            tracing::warn!("Cannot extend {}: {}", var, e);
            None
        }
    }
}

/// Everything a builder needs from the outside world
pub struct BuildEnv {
    pub layout: Layout,
    pub options: BuildOptions,
    pub search_paths: SearchPaths,
    pub fetcher: Box<dyn Fetcher>,
}

impl BuildEnv {
    pub fn new(layout: Layout, options: BuildOptions, fetcher: Box<dyn Fetcher>) -> Self {
        Self {
            layout,
            options,
            search_paths: SearchPaths::default(),
            fetcher,
        }
    }

    /// Create the working tree and the default template if absent
    pub fn prepare(&self) -> Result<()> {
        self.layout.create_dirs()?;
        let template = self.layout.template_file();
        if !template.exists() {
            fs::write(&template, DEFAULT_TEMPLATE)?;
            info!("Wrote default packaging template {}", template.display());
        } else {
            debug!("Using packaging template {}", template.display());
        }
        Ok(())
    }

    /// Run a shell command line with the current search paths
    pub fn sh(&self, line: &str) -> Result<CommandOutput> {
        command::run_shell(line, &self.search_paths)
    }

    /// Run the configured Python interpreter with `args`
    pub fn python<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        command::run_program(&self.options.python, args, &self.search_paths)
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BuildError;
    use tempfile::TempDir;

    struct NoNetwork;

    impl Fetcher for NoNetwork {
        fn remote_size(&self, _url: &str) -> Result<Option<u64>> {
            Err(BuildError::download("offline"))
        }

        fn fetch(&self, _url: &str, _dest: &Path) -> Result<u64> {
            Err(BuildError::download("offline"))
        }
    }

    #[test]
    fn test_channel_follows_release_flag() {
        let mut options = BuildOptions::default();
        assert_eq!(options.channel(), "vplants");
        options.release = true;
        assert_eq!(options.channel(), "openalea");
    }

    #[test]
    fn test_credentials_need_both_parts() {
        let mut options = BuildOptions::default();
        assert!(options.credentials().is_none());
        options.login = Some("alice".to_string());
        assert!(options.credentials().is_none());
        options.passwd = Some(String::new());
        assert!(options.credentials().is_none());
        options.passwd = Some("secret".to_string());
        assert_eq!(options.credentials(), Some(("alice", "secret")));
    }

    #[test]
    fn test_prepend_order_and_dedup() {
        let mut paths = SearchPaths::default();
        paths.prepend_path("/w/install/qt4/bin");
        paths.prepend_path("/w/install/sip/bin");
        paths.prepend_path("/w/install/qt4/bin");
        assert_eq!(
            paths.path(),
            &[
                PathBuf::from("/w/install/sip/bin"),
                PathBuf::from("/w/install/qt4/bin")
            ]
        );
    }

    #[test]
    fn test_prepare_writes_template_once() {
        let dir = TempDir::new().unwrap();
        let env = BuildEnv::new(
            Layout::new(dir.path()),
            BuildOptions::default(),
            Box::new(NoNetwork),
        );
        env.prepare().unwrap();
        let template = env.layout.template_file();
        assert!(fs::read_to_string(&template).unwrap().contains("$NAME"));

        fs::write(&template, "custom $NAME").unwrap();
        env.prepare().unwrap();
        assert_eq!(fs::read_to_string(&template).unwrap(), "custom $NAME");
    }
}
