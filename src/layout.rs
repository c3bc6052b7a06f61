//! Working directory layout.
//!
//! ```text
//! <root>/
//!   dl/                 downloaded archives
//!   src/<unit>/         unpacked sources
//!   install/<unit>/     install prefix (bin/ lib/ include/ ...)
//!   egg/<unit>/         packaging staging dir with the generated setup.py
//!   setup.py.in         packaging script template
//!   proc_flags.json     completion record
//! ```

use crate::error::Result;
use crate::state::StateStore;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the packaging script template inside the working root
pub const TEMPLATE_FILE: &str = "setup.py.in";

/// Directory layout under one working root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Layout rooted at `<base>/<os>_<arch>`, so builds for different
    /// platforms can share a base directory.
    pub fn for_platform(base: &Path) -> Self {
        Self::new(base.join(platform_tag()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dl_dir(&self) -> PathBuf {
        self.root.join("dl")
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    pub fn install_dir(&self) -> PathBuf {
        self.root.join("install")
    }

    pub fn egg_dir(&self) -> PathBuf {
        self.root.join("egg")
    }

    pub fn state_file(&self) -> PathBuf {
        self.root.join(StateStore::FILE_NAME)
    }

    pub fn template_file(&self) -> PathBuf {
        self.root.join(TEMPLATE_FILE)
    }

    /// Source directory of a unit before any archive sub-directory fix
    pub fn unit_source_dir(&self, name: &str) -> PathBuf {
        self.src_dir().join(name)
    }

    pub fn unit_install_dir(&self, name: &str) -> PathBuf {
        self.install_dir().join(name)
    }

    pub fn unit_egg_dir(&self, name: &str) -> PathBuf {
        self.egg_dir().join(name)
    }

    pub fn archive_path(&self, download_name: &str) -> PathBuf {
        self.dl_dir().join(download_name)
    }

    /// Create the root and its fixed sub-directories
    pub fn create_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.dl_dir(),
            self.src_dir(),
            self.install_dir(),
            self.egg_dir(),
        ] {
            fs::create_dir_all(&dir)?;
            debug!("Ensured directory {}", dir.display());
        }
        Ok(())
    }
}

/// `<os>_<arch>` of the running build, e.g. `linux_x86_64`
pub fn platform_tag() -> String {
    format!("{}_{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Last path segment of a URL, without query or fragment
pub fn download_name_from_url(url: &str) -> Option<String> {
    let trimmed = url.split(['?', '#']).next().unwrap_or(url);
    trimmed
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .map(str::to_string)
}
