//! Unit manifest.
//!
//! The set of dependencies to build and eggs to package is data, not code:
//! a JSON file listing projects (in build order) and eggs (in packaging
//! order). Each entry becomes one registered builder.
//!
//! ```json
//! {
//!   "projects": [
//!     { "name": "qhull", "url": "http://example.org/qhull-2010.1.tgz",
//!       "archive_subdir": "qhull-*", "build": "make -C src -j ${JOBS}" }
//!   ],
//!   "eggs": [
//!     { "name": "qhull", "project": "qhull", "version": "2010.1" }
//!   ]
//! }
//! ```

use crate::layout::download_name_from_url;
use crate::steps::StepRegistry;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// Long option names of the command line that unit flags must not shadow
pub const RESERVED_NAMES: &[&str] = &[
    "wdr",
    "manifest",
    "login",
    "passwd",
    "release",
    "jobs",
    "python",
    "dest-egg-dir",
    "only",
    "dry-run",
    "help",
    "version",
];

/// A literal text replacement applied to one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchSpec {
    /// Path relative to the unit's source directory
    pub file: String,
    pub find: String,
    pub replace: String,
}

/// A source dependency built from an archive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectSpec {
    pub name: String,
    /// Archive location; absent when sources come from elsewhere
    pub url: Option<String>,
    /// File name under dl/, defaults to the last URL segment
    pub download_name: Option<String>,
    /// Reuse the unpacked sources of an earlier project
    pub shares_source_with: Option<String>,
    /// Glob locating the real source root inside the unpacked tree
    pub archive_subdir: Option<String>,
    /// Supported step codes, all project steps when absent
    pub steps: Option<String>,
    pub patches: Vec<PatchSpec>,
    pub configure: Option<String>,
    pub build: Option<String>,
    pub install: Option<String>,
    /// Prepended to PATH, relative entries resolve against the install dir
    pub extra_paths: Vec<String>,
    /// Prepended to PYTHONPATH, relative entries resolve against the install dir
    pub extra_python_paths: Vec<String>,
}

impl ProjectSpec {
    /// Archive file name for this project, if it downloads one
    pub fn archive_name(&self) -> Option<String> {
        self.download_name
            .clone()
            .or_else(|| self.url.as_deref().and_then(download_name_from_url))
    }
}

/// A packaging target producing one egg
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EggSpec {
    pub name: String,
    /// Project whose install tree is packaged
    pub project: Option<String>,
    pub version: String,
    pub description: String,
    pub authors: String,
    pub homepage: String,
    pub license: String,
    pub url: String,
    pub install_requires: Vec<String>,
    pub py_dependent: bool,
    pub arch_dependent: bool,
    /// Supported step codes, all egg steps when absent
    pub steps: Option<String>,
    /// Template values overriding the defaults, rendered as Python literals
    pub substitutions: BTreeMap<String, serde_json::Value>,
}

impl Default for EggSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            project: None,
            version: "1.0".to_string(),
            description: String::new(),
            authors: "Unknown".to_string(),
            homepage: String::new(),
            license: "Cecill-C".to_string(),
            url: String::new(),
            install_requires: Vec::new(),
            py_dependent: true,
            arch_dependent: true,
            steps: None,
            substitutions: BTreeMap::new(),
        }
    }
}

/// The full manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Manifest {
    pub projects: Vec<ProjectSpec>,
    pub eggs: Vec<EggSpec>,
}

/// State and flag key of an egg
pub fn egg_key(name: &str) -> String {
    format!("{}_egg", name)
}

impl Manifest {
    /// Load and validate a manifest from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read manifest from {:?}", path.as_ref()))?;

        let manifest: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest JSON {:?}", path.as_ref()))?;

        manifest
            .validate()
            .with_context(|| format!("Invalid manifest {:?}", path.as_ref()))?;
        Ok(manifest)
    }

    /// Unit keys in pipeline order: projects, then eggs as `<name>_egg`
    pub fn unit_keys(&self) -> Vec<String> {
        self.projects
            .iter()
            .map(|p| p.name.clone())
            .chain(self.eggs.iter().map(|e| egg_key(&e.name)))
            .collect()
    }

    pub fn project(&self, name: &str) -> Option<&ProjectSpec> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Validate the manifest
    pub fn validate(&self) -> Result<()> {
        let mut keys = HashSet::new();
        let mut earlier_projects = HashSet::new();

        for project in &self.projects {
            validate_name(&project.name)?;
            if !keys.insert(project.name.clone()) {
                anyhow::bail!("Duplicate unit name {:?}", project.name);
            }
            if let Some(steps) = &project.steps {
                if let Some(bad) = StepRegistry::PROJECT.find_unknown(steps) {
                    anyhow::bail!(
                        "Project {:?}: unknown step '{}' (valid: {})",
                        project.name,
                        bad,
                        StepRegistry::PROJECT.codes()
                    );
                }
            }
            if let Some(other) = &project.shares_source_with {
                if project.url.is_some() {
                    anyhow::bail!(
                        "Project {:?}: url and shares_source_with are exclusive",
                        project.name
                    );
                }
                if !earlier_projects.contains(other.as_str()) {
                    anyhow::bail!(
                        "Project {:?}: shares_source_with {:?} must name an earlier project",
                        project.name,
                        other
                    );
                }
            }
            if project.url.is_some() && project.archive_name().is_none() {
                anyhow::bail!(
                    "Project {:?}: cannot derive an archive name from the url, set download_name",
                    project.name
                );
            }
            for patch in &project.patches {
                if patch.file.trim().is_empty() || patch.find.is_empty() {
                    anyhow::bail!(
                        "Project {:?}: patches need a file and a non-empty search text",
                        project.name
                    );
                }
            }
            earlier_projects.insert(project.name.as_str());
        }

        for egg in &self.eggs {
            validate_name(&egg.name)?;
            let key = egg_key(&egg.name);
            if !keys.insert(key.clone()) {
                anyhow::bail!("Duplicate unit key {:?}", key);
            }
            if let Some(steps) = &egg.steps {
                if let Some(bad) = StepRegistry::EGG.find_unknown(steps) {
                    anyhow::bail!(
                        "Egg {:?}: unknown step '{}' (valid: {})",
                        egg.name,
                        bad,
                        StepRegistry::EGG.codes()
                    );
                }
            }
            if let Some(project) = &egg.project {
                if self.project(project).is_none() {
                    anyhow::bail!("Egg {:?}: unknown project {:?}", egg.name, project);
                }
            }
            if egg.version.trim().is_empty() {
                anyhow::bail!("Egg {:?}: version must not be empty", egg.name);
            }
        }

        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("Unit names must not be empty");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        anyhow::bail!(
            "Unit name {:?} can only contain letters, numbers, '_' and '-'",
            name
        );
    }
    if name.starts_with('-') {
        anyhow::bail!("Unit name {:?} must not start with '-'", name);
    }
    if RESERVED_NAMES.contains(&name) {
        anyhow::bail!("Unit name {:?} collides with a command line option", name);
    }
    Ok(())
}
