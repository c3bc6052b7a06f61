//! Egg packaging builder.

use super::{Unit, UnitBuilder};
use crate::env::BuildEnv;
use crate::error::{BuildError, Result};
use crate::layout::Layout;
use crate::manifest::EggSpec;
use crate::template::Substitutions;
use chrono::Datelike;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Packaging metadata of an egg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EggInfo {
    pub version: String,
    pub description: String,
    pub authors: String,
    pub homepage: String,
    pub license: String,
    pub url: String,
    pub install_requires: Vec<String>,
    /// Keep the `-pyX.Y` tag in the egg file name
    pub py_dependent: bool,
    /// Keep the platform tag in the egg file name
    pub arch_dependent: bool,
}

impl Default for EggInfo {
    fn default() -> Self {
        Self::from(&EggSpec::default())
    }
}

impl From<&EggSpec> for EggInfo {
    fn from(spec: &EggSpec) -> Self {
        Self {
            version: spec.version.clone(),
            description: spec.description.clone(),
            authors: spec.authors.clone(),
            homepage: spec.homepage.clone(),
            license: spec.license.clone(),
            url: spec.url.clone(),
            install_requires: spec.install_requires.clone(),
            py_dependent: spec.py_dependent,
            arch_dependent: spec.arch_dependent,
        }
    }
}

/// Builder for one `eggs[]` manifest entry
#[derive(Debug, Clone)]
pub struct EggBuilder {
    unit: Unit,
    spec: EggSpec,
}

impl EggBuilder {
    pub fn new(spec: &EggSpec, layout: &Layout) -> Self {
        let mut unit = Unit::egg(&spec.name, spec.project.as_deref(), layout);
        unit.supported_steps = spec.steps.clone();
        Self {
            unit,
            spec: spec.clone(),
        }
    }
}

impl UnitBuilder for EggBuilder {
    fn unit(&self) -> &Unit {
        &self.unit
    }

    fn unit_mut(&mut self) -> &mut Unit {
        &mut self.unit
    }

    fn egg_info(&self) -> EggInfo {
        EggInfo::from(&self.spec)
    }

    fn script_substitutions(&self, _env: &BuildEnv) -> Result<Substitutions> {
        let mut subs = Substitutions::new();
        for (key, value) in &self.spec.substitutions {
            subs.insert_literal(key, value);
        }
        Ok(subs)
    }
}

/// Template values every packaging script gets before unit overrides
pub(crate) fn default_substitutions(unit: &Unit, info: &EggInfo) -> Substitutions {
    let mut subs = Substitutions::new();
    let mut set = |key: &str, value: Value| subs.insert_literal(key, &value);

    set("NAME", json!(unit.name));
    set("VERSION", json!(info.version));
    set("THIS_YEAR", json!(chrono::Local::now().year()));
    set("SETUP_AUTHORS", json!("Openalea Team"));
    set("CODE_AUTHOR", json!(info.authors));
    set("DESCRIPTION", json!(info.description));
    set("HOMEPAGE", json!(info.homepage));
    set("URL", json!(info.url));
    set("LICENSE", json!(info.license));

    set("ZIP_SAFE", json!(false));
    set("PYTHON_MODS", Value::Null);
    set("PACKAGES", Value::Null);
    set("PACKAGE_DIRS", Value::Null);
    set("PACKAGE_DATA", json!({}));
    set("DATA_FILES", Value::Null);

    set("INSTALL_REQUIRES", json!(info.install_requires));

    set("LIB_DIRS", install_subdir(unit, "lib"));
    set("INC_DIRS", install_subdir(unit, "include"));
    set("BIN_DIRS", install_subdir(unit, "bin"));
    subs
}

fn install_subdir(unit: &Unit, name: &str) -> Value {
    let dir = unit.install_dir.join(name);
    if dir.is_dir() {
        json!({ name: dir.to_string_lossy() })
    } else {
        Value::Null
    }
}

fn built_eggs(egg_dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/dist/*.egg",
        glob::Pattern::escape(&egg_dir.to_string_lossy())
    );
    let eggs = glob::glob(&pattern)
        .map_err(|e| BuildError::general(format!("Bad egg pattern {}: {}", pattern, e)))?
        .filter_map(|entry| entry.ok())
        .collect();
    Ok(eggs)
}

/// Remove the eggs a previous `bdist_egg` left in `dist/`
pub(crate) fn clear_built_eggs(egg_dir: &Path) -> Result<()> {
    for old in built_eggs(egg_dir)? {
        debug!("Removing stale egg {}", old.display());
        fs::remove_file(&old)?;
    }
    Ok(())
}

/// The only `dist/*.egg` under `egg_dir`
pub(crate) fn find_single_egg(egg_dir: &Path, name: &str) -> Result<PathBuf> {
    let eggs = built_eggs(egg_dir)?;
    match eggs.as_slice() {
        [] => Err(BuildError::general(format!("No egg found for {}", name))),
        [single] => Ok(single.clone()),
        many => {
            let listing: Vec<String> = many.iter().map(|p| p.display().to_string()).collect();
            Err(BuildError::general(format!(
                "Found multiple eggs for {}: {}",
                name,
                listing.join(", ")
            )))
        }
    }
}

fn is_python_tag(part: &str) -> bool {
    part.strip_prefix("py").is_some_and(|version| {
        version.starts_with(|c: char| c.is_ascii_digit())
            && version.chars().all(|c| c.is_ascii_digit() || c == '.')
    })
}

/// Drop the python and/or platform tags from an egg file name.
///
/// `qt4-4.7.4-py2.7-linux-x86_64.egg` keeps `-py2.7` only when
/// `py_dependent` and `-linux-x86_64` only when `arch_dependent`.
pub fn normalize_egg_name(file_name: &str, py_dependent: bool, arch_dependent: bool) -> String {
    let Some(stem) = file_name.strip_suffix(".egg") else {
        return file_name.to_string();
    };
    let parts: Vec<&str> = stem.split('-').collect();
    let Some(py) = parts.iter().position(|part| is_python_tag(part)) else {
        return file_name.to_string();
    };

    let mut kept: Vec<&str> = parts[..py].to_vec();
    if py_dependent {
        kept.push(parts[py]);
    }
    if arch_dependent {
        kept.extend_from_slice(&parts[py + 1..]);
    }
    format!("{}.egg", kept.join("-"))
}
