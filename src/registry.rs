//! Builder Registry
//!
//! The ordered list of units a run processes. Registration order is build
//! order: a unit may rely on the install trees and search paths of every
//! unit registered before it. Builders are created lazily, when the pipeline
//! reaches their unit.

use crate::builder::{EggBuilder, ProjectBuilder, UnitBuilder, UnitKind};
use crate::env::BuildEnv;
use crate::error::{BuildError, Result};
use crate::manifest::{egg_key, Manifest};

/// Creates the builder of one unit for a given environment
pub type BuilderFactory = Box<dyn Fn(&BuildEnv) -> Result<Box<dyn UnitBuilder>>>;

/// One registered unit
pub struct RegisteredUnit {
    key: String,
    kind: UnitKind,
    factory: BuilderFactory,
}

impl RegisteredUnit {
    /// State and flag key
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> UnitKind {
        self.kind
    }

    /// Instantiate the builder
    pub fn build(&self, env: &BuildEnv) -> Result<Box<dyn UnitBuilder>> {
        (self.factory)(env)
    }
}

impl std::fmt::Debug for RegisteredUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredUnit")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Ordered, explicitly populated set of units
#[derive(Debug, Default)]
pub struct BuilderRegistry {
    units: Vec<RegisteredUnit>,
}

impl BuilderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit. Keys must be unique.
    pub fn register<F>(&mut self, key: impl Into<String>, kind: UnitKind, factory: F) -> Result<()>
    where
        F: Fn(&BuildEnv) -> Result<Box<dyn UnitBuilder>> + 'static,
    {
        let key = key.into();
        if self.contains(&key) {
            return Err(BuildError::config(format!(
                "Unit {:?} is registered twice",
                key
            )));
        }
        self.units.push(RegisteredUnit {
            key,
            kind,
            factory: Box::new(factory),
        });
        Ok(())
    }

    /// Register every project, then every egg, of a validated manifest
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        let mut registry = Self::new();

        for spec in &manifest.projects {
            let spec = spec.clone();
            let shared = match &spec.shares_source_with {
                Some(owner) => Some(manifest.project(owner).cloned().ok_or_else(|| {
                    BuildError::UnknownUnit(owner.clone())
                })?),
                None => None,
            };
            registry.register(spec.name.clone(), UnitKind::Project, move |env| {
                Ok(Box::new(ProjectBuilder::new(&spec, shared.as_ref(), &env.layout)))
            })?;
        }

        for spec in &manifest.eggs {
            let spec = spec.clone();
            registry.register(egg_key(&spec.name), UnitKind::Egg, move |env| {
                Ok(Box::new(EggBuilder::new(&spec, &env.layout)))
            })?;
        }

        Ok(registry)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get(&self, key: &str) -> Option<&RegisteredUnit> {
        self.units.iter().find(|unit| unit.key == key)
    }

    /// Keys in registration order
    pub fn keys(&self) -> Vec<String> {
        self.units.iter().map(|unit| unit.key.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredUnit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}
