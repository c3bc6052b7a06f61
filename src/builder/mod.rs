//! Unit Builders
//!
//! A builder carries one unit (a source project or an egg) through the steps
//! of its registry. Every step action has a default implementation here;
//! concrete builders override what differs for their unit.
//!
//! Actions return `Ok(StepOutcome)` for the three expected results and `Err`
//! only for hard errors, which the pipeline treats as a failed step.

pub mod egg;
pub mod project;

pub use egg::{EggBuilder, EggInfo};
pub use project::ProjectBuilder;

use crate::archive;
use crate::env::BuildEnv;
use crate::error::{BuildError, Result};
use crate::fetch::needs_fetch;
use crate::layout::Layout;
use crate::manifest::egg_key;
use crate::outcome::StepOutcome;
use crate::steps::{StepAction, StepCode, StepRegistry};
use crate::template::{self, Substitutions};
use crate::workdir::WorkingDir;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Kind of a unit, selecting its step registry and key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKind {
    Project,
    Egg,
}

impl UnitKind {
    pub const fn registry(self) -> StepRegistry {
        match self {
            Self::Project => StepRegistry::PROJECT,
            Self::Egg => StepRegistry::EGG,
        }
    }

    /// State and flag key for a unit of this kind called `name`
    pub fn key(self, name: &str) -> String {
        match self {
            Self::Project => name.to_string(),
            Self::Egg => egg_key(name),
        }
    }
}

/// One buildable thing and the paths it works in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub name: String,
    pub kind: UnitKind,
    /// Archive location, `None` when sources come from elsewhere
    pub url: Option<String>,
    /// Local archive under dl/
    pub archive: Option<PathBuf>,
    /// Source root; relocated once per run by `fix_source_dir`
    pub source_dir: PathBuf,
    pub install_dir: PathBuf,
    pub egg_dir: PathBuf,
    /// Glob locating the real source root inside the unpacked tree
    pub archive_subdir: Option<String>,
    /// Subset of registry codes this unit supports, all when `None`
    pub supported_steps: Option<String>,
    /// Sources belong to another unit
    pub shared_source: bool,
    source_dir_fixed: bool,
}

impl Unit {
    /// A project with the standard paths of `layout`
    pub fn project(name: &str, layout: &Layout) -> Self {
        Self {
            name: name.to_string(),
            kind: UnitKind::Project,
            url: None,
            archive: None,
            source_dir: layout.unit_source_dir(name),
            install_dir: layout.unit_install_dir(name),
            egg_dir: layout.unit_egg_dir(name),
            archive_subdir: None,
            supported_steps: None,
            shared_source: false,
            source_dir_fixed: false,
        }
    }

    /// An egg packaging the install tree of `project` (itself when `None`)
    pub fn egg(name: &str, project: Option<&str>, layout: &Layout) -> Self {
        let source = project.unwrap_or(name);
        Self {
            kind: UnitKind::Egg,
            source_dir: layout.unit_source_dir(source),
            install_dir: layout.unit_install_dir(source),
            ..Self::project(name, layout)
        }
    }

    /// Set the download location; the archive lands in dl/ as `download_name`
    pub fn with_url(mut self, url: &str, download_name: &str, layout: &Layout) -> Self {
        self.url = Some(url.to_string());
        self.archive = Some(layout.archive_path(download_name));
        self
    }

    pub fn key(&self) -> String {
        self.kind.key(&self.name)
    }

    pub fn supports(&self, code: StepCode) -> bool {
        self.supported_steps
            .as_deref()
            .is_none_or(|codes| codes.contains(code.as_char()))
    }

    /// Resolve `entry` against the install dir unless it is absolute
    pub fn install_relative(&self, entry: &str) -> PathBuf {
        let path = Path::new(entry);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.install_dir.join(path)
        }
    }
}

/// Step actions for one unit.
pub trait UnitBuilder {
    fn unit(&self) -> &Unit;

    fn unit_mut(&mut self) -> &mut Unit;

    /// Registry whose steps this builder runs
    fn registry(&self) -> StepRegistry {
        self.unit().kind.registry()
    }

    fn supports(&self, code: StepCode) -> bool {
        self.unit().supports(code)
    }

    fn download(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        let unit = self.unit();
        let (Some(url), Some(archive)) = (unit.url.as_deref(), unit.archive.as_deref()) else {
            debug!("{}: nothing to download", unit.name);
            return Ok(StepOutcome::Done);
        };

        let local = fs::metadata(archive).ok().map(|m| m.len());
        let remote = match env.fetcher.remote_size(url) {
            Ok(size) => size,
            Err(e) => {
                warn!("{}: cannot query remote size: {}", unit.name, e);
                None
            }
        };

        if !needs_fetch(local, remote) {
            info!("{}: {} is up to date", unit.name, archive.display());
            return Ok(StepOutcome::Done);
        }

        match env.fetcher.fetch(url, archive) {
            Ok(_) => Ok(StepOutcome::Done),
            Err(e) => {
                warn!("{}: download failed, will retry next run: {}", unit.name, e);
                Ok(StepOutcome::deferred(e.to_string()))
            }
        }
    }

    fn unpack(&mut self, _env: &mut BuildEnv) -> Result<StepOutcome> {
        let unit = self.unit();
        let Some(local) = unit.archive.as_deref() else {
            return Ok(StepOutcome::Done);
        };
        if unit.source_dir.exists() {
            info!("{}: {} already unpacked", unit.name, unit.source_dir.display());
            return Ok(StepOutcome::Done);
        }
        if !local.is_file() {
            return Ok(StepOutcome::failed(format!(
                "archive {} is missing",
                local.display()
            )));
        }
        if let Some(parent) = unit.source_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        archive::unpack(local, &unit.source_dir)?;
        Ok(StepOutcome::Done)
    }

    fn fix_source_dir(&mut self, _env: &mut BuildEnv) -> Result<StepOutcome> {
        let unit = self.unit_mut();
        if unit.source_dir_fixed {
            return Ok(StepOutcome::Done);
        }
        let Some(pattern) = unit.archive_subdir.clone() else {
            unit.source_dir_fixed = true;
            return Ok(StepOutcome::Done);
        };

        match archive::into_subdir(&unit.source_dir, &pattern)? {
            Some(dir) => {
                debug!("{}: source root is {}", unit.name, dir.display());
                unit.source_dir = dir;
                unit.source_dir_fixed = true;
                Ok(StepOutcome::Done)
            }
            None => Ok(StepOutcome::failed(format!(
                "no directory matching {:?} under {}",
                pattern,
                unit.source_dir.display()
            ))),
        }
    }

    fn patch(&mut self, _env: &mut BuildEnv) -> Result<StepOutcome> {
        Ok(StepOutcome::Done)
    }

    fn configure(&mut self, _env: &mut BuildEnv) -> Result<StepOutcome> {
        Ok(StepOutcome::Done)
    }

    fn build(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        make(env)
    }

    fn install(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        make_install(env)
    }

    /// Directories this unit adds to PATH
    fn extra_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Directories this unit adds to PYTHONPATH
    fn extra_python_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn extend_sys_path(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        for dir in self.extra_paths() {
            debug!("{}: PATH += {}", self.unit().name, dir.display());
            env.search_paths.prepend_path(dir);
        }
        Ok(StepOutcome::Done)
    }

    fn extend_python_path(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        for dir in self.extra_python_paths() {
            debug!("{}: PYTHONPATH += {}", self.unit().name, dir.display());
            env.search_paths.prepend_python_path(dir);
        }
        Ok(StepOutcome::Done)
    }

    /// Packaging metadata; only eggs have meaningful values
    fn egg_info(&self) -> EggInfo {
        EggInfo::default()
    }

    /// Template values overriding the default table
    fn script_substitutions(&self, _env: &BuildEnv) -> Result<Substitutions> {
        Ok(Substitutions::new())
    }

    fn configure_script(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        let template_path = env.layout.template_file();
        let template_text = fs::read_to_string(&template_path).map_err(|e| {
            BuildError::template(format!("Cannot read {}: {}", template_path.display(), e))
        })?;

        let mut subs = egg::default_substitutions(self.unit(), &self.egg_info());
        subs.merge(self.script_substitutions(env)?);
        let script = template::substitute(&template_text, &subs)?;

        let unit = self.unit();
        fs::create_dir_all(&unit.egg_dir)?;
        let out = unit.egg_dir.join("setup.py");
        fs::write(&out, script)?;
        info!("{}: wrote {}", unit.name, out.display());
        Ok(StepOutcome::Done)
    }

    fn bdist_egg(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        // A renamed egg from an earlier run would sit next to the new one
        egg::clear_built_eggs(&self.unit().egg_dir)?;
        let output = env.python(["setup.py", "bdist_egg"])?;
        if !output.success {
            return Ok(StepOutcome::from_success(false, &output.label));
        }

        let info = self.egg_info();
        let built = egg::find_single_egg(&self.unit().egg_dir, &self.unit().name)?;
        let Some(file_name) = built.file_name().and_then(|n| n.to_str()) else {
            return Err(BuildError::general(format!(
                "Unexpected egg path {}",
                built.display()
            )));
        };
        let normalized =
            egg::normalize_egg_name(file_name, info.py_dependent, info.arch_dependent);
        if normalized != file_name {
            let target = built.with_file_name(&normalized);
            fs::rename(&built, &target)?;
            info!("{}: renamed egg to {}", self.unit().name, normalized);
        }
        Ok(StepOutcome::Done)
    }

    fn upload_egg(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        let Some((login, passwd)) = env.options.credentials() else {
            info!(
                "{}: no login or password provided, skipping egg upload",
                self.unit().name
            );
            return Ok(StepOutcome::deferred("no upload credentials"));
        };

        let name = &self.unit().name;
        let channel = env.options.channel();
        let mut cmd = Command::new(&env.options.python);
        cmd.args(["setup.py", "egg_upload", "--yes-to-all", "--login", login])
            .args(["--password", passwd])
            .args(["--release", name, "--package", "ThirdPartyLibraries"])
            .args(["--project", channel]);
        // The password stays out of the log
        let label = format!(
            "{} setup.py egg_upload --login {} --release {} --project {}",
            env.options.python, login, name, channel
        );
        let output = crate::command::run_command(cmd, label, &env.search_paths)?;
        Ok(StepOutcome::from_success(output.success, "egg upload"))
    }

    fn copy_egg(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        let Some(dest_dir) = env.options.dest_egg_dir.clone() else {
            info!("{}: no destination directory, egg stays in place", self.unit().name);
            return Ok(StepOutcome::Done);
        };

        let built = egg::find_single_egg(&self.unit().egg_dir, &self.unit().name)?;
        let Some(file_name) = built.file_name() else {
            return Err(BuildError::general(format!(
                "Unexpected egg path {}",
                built.display()
            )));
        };
        fs::create_dir_all(&dest_dir)?;
        let dest = dest_dir.join(file_name);
        if dest.exists() {
            debug!("Removing {}", dest.display());
            fs::remove_file(&dest)?;
        }
        fs::copy(&built, &dest)?;
        info!("Copied {} to {}", built.display(), dest.display());
        Ok(StepOutcome::Done)
    }
}

/// `make`, with `-j N` when jobs are configured
pub fn make(env: &BuildEnv) -> Result<StepOutcome> {
    let line = match env.options.jobs {
        Some(jobs) => format!("make -j {}", jobs),
        None => "make".to_string(),
    };
    let output = env.sh(&line)?;
    Ok(StepOutcome::from_success(output.success, line))
}

pub fn make_install(env: &BuildEnv) -> Result<StepOutcome> {
    let output = env.sh("make install")?;
    Ok(StepOutcome::from_success(output.success, "make install"))
}

/// Run `action` on `builder`, with the current directory scoped to the
/// source or egg directory for the actions that need it.
pub fn perform(
    builder: &mut dyn UnitBuilder,
    action: StepAction,
    env: &mut BuildEnv,
) -> Result<StepOutcome> {
    let scope = if action.runs_in_source_dir() {
        Some(source_scope(builder.unit())?)
    } else if action.runs_in_egg_dir() {
        fs::create_dir_all(&builder.unit().egg_dir)?;
        Some(builder.unit().egg_dir.clone())
    } else {
        None
    };
    let _cwd = match &scope {
        Some(dir) => Some(WorkingDir::enter(dir, env.root())?),
        None => None,
    };

    match action {
        StepAction::Download => builder.download(env),
        StepAction::Unpack => builder.unpack(env),
        StepAction::FixSourceDir => builder.fix_source_dir(env),
        StepAction::Patch => builder.patch(env),
        StepAction::Configure => builder.configure(env),
        StepAction::Build => builder.build(env),
        StepAction::Install => builder.install(env),
        StepAction::ExtendSysPath => builder.extend_sys_path(env),
        StepAction::ExtendPythonPath => builder.extend_python_path(env),
        StepAction::ConfigureScript => builder.configure_script(env),
        StepAction::BdistEgg => builder.bdist_egg(env),
        StepAction::UploadEgg => builder.upload_egg(env),
        StepAction::CopyEgg => builder.copy_egg(env),
    }
}

fn source_scope(unit: &Unit) -> Result<PathBuf> {
    // Units without an archive of their own start from an empty tree
    if unit.url.is_none() && !unit.shared_source && !unit.source_dir.exists() {
        fs::create_dir_all(&unit.source_dir)?;
    }
    Ok(unit.source_dir.clone())
}
