//! Source project builder.

use super::{make, make_install, Unit, UnitBuilder};
use crate::env::BuildEnv;
use crate::error::Result;
use crate::layout::Layout;
use crate::manifest::{PatchSpec, ProjectSpec};
use crate::outcome::StepOutcome;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// Builder for one `projects[]` manifest entry
#[derive(Debug, Clone)]
pub struct ProjectBuilder {
    unit: Unit,
    spec: ProjectSpec,
}

impl ProjectBuilder {
    /// `shared` is the project named by `shares_source_with`, if any
    pub fn new(spec: &ProjectSpec, shared: Option<&ProjectSpec>, layout: &Layout) -> Self {
        let mut unit = Unit::project(&spec.name, layout);
        if let (Some(url), Some(download_name)) = (spec.url.as_deref(), spec.archive_name()) {
            unit = unit.with_url(url, &download_name, layout);
        }
        if let Some(owner) = shared {
            unit.source_dir = layout.unit_source_dir(&owner.name);
            unit.shared_source = true;
        }
        unit.archive_subdir = spec
            .archive_subdir
            .clone()
            .or_else(|| shared.and_then(|owner| owner.archive_subdir.clone()));
        unit.supported_steps = spec.steps.clone();

        Self {
            unit,
            spec: spec.clone(),
        }
    }

    /// Replace the `${...}` tokens of a manifest command
    pub fn expand(&self, command: &str, env: &BuildEnv) -> String {
        let jobs = env.options.jobs.unwrap_or(1).to_string();
        let tokens = [
            ("${NAME}", self.unit.name.clone()),
            ("${SOURCE_DIR}", path_text(&self.unit.source_dir)),
            ("${INSTALL_DIR}", path_text(&self.unit.install_dir)),
            ("${WORKING_DIR}", path_text(env.root())),
            ("${DL_DIR}", path_text(&env.layout.dl_dir())),
            ("${JOBS}", jobs),
            ("${PYTHON}", env.options.python.clone()),
        ];
        tokens
            .iter()
            .fold(command.to_string(), |text, (token, value)| text.replace(token, value))
    }

    fn run(&self, command: &str, env: &BuildEnv) -> Result<StepOutcome> {
        let line = self.expand(command, env);
        let output = env.sh(&line)?;
        Ok(StepOutcome::from_success(output.success, line))
    }

    /// Tokens in the replacement text are expanded like commands
    fn apply_patch(&self, patch: &PatchSpec, env: &BuildEnv) -> Result<StepOutcome> {
        let file = self.unit.source_dir.join(&patch.file);
        if !file.is_file() {
            return Ok(StepOutcome::failed(format!(
                "patch target {} does not exist",
                file.display()
            )));
        }
        let text = fs::read_to_string(&file)?;
        if !text.contains(&patch.find) {
            debug!("{}: nothing to patch in {}", self.unit.name, file.display());
            return Ok(StepOutcome::Done);
        }
        let replacement = self.expand(&patch.replace, env);
        fs::write(&file, text.replace(&patch.find, &replacement))?;
        info!("{}: patched {}", self.unit.name, patch.file);
        Ok(StepOutcome::Done)
    }
}

fn path_text(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

impl UnitBuilder for ProjectBuilder {
    fn unit(&self) -> &Unit {
        &self.unit
    }

    fn unit_mut(&mut self) -> &mut Unit {
        &mut self.unit
    }

    fn patch(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        for patch in &self.spec.patches {
            let outcome = self.apply_patch(patch, env)?;
            if !outcome.is_done() {
                return Ok(outcome);
            }
        }
        Ok(StepOutcome::Done)
    }

    fn configure(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        match &self.spec.configure {
            Some(command) => self.run(command, env),
            None => Ok(StepOutcome::Done),
        }
    }

    fn build(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        match &self.spec.build {
            Some(command) => self.run(command, env),
            None => make(env),
        }
    }

    fn install(&mut self, env: &mut BuildEnv) -> Result<StepOutcome> {
        match &self.spec.install {
            Some(command) => self.run(command, env),
            None => make_install(env),
        }
    }

    fn extra_paths(&self) -> Vec<PathBuf> {
        self.spec
            .extra_paths
            .iter()
            .map(|entry| self.unit.install_relative(entry))
            .collect()
    }

    fn extra_python_paths(&self) -> Vec<PathBuf> {
        self.spec
            .extra_python_paths
            .iter()
            .map(|entry| self.unit.install_relative(entry))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::BuildOptions;
    use crate::error::BuildError;
    use crate::fetch::Fetcher;
    use std::path::Path;
    use tempfile::TempDir;

    struct Offline;

    impl Fetcher for Offline {
        fn remote_size(&self, _url: &str) -> Result<Option<u64>> {
            Ok(None)
        }

        fn fetch(&self, url: &str, _dest: &Path) -> Result<u64> {
            Err(BuildError::download(format!("offline: {}", url)))
        }
    }

    fn env_at(root: &Path) -> BuildEnv {
        let options = BuildOptions {
            jobs: Some(4),
            ..Default::default()
        };
        BuildEnv::new(Layout::new(root), options, Box::new(Offline))
    }

    fn spec(name: &str) -> ProjectSpec {
        ProjectSpec {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_expand_tokens() {
        let env = env_at(Path::new("/w"));
        let builder = ProjectBuilder::new(&spec("sip"), None, &env.layout);

        let line = builder.expand(
            "${PYTHON} configure.py -b ${INSTALL_DIR}/bin -j ${JOBS} # ${NAME} $HOME",
            &env,
        );
        assert_eq!(
            line,
            "python3 configure.py -b /w/install/sip/bin -j 4 # sip $HOME"
        );
    }

    #[test]
    fn test_url_sets_archive() {
        let layout = Layout::new("/w");
        let mut p = spec("qhull");
        p.url = Some("http://example.org/files/qhull-2010.1.tgz".to_string());
        let builder = ProjectBuilder::new(&p, None, &layout);
        assert_eq!(
            builder.unit().archive,
            Some(PathBuf::from("/w/dl/qhull-2010.1.tgz"))
        );
    }

    #[test]
    fn test_shared_source_inherits_owner_tree() {
        let layout = Layout::new("/w");
        let mut owner = spec("qt4");
        owner.url = Some("http://example.org/qt.tgz".to_string());
        owner.archive_subdir = Some("qt-*".to_string());
        let mut sharer = spec("qt4_dev");
        sharer.shares_source_with = Some("qt4".to_string());

        let builder = ProjectBuilder::new(&sharer, Some(&owner), &layout);
        let unit = builder.unit();
        assert_eq!(unit.source_dir, PathBuf::from("/w/src/qt4"));
        assert_eq!(unit.install_dir, PathBuf::from("/w/install/qt4_dev"));
        assert_eq!(unit.archive_subdir.as_deref(), Some("qt-*"));
        assert!(unit.url.is_none());
        assert!(unit.shared_source);
    }

    #[test]
    fn test_patch_replaces_and_tolerates_reapply() {
        let dir = TempDir::new().unwrap();
        let mut env = env_at(dir.path());
        let mut p = spec("qhull");
        p.patches.push(PatchSpec {
            file: "Makefile".to_string(),
            find: "CC=gcc".to_string(),
            replace: "CC=cc".to_string(),
        });
        let mut builder = ProjectBuilder::new(&p, None, &env.layout);
        fs::create_dir_all(&builder.unit().source_dir).unwrap();
        let makefile = builder.unit().source_dir.join("Makefile");
        fs::write(&makefile, "CC=gcc\nall:\n").unwrap();

        assert_eq!(builder.patch(&mut env).unwrap(), StepOutcome::Done);
        assert_eq!(fs::read_to_string(&makefile).unwrap(), "CC=cc\nall:\n");

        assert_eq!(builder.patch(&mut env).unwrap(), StepOutcome::Done);
        assert_eq!(fs::read_to_string(&makefile).unwrap(), "CC=cc\nall:\n");
    }

    #[test]
    fn test_patch_expands_tokens() {
        let dir = TempDir::new().unwrap();
        let mut env = env_at(dir.path());
        let mut p = spec("qscintilla");
        p.patches.push(PatchSpec {
            file: "qscintilla.pro".to_string(),
            find: "DESTDIR = $$[QT_INSTALL_LIBS]".to_string(),
            replace: "DESTDIR = ${INSTALL_DIR}/lib".to_string(),
        });
        let mut builder = ProjectBuilder::new(&p, None, &env.layout);
        fs::create_dir_all(&builder.unit().source_dir).unwrap();
        let pro = builder.unit().source_dir.join("qscintilla.pro");
        fs::write(&pro, "DESTDIR = $$[QT_INSTALL_LIBS]\n").unwrap();

        assert_eq!(builder.patch(&mut env).unwrap(), StepOutcome::Done);
        let expected = format!(
            "DESTDIR = {}/lib\n",
            env.layout.unit_install_dir("qscintilla").display()
        );
        assert_eq!(fs::read_to_string(&pro).unwrap(), expected);
    }

    #[test]
    fn test_patch_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let mut env = env_at(dir.path());
        let mut p = spec("qhull");
        p.patches.push(PatchSpec {
            file: "missing.c".to_string(),
            find: "a".to_string(),
            replace: "b".to_string(),
        });
        let mut builder = ProjectBuilder::new(&p, None, &env.layout);
        assert!(builder.patch(&mut env).unwrap().is_failed());
    }

    #[test]
    fn test_extra_paths_resolve_against_install_dir() {
        let layout = Layout::new("/w");
        let mut p = spec("qt4");
        p.extra_paths = vec!["bin".to_string(), "/usr/local/qt/bin".to_string()];
        p.extra_python_paths = vec!["lib/python".to_string()];
        let builder = ProjectBuilder::new(&p, None, &layout);

        assert_eq!(
            builder.extra_paths(),
            vec![
                PathBuf::from("/w/install/qt4/bin"),
                PathBuf::from("/usr/local/qt/bin")
            ]
        );
        assert_eq!(
            builder.extra_python_paths(),
            vec![PathBuf::from("/w/install/qt4/lib/python")]
        );
    }

    #[test]
    fn test_configure_command_failure() {
        let dir = TempDir::new().unwrap();
        let mut env = env_at(dir.path());
        let mut p = spec("broken");
        p.configure = Some("exit 1".to_string());
        let mut builder = ProjectBuilder::new(&p, None, &env.layout);
        assert!(builder.configure(&mut env).unwrap().is_failed());
    }
}
