use crate::builder::UnitKind;
use crate::env::BuildOptions;
use crate::pipeline::ForcedSteps;
use crate::steps::StepRegistry;
use clap::{Arg, ArgAction, CommandFactory, FromArgMatches, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

/// Manifest read when `--manifest` is not given
pub const DEFAULT_MANIFEST: &str = "depbuild.json";

/// depbuild - resumable dependency builds and egg packaging
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "depbuild")]
#[command(about = "Build third-party dependencies from source and package them as eggs")]
#[command(version)]
pub struct Cli {
    /// Working directory base; builds happen under <WDR>/<os>_<arch>
    #[arg(long, default_value = ".")]
    pub wdr: PathBuf,

    /// Unit manifest listing the projects and eggs to build
    #[arg(short, long, default_value = DEFAULT_MANIFEST)]
    pub manifest: PathBuf,

    /// Login for egg upload
    #[arg(long)]
    pub login: Option<String>,

    /// Password for egg upload
    #[arg(long)]
    pub passwd: Option<String>,

    /// Upload eggs to the release channel instead of the testing one
    #[arg(long)]
    pub release: bool,

    /// Parallel jobs passed to make
    #[arg(short, long)]
    pub jobs: Option<u32>,

    /// Python interpreter used to run setup.py
    #[arg(long, default_value = "python3")]
    pub python: String,

    /// Copy finished eggs into this directory
    #[arg(long)]
    pub dest_egg_dir: Option<PathBuf>,

    /// Only process these unit keys (comma separated); other units run
    /// their search-path steps only
    #[arg(short, long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Show what would run without running anything
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Options handed to the builders
    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            jobs: self.jobs,
            login: self.login.clone(),
            passwd: self.passwd.clone(),
            release: self.release,
            dest_egg_dir: self.dest_egg_dir.clone(),
            python: self.python.clone(),
        }
    }
}

/// A parsed command line: the fixed options plus the per-unit flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub cli: Cli,
    pub forced: ForcedSteps,
}

/// Help epilog listing the step letters accepted by unit flags
pub fn epilog() -> String {
    format!(
        "PROJ_STEPS are letters of project steps to run again:\n{}\n\
         EGG_STEPS are letters of egg steps to run again:\n{}",
        StepRegistry::PROJECT.help_text(),
        StepRegistry::EGG.help_text()
    )
}

/// The command line with one `--<key> STEPS` flag per unit
pub fn build_command(units: &[(String, UnitKind)]) -> clap::Command {
    let mut cmd = Cli::command().after_help(epilog());
    for (key, kind) in units {
        let value_name = match kind {
            UnitKind::Project => "PROJ_STEPS",
            UnitKind::Egg => "EGG_STEPS",
        };
        cmd = cmd.arg(
            Arg::new(key.clone())
                .long(key.clone())
                .value_name(value_name)
                .help(format!("Steps of {} to run again", key))
                .action(ArgAction::Set),
        );
    }
    cmd
}

/// Parse `args` (program name first) against the fixed and per-unit flags
pub fn parse_invocation<I, T>(
    units: &[(String, UnitKind)],
    args: I,
) -> Result<Invocation, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = build_command(units).try_get_matches_from(args)?;
    let cli = Cli::from_arg_matches(&matches)?;

    let mut forced = ForcedSteps::new();
    for (key, _) in units {
        if let Some(codes) = matches.get_one::<String>(key.as_str()) {
            forced.insert(key.clone(), codes);
        }
    }
    Ok(Invocation { cli, forced })
}

/// Manifest path named on the command line, found before the full parse
/// (unit flags depend on the manifest contents)
pub fn manifest_path_hint(args: &[String]) -> PathBuf {
    let mut iter = args.iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }
        if let Some(value) = arg.strip_prefix("--manifest=") {
            return PathBuf::from(value);
        }
        if arg == "--manifest" || arg == "-m" {
            if let Some(value) = iter.next() {
                return PathBuf::from(value);
            }
        } else if let Some(value) = arg.strip_prefix("-m").filter(|v| !v.is_empty()) {
            return PathBuf::from(value.strip_prefix('=').unwrap_or(value));
        }
    }
    PathBuf::from(DEFAULT_MANIFEST)
}
