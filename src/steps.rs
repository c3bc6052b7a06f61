//! Step Registry
//!
//! Ordered tables describing the pipeline stages for projects (source
//! dependencies) and eggs (packaging targets). The order of a table is the
//! order in which its steps run and encodes real dependencies: nothing is
//! built before it is unpacked, nothing is packaged before it is installed.
//!
//! # Project Flow
//!
//! ```text
//! d download → u unpack → f fix_source_dir* → p patch → c configure
//!     → b build → i install → x extend_sys_path* → y extend_python_path*
//! ```
//!
//! # Egg Flow
//!
//! ```text
//! c configure_script → e bdist_egg → u upload_egg → g copy_egg
//! ```
//!
//! Steps marked `*` are not skippable: they rebuild per-run state (the
//! located source root, the search paths) that later steps and units rely on.

use std::fmt;
use strum::{Display, EnumString, IntoStaticStr};

/// Single-character identifier of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepCode(char);

impl StepCode {
    /// Wrap a character as a step code
    #[inline]
    pub const fn new(code: char) -> Self {
        Self(code)
    }

    /// Returns the underlying character
    #[inline]
    pub const fn as_char(self) -> char {
        self.0
    }
}

impl fmt::Display for StepCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<char> for StepCode {
    fn from(code: char) -> Self {
        Self(code)
    }
}

/// The action bound to a step code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum StepAction {
    Download,
    Unpack,
    FixSourceDir,
    Patch,
    Configure,
    Build,
    Install,
    ExtendSysPath,
    ExtendPythonPath,
    ConfigureScript,
    BdistEgg,
    UploadEgg,
    CopyEgg,
}

impl StepAction {
    /// Returns true if this action runs inside the unit's source directory
    pub const fn runs_in_source_dir(self) -> bool {
        matches!(
            self,
            Self::Patch | Self::Configure | Self::Build | Self::Install
        )
    }

    /// Returns true if this action runs inside the unit's egg staging directory
    pub const fn runs_in_egg_dir(self) -> bool {
        matches!(self, Self::BdistEgg | Self::UploadEgg | Self::CopyEgg)
    }
}

/// One row of a step registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepDescriptor {
    pub code: StepCode,
    pub action: StepAction,
    /// Skippable steps are bypassed once recorded done, unless forced
    pub skippable: bool,
}

impl StepDescriptor {
    pub const fn new(code: char, action: StepAction, skippable: bool) -> Self {
        Self {
            code: StepCode::new(code),
            action,
            skippable,
        }
    }
}

impl fmt::Display for StepDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.action, self.code)
    }
}

const PROJECT_STEPS: &[StepDescriptor] = &[
    StepDescriptor::new('d', StepAction::Download, true),
    StepDescriptor::new('u', StepAction::Unpack, true),
    StepDescriptor::new('f', StepAction::FixSourceDir, false),
    StepDescriptor::new('p', StepAction::Patch, true),
    StepDescriptor::new('c', StepAction::Configure, true),
    StepDescriptor::new('b', StepAction::Build, true),
    StepDescriptor::new('i', StepAction::Install, true),
    StepDescriptor::new('x', StepAction::ExtendSysPath, false),
    StepDescriptor::new('y', StepAction::ExtendPythonPath, false),
];

const EGG_STEPS: &[StepDescriptor] = &[
    StepDescriptor::new('c', StepAction::ConfigureScript, true),
    StepDescriptor::new('e', StepAction::BdistEgg, true),
    StepDescriptor::new('u', StepAction::UploadEgg, true),
    StepDescriptor::new('g', StepAction::CopyEgg, true),
];

/// An immutable, ordered step table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRegistry {
    steps: &'static [StepDescriptor],
}

impl StepRegistry {
    /// Canonical pipeline for source dependencies
    pub const PROJECT: Self = Self::new(PROJECT_STEPS);

    /// Canonical pipeline for packaging targets
    pub const EGG: Self = Self::new(EGG_STEPS);

    /// Declare a custom registry. Codes must be unique.
    pub const fn new(steps: &'static [StepDescriptor]) -> Self {
        Self { steps }
    }

    /// Returns the steps in execution order
    #[inline]
    pub fn steps(&self) -> &'static [StepDescriptor] {
        self.steps
    }

    /// Look up a step by code
    pub fn get(&self, code: StepCode) -> Option<&'static StepDescriptor> {
        self.steps.iter().find(|step| step.code == code)
    }

    /// Returns true if the code belongs to this registry
    pub fn contains(&self, code: StepCode) -> bool {
        self.get(code).is_some()
    }

    /// All codes concatenated in order (e.g. "dufpcbixy")
    pub fn codes(&self) -> String {
        self.steps.iter().map(|step| step.code.as_char()).collect()
    }

    /// Returns the first character of `codes` that is not a step of this registry
    pub fn find_unknown(&self, codes: &str) -> Option<char> {
        codes
            .chars()
            .find(|c| !self.contains(StepCode::new(*c)))
    }

    /// Lists the skippable steps, one per line, for the CLI epilog
    pub fn help_text(&self) -> String {
        self.steps
            .iter()
            .filter(|step| step.skippable)
            .map(|step| format!("\t{} : {}\n", step.code, step.action))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_project_order_is_fixed() {
        assert_eq!(StepRegistry::PROJECT.codes(), "dufpcbixy");
        assert_eq!(StepRegistry::EGG.codes(), "ceug");
    }

    #[test]
    fn test_codes_are_unique() {
        for registry in [StepRegistry::PROJECT, StepRegistry::EGG] {
            let mut seen = HashSet::new();
            for step in registry.steps() {
                assert!(seen.insert(step.code), "duplicate code {}", step.code);
            }
        }
    }

    #[test]
    fn test_non_skippable_steps() {
        let fixed: String = StepRegistry::PROJECT
            .steps()
            .iter()
            .filter(|step| !step.skippable)
            .map(|step| step.code.as_char())
            .collect();
        assert_eq!(fixed, "fxy");
        assert!(StepRegistry::EGG.steps().iter().all(|step| step.skippable));
    }

    #[test]
    fn test_lookup_by_code() {
        let step = StepRegistry::PROJECT.get(StepCode::new('b')).unwrap();
        assert_eq!(step.action, StepAction::Build);
        assert!(StepRegistry::PROJECT.get(StepCode::new('e')).is_none());
        assert_eq!(
            StepRegistry::EGG.get(StepCode::new('u')).unwrap().action,
            StepAction::UploadEgg
        );
    }

    #[test]
    fn test_find_unknown() {
        assert_eq!(StepRegistry::PROJECT.find_unknown("duc"), None);
        assert_eq!(StepRegistry::PROJECT.find_unknown("duz"), Some('z'));
        assert_eq!(StepRegistry::EGG.find_unknown("d"), Some('d'));
    }

    #[test]
    fn test_action_names() {
        assert_eq!(StepAction::FixSourceDir.to_string(), "fix_source_dir");
        assert_eq!(StepAction::BdistEgg.to_string(), "bdist_egg");
        let parsed: StepAction = "extend_python_path".parse().unwrap();
        assert_eq!(parsed, StepAction::ExtendPythonPath);
    }

    #[test]
    fn test_help_text_lists_only_skippable() {
        let help = StepRegistry::PROJECT.help_text();
        assert!(help.contains("d : download"));
        assert!(help.contains("i : install"));
        assert!(!help.contains("fix_source_dir"));
        assert!(!help.contains("extend_sys_path"));
    }

    #[test]
    fn test_working_directory_classes() {
        assert!(StepAction::Configure.runs_in_source_dir());
        assert!(!StepAction::Download.runs_in_source_dir());
        assert!(StepAction::BdistEgg.runs_in_egg_dir());
        assert!(!StepAction::ConfigureScript.runs_in_egg_dir());
    }
}
