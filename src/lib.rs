//! depbuild Library
//!
//! Resumable build pipeline for third-party dependencies: download, unpack,
//! configure, build and install source projects, then package their install
//! trees as eggs. Completed steps are recorded so that an interrupted or
//! failed run resumes where it stopped.

pub mod archive;
pub mod builder;
pub mod cli;
pub mod command;
pub mod env;
pub mod error;
pub mod fetch;
pub mod layout;
pub mod manifest;
pub mod outcome;
pub mod pipeline;
pub mod process_guard;
pub mod registry;
pub mod state;
pub mod steps;
pub mod template;
pub mod workdir;

// Re-export main types for convenience
pub use builder::{EggBuilder, ProjectBuilder, Unit, UnitBuilder, UnitKind};
pub use env::{BuildEnv, BuildOptions, SearchPaths};
pub use error::{BuildError, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use layout::Layout;
pub use manifest::Manifest;
pub use outcome::StepOutcome;
pub use pipeline::{ForcedSteps, Pipeline, RunReport};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use registry::BuilderRegistry;
pub use state::{CompletionRecord, StateSession, StateStore};
pub use steps::{StepAction, StepCode, StepDescriptor, StepRegistry};
