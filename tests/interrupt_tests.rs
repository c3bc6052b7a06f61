//! Interrupt handling
//!
//! The interrupt flag is process-wide and a second signal exits the process,
//! so this binary holds a single test.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use depbuild::builder::{Unit, UnitBuilder, UnitKind};
use depbuild::process_guard::{self, interrupted};
use depbuild::{
    BuildEnv, BuildError, BuildOptions, BuilderRegistry, Fetcher, Layout, Pipeline, Result,
    StateSession, StateStore, StepAction, StepDescriptor, StepOutcome, StepRegistry,
};
use nix::sys::signal::{raise, Signal};
use tempfile::TempDir;

type Calls = Rc<RefCell<Vec<String>>>;

const STEPS: &[StepDescriptor] = &[
    StepDescriptor::new('d', StepAction::Download, true),
    StepDescriptor::new('u', StepAction::Unpack, true),
    StepDescriptor::new('c', StepAction::Configure, true),
];

/// Records every step; the download of `first` sends SIGINT to the process
struct SignallingBuilder {
    unit: Unit,
    calls: Calls,
}

impl SignallingBuilder {
    fn record(&mut self, action: StepAction) -> Result<StepOutcome> {
        self.calls
            .borrow_mut()
            .push(format!("{}:{}", self.unit.name, action));
        Ok(StepOutcome::Done)
    }
}

impl UnitBuilder for SignallingBuilder {
    fn unit(&self) -> &Unit {
        &self.unit
    }

    fn unit_mut(&mut self) -> &mut Unit {
        &mut self.unit
    }

    fn registry(&self) -> StepRegistry {
        StepRegistry::new(STEPS)
    }

    fn download(&mut self, _env: &mut BuildEnv) -> Result<StepOutcome> {
        let outcome = self.record(StepAction::Download);
        if self.unit.name == "first" {
            raise(Signal::SIGINT).unwrap();
            // The flag is raised by the signal thread
            let deadline = Instant::now() + Duration::from_secs(5);
            while !interrupted() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
        }
        outcome
    }

    fn unpack(&mut self, _env: &mut BuildEnv) -> Result<StepOutcome> {
        self.record(StepAction::Unpack)
    }

    fn configure(&mut self, _env: &mut BuildEnv) -> Result<StepOutcome> {
        self.record(StepAction::Configure)
    }
}

struct NoNetwork;

impl Fetcher for NoNetwork {
    fn remote_size(&self, url: &str) -> Result<Option<u64>> {
        panic!("unexpected network access to {}", url);
    }

    fn fetch(&self, url: &str, _dest: &Path) -> Result<u64> {
        panic!("unexpected network access to {}", url);
    }
}

fn register(registry: &mut BuilderRegistry, name: &'static str, calls: &Calls) {
    let calls = Rc::clone(calls);
    registry
        .register(name, UnitKind::Project, move |env| {
            Ok(Box::new(SignallingBuilder {
                unit: Unit::project(name, &env.layout),
                calls: Rc::clone(&calls),
            }))
        })
        .unwrap();
}

#[test]
fn test_sigint_stops_run_and_saves_finished_steps() {
    process_guard::init_signal_handlers().unwrap();
    assert!(!interrupted());

    let dir = TempDir::new().unwrap();
    let mut env = BuildEnv::new(
        Layout::new(dir.path()),
        BuildOptions::default(),
        Box::new(NoNetwork),
    );
    env.layout.create_dirs().unwrap();
    let state_file = env.layout.state_file();

    let calls: Calls = Rc::new(RefCell::new(Vec::new()));
    let mut registry = BuilderRegistry::new();
    register(&mut registry, "first", &calls);
    register(&mut registry, "second", &calls);

    let result = {
        let mut session = StateSession::open(&state_file);
        Pipeline::new(&registry).run(&mut env, &mut session)
    };

    assert!(interrupted());
    assert!(matches!(result, Err(BuildError::Interrupted)));
    assert_eq!(*calls.borrow(), vec!["first:download".to_string()]);

    let saved = StateStore::load(&state_file);
    assert_eq!(saved.record().done_steps("first"), "d");
    assert_eq!(saved.record().done_steps("second"), "");
}
