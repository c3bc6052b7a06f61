//! Child process control for build commands
//!
//! Every build command is spawned as the leader of its own process group and
//! recorded here under its label. Stopping the build signals whole groups, so
//! the compilers and linkers that `make` started stop along with it.
//!
//! The first SIGINT/SIGTERM/SIGHUP raises the interrupt flag and stops the
//! tracked groups. The running step then fails, the pipeline stops before the
//! next step and the completion record is saved on the way out. A second
//! signal exits at once.

use nix::libc;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static TRACKED: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Returns true once a termination signal has been received
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Process groups of the build commands currently running.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    /// Group leader PID → command label
    groups: HashMap<u32, String>,
    stopping: bool,
}

impl ChildRegistry {
    /// The registry shared by the command runner and the signal thread
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        Arc::clone(TRACKED.get_or_init(Default::default))
    }

    pub fn register(&mut self, pid: u32, label: &str) {
        debug!("Tracking `{}` as process group {}", label, pid);
        self.groups.insert(pid, label.to_string());
    }

    pub fn unregister(&mut self, pid: u32) {
        if let Some(label) = self.groups.remove(&pid) {
            debug!("`{}` (process group {}) finished", label, pid);
        }
    }

    pub fn count(&self) -> usize {
        self.groups.len()
    }

    /// SIGTERM every tracked group, then SIGKILL the groups whose leader is
    /// still running after `grace`. Only the first call does anything.
    pub fn terminate_all(&mut self, grace: Duration) {
        if std::mem::replace(&mut self.stopping, true) {
            debug!("Build commands are already being stopped");
            return;
        }

        let mut running: Vec<(u32, String)> = self.groups.drain().collect();
        if running.is_empty() {
            return;
        }
        info!("Stopping {} build command(s)", running.len());
        for (pgid, label) in &running {
            signal_group(*pgid, Signal::SIGTERM, label);
        }

        let deadline = Instant::now() + grace;
        loop {
            running.retain(|(pgid, _)| is_running(*pgid));
            if running.is_empty() || Instant::now() >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        for (pgid, label) in &running {
            warn!("`{}` ignored SIGTERM, killing process group {}", label, pgid);
            signal_group(*pgid, Signal::SIGKILL, label);
        }
    }
}

/// Signal a whole group, or its leader alone when the group is gone
fn signal_group(pgid: u32, sig: Signal, label: &str) {
    let leader = Pid::from_raw(pgid as i32);
    if let Err(group_err) = killpg(leader, sig) {
        if let Err(e) = kill(leader, sig) {
            debug!(
                "{} not delivered to `{}` ({}; group: {})",
                sig, label, e, group_err
            );
        }
    }
}

/// Running means signal 0 is accepted and the process is not a zombie
fn is_running(pid: u32) -> bool {
    if kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    // The state letter follows the parenthesised command name
    match fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_none_or(|state| !matches!(state, "Z" | "X")),
        Err(_) => true,
    }
}

/// Stops whatever build command is still tracked when the run ends
#[derive(Debug)]
pub struct ProcessGuard {
    grace: Duration,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            grace: Duration::from_secs(5),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let registry = ChildRegistry::global();
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        if registry.count() > 0 {
            registry.terminate_all(self.grace);
        }
    }
}

/// Route SIGINT, SIGTERM and SIGHUP to a dedicated thread. Call once at
/// program start.
pub fn init_signal_handlers() -> io::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                on_signal(sig);
            }
        })?;
    Ok(())
}

fn on_signal(sig: i32) {
    let name = Signal::try_from(sig).map(Signal::as_str).unwrap_or("signal");
    if INTERRUPTED.swap(true, Ordering::SeqCst) {
        warn!("{} received again, exiting without saving", name);
        std::process::exit(128 + sig);
    }

    warn!("{} received, stopping build commands (repeat to exit at once)", name);
    ChildRegistry::global()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .terminate_all(Duration::from_secs(3));
}

/// Spawn-time setup for build commands
pub trait CommandProcessGroup {
    /// Make the child lead a new process group and die with this process
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        self.process_group(0);
        // SAFETY: prctl is async-signal-safe and touches no shared state.
        unsafe {
            self.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
