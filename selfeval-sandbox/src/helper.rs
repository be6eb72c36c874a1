use selfeval_protocol::Enforcement;

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use nix::sys::signal::Signal;

/// Access the helper grants the target on one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read = 0,
    Write = 1,
}

/// One run as handed to the isolation helper.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub target: PathBuf,
    pub result_file: PathBuf,
    pub enforcement: Enforcement,

    /// One character per logical CPU, `'1'` where the target may run.
    pub cpu_mask: String,

    pub grants: Vec<(PathBuf, Access)>,
    pub args: Vec<String>,
}

impl Invocation {
    /// `target result time memory stack fsize mask n (path mode)* args*`
    pub fn to_args(&self) -> Vec<OsString> {
        let cap = 8 + self.grants.len() * 2 + self.args.len();
        let mut argv: Vec<OsString> = Vec::with_capacity(cap);
        argv.push(self.target.clone().into());
        argv.push(self.result_file.clone().into());
        argv.extend(self.enforcement.to_args().iter().map(OsString::from));
        argv.push(self.cpu_mask.clone().into());
        argv.push(self.grants.len().to_string().into());
        for (path, access) in &self.grants {
            argv.push(path.clone().into());
            argv.push((*access as u8).to_string().into());
        }
        argv.extend(self.args.iter().map(OsString::from));
        argv
    }
}

/// The process boundary to whatever enforces limits and syscall filtering.
///
/// The spawned process must stop itself before running the target, run it
/// once resumed, write the telemetry to `result_file` and exit with zero.
pub trait IsolationHelper: Send + Sync {
    fn command(&self, inv: &Invocation) -> Command;

    /// Signal that makes the helper kill its target and exit.
    fn kill_signal(&self) -> Signal {
        Signal::SIGALRM
    }
}

/// A helper binary taking the invocation as its argument vector.
#[derive(Debug, Clone)]
pub struct ExternalHelper {
    path: PathBuf,
}

impl ExternalHelper {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IsolationHelper for ExternalHelper {
    fn command(&self, inv: &Invocation) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.args(inv.to_args());
        cmd
    }
}
