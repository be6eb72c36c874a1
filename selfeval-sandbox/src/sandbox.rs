use crate::cpu::{logical_cpu_count, CpuPool};
use crate::error::{Result, SandboxError};
use crate::helper::{Access, Invocation, IsolationHelper};
use crate::signal::{is_interrupted, Cleanup};
use crate::telemetry::{classify, Telemetry};

use selfeval_protocol::{Limit, Program, Verdict};
use selfeval_utils::fs::unique_path;

use std::fs::{self, File};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use std::{env, fmt, io, thread};

use log::{debug, error, warn};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

const POLL_MIN: Duration = Duration::from_millis(1);
const POLL_MAX: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// How long the helper may take to reach its stopped state.
    pub start_timeout: Duration,

    /// How long each termination step waits for the child to go away.
    pub kill_grace: Duration,

    /// Directory for result files of runs without a working directory.
    pub result_dir: PathBuf,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(10),
            kill_grace: Duration::from_millis(50),
            result_dir: env::temp_dir(),
        }
    }
}

/// Shared state of every sandbox a judge session starts.
#[derive(Clone)]
pub struct SandboxContext {
    full: Arc<dyn IsolationHelper>,
    tiny: Arc<dyn IsolationHelper>,
    cpu_pool: Option<Arc<CpuPool>>,
    options: SandboxOptions,
}

impl SandboxContext {
    /// `full` runs untrusted code, `tiny` skips syscall filtering and is
    /// used for trusted tools.
    pub fn new(full: Arc<dyn IsolationHelper>, tiny: Arc<dyn IsolationHelper>) -> Self {
        Self {
            full,
            tiny,
            cpu_pool: None,
            options: SandboxOptions::default(),
        }
    }

    pub fn with_cpu_pool(mut self, pool: CpuPool) -> Self {
        self.cpu_pool = Some(Arc::new(pool));
        self
    }

    pub fn with_options(mut self, options: SandboxOptions) -> Self {
        self.options = options;
        self
    }

    pub fn command(&self, program: &Program, limit: Limit) -> SandboxCommand {
        SandboxCommand {
            ctx: self.clone(),
            program: program.clone(),
            limit,
            cwd: None,
            stdin: Io::Null,
            stdout: Io::Null,
            stderr: Io::Null,
            grants: Vec::new(),
            isolate: false,
            trusted: false,
        }
    }
}

impl fmt::Debug for SandboxContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxContext")
            .field("cpu_pool", &self.cpu_pool)
            .field("options", &self.options)
            .finish()
    }
}

/// Where a standard stream of the sandboxed program goes.
#[derive(Debug)]
pub enum Io {
    Null,
    Inherit,
    Piped,
    /// Opened for reading as stdin, created or truncated otherwise.
    Path(PathBuf),
    Stdio(Stdio),
}

impl Io {
    fn into_stdio(self, input: bool) -> io::Result<Stdio> {
        Ok(match self {
            Io::Null => Stdio::null(),
            Io::Inherit => Stdio::inherit(),
            Io::Piped => Stdio::piped(),
            Io::Path(ref path) if input => File::open(path)?.into(),
            Io::Path(ref path) => File::create(path)?.into(),
            Io::Stdio(stdio) => stdio,
        })
    }
}

/// A sandboxed run that has not been started yet.
#[derive(Debug)]
pub struct SandboxCommand {
    ctx: SandboxContext,
    program: Program,
    limit: Limit,
    cwd: Option<PathBuf>,
    stdin: Io,
    stdout: Io,
    stderr: Io,
    grants: Vec<(PathBuf, Access)>,
    isolate: bool,
    trusted: bool,
}

impl SandboxCommand {
    pub fn cwd(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn stdin(&mut self, io: Io) -> &mut Self {
        self.stdin = io;
        self
    }

    pub fn stdout(&mut self, io: Io) -> &mut Self {
        self.stdout = io;
        self
    }

    pub fn stderr(&mut self, io: Io) -> &mut Self {
        self.stderr = io;
        self
    }

    pub fn grant(&mut self, path: impl Into<PathBuf>, access: Access) -> &mut Self {
        self.grants.push((path.into(), access));
        self
    }

    /// Binds the run to one CPU taken from the pool.
    pub fn isolate(&mut self, on: bool) -> &mut Self {
        self.isolate = on;
        self
    }

    /// Uses the lightweight helper without syscall filtering.
    pub fn trusted(&mut self, on: bool) -> &mut Self {
        self.trusted = on;
        self
    }

    pub fn limit(&self) -> &Limit {
        &self.limit
    }

    /// Spawns the helper and blocks until it has stopped itself.
    pub fn start(self) -> Result<Stopped> {
        if is_interrupted() {
            return Err(SandboxError::Interrupted { notes: Vec::new() });
        }

        let target = resolve_executable(&self.program.path)?;
        let helper = if self.trusted {
            &self.ctx.tiny
        } else {
            &self.ctx.full
        };

        let (slot, cpu_mask) = if self.isolate {
            let slot = self.ctx.cpu_pool.as_ref().and_then(|pool| {
                let id = pool.acquire()?;
                Some(CpuSlot {
                    pool: Arc::clone(pool),
                    id,
                })
            });
            let cpu = match slot {
                Some(ref slot) => slot.id,
                None => {
                    warn!("no free cpu, binding to cpu 0");
                    0
                }
            };
            (slot, cpu_mask(logical_cpu_count(), Some(cpu)))
        } else {
            (None, cpu_mask(logical_cpu_count(), None))
        };

        let result_dir = self.cwd.as_deref().unwrap_or(&self.ctx.options.result_dir);
        let inv = Invocation {
            target,
            result_file: unique_path(result_dir, "selfeval-", ".ret"),
            enforcement: self.limit.enforcement(),
            cpu_mask,
            grants: self.grants,
            args: self.program.args.clone(),
        };

        let mut cmd = helper.command(&inv);
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }
        if let Some(ref vars) = self.program.env {
            cmd.env_clear().envs(vars);
        }
        cmd.stdin(self.stdin.into_stdio(true)?);
        cmd.stdout(self.stdout.into_stdio(false)?);
        cmd.stderr(self.stderr.into_stdio(false)?);
        cmd.process_group(0);

        debug!("spawn sandbox: {:?}", cmd);
        let child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            helper: PathBuf::from(cmd.get_program()),
            source,
        })?;
        drop(cmd);

        let mut sup = Supervised {
            pid: Pid::from_raw(child.id() as i32),
            child,
            state: State::Starting,
            result_file: inv.result_file,
            limit: self.limit,
            kill_signal: helper.kill_signal(),
            kill_grace: self.ctx.options.kill_grace,
            _slot: slot,
        };
        debug!("sandbox {} spawned", sup.pid);

        let timeout = self.ctx.options.start_timeout;
        let deadline = Instant::now() + timeout;
        let mut poll = POLL_MIN;
        loop {
            let flags = WaitPidFlag::WUNTRACED | WaitPidFlag::WNOHANG;
            match waitpid(sup.pid, Some(flags)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(WaitStatus::Stopped(_, sig)) => {
                    debug!("sandbox {} stopped by {}", sup.pid, sig);
                    sup.state = State::Stopped;
                    break;
                }
                Ok(status @ WaitStatus::Exited(..)) | Ok(status @ WaitStatus::Signaled(..)) => {
                    warn!("sandbox {} ended before stopping: {:?}", sup.pid, status);
                    sup.state = State::Reaped(status);
                    break;
                }
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(errno) => return Err(errno.into()),
            }
            if is_interrupted() {
                return Err(SandboxError::Interrupted {
                    notes: sup.terminate(),
                });
            }
            if Instant::now() >= deadline {
                error!("sandbox {} did not stop within {:?}", sup.pid, timeout);
                return Err(SandboxError::StartTimeout(timeout));
            }
            thread::sleep(poll);
            poll = (poll * 2).min(POLL_MAX);
        }

        Ok(Stopped { inner: sup })
    }

    /// Starts, resumes and waits.
    pub fn run(self) -> Result<Verdict> {
        self.start()?.cont()?.wait()
    }
}

/// A helper that has set everything up and stopped before the target.
#[derive(Debug)]
pub struct Stopped {
    inner: Supervised,
}

impl Stopped {
    pub fn pid(&self) -> Pid {
        self.inner.pid
    }

    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.inner.child.stdin.take()
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.inner.child.stdout.take()
    }

    /// Lets the helper run the target.
    pub fn cont(mut self) -> Result<Running> {
        if let State::Stopped = self.inner.state {
            signal_group(self.inner.pid, Signal::SIGCONT)?;
            self.inner.state = State::Running;
        }
        Ok(Running { inner: self.inner })
    }
}

#[derive(Debug)]
pub struct Running {
    inner: Supervised,
}

impl Running {
    pub fn pid(&self) -> Pid {
        self.inner.pid
    }

    /// Blocks until the helper exits and classifies what it reported.
    pub fn wait(mut self) -> Result<Verdict> {
        let status = self.inner.reap(None)?;
        Ok(self.inner.verdict(status))
    }

    /// Like [`wait`](Running::wait), but an interrupt terminates `partner`
    /// too, within the same cleanup.
    pub(crate) fn wait_alongside(mut self, partner: &mut Running) -> Result<Verdict> {
        let status = self.inner.reap(Some(&mut partner.inner))?;
        Ok(self.inner.verdict(status))
    }

    /// Kills the run, returning notes about signals that could not be sent.
    pub fn terminate(&mut self) -> Vec<String> {
        self.inner.terminate()
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Starting,
    Stopped,
    Running,
    Reaped(WaitStatus),
    /// Reaped by someone else; the exit status is unknown.
    Lost,
}

#[derive(Debug)]
struct CpuSlot {
    pool: Arc<CpuPool>,
    id: u32,
}

impl Drop for CpuSlot {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}

/// Owns the helper process. Dropping it kills whatever is left of the run,
/// releases the CPU and removes the result file.
#[derive(Debug)]
struct Supervised {
    child: Child,
    pid: Pid,
    state: State,
    result_file: PathBuf,
    limit: Limit,
    kill_signal: Signal,
    kill_grace: Duration,
    _slot: Option<CpuSlot>,
}

impl Supervised {
    fn is_gone(&self) -> bool {
        matches!(self.state, State::Reaped(_) | State::Lost)
    }

    fn reap(&mut self, mut partner: Option<&mut Supervised>) -> Result<WaitStatus> {
        let mut poll = POLL_MIN;
        loop {
            match self.state {
                State::Reaped(status) => return Ok(status),
                State::Lost => return Err(Errno::ECHILD.into()),
                _ => {}
            }
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {
                    if is_interrupted() {
                        let _cleanup = Cleanup::enter();
                        let mut notes = self.terminate();
                        if let Some(ref mut partner) = partner {
                            notes.extend(partner.terminate());
                        }
                        return Err(SandboxError::Interrupted { notes });
                    }
                    thread::sleep(poll);
                    poll = (poll * 2).min(POLL_MAX);
                }
                Ok(status @ WaitStatus::Exited(..)) | Ok(status @ WaitStatus::Signaled(..)) => {
                    debug!("sandbox {} exited: {:?}", self.pid, status);
                    self.state = State::Reaped(status);
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(errno) => return Err(errno.into()),
            }
        }
    }

    fn verdict(&self, status: WaitStatus) -> Verdict {
        let why = match status {
            WaitStatus::Exited(_, 0) => None,
            WaitStatus::Exited(_, code) => Some(format!("exit code {}", code)),
            WaitStatus::Signaled(_, sig, _) => Some(format!("killed by {}", sig)),
            other => Some(format!("{:?}", other)),
        };
        if let Some(why) = why {
            error!("isolation helper {} failed: {}", self.pid, why);
            return Verdict::fail(format!("isolation helper failed: {}", why));
        }

        let text = match fs::read_to_string(&self.result_file) {
            Ok(text) => text,
            Err(err) => {
                error!(
                    "failed to read result file {}: {}",
                    self.result_file.display(),
                    err
                );
                return Verdict::fail(format!("no result from isolation helper: {}", err));
            }
        };
        match Telemetry::parse(&text) {
            Some(t) => classify(&t, &self.limit),
            None => {
                error!("malformed result file {}: {:?}", self.result_file.display(), text);
                Verdict::fail("malformed result from isolation helper")
            }
        }
    }

    /// Resume, then the helper's kill signal, then SIGKILL, each followed by
    /// a bounded wait. SIGINT cannot abandon it halfway.
    fn terminate(&mut self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.is_gone() {
            return notes;
        }
        let _cleanup = Cleanup::enter();

        for &sig in [Signal::SIGCONT, self.kill_signal, Signal::SIGKILL].iter() {
            match signal_group(self.pid, sig) {
                Ok(()) if sig != Signal::SIGCONT => {
                    notes.push(format!("sent {} to sandbox {}", sig, self.pid));
                }
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(errno) => {
                    warn!("failed to send {} to sandbox {}: {}", sig, self.pid, errno);
                    notes.push(format!("failed to send {} to sandbox {}", sig, self.pid));
                }
            }
            if self.wait_gone(self.kill_grace) {
                return notes;
            }
        }

        warn!("sandbox {} survived SIGKILL", self.pid);
        notes
    }

    fn wait_gone(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status @ WaitStatus::Exited(..)) | Ok(status @ WaitStatus::Signaled(..)) => {
                    self.state = State::Reaped(status);
                    return true;
                }
                Err(Errno::ECHILD) => {
                    self.state = State::Lost;
                    return true;
                }
                Ok(_) | Err(Errno::EINTR) => {}
                Err(_) => return false,
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_MIN);
        }
    }
}

impl Drop for Supervised {
    fn drop(&mut self) {
        if !self.is_gone() {
            debug!("cleaning up sandbox {} in state {:?}", self.pid, self.state);
            self.terminate();
        }
        if let Err(err) = fs::remove_file(&self.result_file) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(
                    "failed to remove result file {}: {}",
                    self.result_file.display(),
                    err
                );
            }
        }
    }
}

/// The helper runs in its own process group; signals reach the target too.
fn signal_group(pid: Pid, sig: Signal) -> nix::Result<()> {
    let result = killpg(pid, sig);
    debug!("killpg pgid = {}, signal = {}, result = {:?}", pid, sig, result);
    result
}

fn cpu_mask(n: u32, only: Option<u32>) -> String {
    (0..n.max(1))
        .map(|cpu| match only {
            Some(only) if only != cpu => '0',
            _ => '1',
        })
        .collect()
}

/// Resolves `path` the way a shell would find a command.
pub fn resolve_executable(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_owned());
    }
    let unresolved = |_: which::Error| SandboxError::Unresolved(path.to_owned());
    if path.components().count() > 1 {
        let cwd = env::current_dir()?;
        return which::which_in(path, None::<&str>, cwd).map_err(unresolved);
    }
    which::which(path).map_err(unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks() {
        assert_eq!(cpu_mask(4, None), "1111");
        assert_eq!(cpu_mask(4, Some(2)), "0010");
        assert_eq!(cpu_mask(4, Some(0)), "1000");
        assert_eq!(cpu_mask(0, None), "1");
    }

    #[test]
    fn resolve() {
        assert_eq!(
            resolve_executable(Path::new("/bin/true")).unwrap(),
            PathBuf::from("/bin/true")
        );
        let sh = resolve_executable(Path::new("sh")).unwrap();
        assert!(sh.is_absolute());
        assert!(sh.ends_with("sh"));
        assert!(matches!(
            resolve_executable(Path::new("selfeval-no-such-program")),
            Err(SandboxError::Unresolved(_))
        ));
        assert!(matches!(
            resolve_executable(Path::new("./selfeval/no-such-program")),
            Err(SandboxError::Unresolved(_))
        ));
    }
}
