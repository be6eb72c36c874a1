#![allow(dead_code)]

use selfeval_sandbox::{Invocation, IsolationHelper, SandboxContext, SandboxOptions};

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Once};
use std::time::Duration;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        dotenv::dotenv().ok();
        env_logger::init();
    });
}

/// A `/bin/sh` stand-in for the isolation helper.
///
/// It speaks the same argument vector, stops itself, runs the target without
/// any enforcement and writes the configured telemetry.
#[derive(Debug, Clone)]
pub struct FakeHelper {
    pub time: u64,
    pub memory: u64,
    pub flags: u32,
    pub diagnostics: Vec<String>,
    pub stops: bool,
    pub early_exit: Option<i32>,
    pub exit: i32,
    pub counter: Option<PathBuf>,

    /// Ignore the kill signal, so only SIGKILL ends the run.
    pub ignore_kill: bool,
}

impl Default for FakeHelper {
    fn default() -> Self {
        Self {
            time: 1000,
            memory: 1 << 20,
            flags: 0,
            diagnostics: Vec::new(),
            stops: true,
            early_exit: None,
            exit: 0,
            counter: None,
            ignore_kill: false,
        }
    }
}

impl FakeHelper {
    pub fn script(&self) -> String {
        let mut s = String::new();
        if self.ignore_kill {
            s.push_str("trap '' ALRM\n");
        }
        s.push_str("prog=\"$1\"; ret=\"$2\"; shift 7; n=\"$1\"; shift; shift $((n * 2))\n");
        if let Some(ref counter) = self.counter {
            writeln!(s, "echo x >> '{}'", counter.display()).unwrap();
        }
        if let Some(code) = self.early_exit {
            writeln!(s, "exit {}", code).unwrap();
        }
        if self.stops {
            s.push_str("kill -STOP $$\n");
        } else {
            s.push_str("sleep 30\n");
        }
        s.push_str("\"$prog\" \"$@\"\nst=$?\n");
        s.push_str("if [ \"$st\" -gt 128 ]; then st=$((131072 | (st - 128))); ");
        s.push_str("else st=$((65536 | st)); fi\n");
        writeln!(
            s,
            "printf '%s\\n%s\\n%s\\n' {} {} $((st | {})) > \"$ret\"",
            self.time, self.memory, self.flags
        )
        .unwrap();
        for line in &self.diagnostics {
            writeln!(s, "echo '{}' >> \"$ret\"", line).unwrap();
        }
        writeln!(s, "exit {}", self.exit).unwrap();
        s
    }
}

impl IsolationHelper for FakeHelper {
    fn command(&self, inv: &Invocation) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c")
            .arg(self.script())
            .arg("selfeval-fake-helper")
            .args(inv.to_args());
        cmd
    }
}

pub fn context(helper: FakeHelper) -> SandboxContext {
    SandboxContext::new(Arc::new(helper), Arc::new(FakeHelper::default())).with_options(
        SandboxOptions {
            start_timeout: Duration::from_secs(5),
            ..SandboxOptions::default()
        },
    )
}
