#![allow(dead_code)]

use selfeval_judger::{Jury, JurySettings};
use selfeval_protocol::Program;
use selfeval_sandbox::{Invocation, IsolationHelper, SandboxContext, SandboxOptions, Transport};
use selfeval_utils::tracing::setup_tracing;

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Once};
use std::time::Duration;

pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        dotenv::dotenv().ok();
        setup_tracing();
    });
}

/// Speaks the helper argument vector, runs the target unrestricted and
/// reports `time`, `memory` and `flags` as telemetry.
#[derive(Debug, Clone)]
pub struct FakeHelper {
    pub time: u64,
    pub memory: u64,
    pub flags: u32,

    /// Appended with one line per invocation.
    pub counter: Option<PathBuf>,
}

impl Default for FakeHelper {
    fn default() -> Self {
        Self {
            time: 1000,
            memory: 1 << 20,
            flags: 0,
            counter: None,
        }
    }
}

impl FakeHelper {
    fn script(&self) -> String {
        let mut s = String::new();
        s.push_str("prog=\"$1\"; ret=\"$2\"; shift 7; n=\"$1\"; shift; shift $((n * 2))\n");
        if let Some(ref counter) = self.counter {
            writeln!(s, "echo x >> '{}'", counter.display()).unwrap();
        }
        s.push_str("kill -STOP $$\n");
        s.push_str("\"$prog\" \"$@\"\nst=$?\n");
        s.push_str("if [ \"$st\" -gt 128 ]; then st=$((131072 | (st - 128))); ");
        s.push_str("else st=$((65536 | st)); fi\n");
        writeln!(
            s,
            "printf '%s\\n%s\\n%s\\n' {} {} $((st | {})) > \"$ret\"",
            self.time, self.memory, self.flags
        )
        .unwrap();
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

pub fn settings(workspace: &Path) -> JurySettings {
    JurySettings {
        workspace: workspace.to_owned(),
        isolate: false,
        keep_scratch: false,
        transport: Transport::Relayed { echo: false },
        trust_interactive: false,
    }
}

pub fn jury(workspace: &Path, helper: FakeHelper) -> Jury {
    Jury::new(context(helper), settings(workspace)).unwrap()
}

/// `script` run by `/bin/sh`; extra arguments land in `$1`, `$2`, ...
pub fn sh(name: &str, script: &str) -> Program {
    let mut prog = Program::new("/bin/sh");
    prog.args(vec!["-c", script, name]);
    prog
}
