use crate::checker::read_checklog;
use crate::config::Config;

use selfeval_protocol::{JudgeConf, Program, Status, Test, TestConf, Verdict, VerdictCode};
use selfeval_sandbox::{run_interactive, Access, Io, SandboxContext, Transport};
use selfeval_utils::fs::{copy_to, unique_path};

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Interactor statuses that point at the judge rather than the contestant.
const INTERACTOR_CRASH: u32 = Status::SIG | Status::MLE | Status::OLE | Status::FBD;

#[derive(Debug, Clone)]
pub struct JurySettings {
    /// Parent of every scratch directory.
    pub workspace: PathBuf,

    /// Bind each solution run to one CPU slot.
    pub isolate: bool,

    pub keep_scratch: bool,
    pub transport: Transport,

    /// Run both parties of an interactive test with the trusted helper.
    pub trust_interactive: bool,
}

impl JurySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workspace: config.judge.workspace.clone(),
            isolate: config.judge.isolate,
            keep_scratch: config.judge.keep_scratch,
            transport: config.transport(),
            trust_interactive: config.interactor.fast_sandbox,
        }
    }
}

pub struct Jury {
    ctx: SandboxContext,
    settings: JurySettings,
}

/// Files of one attempt inside its scratch directory.
struct Staged {
    input: PathBuf,
    output: PathBuf,
    checklog: PathBuf,
    file_io: bool,
}

struct Attempt {
    solution: Verdict,
    interactor: Option<Verdict>,
}

impl Jury {
    pub fn new(ctx: SandboxContext, mut settings: JurySettings) -> Result<Self> {
        let workspace = &settings.workspace;
        fs::create_dir_all(workspace).with_context(|| {
            format!("failed to create workspace: path = {}", workspace.display())
        })?;
        settings.workspace = fs::canonicalize(workspace)?;
        Ok(Self { ctx, settings })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config.sandbox_context()?, JurySettings::from_config(config))
    }

    pub fn context(&self) -> &SandboxContext {
        &self.ctx
    }

    pub fn settings(&self) -> &JurySettings {
        &self.settings
    }

    /// Judges `prog` on one (input, answer) pair.
    ///
    /// Only engine failures are returned as errors; everything that went
    /// wrong with the solution, the checker or the interactor is a verdict.
    pub fn judge_one(
        &self,
        prog: &Program,
        conf: &TestConf,
        judge: &JudgeConf,
        input: &Path,
        answer: &Path,
    ) -> Result<Verdict> {
        let input = absolute(input)?;
        let answer = absolute(answer)?;

        let mut retry = judge.retry;
        let (scratch, staged, attempt) = loop {
            let scratch = tempfile::Builder::new()
                .prefix("case-")
                .tempdir_in(&self.settings.workspace)
                .context("failed to create scratch directory")?;
            let staged = self.stage(scratch.path(), judge, &input)?;
            let attempt = self.attempt(prog, conf, judge, scratch.path(), &staged)?;

            let sol = &attempt.solution;
            if sol.code == VerdictCode::Tl && !sol.status.has(Status::TLE) && retry > 0 {
                retry -= 1;
                warn!(
                    time = sol.time,
                    retry,
                    "time limit exceeded but the helper did not kill the run, retrying"
                );
                self.release(scratch);
                continue;
            }
            break (scratch, staged, attempt);
        };

        let verdict = self.decide(judge, scratch.path(), &staged, attempt, &input, &answer)?;
        info!(input = %input.display(), "{}", verdict);
        self.release(scratch);
        Ok(verdict)
    }

    /// Judges every case of `test` in order, appending to `test.results`.
    pub fn judge_group(
        &self,
        prog: &Program,
        base: &TestConf,
        judge: &JudgeConf,
        test: &mut Test,
    ) -> Result<()> {
        let conf = base.merge(&test.conf);
        let mut stopped = false;
        for (input, answer) in &test.cases {
            if stopped {
                test.results.push(Verdict::ignored());
                continue;
            }
            let verdict = self.judge_one(prog, &conf, judge, input, answer)?;
            if !verdict.is_passing() && !conf.keep {
                debug!("group stops after {}", verdict.code);
                stopped = true;
            }
            test.results.push(verdict);
        }
        Ok(())
    }

    fn stage(&self, dir: &Path, judge: &JudgeConf, input: &Path) -> Result<Staged> {
        for file in &judge.additional {
            let dst = copy_to(file, dir)?;
            debug!("staged {}", dst.display());
        }

        let (staged_input, output, file_io) = match judge.name {
            Some(ref name) => {
                let output = dir.join(format!("{}.out", name));
                File::create(&output)
                    .with_context(|| format!("failed to create {}", output.display()))?;
                (dir.join(format!("{}.in", name)), output, true)
            }
            None => (
                unique_path(dir, "", ".in"),
                unique_path(dir, "", ".out"),
                false,
            ),
        };
        fs::copy(input, &staged_input).with_context(|| {
            format!(
                "failed to stage input: {} -> {}",
                input.display(),
                staged_input.display()
            )
        })?;

        Ok(Staged {
            input: staged_input,
            output,
            checklog: unique_path(dir, "", ".log"),
            file_io,
        })
    }

    fn attempt(
        &self,
        prog: &Program,
        conf: &TestConf,
        judge: &JudgeConf,
        dir: &Path,
        staged: &Staged,
    ) -> Result<Attempt> {
        let isolate = self.settings.isolate;
        let mut sol = self.ctx.command(prog, conf.limit());
        sol.cwd(dir).isolate(isolate);

        let interactor = match judge.interactor {
            Some(ref interactor) => interactor,
            None => {
                if !staged.file_io {
                    sol.stdin(Io::Path(staged.input.clone()))
                        .stdout(Io::Path(staged.output.clone()));
                }
                sol.grant(&staged.input, Access::Read)
                    .grant(&staged.output, Access::Write);
                let solution = sol.run()?;
                return Ok(Attempt {
                    solution,
                    interactor: None,
                });
            }
        };

        let trusted = self.settings.trust_interactive;
        sol.trusted(trusted);

        let args = vec![path_arg(&staged.input)?, path_arg(&staged.output)?];
        let program = interactor.with_args(args);
        let limit = judge.interactor_limit.unwrap_or_else(|| conf.limit());
        let mut itr = self.ctx.command(&program, limit);
        itr.cwd(dir)
            .isolate(isolate)
            .trusted(trusted)
            .stderr(Io::Path(staged.checklog.clone()))
            .grant(&staged.input, Access::Read)
            .grant(&staged.output, Access::Write)
            .grant(&staged.checklog, Access::Write);

        let outcome = run_interactive(sol, itr, self.settings.transport)?;
        if let Transport::Relayed { .. } = self.settings.transport {
            info!("{}", outcome.transcript);
        }
        Ok(Attempt {
            solution: outcome.solution,
            interactor: Some(outcome.interactor),
        })
    }

    fn decide(
        &self,
        judge: &JudgeConf,
        dir: &Path,
        staged: &Staged,
        attempt: Attempt,
        input: &Path,
        answer: &Path,
    ) -> Result<Verdict> {
        let Attempt {
            solution,
            interactor,
        } = attempt;

        if let Some(itr) = interactor {
            if itr.status.has(INTERACTOR_CRASH) {
                warn!("interactor crashed: {}", itr);
                return Ok(Verdict {
                    code: VerdictCode::Fail,
                    message: format!("interactor failed: {}", itr),
                    score: None,
                    ..solution
                });
            }
            if itr.code != VerdictCode::Ok {
                let diag = read_checklog(&itr, &staged.checklog, "interactor");
                if diag.code == VerdictCode::Fail && solution.code != VerdictCode::Ok {
                    return Ok(solution);
                }
                if diag.abnormal {
                    return Ok(Verdict {
                        code: VerdictCode::Il,
                        ..diag.apply(&solution)
                    });
                }
                return Ok(diag.apply(&solution));
            }
        }

        if solution.code != VerdictCode::Ok {
            return Ok(solution);
        }

        match judge.checker {
            Some(ref checker) => {
                let program = checker.with_args(vec![
                    path_arg(input)?,
                    path_arg(&staged.output)?,
                    path_arg(answer)?,
                ]);
                let mut cmd = self.ctx.command(&program, judge.checker_limit);
                cmd.cwd(dir)
                    .stderr(Io::Path(staged.checklog.clone()))
                    .grant(input, Access::Read)
                    .grant(&staged.output, Access::Read)
                    .grant(answer, Access::Read)
                    .grant(&staged.checklog, Access::Write);
                let run = cmd.run()?;
                debug!("checker: {}", run);
                Ok(read_checklog(&run, &staged.checklog, "checker").apply(&solution))
            }
            None => {
                let mut diff = Program::new("diff");
                diff.args(vec!["-Z", "-q", "--strip-trailing-cr"]).args(vec![
                    path_arg(&staged.output)?,
                    path_arg(answer)?,
                ]);
                let mut cmd = self.ctx.command(&diff, judge.checker_limit);
                cmd.cwd(dir).trusted(true);
                let run = cmd.run()?;
                let (code, message) = match (run.code, run.status.exit_code()) {
                    (VerdictCode::Ok, _) => (VerdictCode::Ac, String::new()),
                    (VerdictCode::Re, Some(1)) => (VerdictCode::Wa, String::new()),
                    _ => {
                        warn!("diff failed: {}", run);
                        (VerdictCode::Fail, format!("diff failed: {}", run))
                    }
                };
                Ok(Verdict {
                    code,
                    message,
                    ..solution
                })
            }
        }
    }

    fn release(&self, scratch: TempDir) {
        if self.settings.keep_scratch {
            let path = scratch.keep();
            info!("scratch kept at {}", path.display());
        } else if let Err(err) = scratch.close() {
            warn!("failed to remove scratch directory: {}", err);
        }
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).with_context(|| format!("no such file: {}", path.display()))
}

fn path_arg(path: &Path) -> Result<String> {
    path.to_str()
        .map(str::to_owned)
        .with_context(|| format!("non UTF-8 path: {}", path.display()))
}
