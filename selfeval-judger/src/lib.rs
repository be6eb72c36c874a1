#![deny(clippy::all)]

pub mod checker;
pub mod config;
pub mod jury;
pub mod lang;
pub mod problem;

pub use self::config::Config;
pub use self::jury::{Jury, JurySettings};
pub use self::problem::Problem;

use self::lang::{Compiled, Language, Sources};

use selfeval_protocol::units::{format_memory, format_time};
use selfeval_protocol::{Program, Test, TestConf, TestConfPatch, Verdict, VerdictCode};

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tempfile::TempDir;
use tracing::info;

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Report {
    CompileError { verdict: Verdict },
    Judged { groups: Vec<GroupReport> },
}

#[derive(Debug, Serialize)]
pub struct GroupReport {
    pub conf: TestConf,
    pub cases: Vec<CaseReport>,
    pub passed: usize,

    /// Mean over the cases; `ac` counts as 1, `pt` as its score.
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct CaseReport {
    pub input: PathBuf,
    pub answer: PathBuf,
    pub verdict: Verdict,
}

impl GroupReport {
    pub fn new(conf: TestConf, test: Test) -> Self {
        let cases: Vec<CaseReport> = test
            .cases
            .into_iter()
            .zip(test.results)
            .map(|((input, answer), verdict)| CaseReport {
                input,
                answer,
                verdict,
            })
            .collect();
        let passed = cases.iter().filter(|c| c.verdict.is_passing()).count();
        let total: f64 = cases.iter().map(|c| points(&c.verdict)).sum();
        let score = if cases.is_empty() {
            0.0
        } else {
            total / cases.len() as f64
        };
        Self {
            conf,
            cases,
            passed,
            score,
        }
    }
}

fn points(v: &Verdict) -> f64 {
    match v.code {
        VerdictCode::Ac => 1.0,
        VerdictCode::Pt => v.score.unwrap_or(0.0),
        _ => 0.0,
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = match self {
            Report::CompileError { verdict } => {
                return write!(f, "Compile Error: {}", verdict);
            }
            Report::Judged { groups } => groups,
        };
        for (i, group) in groups.iter().enumerate() {
            for (j, case) in group.cases.iter().enumerate() {
                let v = &case.verdict;
                write!(
                    f,
                    "#{}.{:<3} {:<4} {:>9} {:>10}",
                    i + 1,
                    j + 1,
                    v.code,
                    format_time(v.time),
                    format_memory(v.memory)
                )?;
                if let Some(score) = v.score {
                    write!(f, "  {:.3}", score)?;
                }
                if !v.message.is_empty() {
                    write!(f, "  {}", v.message)?;
                }
                writeln!(f)?;
            }
            writeln!(
                f,
                "group {}: {}/{} passed, score {:.3}",
                i + 1,
                group.passed,
                group.cases.len(),
                group.score
            )?;
        }
        Ok(())
    }
}

/// Build directories that must outlive judging.
#[derive(Default)]
struct Builds(Vec<TempDir>);

impl Builds {
    /// The built program with the arguments of `original`, or the failure.
    fn keep(
        &mut self,
        compiled: Compiled,
        original: &Program,
    ) -> std::result::Result<Program, Verdict> {
        match compiled {
            Compiled::Program { program, build } => {
                self.0.extend(build);
                Ok(Program {
                    path: program.path,
                    ..original.clone()
                })
            }
            Compiled::Failed(verdict) => Err(verdict),
        }
    }
}

/// Compiles `solution` (and any checker or interactor given as source) and
/// judges it on every group of `problem`.
pub fn judge_problem(
    config: &Config,
    problem: &Problem,
    solution: &Path,
    language: &dyn Language,
    overrides: &TestConfPatch,
) -> Result<Report> {
    let jury = Jury::from_config(config)?;
    let ctx = jury.context();
    let workspace = &jury.settings().workspace;
    let mut builds = Builds::default();

    let sources = Sources {
        headers: &problem.judge.headers,
        graders: &problem.judge.graders,
    };
    let compiled = lang::compile_program(ctx, workspace, solution, language, sources)?;
    let prog = match builds.keep(compiled, &Program::new(solution)) {
        Ok(prog) => prog,
        Err(verdict) => return Ok(Report::CompileError { verdict }),
    };

    let mut judge = problem.judge.clone();
    let tools_to_build = [
        ("checker", judge.checker.as_mut(), &problem.judge.checker_lang),
        ("interactor", judge.interactor.as_mut(), &problem.judge.interactor_lang),
    ];
    for (who, tool, spec) in tools_to_build {
        let tool = match tool {
            Some(tool) => tool,
            None => continue,
        };
        let spec = spec.as_deref().unwrap_or(lang::DEFAULT_LANG);
        let tool_lang = lang::from_name(spec, &config.compiler)?;
        let compiled =
            lang::compile_program(ctx, workspace, &tool.path, &*tool_lang, Sources::default())?;
        match builds.keep(compiled, tool) {
            Ok(built) => *tool = built,
            Err(verdict) => anyhow::bail!("failed to compile {}: {}", who, verdict),
        }
    }

    let base = TestConf::default().merge(&problem.test);
    let mut groups = Vec::with_capacity(problem.groups.len());
    for (i, mut test) in problem.tests(overrides).into_iter().enumerate() {
        let conf = base.merge(&test.conf);
        jury.judge_group(&prog, &base, &judge, &mut test)?;
        let report = GroupReport::new(conf, test);
        info!(
            group = i + 1,
            passed = report.passed,
            total = report.cases.len(),
            "group judged"
        );
        groups.push(report);
    }
    Ok(Report::Judged { groups })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_score() {
        let mut test = Test::new(
            vec![
                ("1.in".into(), "1.ans".into()),
                ("2.in".into(), "2.ans".into()),
                ("3.in".into(), "3.ans".into()),
                ("4.in".into(), "4.ans".into()),
            ],
            TestConfPatch::default(),
        );
        let mut pt = Verdict::new(VerdictCode::Pt);
        pt.score = Some(0.5);
        test.results = vec![
            Verdict::new(VerdictCode::Ac),
            pt,
            Verdict::new(VerdictCode::Wa),
            Verdict::ignored(),
        ];
        let report = GroupReport::new(TestConf::default(), test);
        assert_eq!(report.passed, 2);
        assert!((report.score - 0.375).abs() < 1e-9);

        let text = Report::Judged {
            groups: vec![report],
        }
        .to_string();
        assert!(text.contains("group 1: 2/4 passed, score 0.375"));
        assert!(text.contains("0.500"));
    }

    #[test]
    fn tools_use_their_own_language() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let solution = dir.path().join("sol.sh");
        fs::write(&solution, "#!/bin/sh\ncat\n").unwrap();
        fs::set_permissions(&solution, fs::Permissions::from_mode(0o755)).unwrap();
        let checker = dir.path().join("check.pas");
        fs::write(&checker, "begin end.\n").unwrap();

        let mut config = Config::default();
        config.judge.workspace = dir.path().join("work");
        let mut problem = Problem::default();
        problem.judge.checker = Some(Program::new(&checker));
        problem.judge.checker_lang = Some("pascal".into());

        let language = lang::from_name(lang::DEFAULT_LANG, &config.compiler).unwrap();
        let overrides = TestConfPatch::default();
        let err = judge_problem(&config, &problem, &solution, &*language, &overrides)
            .unwrap_err();
        assert!(err.to_string().contains("unknown language"), "{}", err);
    }

    #[test]
    fn json_report() {
        let report = Report::CompileError {
            verdict: Verdict::new(VerdictCode::Re),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["result"], "compile_error");
        assert_eq!(json["verdict"]["code"], "re");
    }
}
