use selfeval_protocol::{JudgeConf, Program, Test, TestConfPatch};

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use serde::Deserialize;

/// A problem manifest (`problem.toml`).
///
/// Relative paths are resolved against the directory holding the manifest.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Problem {
    pub judge: JudgeConf,

    /// Base test configuration every group starts from.
    pub test: TestConfPatch,

    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Group {
    pub cases: Vec<(PathBuf, PathBuf)>,

    #[serde(default)]
    pub conf: TestConfPatch,
}

impl Problem {
    pub fn load(path: &Path) -> Result<Problem> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read problem: path = {}", path.display()))?;
        let mut problem: Problem = toml::from_str(&content)
            .with_context(|| format!("failed to parse problem: path = {}", path.display()))?;
        problem.validate()?;
        if let Some(base) = path.parent() {
            problem.resolve(base);
        }
        Ok(problem)
    }

    pub fn validate(&self) -> Result<()> {
        let judge = &self.judge;
        if judge.name.is_some() && judge.interactor.is_some() {
            anyhow::bail!("an interactive problem cannot use file I/O (`name` is set)");
        }
        if let Some(ref name) = judge.name {
            if name.is_empty() || name.contains('/') {
                anyhow::bail!("invalid program name: {:?}", name);
            }
        }
        Ok(())
    }

    fn resolve(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        let judge = &mut self.judge;
        let programs = judge.checker.iter_mut().chain(judge.interactor.iter_mut());
        programs.for_each(|prog: &mut Program| join(&mut prog.path));
        judge.graders.iter_mut().for_each(join);
        judge.headers.iter_mut().for_each(join);
        judge.additional.iter_mut().for_each(join);
        for group in &mut self.groups {
            for (input, answer) in &mut group.cases {
                join(input);
                join(answer);
            }
        }
    }

    /// One [`Test`] per group; `overrides` wins over each group's overlay.
    pub fn tests(&self, overrides: &TestConfPatch) -> Vec<Test> {
        self.groups
            .iter()
            .map(|group| Test::new(group.cases.clone(), group.conf.and(overrides)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selfeval_protocol::units::{mib, sec};
    use selfeval_protocol::TestConf;

    const MANIFEST: &str = r#"
        [judge]
        retry = 1
        headers = ["include/grader.h"]

        [judge.checker]
        path = "chk"

        [test]
        time = "2s"
        memory = "256 MiB"

        [[groups]]
        cases = [["1.in", "1.ans"], ["2.in", "2.ans"]]

        [[groups]]
        cases = [["3.in", "3.ans"]]
        conf = { time = "3s", keep = true }
    "#;

    #[test]
    fn load_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("problem.toml");
        fs::write(&path, MANIFEST).unwrap();

        let problem = Problem::load(&path).unwrap();
        assert_eq!(problem.judge.retry, 1);
        assert_eq!(problem.judge.checker.as_ref().unwrap().path, dir.path().join("chk"));
        assert_eq!(problem.judge.headers, vec![dir.path().join("include/grader.h")]);
        assert_eq!(problem.groups.len(), 2);
        assert_eq!(problem.groups[0].cases[1].1, dir.path().join("2.ans"));

        let base = TestConf::default().merge(&problem.test);
        assert_eq!(base.limit.time, sec(2));
        assert_eq!(base.limit.memory, mib(256));

        let cli = TestConfPatch {
            memory: Some(mib(64)),
            ..TestConfPatch::default()
        };
        let tests = problem.tests(&cli);
        let second = base.merge(&tests[1].conf);
        assert_eq!(second.limit.time, sec(3));
        assert_eq!(second.limit.memory, mib(64));
        assert!(second.keep);
        let first = base.merge(&tests[0].conf);
        assert_eq!(first.limit.time, sec(2));
        assert!(!first.keep);
        assert!(tests.iter().all(|t| t.results.is_empty()));
    }

    #[test]
    fn file_io_and_interactor_conflict() {
        let problem: Problem = toml::from_str(
            r#"
            [judge]
            name = "game"
            interactor = { path = "itr" }
            "#,
        )
        .unwrap();
        assert!(problem.validate().is_err());

        let problem: Problem = toml::from_str("[judge]\nname = \"a/b\"\n").unwrap();
        assert!(problem.validate().is_err());
    }
}
