use crate::limit::Limit;
use crate::program::Program;
use crate::units;
use crate::verdict::Verdict;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Resolved configuration of a test group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TestConf {
    pub limit: Limit,

    /// Run every case of the group even after a failure.
    pub keep: bool,
}

/// A partial [`TestConf`]; every field that is set wins over the base.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestConfPatch {
    #[serde(with = "units::opt_time")]
    pub time: Option<u64>,

    #[serde(with = "units::opt_time")]
    pub time_redundancy: Option<u64>,

    #[serde(with = "units::opt_memory")]
    pub memory: Option<u64>,

    #[serde(with = "units::opt_memory")]
    pub memory_redundancy: Option<u64>,

    #[serde(with = "units::opt_memory")]
    pub stack: Option<u64>,

    #[serde(with = "units::opt_memory")]
    pub fsize: Option<u64>,

    pub keep: Option<bool>,
}

impl TestConf {
    pub fn merge(&self, patch: &TestConfPatch) -> TestConf {
        let base = &self.limit;
        TestConf {
            limit: Limit {
                time: patch.time.unwrap_or(base.time),
                time_redundancy: patch.time_redundancy.unwrap_or(base.time_redundancy),
                memory: patch.memory.unwrap_or(base.memory),
                memory_redundancy: patch.memory_redundancy.unwrap_or(base.memory_redundancy),
                stack: patch.stack.or(base.stack),
                fsize: patch.fsize.unwrap_or(base.fsize),
            },
            keep: patch.keep.unwrap_or(self.keep),
        }
    }

    pub fn limit(&self) -> Limit {
        self.limit
    }
}

impl TestConfPatch {
    /// Layers `overlay` on top of `self`.
    pub fn and(&self, overlay: &TestConfPatch) -> TestConfPatch {
        TestConfPatch {
            time: overlay.time.or(self.time),
            time_redundancy: overlay.time_redundancy.or(self.time_redundancy),
            memory: overlay.memory.or(self.memory),
            memory_redundancy: overlay.memory_redundancy.or(self.memory_redundancy),
            stack: overlay.stack.or(self.stack),
            fsize: overlay.fsize.or(self.fsize),
            keep: overlay.keep.or(self.keep),
        }
    }
}

/// Problem-level judging configuration, shared read-only by every test.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JudgeConf {
    /// Selects file I/O through `<name>.in` / `<name>.out`.
    pub name: Option<String>,

    pub checker: Option<Program>,
    pub checker_limit: Limit,

    /// Language of a checker given as source, `c++14:O2` when unset.
    pub checker_lang: Option<String>,

    pub interactor: Option<Program>,
    pub interactor_lang: Option<String>,

    /// `None` runs the interactor under the test's own limit.
    pub interactor_limit: Option<Limit>,

    pub graders: Vec<PathBuf>,
    pub headers: Vec<PathBuf>,
    pub additional: Vec<PathBuf>,

    /// How many times a suspicious `tl` may be re-run.
    pub retry: u32,
}

/// A test group: ordered (input, answer) pairs and their verdicts.
#[derive(Debug, Clone, Default)]
pub struct Test {
    pub cases: Vec<(PathBuf, PathBuf)>,
    pub conf: TestConfPatch,
    pub results: Vec<Verdict>,
}

impl Test {
    pub fn new(cases: Vec<(PathBuf, PathBuf)>, conf: TestConfPatch) -> Self {
        Self {
            cases,
            conf,
            results: Vec::new(),
        }
    }
}
