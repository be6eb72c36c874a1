#![deny(clippy::all)]

pub mod conf;
pub mod limit;
pub mod program;
pub mod status;
pub mod units;
pub mod verdict;

pub use self::conf::{JudgeConf, Test, TestConf, TestConfPatch};
pub use self::limit::{Enforcement, Limit};
pub use self::program::Program;
pub use self::status::Status;
pub use self::verdict::{Verdict, VerdictCode};
