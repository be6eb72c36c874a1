use crate::units::{self, mib, msec, sec};

use std::os::raw::c_ulong;

use serde::{Deserialize, Serialize};

/// The largest value the helper accepts for a resource limit.
pub const RLIMIT_INFINITY: u64 = c_ulong::MAX as u64;

/// Resource ceilings of one run.
///
/// `time` and `memory` decide the verdict. The redundancy margins are only
/// handed to the helper so that clock jitter does not kill a run that would
/// pass anyway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limit {
    #[serde(with = "units::time")]
    pub time: u64, // microseconds

    #[serde(with = "units::time")]
    pub time_redundancy: u64, // microseconds

    #[serde(with = "units::memory")]
    pub memory: u64, // bytes

    #[serde(with = "units::memory")]
    pub memory_redundancy: u64, // bytes

    /// `None` means the stack may grow as large as the memory limit.
    #[serde(with = "units::opt_memory")]
    pub stack: Option<u64>, // bytes

    #[serde(with = "units::memory")]
    pub fsize: u64, // bytes
}

/// The values actually passed to the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enforcement {
    pub time: u64,
    pub memory: u64,
    pub stack: u64,
    pub fsize: u64,
}

impl Default for Limit {
    fn default() -> Self {
        Self {
            time: sec(1),
            time_redundancy: msec(200),
            memory: mib(512),
            memory_redundancy: mib(4),
            stack: None,
            fsize: mib(64),
        }
    }
}

impl Limit {
    pub fn exceeds_time(&self, measured: u64) -> bool {
        measured > self.time
    }

    pub fn exceeds_memory(&self, measured: u64) -> bool {
        measured > self.memory
    }

    pub fn effective_time(&self) -> u64 {
        self.time.saturating_add(self.time_redundancy)
    }

    pub fn effective_memory(&self) -> u64 {
        self.memory.saturating_add(self.memory_redundancy)
    }

    pub fn enforcement(&self) -> Enforcement {
        let clamp = |x: u64| x.min(RLIMIT_INFINITY);
        let memory = self.effective_memory();
        Enforcement {
            time: clamp(self.effective_time()),
            memory: clamp(memory),
            stack: clamp(self.stack.unwrap_or(memory)),
            fsize: clamp(self.fsize),
        }
    }
}

impl Enforcement {
    /// Decimal strings in helper argument order: time, memory, stack, fsize.
    pub fn to_args(&self) -> [String; 4] {
        [
            self.time.to_string(),
            self.memory.to_string(),
            self.stack.to_string(),
            self.fsize.to_string(),
        ]
    }
}
