use std::fmt;

use serde::{Deserialize, Serialize};

/// Status word written by the isolation helper.
///
/// The high bits are flags, the low 16 bits carry the exit code, the signal
/// number or the forbidden syscall number depending on which flag is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Status(pub u32);

impl Status {
    pub const EXIT: u32 = 0x10000;
    pub const SIG: u32 = 0x20000;
    pub const TLE: u32 = 0x40000;
    pub const MLE: u32 = 0x80000;
    pub const OLE: u32 = 0x100000;
    pub const FBD: u32 = 0x200000;

    const PAYLOAD: u32 = 0xffff;

    pub fn has(self, flags: u32) -> bool {
        self.0 & flags != 0
    }

    pub fn insert(&mut self, flags: u32) {
        self.0 |= flags;
    }

    pub fn payload(self) -> u32 {
        self.0 & Self::PAYLOAD
    }

    /// Exit code of a normally terminated process.
    pub fn exit_code(self) -> Option<u32> {
        if self.has(Self::EXIT) {
            Some(self.payload())
        } else {
            None
        }
    }

    pub fn signal(self) -> Option<u32> {
        if self.has(Self::SIG) {
            Some(self.payload())
        } else {
            None
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
