use crate::status::Status;
use crate::units::{format_memory, format_time};

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictCode {
    Ok,
    Ac,
    Wa,
    Pt,
    Re,
    Tl,
    Ml,
    Ol,
    Il,
    Fb,
    Fail,
    Ig,
}

impl VerdictCode {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictCode::Ok => "ok",
            VerdictCode::Ac => "ac",
            VerdictCode::Wa => "wa",
            VerdictCode::Pt => "pt",
            VerdictCode::Re => "re",
            VerdictCode::Tl => "tl",
            VerdictCode::Ml => "ml",
            VerdictCode::Ol => "ol",
            VerdictCode::Il => "il",
            VerdictCode::Fb => "fb",
            VerdictCode::Fail => "fail",
            VerdictCode::Ig => "ig",
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            VerdictCode::Ok => "OK",
            VerdictCode::Ac => "Accepted",
            VerdictCode::Wa => "Wrong Answer",
            VerdictCode::Pt => "Points",
            VerdictCode::Re => "Runtime Error",
            VerdictCode::Tl => "Time Limit Exceed",
            VerdictCode::Ml => "Memory Limit Exceed",
            VerdictCode::Ol => "Output Limit Exceed",
            VerdictCode::Il => "Illegal Interaction Format",
            VerdictCode::Fb => "Forbidden System Call",
            VerdictCode::Fail => "FAIL",
            VerdictCode::Ig => "Ignored",
        }
    }
}

impl fmt::Display for VerdictCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub code: VerdictCode,
    pub time: u64,   // microseconds
    pub memory: u64, // bytes
    pub status: Status,
    pub message: String,

    /// In `[0, 1]`, only present on `pt`.
    pub score: Option<f64>,

    /// A `wa` caused by malformed output (bad format, early eof, unknown
    /// checker text) rather than by a plain wrong answer.
    #[serde(default)]
    pub abnormal: bool,
}

impl Verdict {
    pub fn new(code: VerdictCode) -> Self {
        Self {
            code,
            time: 0,
            memory: 0,
            status: Status::default(),
            message: String::new(),
            score: None,
            abnormal: false,
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::new(VerdictCode::Fail)
        }
    }

    pub fn ignored() -> Self {
        Self::new(VerdictCode::Ig)
    }

    /// `ac`, or `pt` with a strictly positive score.
    pub fn is_passing(&self) -> bool {
        match self.code {
            VerdictCode::Ac => true,
            VerdictCode::Pt => self.score.map_or(false, |s| s > 0.0),
            _ => false,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Verdict({}, {}, {}, stat={}, msg={:?})",
            self.code,
            format_time(self.time),
            format_memory(self.memory),
            self.status,
            self.message
        )
    }
}
