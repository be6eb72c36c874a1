use selfeval_protocol::{Limit, Status, Verdict, VerdictCode};

use std::convert::TryFrom;

/// What the helper reports about one finished target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Telemetry {
    pub time: u64,   // microseconds
    pub memory: u64, // bytes
    pub status: Status,
    pub diagnostics: Vec<String>,
}

impl Telemetry {
    /// Three numeric lines followed by free text up to the first empty line.
    pub fn parse(text: &str) -> Option<Self> {
        let mut lines = text.lines();
        let mut number = || -> Option<u64> { lines.next()?.trim().parse().ok() };
        let time = number()?;
        let memory = number()?;
        let status = number()?;
        let status = Status(u32::try_from(status).ok()?);
        let diagnostics = lines
            .take_while(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        Some(Self {
            time,
            memory,
            status,
            diagnostics,
        })
    }
}

/// Turns telemetry into a verdict against the strict (non-redundant) limit.
pub fn classify(t: &Telemetry, limit: &Limit) -> Verdict {
    let mut status = t.status;
    let (code, mut message) = if status.has(Status::FBD) {
        (VerdictCode::Fb, format!("syscall {}", status.0 & !Status::FBD))
    } else if status.has(Status::TLE) || limit.exceeds_time(t.time) {
        (VerdictCode::Tl, String::new())
    } else if status.has(Status::MLE) || limit.exceeds_memory(t.memory) {
        status.insert(Status::MLE);
        (VerdictCode::Ml, String::new())
    } else if status.has(Status::OLE) {
        (VerdictCode::Ol, String::new())
    } else if let Some(sig) = status.signal() {
        (VerdictCode::Re, format!("signal {}", sig))
    } else {
        match status.exit_code() {
            Some(code) if code != 0 => (VerdictCode::Re, format!("return {}", code)),
            _ => (VerdictCode::Ok, String::new()),
        }
    };

    for (i, line) in t.diagnostics.iter().enumerate() {
        message.push_str(if i < 2 { "\n  " } else { "\n    " });
        message.push_str(line);
    }

    Verdict {
        time: t.time,
        memory: t.memory,
        status,
        message,
        ..Verdict::new(code)
    }
}
