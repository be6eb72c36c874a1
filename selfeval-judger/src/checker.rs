use selfeval_protocol::{Verdict, VerdictCode};

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use tracing::error;

/// Exit code of a checker that awards partial points.
const POINTS: u32 = 7;

/// What a checker or an interactor reported about a solution.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnosis {
    pub code: VerdictCode,
    pub message: String,
    pub score: Option<f64>,
    pub abnormal: bool,
}

impl Diagnosis {
    fn new(code: VerdictCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            score: None,
            abnormal: false,
        }
    }

    /// `solution` with the code, message and score replaced.
    pub fn apply(self, solution: &Verdict) -> Verdict {
        Verdict {
            code: self.code,
            message: self.message,
            score: self.score,
            abnormal: self.abnormal,
            ..solution.clone()
        }
    }
}

/// Reads the first line of `log` and interprets it against `run`, the
/// sandbox verdict of the checker itself.
pub fn read_checklog(run: &Verdict, log: &Path, who: &str) -> Diagnosis {
    match first_line(log) {
        Ok(line) => read_diagnosis(run, &line, who),
        Err(err) => {
            error!("failed to read {} log: path = {}, error = {}", who, log.display(), err);
            Diagnosis::new(
                VerdictCode::Fail,
                format!("{} log is unreadable: {}", who, err),
            )
        }
    }
}

pub fn read_diagnosis(run: &Verdict, line: &str, who: &str) -> Diagnosis {
    match run.code {
        VerdictCode::Ok => Diagnosis::new(VerdictCode::Ac, strip(line, "ok ")),
        VerdictCode::Re => match run.status.exit_code() {
            Some(POINTS) => points(strip(line, "points ")),
            Some(_) => wrong_answer(line),
            None => Diagnosis::new(VerdictCode::Fail, format!("{} failed: {}", who, run)),
        },
        _ => Diagnosis::new(VerdictCode::Fail, format!("{} failed: {}", who, run)),
    }
}

fn wrong_answer(line: &str) -> Diagnosis {
    if let Some(msg) = line.strip_prefix("wrong answer ") {
        return Diagnosis::new(VerdictCode::Wa, msg);
    }
    let msg = ["wrong output format ", "unexpected eof "]
        .iter()
        .find_map(|prefix| line.strip_prefix(*prefix))
        .unwrap_or(line);
    Diagnosis {
        abnormal: true,
        ..Diagnosis::new(VerdictCode::Wa, msg)
    }
}

fn points(text: &str) -> Diagnosis {
    let mut parts = text.splitn(2, ' ');
    let token = parts.next().unwrap_or("");
    let message = parts.next().unwrap_or("");
    let score = match token.parse::<f64>() {
        Ok(s) if s.is_finite() && (0.0..=1.0).contains(&s) => s,
        _ => {
            error!("invalid checker score: {:?}", token);
            0.0
        }
    };
    Diagnosis {
        score: Some(score),
        ..Diagnosis::new(VerdictCode::Pt, message)
    }
}

fn strip<'a>(line: &'a str, prefix: &str) -> &'a str {
    line.strip_prefix(prefix).unwrap_or(line)
}

fn first_line(path: &Path) -> io::Result<String> {
    let mut line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut line)?;
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use selfeval_protocol::Status;

    fn exited(code: u32) -> Verdict {
        let mut v = Verdict::new(if code == 0 {
            VerdictCode::Ok
        } else {
            VerdictCode::Re
        });
        v.status = Status(Status::EXIT | code);
        v
    }

    #[test]
    fn partial_points() {
        let d = read_diagnosis(&exited(7), "points 0.5 close enough", "checker");
        assert_eq!(d.code, VerdictCode::Pt);
        assert_eq!(d.score, Some(0.5));
        assert_eq!(d.message, "close enough");
        assert!(!d.abnormal);

        let d = read_diagnosis(&exited(7), "points 1", "checker");
        assert_eq!(d.score, Some(1.0));
        assert_eq!(d.message, "");

        for bad in &["points abc nope", "points 1.5 too much", "points -0.1 x", "points NaN x"] {
            let d = read_diagnosis(&exited(7), bad, "checker");
            assert_eq!(d.code, VerdictCode::Pt);
            assert_eq!(d.score, Some(0.0), "{}", bad);
        }
    }

    #[test]
    fn wrong_answers() {
        let d = read_diagnosis(&exited(1), "wrong answer token mismatch", "checker");
        assert_eq!(d.code, VerdictCode::Wa);
        assert_eq!(d.message, "token mismatch");
        assert!(!d.abnormal);

        let d = read_diagnosis(&exited(3), "wrong output format expected int", "checker");
        assert_eq!(d.message, "expected int");
        assert!(d.abnormal);

        let d = read_diagnosis(&exited(1), "unexpected eof reading line", "checker");
        assert_eq!(d.message, "reading line");
        assert!(d.abnormal);

        let d = read_diagnosis(&exited(2), "FAIL answer file broken", "checker");
        assert_eq!(d.code, VerdictCode::Wa);
        assert_eq!(d.message, "FAIL answer file broken");
        assert!(d.abnormal);
    }

    #[test]
    fn accepted_and_crashed() {
        let d = read_diagnosis(&exited(0), "ok 1.000000", "checker");
        assert_eq!(d.code, VerdictCode::Ac);
        assert_eq!(d.message, "1.000000");

        let mut crashed = Verdict::new(VerdictCode::Re);
        crashed.status = Status(Status::SIG | 11);
        let d = read_diagnosis(&crashed, "ok", "interactor");
        assert_eq!(d.code, VerdictCode::Fail);
        assert!(d.message.starts_with("interactor failed: "));

        let d = read_diagnosis(&Verdict::new(VerdictCode::Tl), "", "checker");
        assert_eq!(d.code, VerdictCode::Fail);
    }

    #[test]
    fn log_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("checklog");
        std::fs::write(&log, "wrong answer 1st numbers differ\r\nsecond line\n").unwrap();
        let d = read_checklog(&exited(1), &log, "checker");
        assert_eq!(d.message, "1st numbers differ");

        let d = read_checklog(&exited(0), &dir.path().join("missing"), "checker");
        assert_eq!(d.code, VerdictCode::Fail);

        let mut solution = Verdict::new(VerdictCode::Ok);
        solution.time = 1234;
        let v = read_diagnosis(&exited(7), "points 0.25 quarter", "checker").apply(&solution);
        assert_eq!(v.code, VerdictCode::Pt);
        assert_eq!(v.time, 1234);
        assert!(v.is_passing());
    }
}
