mod common;

use self::common::{context, init, FakeHelper};

use selfeval_protocol::{Limit, Program, VerdictCode};
use selfeval_sandbox::{run_interactive, Io, Transcript, Transport};

use std::fs;
use std::path::Path;

use anyhow::Result;

const SOLUTION: &str = "printf '3\\n'; cat > /dev/null";
const INTERACTOR: &str = "read x; printf done; echo \"$x\" > \"$2\"; echo 'ok 1.000000' >&2";

fn sh(script: &str, extra: &[&Path]) -> Program {
    let mut prog = Program::new("/bin/sh");
    prog.args(vec!["-c", script, "interactor"]);
    prog.args(extra.iter().map(|p| p.display().to_string()));
    prog
}

#[test]
fn relayed_conversation() -> Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    let log = dir.path().join("log");
    fs::write(&input, "")?;

    let ctx = context(FakeHelper::default());
    let solution = ctx.command(&sh(SOLUTION, &[]), Limit::default());
    let mut interactor = ctx.command(&sh(INTERACTOR, &[&input, &output]), Limit::default());
    interactor.stderr(Io::Path(log.clone()));

    let outcome = run_interactive(solution, interactor, Transport::Relayed { echo: false })?;
    assert_eq!(outcome.solution.code, VerdictCode::Ok, "{}", outcome.solution);
    assert_eq!(outcome.interactor.code, VerdictCode::Ok, "{}", outcome.interactor);
    assert_eq!(
        outcome.transcript,
        Transcript {
            sent: Some(2),
            received: Some(4),
        }
    );
    assert_eq!(fs::read_to_string(&output)?, "3\n");
    assert_eq!(fs::read_to_string(&log)?, "ok 1.000000\n");
    Ok(())
}

#[test]
fn direct_conversation() -> Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    fs::write(&input, "")?;

    let ctx = context(FakeHelper::default());
    let solution = ctx.command(&sh(SOLUTION, &[]), Limit::default());
    let interactor = ctx.command(&sh(INTERACTOR, &[&input, &output]), Limit::default());

    let outcome = run_interactive(solution, interactor, Transport::Direct)?;
    assert_eq!(outcome.solution.code, VerdictCode::Ok, "{}", outcome.solution);
    assert_eq!(outcome.interactor.code, VerdictCode::Ok, "{}", outcome.interactor);
    assert_eq!(outcome.transcript, Transcript::default());
    assert_eq!(fs::read_to_string(&output)?, "3\n");
    Ok(())
}

#[test]
fn limits_are_independent() -> Result<()> {
    init();
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    fs::write(&input, "")?;

    let ctx = context(FakeHelper {
        time: 5000,
        ..FakeHelper::default()
    });
    let tight = Limit {
        time: 4000,
        ..Limit::default()
    };
    let solution = ctx.command(&sh(SOLUTION, &[]), tight);
    let interactor = ctx.command(&sh(INTERACTOR, &[&input, &output]), Limit::default());

    let outcome = run_interactive(solution, interactor, Transport::Relayed { echo: true })?;
    assert_eq!(outcome.solution.code, VerdictCode::Tl);
    assert_eq!(outcome.interactor.code, VerdictCode::Ok);
    Ok(())
}
