use crate::error::{Result, SandboxError};
use crate::sandbox::{Io, SandboxCommand, Stopped};
use crate::signal::InterruptBlock;

use selfeval_protocol::units::format_memory;
use selfeval_protocol::Verdict;

use std::io::{self, Read, Write};
use std::thread::{self, JoinHandle};
use std::{fmt, str};

use log::{debug, error};

const CHUNK: usize = 4096;

/// How the two parties of an interactive run are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Two threads forward the bytes and count them, optionally echoing
    /// the conversation to stdout.
    Relayed { echo: bool },
    /// The pipes are handed from one process to the other.
    Direct,
}

/// Bytes the solution sent and received. `None` when nobody counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transcript {
    pub sent: Option<u64>,
    pub received: Option<u64>,
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = |n: Option<u64>| n.map_or_else(|| "unknown size".to_owned(), format_memory);
        write!(
            f,
            "solution sent {}, received {}",
            size(self.sent),
            size(self.received)
        )
    }
}

#[derive(Debug, Clone)]
pub struct InteractiveOutcome {
    pub solution: Verdict,
    pub interactor: Verdict,
    pub transcript: Transcript,
}

/// Runs `solution` against `interactor`.
///
/// Both stdin and stdout of both commands are replaced. Each keeps its own
/// limit, grants and isolation. Both helpers reach their stopped state
/// before either is resumed.
pub fn run_interactive(
    solution: SandboxCommand,
    interactor: SandboxCommand,
    transport: Transport,
) -> Result<InteractiveOutcome> {
    match transport {
        Transport::Relayed { echo } => relayed(solution, interactor, echo),
        Transport::Direct => direct(solution, interactor),
    }
}

fn relayed(
    mut solution: SandboxCommand,
    mut interactor: SandboxCommand,
    echo: bool,
) -> Result<InteractiveOutcome> {
    solution.stdin(Io::Piped).stdout(Io::Piped);
    interactor.stdin(Io::Piped).stdout(Io::Piped);

    let mut sol = solution.start()?;
    let mut itr = interactor.start()?;

    let forward = spawn_relay(
        Side::Solution,
        echo,
        sol.take_stdout().ok_or_else(missing_pipe)?,
        itr.take_stdin().ok_or_else(missing_pipe)?,
    )?;
    let backward = spawn_relay(
        Side::Interactor,
        echo,
        itr.take_stdout().ok_or_else(missing_pipe)?,
        sol.take_stdin().ok_or_else(missing_pipe)?,
    )?;

    let (solution, interactor) = resume_and_wait(sol, itr)?;

    let transcript = Transcript {
        sent: join_relay(forward),
        received: join_relay(backward),
    };
    debug!("{}", transcript);

    Ok(InteractiveOutcome {
        solution,
        interactor,
        transcript,
    })
}

fn direct(
    mut solution: SandboxCommand,
    mut interactor: SandboxCommand,
) -> Result<InteractiveOutcome> {
    solution.stdin(Io::Piped).stdout(Io::Piped);
    let mut sol = solution.start()?;

    let to_interactor = sol.take_stdout().ok_or_else(missing_pipe)?;
    let to_solution = sol.take_stdin().ok_or_else(missing_pipe)?;
    interactor
        .stdin(Io::Stdio(to_interactor.into()))
        .stdout(Io::Stdio(to_solution.into()));
    let itr = interactor.start()?;

    let (solution, interactor) = resume_and_wait(sol, itr)?;
    Ok(InteractiveOutcome {
        solution,
        interactor,
        transcript: Transcript::default(),
    })
}

fn resume_and_wait(sol: Stopped, itr: Stopped) -> Result<(Verdict, Verdict)> {
    let sol = sol.cont()?;
    let mut itr = itr.cont()?;

    let solution = sol.wait_alongside(&mut itr)?;
    let interactor = itr.wait()?;
    Ok((solution, interactor))
}

fn missing_pipe() -> SandboxError {
    io::Error::new(io::ErrorKind::Other, "sandbox stdio is not piped").into()
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Solution,
    Interactor,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Solution => "solution",
            Side::Interactor => "interactor",
        })
    }
}

fn spawn_relay<R, W>(side: Side, echo: bool, src: R, dst: W) -> io::Result<JoinHandle<u64>>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::Builder::new()
        .name(format!("relay-{}", side))
        .spawn(move || {
            // interrupts are for the thread that owns the sandboxes
            let _block = InterruptBlock::new();
            relay(side, echo, src, dst)
        })
}

fn join_relay(handle: JoinHandle<u64>) -> Option<u64> {
    match handle.join() {
        Ok(n) => Some(n),
        Err(_) => {
            error!("relay thread panicked");
            None
        }
    }
}

/// Forwards until EOF. A closed destination ends the relay quietly.
fn relay(side: Side, echo: bool, mut src: impl Read, mut dst: impl Write) -> u64 {
    let mut buf = [0; CHUNK];
    let mut count = 0;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                error!("relay from {} failed: {}", side, err);
                break;
            }
        };
        count += n as u64;
        if echo {
            echo_chunk(side, &buf[..n]);
        }
        if let Err(err) = dst.write_all(&buf[..n]) {
            if err.kind() != io::ErrorKind::BrokenPipe {
                error!("relay from {} failed: {}", side, err);
            }
            break;
        }
    }
    count
}

fn echo_chunk(side: Side, data: &[u8]) {
    let text = match str::from_utf8(data) {
        Ok(text) => text,
        Err(_) => return,
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let _ = match side {
        Side::Solution => out.write_all(text.as_bytes()),
        Side::Interactor => write!(out, "\x1b[2;3m{}\x1b[0m", text),
    };
    let _ = out.flush();
}
