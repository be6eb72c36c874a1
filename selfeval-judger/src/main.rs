use selfeval_judger::{lang, Config, Problem, Report};
use selfeval_protocol::units::{parse_memory, parse_time};
use selfeval_protocol::TestConfPatch;
use selfeval_sandbox::{install_interrupt_flag, SandboxError};
use selfeval_utils::tracing::setup_tracing;

use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::Result;
use dotenv::dotenv;
use structopt::StructOpt;
use tracing::{error, info};

const CONFIG_PATH: &str = "selfeval.toml";

#[derive(Debug, StructOpt)]
#[structopt(name = "selfeval", about = "Judges a solution against a local problem")]
struct Opt {
    /// Judger config [default: ./selfeval.toml if it exists]
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Language of the solution, e.g. `c++17:O2`
    #[structopt(long, default_value = "c++14:O2")]
    lang: String,

    /// Print the report as JSON
    #[structopt(long)]
    json: bool,

    /// Time limit of every case, e.g. `2s` or `500ms`
    #[structopt(long, parse(try_from_str = time_arg))]
    time: Option<u64>,

    /// Memory limit of every case, e.g. `256 MiB`
    #[structopt(long, parse(try_from_str = memory_arg))]
    memory: Option<u64>,

    /// Keep judging a group after a failed case
    #[structopt(long)]
    keep: bool,

    /// Problem manifest
    #[structopt(parse(from_os_str))]
    problem: PathBuf,

    /// Source or executable of the solution
    #[structopt(parse(from_os_str))]
    solution: PathBuf,
}

fn time_arg(s: &str) -> Result<u64, String> {
    parse_time(s).ok_or_else(|| format!("invalid time: {:?}", s))
}

fn memory_arg(s: &str) -> Result<u64, String> {
    parse_memory(s).ok_or_else(|| format!("invalid memory: {:?}", s))
}

impl Opt {
    fn overrides(&self) -> TestConfPatch {
        TestConfPatch {
            time: self.time,
            memory: self.memory,
            keep: if self.keep { Some(true) } else { None },
            ..TestConfPatch::default()
        }
    }
}

#[tracing::instrument(err)]
fn load_config(path: Option<PathBuf>) -> Result<&'static Config> {
    let path = match path {
        Some(path) => path,
        None => {
            let path = env::current_dir()?.join(CONFIG_PATH);
            if !path.exists() {
                info!("{} not found, using the default config", path.display());
                return Ok(Config::init(Config::default()));
            }
            path
        }
    };

    info!("loading config from {}", path.display());
    let config = Config::init_from_file(&path)?;
    info!("config is loaded:\n{:#?}", config);

    Ok(config)
}

fn run(opt: Opt) -> Result<()> {
    install_interrupt_flag()?;
    let config = load_config(opt.config.clone())?;

    let problem = Problem::load(&opt.problem)?;
    let language = lang::from_name(&opt.lang, &config.compiler)?;
    let overrides = opt.overrides();
    let report =
        selfeval_judger::judge_problem(config, &problem, &opt.solution, &*language, &overrides)?;

    if opt.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report);
        if let Report::CompileError { .. } = report {
            println!();
        }
    }
    Ok(())
}

fn is_interrupted(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<SandboxError>(),
            Some(SandboxError::Interrupted { .. })
        )
    })
}

fn main() {
    dotenv().ok();
    setup_tracing();

    let code = match run(Opt::from_args()) {
        Ok(()) => 0,
        Err(err) if is_interrupted(&err) => {
            error!("judging interrupted: {}", err);
            130
        }
        Err(err) => {
            error!("FATAL: {:?}", err);
            2
        }
    };
    process::exit(code)
}
