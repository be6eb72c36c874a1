pub mod c_cpp;

use crate::config::Compiler;

use selfeval_protocol::units::sec;
use selfeval_protocol::{Limit, Program, Verdict, VerdictCode};
use selfeval_sandbox::SandboxContext;
use selfeval_utils::fs::copy_to;

use std::fs::{self, File};
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use tempfile::TempDir;
use tracing::{debug, info};

pub const DEFAULT_LANG: &str = "c++14:O2";

pub trait Language {
    fn lang_name(&self) -> &str;
    fn src_name(&self) -> &str;
    fn exe_name(&self) -> &str;

    /// Files that must be copied next to `source` before building.
    fn companions(&self, _source: &Path) -> Result<Vec<PathBuf>> {
        Ok(Vec::new())
    }

    /// Builds `src_name` into `exe_name` inside `workspace`.
    fn compile(
        &self,
        ctx: &SandboxContext,
        workspace: &Path,
        graders: &[String],
    ) -> Result<Verdict>;
}

/// Output of [`compile_program`].
#[derive(Debug)]
pub enum Compiled {
    /// `build` owns the directory of a freshly built executable and removes
    /// it when dropped.
    Program {
        program: Program,
        build: Option<TempDir>,
    },
    Failed(Verdict),
}

/// Files that go next to the source when building.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sources<'a> {
    pub headers: &'a [PathBuf],
    pub graders: &'a [PathBuf],
}

/// Parses `c++17:O2`-like specs.
pub fn from_name(spec: &str, compiler: &Compiler) -> Result<Box<dyn Language>> {
    let (name, flags) = match spec.find(':') {
        Some(i) => (&spec[..i], &spec[i + 1..]),
        None => (spec, ""),
    };
    if name.starts_with("c++") {
        let lang = c_cpp::CCpp::new(name, flags, compiler)?;
        return Ok(Box::new(lang));
    }
    anyhow::bail!("unknown language: {:?}", spec)
}

/// Limit of one compiler invocation.
pub fn compile_limit() -> Limit {
    Limit {
        time: sec(10),
        ..Limit::default()
    }
}

pub fn compile_program(
    ctx: &SandboxContext,
    workspace: &Path,
    source: &Path,
    lang: &dyn Language,
    sources: Sources<'_>,
) -> Result<Compiled> {
    if is_executable(source)? {
        let path = fs::canonicalize(source)?;
        debug!("{} is executable, skip compiling", path.display());
        return Ok(Compiled::Program {
            program: Program::new(path),
            build: None,
        });
    }

    fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace: path = {}", workspace.display()))?;
    let build = tempfile::Builder::new()
        .prefix("build-")
        .tempdir_in(workspace)
        .context("failed to create build directory")?;
    let dir = build.path();

    for header in sources.headers {
        copy_to(header, dir)?;
    }
    for file in lang.companions(source)? {
        copy_to(&file, dir)?;
    }
    let mut graders = Vec::with_capacity(sources.graders.len());
    for grader in sources.graders {
        let dst = copy_to(grader, dir)?;
        if let Some(name) = dst.file_name().and_then(|s| s.to_str()) {
            graders.push(name.to_owned());
        }
    }
    let src = dir.join(lang.src_name());
    fs::copy(source, &src)
        .with_context(|| format!("failed to copy source: path = {}", source.display()))?;

    info!(lang = lang.lang_name(), "compiling {}", source.display());
    let verdict = lang.compile(ctx, dir, &graders)?;
    if verdict.code != VerdictCode::Ok {
        info!("compile error: {}", verdict);
        return Ok(Compiled::Failed(verdict));
    }

    let program = Program::new(dir.join(lang.exe_name()));
    Ok(Compiled::Program {
        program,
        build: Some(build),
    })
}

/// ELF binaries and files with any execute bit are run as they are.
pub fn is_executable(path: &Path) -> Result<bool> {
    let meta = fs::metadata(path)
        .with_context(|| format!("failed to read source: path = {}", path.display()))?;
    if !meta.is_file() {
        anyhow::bail!("not a file: {}", path.display());
    }
    if meta.permissions().mode() & 0o111 != 0 {
        return Ok(true);
    }
    let mut magic = [0; 4];
    let mut file = File::open(path)?;
    let is_elf = match file.read_exact(&mut magic) {
        Ok(()) => &magic == b"\x7fELF",
        Err(_) => false,
    };
    Ok(is_elf)
}
