use super::*;

use selfeval_sandbox::Io;

use anyhow::Context as _;

pub struct CCpp {
    pub std: CCppStd,
    pub opt: Vec<String>,
    pub cxx: String,
    pub include: Vec<PathBuf>,

    /// Build with `make` and the `Makefile` beside the source.
    pub make: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CCppStd {
    Cpp11,
    Cpp14,
    Cpp17,
    Cpp20,
    Cpp23,
    Cpp26,
}

impl CCppStd {
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "c++11" => Ok(CCppStd::Cpp11),
            "c++" | "c++14" => Ok(CCppStd::Cpp14),
            "c++17" => Ok(CCppStd::Cpp17),
            "c++20" => Ok(CCppStd::Cpp20),
            "c++23" => Ok(CCppStd::Cpp23),
            "c++26" => Ok(CCppStd::Cpp26),
            _ => Err(anyhow::format_err!("invalid c++ std: {:?}", s)),
        }
    }

    /// Spelled the way older compilers still accept.
    fn as_flag(self) -> &'static str {
        match self {
            CCppStd::Cpp11 => "c++11",
            CCppStd::Cpp14 => "c++14",
            CCppStd::Cpp17 => "c++17",
            CCppStd::Cpp20 => "c++2a",
            CCppStd::Cpp23 => "c++2b",
            CCppStd::Cpp26 => "c++2c",
        }
    }
}

impl CCpp {
    pub fn new(name: &str, flags: &str, compiler: &Compiler) -> Result<Self> {
        let std = CCppStd::from_str(name)?;
        let mut opt = Vec::new();
        let mut make = None;
        for flag in flags.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            if flag.starts_with('O') {
                opt.push(format!("-{}", flag));
            } else if flag == "Makefile" {
                make = Some(compiler.make.clone());
            } else {
                anyhow::bail!("unknown c++ flag: {:?}", flag);
            }
        }
        Ok(Self {
            std,
            opt,
            cxx: compiler.cxx.clone(),
            include: compiler.include.clone(),
            make,
        })
    }

    fn command(&self, graders: &[String]) -> Program {
        if let Some(ref make) = self.make {
            let mut prog = Program::new(make);
            prog.arg(self.exe_name());
            return prog;
        }

        let mut prog = Program::new(&self.cxx);
        prog.arg(format!("-std={}", self.std.as_flag()));
        prog.args(vec!["-Wall", "-Wextra", "-Wshadow", "-Wconversion"]);
        prog.args(self.opt.iter().cloned());
        for dir in &self.include {
            prog.arg(format!("-I{}", dir.display()));
        }
        prog.arg(self.src_name());
        prog.args(graders.iter().cloned());
        prog.arg("-o").arg(self.exe_name());
        prog
    }
}

impl Language for CCpp {
    fn lang_name(&self) -> &str {
        "cpp"
    }

    fn src_name(&self) -> &str {
        match self.make {
            Some(_) => "program.cpp",
            None => "a.cpp",
        }
    }

    fn exe_name(&self) -> &str {
        match self.make {
            Some(_) => "program",
            None => "a.out",
        }
    }

    fn companions(&self, source: &Path) -> Result<Vec<PathBuf>> {
        if self.make.is_none() {
            return Ok(Vec::new());
        }
        let dir = source.parent().unwrap_or_else(|| Path::new("."));
        let makefile = dir.join("Makefile");
        if !makefile.is_file() {
            anyhow::bail!("`Makefile` flag is set but {} is missing", makefile.display());
        }
        Ok(vec![makefile])
    }

    fn compile(
        &self,
        ctx: &SandboxContext,
        workspace: &Path,
        graders: &[String],
    ) -> Result<Verdict> {
        let prog = self.command(graders);
        debug!("compile command: {:?}", prog);

        let mut cmd = ctx.command(&prog, compile_limit());
        cmd.cwd(workspace).trusted(true).stderr(Io::Inherit);
        let verdict = cmd.run().context("failed to run compiler")?;
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn std_and_flags() {
        let compiler = Compiler {
            cxx: "g++-12".into(),
            include: vec!["/opt/testlib".into()],
            ..Compiler::default()
        };
        let lang = CCpp::new("c++20", "O2, O3", &compiler).unwrap();
        let prog = lang.command(&["grader.cpp".to_owned()]);
        assert_eq!(prog.path, PathBuf::from("g++-12"));
        assert_eq!(
            prog.args,
            [
                "-std=c++2a",
                "-Wall",
                "-Wextra",
                "-Wshadow",
                "-Wconversion",
                "-O2",
                "-O3",
                "-I/opt/testlib",
                "a.cpp",
                "grader.cpp",
                "-o",
                "a.out",
            ]
        );

        assert_eq!(CCpp::new("c++", "", &compiler).unwrap().std, CCppStd::Cpp14);
        assert_eq!(CCpp::new("c++26", "", &compiler).unwrap().std.as_flag(), "c++2c");
        assert!(CCpp::new("c++98", "", &compiler).is_err());
        assert!(CCpp::new("c++17", "fast", &compiler).is_err());
    }

    #[test]
    fn makefile_build() {
        let lang = CCpp::new("c++17", "Makefile, O2", &Compiler::default()).unwrap();
        let prog = lang.command(&[]);
        assert_eq!(prog.path, PathBuf::from("make"));
        assert_eq!(prog.args, ["program"]);
        assert_eq!(lang.src_name(), "program.cpp");

        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("sol.cpp");
        fs::write(&source, "int main() {}\n").unwrap();
        assert!(lang.companions(&source).is_err());

        fs::write(dir.path().join("Makefile"), "program: program.cpp\n").unwrap();
        assert_eq!(
            lang.companions(&source).unwrap(),
            vec![dir.path().join("Makefile")]
        );

        let plain = CCpp::new("c++17", "O2", &Compiler::default()).unwrap();
        assert!(plain.companions(&source).unwrap().is_empty());
    }
}
