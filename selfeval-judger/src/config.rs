use selfeval_sandbox::{
    CpuPool, ExternalHelper, SandboxContext, SandboxOptions, Transport, DEFAULT_POOL_PATH,
};

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    #[validate]
    pub sandbox: Sandbox,

    pub cpu: Cpu,

    #[validate]
    pub judge: Judge,

    pub interactor: Interactor,

    #[validate]
    pub compiler: Compiler,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Sandbox {
    #[validate(custom = "non_empty_path")]
    pub helper: PathBuf,

    #[validate(custom = "non_empty_path")]
    pub helper_tiny: PathBuf,

    #[validate(range(min = 100, max = 60000))]
    pub start_timeout: u64, // milliseconds
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Cpu {
    pub pool: PathBuf,

    /// Hand out every logical CPU instead of one per physical core.
    pub logical: bool,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Judge {
    #[validate(custom = "non_empty_path")]
    pub workspace: PathBuf,

    pub isolate: bool,

    /// Leave scratch directories behind for debugging.
    pub keep_scratch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Interactor {
    pub relay: bool,
    pub echo: bool,

    /// Run both parties of an interactive test with the trusted helper.
    pub fast_sandbox: bool,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Compiler {
    #[validate(length(min = 1))]
    pub cxx: String,

    /// Runs builds of sources tagged `Makefile`.
    #[validate(length(min = 1))]
    pub make: String,

    pub include: Vec<PathBuf>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self {
            helper: "sandbox".into(),
            helper_tiny: "sandbox-tiny".into(),
            start_timeout: 10000,
        }
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self {
            pool: DEFAULT_POOL_PATH.into(),
            logical: false,
        }
    }
}

impl Default for Judge {
    fn default() -> Self {
        Self {
            workspace: env::temp_dir().join("selfeval"),
            isolate: false,
            keep_scratch: false,
        }
    }
}

impl Default for Interactor {
    fn default() -> Self {
        Self {
            relay: true,
            echo: false,
            fast_sandbox: false,
        }
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self {
            cxx: "g++".into(),
            make: "make".into(),
            include: Vec::new(),
        }
    }
}

fn non_empty_path(path: &Path) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("empty_path"));
    }
    Ok(())
}

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: path = {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config: path = {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn init_from_file(path: impl AsRef<Path>) -> Result<&'static Config> {
        let config = Self::from_file(path)?;
        Ok(Self::init(config))
    }

    /// Installs `config` unless one is installed already.
    pub fn init(config: Config) -> &'static Config {
        GLOBAL_CONFIG.get_or_init(|| config)
    }

    pub fn transport(&self) -> Transport {
        if self.interactor.relay {
            Transport::Relayed {
                echo: self.interactor.echo,
            }
        } else {
            Transport::Direct
        }
    }

    pub fn sandbox_context(&self) -> Result<SandboxContext> {
        let full = Arc::new(ExternalHelper::new(&self.sandbox.helper));
        let tiny = Arc::new(ExternalHelper::new(&self.sandbox.helper_tiny));
        let mut ctx = SandboxContext::new(full, tiny).with_options(SandboxOptions {
            start_timeout: Duration::from_millis(self.sandbox.start_timeout),
            ..SandboxOptions::default()
        });
        if self.judge.isolate {
            let pool = CpuPool::new(&self.cpu.pool, self.cpu.logical).with_context(|| {
                format!("failed to open cpu pool: path = {}", self.cpu.pool.display())
            })?;
            ctx = ctx.with_cpu_pool(pool);
        }
        Ok(ctx)
    }
}
