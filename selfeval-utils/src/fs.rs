use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use fs_extra::dir::CopyOptions;
use rand::Rng;

/// A not-yet-existing path `dir/<prefix><16 hex digits><suffix>`.
pub fn unique_path(dir: &Path, prefix: &str, suffix: &str) -> PathBuf {
    let mut rng = rand::thread_rng();
    loop {
        let name = format!("{}{:016x}{}", prefix, rng.gen::<u64>(), suffix);
        let path = dir.join(name);
        if !path.exists() {
            return path;
        }
    }
}

/// Copies a file or a whole directory into `dst_dir`, keeping its file name.
pub fn copy_to(src: &Path, dst_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_name()
        .with_context(|| format!("no file name: path = {}", src.display()))?;
    let dst = dst_dir.join(name);
    let context = || format!("failed to copy {} to {}", src.display(), dst.display());
    if src.is_dir() {
        let opts = CopyOptions {
            overwrite: true,
            ..CopyOptions::new()
        };
        fs_extra::dir::copy(src, dst_dir, &opts).with_context(context)?;
    } else {
        fs::copy(src, &dst).with_context(context)?;
    }
    Ok(dst)
}
