//! Locating `rustc` and building model libraries into a content-addressed cache.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use kiln_common::ContentHash;

use super::NativeOptions;
use crate::error::SimError;

/// A working `rustc` and its version string.
#[derive(Debug, Clone)]
pub struct NativeToolchain {
    rustc: PathBuf,
    version: String,
}

impl NativeToolchain {
    /// Runs `rustc --version` to check that the compiler is usable.
    ///
    /// Returns [`SimError::BackendUnavailable`] when it is not; callers use
    /// this to decide whether to fall back to another backend.
    pub fn detect(options: &NativeOptions) -> Result<Self, SimError> {
        let output = Command::new(&options.rustc)
            .arg("--version")
            .output()
            .map_err(|e| SimError::BackendUnavailable {
                reason: format!("cannot run {}: {e}", options.rustc.display()),
            })?;
        if !output.status.success() {
            return Err(SimError::BackendUnavailable {
                reason: format!(
                    "{} --version failed: {}",
                    options.rustc.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(%version, "found rustc");
        Ok(Self {
            rustc: options.rustc.clone(),
            version,
        })
    }

    /// The compiler's `--version` output.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Path of the library `source` compiles to under `options`.
    ///
    /// The name is derived from the source text, the optimization level, and
    /// the compiler version, so any change to either produces a fresh build.
    pub fn artifact_path(&self, source: &str, options: &NativeOptions) -> PathBuf {
        let level = [options.opt_level];
        let key = ContentHash::from_parts([source.as_bytes(), &level[..], self.version.as_bytes()]);
        options.cache_dir().join(format!(
            "{}kiln_{}{}",
            std::env::consts::DLL_PREFIX,
            key.short(),
            std::env::consts::DLL_SUFFIX
        ))
    }

    /// Compiles `source` into a shared library, reusing a cached build.
    ///
    /// The library is built in a scratch directory inside the cache and
    /// renamed into place, so concurrent builds of the same model never
    /// observe a partial file.
    pub fn compile(&self, source: &str, options: &NativeOptions) -> Result<PathBuf, SimError> {
        let path = self.artifact_path(source, options);
        if path.exists() {
            tracing::debug!(path = %path.display(), "native model cache hit");
            return Ok(path);
        }
        let dir = options.cache_dir();
        fs::create_dir_all(&dir)?;
        let scratch = tempfile::Builder::new().prefix("build-").tempdir_in(&dir)?;
        let src = scratch.path().join("model.rs");
        fs::write(&src, source)?;
        let out = scratch.path().join(path.file_name().unwrap_or_default());

        let started = Instant::now();
        let output = self.rustc_command(&src, &out, options.opt_level).output().map_err(|e| {
            SimError::BackendUnavailable {
                reason: format!("cannot run {}: {e}", self.rustc.display()),
            }
        })?;
        if !output.status.success() {
            return Err(SimError::BackendUnavailable {
                reason: format!(
                    "rustc failed to build the native model: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        install(&out, &path)?;
        tracing::info!(
            path = %path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compiled native model"
        );
        Ok(path)
    }

    fn rustc_command(&self, src: &Path, out: &Path, opt_level: u8) -> Command {
        let mut cmd = Command::new(&self.rustc);
        cmd.arg("--crate-type=cdylib")
            .arg("--crate-name=kiln_model")
            .arg("--edition=2021")
            .arg("-C")
            .arg(format!("opt-level={opt_level}"))
            .args(["-C", "panic=abort", "-A", "warnings"])
            .arg("-o")
            .arg(out)
            .arg(src);
        cmd
    }
}

fn install(built: &Path, path: &Path) -> Result<(), SimError> {
    match fs::rename(built, path) {
        Ok(()) => Ok(()),
        // Another process finished the same build first.
        Err(_) if path.exists() => Ok(()),
        Err(e) => Err(SimError::Io(io::Error::new(
            e.kind(),
            format!("cannot install {}: {e}", path.display()),
        ))),
    }
}
