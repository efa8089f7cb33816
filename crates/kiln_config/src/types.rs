//! Configuration types deserialized from `kiln.toml`.

use std::path::PathBuf;

use serde::Deserialize;

/// The top-level configuration parsed from `kiln.toml`.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct KilnConfig {
    /// Simulation session settings.
    #[serde(default)]
    pub sim: SimConfig,
    /// Waveform dump settings.
    #[serde(default)]
    pub waveform: WaveformConfig,
    /// Export settings.
    #[serde(default)]
    pub export: ExportConfig,
}

/// Settings for `kiln sim`.
#[derive(Debug, Deserialize, PartialEq)]
pub struct SimConfig {
    /// Backend to try first.
    #[serde(default)]
    pub backend: Backend,
    /// Whether an unavailable backend falls back to the next slower one.
    #[serde(default = "default_true")]
    pub fallback: bool,
    /// Input port toggled once per cycle.
    #[serde(default = "default_clock")]
    pub clock: String,
    /// Cycles to run when none are given on the command line.
    #[serde(default = "default_cycles")]
    pub cycles: u64,
    /// Signal whose rising edges count as completed frames.
    #[serde(default)]
    pub frame_signal: Option<String>,
    /// Native backend build settings.
    #[serde(default)]
    pub native: NativeConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            fallback: true,
            clock: default_clock(),
            cycles: default_cycles(),
            frame_signal: None,
            native: NativeConfig::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_clock() -> String {
    "clk".to_string()
}

fn default_cycles() -> u64 {
    100
}

/// Simulation backend choice.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Tree-walking interpreter (default).
    #[default]
    Interpreter,
    /// In-process compiled op tapes.
    Compiled,
    /// Shared library built with `rustc`.
    Native,
}

impl Backend {
    /// The lowercase name used in `kiln.toml` and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Backend::Interpreter => "interpreter",
            Backend::Compiled => "compiled",
            Backend::Native => "native",
        }
    }
}

/// Settings for building native models.
#[derive(Debug, Deserialize, PartialEq)]
pub struct NativeConfig {
    /// Library cache directory; the system temp directory when unset.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Compiler executable.
    #[serde(default = "default_rustc")]
    pub rustc: PathBuf,
    /// Optimization level, 0 through 3.
    #[serde(default = "default_opt_level")]
    pub opt_level: u8,
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            rustc: default_rustc(),
            opt_level: default_opt_level(),
        }
    }
}

fn default_rustc() -> PathBuf {
    PathBuf::from("rustc")
}

fn default_opt_level() -> u8 {
    3
}

/// Waveform dump settings.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct WaveformConfig {
    /// VCD output path; no dump when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Export settings.
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct ExportConfig {
    /// Output format when none is given on the command line.
    #[serde(default)]
    pub format: ExportFormat,
}

/// Export text format.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// One Verilog module per definition (default).
    #[default]
    Verilog,
    /// FIRRTL circuit.
    Firrtl,
    /// Flattened single-module Verilog.
    Hierarchical,
}

impl ExportFormat {
    /// The lowercase name used in `kiln.toml` and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            ExportFormat::Verilog => "verilog",
            ExportFormat::Firrtl => "firrtl",
            ExportFormat::Hierarchical => "hierarchical",
        }
    }
}
