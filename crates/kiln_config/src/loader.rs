//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use std::path::Path;

/// File name looked up in a project directory.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates `kiln.toml` from a project directory.
pub fn load_config(project_dir: &Path) -> Result<KilnConfig, ConfigError> {
    load_config_file(&project_dir.join(CONFIG_FILE))
}

/// Loads and validates a configuration file at an explicit path.
pub fn load_config_file(path: &Path) -> Result<KilnConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

/// Parses and validates a configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<KilnConfig, ConfigError> {
    let config: KilnConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that required fields are present and values are in range.
fn validate_config(config: &KilnConfig) -> Result<(), ConfigError> {
    if config.sim.clock.is_empty() {
        return Err(ConfigError::MissingField("sim.clock".to_string()));
    }
    if config.sim.frame_signal.as_deref() == Some("") {
        return Err(ConfigError::ValidationError(
            "sim.frame_signal must not be empty".to_string(),
        ));
    }
    if config.sim.native.opt_level > 3 {
        return Err(ConfigError::ValidationError(format!(
            "sim.native.opt_level must be 0..=3, got {}",
            config.sim.native.opt_level
        )));
    }
    if config.sim.native.rustc.as_os_str().is_empty() {
        return Err(ConfigError::MissingField("sim.native.rustc".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Backend, ExportFormat};
    use std::path::PathBuf;

    #[test]
    fn empty_config_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config, KilnConfig::default());
        assert_eq!(config.sim.backend, Backend::Interpreter);
        assert!(config.sim.fallback);
        assert_eq!(config.sim.clock, "clk");
        assert_eq!(config.sim.cycles, 100);
        assert!(config.sim.frame_signal.is_none());
        assert_eq!(config.sim.native.rustc, PathBuf::from("rustc"));
        assert_eq!(config.sim.native.opt_level, 3);
        assert!(config.waveform.path.is_none());
        assert_eq!(config.export.format, ExportFormat::Verilog);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[sim]
backend = "native"
fallback = false
clock = "sys_clk"
cycles = 70224
frame_signal = "vsync"

[sim.native]
cache_dir = ".kiln/native"
rustc = "/opt/rust/bin/rustc"
opt_level = 2

[waveform]
path = "out.vcd"

[export]
format = "firrtl"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.sim.backend, Backend::Native);
        assert!(!config.sim.fallback);
        assert_eq!(config.sim.clock, "sys_clk");
        assert_eq!(config.sim.cycles, 70224);
        assert_eq!(config.sim.frame_signal.as_deref(), Some("vsync"));
        assert_eq!(
            config.sim.native.cache_dir.as_deref(),
            Some(Path::new(".kiln/native"))
        );
        assert_eq!(config.sim.native.rustc, PathBuf::from("/opt/rust/bin/rustc"));
        assert_eq!(config.sim.native.opt_level, 2);
        assert_eq!(config.waveform.path.as_deref(), Some(Path::new("out.vcd")));
        assert_eq!(config.export.format, ExportFormat::Firrtl);
    }

    #[test]
    fn empty_clock_errors() {
        let err = load_config_from_str("[sim]\nclock = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "sim.clock"));
    }

    #[test]
    fn empty_frame_signal_errors() {
        let err = load_config_from_str("[sim]\nframe_signal = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn opt_level_out_of_range_errors() {
        let err = load_config_from_str("[sim.native]\nopt_level = 4\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
        assert!(err.to_string().contains("got 4"));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn loads_from_project_directory() {
        let dir = std::env::temp_dir().join(format!("kiln-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(CONFIG_FILE), "[sim]\ncycles = 7\n").unwrap();
        let config = load_config(&dir).unwrap();
        assert_eq!(config.sim.cycles, 7);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn io_error_from_nonexistent_dir() {
        let err = load_config(Path::new("/nonexistent/dir")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
