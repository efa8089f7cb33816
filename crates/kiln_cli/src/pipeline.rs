//! Shared command steps: configuration lookup, design loading, output.

use std::path::{Path, PathBuf};

use kiln_config::{KilnConfig, CONFIG_FILE};
use kiln_ir::Design;

use crate::GlobalArgs;

/// Loads the configuration named by `--config`, else `./kiln.toml` when it
/// exists, else the defaults.
pub fn load_settings(global: &GlobalArgs) -> Result<KilnConfig, Box<dyn std::error::Error>> {
    if let Some(path) = &global.config {
        return Ok(kiln_config::load_config_file(Path::new(path))?);
    }
    let cwd = std::env::current_dir()?;
    if cwd.join(CONFIG_FILE).is_file() {
        return Ok(kiln_config::load_config(&cwd)?);
    }
    Ok(KilnConfig::default())
}

/// Reads and checks a design from its JSON file.
pub fn load_design(path: &str) -> Result<Design, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read design '{path}': {e}"))?;
    let design = Design::from_json(&text)?;
    tracing::debug!(path, modules = design.module_count(), "loaded design");
    Ok(design)
}

/// Writes `text` to `output`, or stdout when no path is given.
pub fn write_output(output: Option<&str>, text: &str) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        Some(path) => {
            let path = PathBuf::from(path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, text)?;
        }
        None => print!("{text}"),
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[sim]\ncycles = 12\n").unwrap();
        let global = GlobalArgs {
            config: Some(path.to_string_lossy().into_owned()),
            ..GlobalArgs::default()
        };
        assert_eq!(load_settings(&global).unwrap().sim.cycles, 12);
    }

    #[test]
    fn missing_explicit_config_errors() {
        let global = GlobalArgs {
            config: Some("/nonexistent/kiln.toml".into()),
            ..GlobalArgs::default()
        };
        assert!(load_settings(&global).is_err());
    }

    #[test]
    fn load_design_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = fixtures::write_counter(dir.path());
        let design = load_design(&path).unwrap();
        assert_eq!(design.module_count(), 2);
    }

    #[test]
    fn load_design_names_missing_file() {
        let err = load_design("/nonexistent/top.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/top.json"));
    }

    #[test]
    fn write_output_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/top.v");
        write_output(Some(path.to_str().unwrap()), "module top;\n").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "module top;\n");
    }
}
