//! `kiln export`: lower a design to Verilog or FIRRTL text.

use kiln_export::ExportFormat;

use crate::pipeline::{load_design, load_settings, write_output};
use crate::{ExportArgs, GlobalArgs};

/// Runs the `kiln export` command.
pub fn run(args: &ExportArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let format = match args.format {
        Some(format) => format,
        None => load_settings(global)?
            .export
            .format
            .name()
            .parse::<ExportFormat>()?,
    };
    let design = load_design(&args.design)?;
    let text = kiln_export::export(&design, format)?;
    write_output(args.output.as_deref(), &text)?;
    if !global.quiet {
        if let Some(path) = &args.output {
            eprintln!("   Exported {format} to {path}");
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fixtures;

    fn export_to(dir: &std::path::Path, format: Option<ExportFormat>, config: &str) -> String {
        let config_path = dir.join("kiln.toml");
        std::fs::write(&config_path, config).unwrap();
        let out = dir.join("out.txt");
        let args = ExportArgs {
            design: fixtures::write_counter(dir),
            format,
            output: Some(out.to_string_lossy().into_owned()),
        };
        let global = GlobalArgs {
            quiet: true,
            config: Some(config_path.to_string_lossy().into_owned()),
            ..GlobalArgs::default()
        };
        assert_eq!(run(&args, &global).unwrap(), 0);
        std::fs::read_to_string(out).unwrap()
    }

    #[test]
    fn explicit_format_wins() {
        let dir = tempfile::tempdir().unwrap();
        let text = export_to(dir.path(), Some(ExportFormat::Firrtl), "[export]\nformat = \"verilog\"\n");
        assert!(text.starts_with("FIRRTL version"));
        assert!(text.contains("circuit top :"));
    }

    #[test]
    fn config_format_is_the_default() {
        let dir = tempfile::tempdir().unwrap();
        let text = export_to(dir.path(), None, "[export]\nformat = \"hierarchical\"\n");
        assert!(text.starts_with("// top flattened from 2 definitions\n"));
        let text = export_to(dir.path(), None, "");
        assert!(text.contains("module counter ("));
        assert!(text.contains("module top ("));
    }
}
