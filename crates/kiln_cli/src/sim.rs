//! `kiln sim`: run a design for a number of cycles.
//!
//! Flattens the design, opens a session on the requested backend (falling
//! back to slower ones when allowed), applies pokes, optionally pulses reset,
//! runs, and prints the requested peeks as `name = 0x...` lines on stdout.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use kiln_common::BitVec;
use kiln_config::KilnConfig;
use kiln_sim::{create_backend, Backend, BackendKind, NativeOptions, SimError, SimOptions, VcdRecorder};

use crate::pipeline::{load_design, load_settings};
use crate::{GlobalArgs, SimArgs};

const RESET_SIGNAL: &str = "rst";

/// Runs the `kiln sim` command.
pub fn run(args: &SimArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let config = load_settings(global)?;
    let design = load_design(&args.design)?;
    let flat = kiln_flatten::flatten(&design)?;
    let netlist = Arc::new(flat.netlist);

    let requested = match args.backend {
        Some(kind) => kind,
        None => config.sim.backend.name().parse::<BackendKind>()?,
    };
    let fallback = config.sim.fallback && !args.no_fallback;
    let options = sim_options(&config);
    let mut sim = open_backend(requested, fallback, &netlist, &options)?;

    if !global.quiet {
        eprintln!(
            "   Simulating {} on {}",
            netlist.names().resolve(netlist.module().name),
            sim.kind()
        );
    }

    let vcd = args
        .vcd
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| config.waveform.path.clone());
    if let Some(path) = &vcd {
        let file = File::create(path)
            .map_err(|e| format!("cannot create waveform '{}': {e}", path.display()))?;
        sim.attach_waveform(Box::new(VcdRecorder::new(BufWriter::new(file))))?;
    }

    for poke in &args.poke {
        let (name, value) = parse_poke(sim.as_ref(), poke)?;
        sim.poke(&name, &value)?;
    }
    if args.reset {
        sim.poke_u64(RESET_SIGNAL, 1)?;
        sim.step()?;
        sim.poke_u64(RESET_SIGNAL, 0)?;
    }

    let cycles = args.cycles.unwrap_or(config.sim.cycles);
    let summary = sim.run_cycles(cycles)?;
    sim.settle()?;
    sim.finish_waveform()?;

    for name in &args.peek {
        let value = sim.peek(name)?;
        println!("{name} = 0x{}", value.to_hex());
    }
    if !global.quiet {
        eprintln!(
            "   Finished {} cycles ({} frames)",
            summary.cycles_run, summary.frames_completed
        );
        if let Some(path) = &vcd {
            eprintln!("   Waveform written to {}", path.display());
        }
    }
    Ok(0)
}

fn sim_options(config: &KilnConfig) -> SimOptions {
    let native = &config.sim.native;
    SimOptions {
        clock: config.sim.clock.clone(),
        frame_signal: config.sim.frame_signal.clone(),
        native: NativeOptions {
            cache_dir: native.cache_dir.clone(),
            rustc: native.rustc.clone(),
            opt_level: native.opt_level,
        },
    }
}

/// Backends to try for `requested`, fastest first.
fn candidates(requested: BackendKind, fallback: bool) -> Vec<BackendKind> {
    if !fallback {
        return vec![requested];
    }
    BackendKind::ALL
        .into_iter()
        .skip_while(|k| *k != requested)
        .collect()
}

/// Opens the first backend in the fallback chain that can run `netlist`.
///
/// Only capability errors move down the chain; anything else is reported.
fn open_backend(
    requested: BackendKind,
    fallback: bool,
    netlist: &Arc<kiln_ir::Netlist>,
    options: &SimOptions,
) -> Result<Box<dyn Backend>, SimError> {
    let chain = candidates(requested, fallback);
    let mut last = None;
    for kind in chain {
        match create_backend(kind, Arc::clone(netlist), options) {
            Ok(sim) => return Ok(sim),
            Err(e @ (SimError::BackendUnavailable { .. } | SimError::Unsupported { .. })) => {
                tracing::warn!(backend = %kind, error = %e, "backend cannot run this design");
                last = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last.unwrap_or_else(|| SimError::BackendUnavailable {
        reason: format!("no backend available for {requested}"),
    }))
}

/// Splits `name=value` and fits the value to the signal's width.
fn parse_poke(sim: &dyn Backend, text: &str) -> Result<(String, BitVec), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("invalid poke '{text}' (expected name=value)"))?;
    let name = name.trim();
    let netlist = sim.netlist();
    let id = netlist
        .find_signal(name)
        .ok_or_else(|| format!("unknown signal '{name}'"))?;
    let width = netlist.signal(id).width;
    let value = BitVec::parse(value, width)
        .ok_or_else(|| format!("invalid value '{value}' for '{name}'"))?;
    Ok((name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fixtures;

    fn args(design: String) -> SimArgs {
        SimArgs {
            design,
            backend: Some(BackendKind::Interpreter),
            no_fallback: false,
            cycles: Some(5),
            poke: vec!["en=1".into()],
            peek: vec!["q".into()],
            vcd: None,
            reset: true,
        }
    }

    fn quiet_config(dir: &std::path::Path) -> GlobalArgs {
        let path = dir.join("kiln.toml");
        std::fs::write(&path, "").unwrap();
        GlobalArgs {
            quiet: true,
            config: Some(path.to_string_lossy().into_owned()),
            ..GlobalArgs::default()
        }
    }

    #[test]
    fn fallback_chain_runs_fastest_first() {
        assert_eq!(
            candidates(BackendKind::Native, true),
            vec![BackendKind::Native, BackendKind::Compiled, BackendKind::Interpreter]
        );
        assert_eq!(
            candidates(BackendKind::Compiled, true),
            vec![BackendKind::Compiled, BackendKind::Interpreter]
        );
        assert_eq!(candidates(BackendKind::Native, false), vec![BackendKind::Native]);
    }

    #[test]
    fn missing_compiler_falls_back_to_compiled() {
        let flat = kiln_flatten::flatten(&fixtures::counter_design()).unwrap();
        let netlist = Arc::new(flat.netlist);
        let mut options = SimOptions::default();
        options.native.rustc = PathBuf::from("/nonexistent/rustc");
        let sim = open_backend(BackendKind::Native, true, &netlist, &options).unwrap();
        assert_eq!(sim.kind(), BackendKind::Compiled);

        let err = open_backend(BackendKind::Native, false, &netlist, &options)
            .err()
            .unwrap();
        assert!(matches!(err, SimError::BackendUnavailable { .. }));
    }

    #[test]
    fn poke_values_fit_the_port() {
        let flat = kiln_flatten::flatten(&fixtures::counter_design()).unwrap();
        let sim = create_backend(
            BackendKind::Interpreter,
            Arc::new(flat.netlist),
            &SimOptions::default(),
        )
        .unwrap();
        let (name, value) = parse_poke(sim.as_ref(), "en=0b1").unwrap();
        assert_eq!(name, "en");
        assert_eq!(value, BitVec::from_u64(1, 1));
        assert!(parse_poke(sim.as_ref(), "en").is_err());
        assert!(parse_poke(sim.as_ref(), "nope=1").is_err());
        assert!(parse_poke(sim.as_ref(), "en=zz").is_err());
    }

    #[test]
    fn runs_the_counter_and_writes_vcd() {
        let dir = tempfile::tempdir().unwrap();
        let design = fixtures::write_counter(dir.path());
        let vcd = dir.path().join("top.vcd");
        let mut args = args(design);
        args.vcd = Some(vcd.to_string_lossy().into_owned());
        let code = run(&args, &quiet_config(dir.path())).unwrap();
        assert_eq!(code, 0);
        let text = std::fs::read_to_string(vcd).unwrap();
        assert!(text.contains("$enddefinitions $end"));
        assert!(text.contains("$scope module u0 $end"));
    }

    #[test]
    fn unknown_peek_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args(fixtures::write_counter(dir.path()));
        args.peek = vec!["missing".into()];
        assert!(run(&args, &quiet_config(dir.path())).is_err());
    }
}
