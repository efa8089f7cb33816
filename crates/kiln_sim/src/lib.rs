//! Cycle-based simulation of flat kiln netlists.
//!
//! A session holds the mutable state (signal values, memory contents, clock
//! levels) behind one immutable, shareable [`Netlist`]. Three interchangeable
//! backends run the same execution model:
//!
//! - [`Interpreter`]: walks expression trees; arbitrary widths; the reference.
//! - [`Compiled`]: lowers the netlist once into op tapes over 64-bit slots.
//! - [`NativeSession`]: generates Rust source for the netlist, compiles it with
//!   `rustc` into a shared library, and drives it through a narrow C ABI with
//!   batched `run_cycles` calls.
//!
//! All three sit behind the object-safe [`Backend`] trait. Choosing a backend
//! and falling back when one is unavailable is the caller's decision:
//! [`NativeToolchain::detect`] and [`compiled::check_supported`] answer the
//! capability question without side effects.
//!
//! # Usage
//!
//! ```ignore
//! use kiln_sim::{create_backend, BackendKind, SimOptions};
//!
//! let mut sim = create_backend(BackendKind::Compiled, netlist, &SimOptions::default())?;
//! sim.poke_u64("rst", 1)?;
//! sim.step()?;
//! println!("q = {}", sim.peek_u64("q")?);
//! ```

#![warn(missing_docs)]

pub mod compiled;
pub mod error;
pub mod interpreter;
pub mod kernel;
mod memory;
pub mod native;
pub mod session;
pub mod waveform;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use kiln_common::BitVec;
use kiln_ir::Netlist;

pub use compiled::Compiled;
pub use error::SimError;
pub use interpreter::Interpreter;
pub use kernel::{Kernel, SimState};
pub use native::{NativeOptions, NativeSession, NativeToolchain};
pub use session::{compiled_session, interpreter_session, Session, DERIVED_CLOCK_ROUNDS};
pub use waveform::{VcdRecorder, WaveformTap, WaveformRecorder};

/// Which execution strategy runs a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Tree-walking reference evaluator.
    Interpreter,
    /// In-process op tapes.
    Compiled,
    /// Externally compiled shared library.
    Native,
}

impl BackendKind {
    /// All backends, fastest first.
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Native,
        BackendKind::Compiled,
        BackendKind::Interpreter,
    ];

    /// The lowercase name used in configuration and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Interpreter => "interpreter",
            BackendKind::Compiled => "compiled",
            BackendKind::Native => "native",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| format!("unknown backend '{s}' (expected interpreter, compiled, or native)"))
    }
}

/// Session settings shared by every backend.
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Input port toggled by `step`.
    pub clock: String,
    /// Signal whose rising edges `run_cycles` counts as completed frames.
    pub frame_signal: Option<String>,
    /// Native backend settings.
    pub native: NativeOptions,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            clock: "clk".into(),
            frame_signal: None,
            native: NativeOptions::default(),
        }
    }
}

/// Result of a batched run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RunSummary {
    /// Cycles actually executed.
    pub cycles_run: u64,
    /// Rising edges of the frame signal observed during the run.
    pub frames_completed: u64,
}

/// One running simulation, independent of the backend executing it.
///
/// Identical sequences of pokes and steps against the same netlist produce
/// identical peeks on every backend.
pub trait Backend {
    /// The backend executing this session.
    fn kind(&self) -> BackendKind;

    /// The netlist being simulated.
    fn netlist(&self) -> &Netlist;

    /// Drives an input port; visible at the next settle or tick.
    fn poke(&mut self, name: &str, value: &BitVec) -> Result<(), SimError>;

    /// Reads the most recently settled value of any signal.
    fn peek(&self, name: &str) -> Result<BitVec, SimError>;

    /// Settles combinational state under the current inputs.
    fn settle(&mut self) -> Result<(), SimError>;

    /// Advances every clock that rose since the last settle.
    fn tick(&mut self) -> Result<(), SimError>;

    /// One full cycle of the default clock.
    fn step(&mut self) -> Result<(), SimError>;

    /// Returns registers and memories to their power-on state.
    fn reset(&mut self) -> Result<(), SimError>;

    /// Runs `n` cycles of the default clock.
    fn run_cycles(&mut self, n: u64) -> Result<RunSummary, SimError>;

    /// Writes bytes into a memory starting at word `offset`.
    fn load_memory(&mut self, name: &str, offset: u64, bytes: &[u8]) -> Result<(), SimError>;

    /// Reads `count` words of a memory starting at word `offset`.
    fn dump_memory(&self, name: &str, offset: u64, count: u64) -> Result<Vec<u8>, SimError>;

    /// Cycles completed by `step` and `run_cycles`.
    fn cycle(&self) -> u64;

    /// Starts recording every signal after each step.
    fn attach_waveform(&mut self, recorder: Box<dyn WaveformRecorder>) -> Result<(), SimError>;

    /// Flushes and detaches the waveform recorder, if any.
    fn finish_waveform(&mut self) -> Result<(), SimError>;

    /// Reads a whole memory, e.g. a video framebuffer.
    fn read_framebuffer(&self, name: &str) -> Result<Vec<u8>, SimError> {
        let netlist = self.netlist();
        let id = netlist
            .find_memory(name)
            .ok_or_else(|| SimError::UnknownMemory {
                name: name.to_string(),
            })?;
        let depth = netlist.module().memories[id].depth;
        self.dump_memory(name, 0, u64::from(depth))
    }

    /// Pokes an integer, truncated to the port's width.
    fn poke_u64(&mut self, name: &str, value: u64) -> Result<(), SimError> {
        let id = self
            .netlist()
            .find_signal(name)
            .ok_or_else(|| SimError::UnknownSignal {
                name: name.to_string(),
            })?;
        let width = self.netlist().signal(id).width;
        self.poke(name, &BitVec::from_u64(value, width))
    }

    /// Peeks the low 64 bits of a signal.
    fn peek_u64(&self, name: &str) -> Result<u64, SimError> {
        Ok(self.peek(name)?.to_u64())
    }
}

/// Creates a session on the requested backend.
///
/// Never falls back: a native toolchain that is missing surfaces as
/// [`SimError::BackendUnavailable`] and a netlist the compiled backends cannot
/// represent as [`SimError::Unsupported`].
pub fn create_backend(
    kind: BackendKind,
    netlist: Arc<Netlist>,
    options: &SimOptions,
) -> Result<Box<dyn Backend>, SimError> {
    tracing::info!(backend = %kind, "creating simulation session");
    Ok(match kind {
        BackendKind::Interpreter => Box::new(interpreter_session(netlist, options)?),
        BackendKind::Compiled => Box::new(compiled_session(netlist, options)?),
        BackendKind::Native => Box::new(NativeSession::new(netlist, options)?),
    })
}
