//! Native backend: generated Rust compiled to a shared library.
//!
//! [`NativeSession::new`] generates model source for the netlist
//! ([`codegen`]), builds it with the host `rustc` into a content-addressed
//! cache ([`NativeToolchain`]), loads it, and creates one model context. Each
//! poke, peek, and step is one call across the C ABI; [`Backend::run_cycles`]
//! runs the whole batch inside the library.
//!
//! Signal slots in the library are the netlist's signal ids, so no name
//! lookup crosses the boundary on the hot path.

pub mod codegen;
mod ffi;
mod toolchain;

use std::path::PathBuf;
use std::sync::Arc;

use kiln_common::{BitVec, InternalError, KilnResult};
use kiln_ir::{MemoryId, Netlist, SignalId, SignalKind};

use crate::error::SimError;
use crate::memory::{bytes_from_words, check_range, words_from_bytes};
use crate::waveform::{WaveformTap, WaveformRecorder};
use crate::{Backend, BackendKind, RunSummary, SimOptions};

use ffi::NativeModel;
pub use toolchain::NativeToolchain;

/// Settings for building native models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeOptions {
    /// Where compiled libraries are cached; defaults to `kiln-native` in the
    /// system temp directory.
    pub cache_dir: Option<PathBuf>,
    /// The compiler to invoke.
    pub rustc: PathBuf,
    /// `-C opt-level` passed to the compiler.
    pub opt_level: u8,
}

impl Default for NativeOptions {
    fn default() -> Self {
        Self {
            cache_dir: None,
            rustc: PathBuf::from("rustc"),
            opt_level: 3,
        }
    }
}

impl NativeOptions {
    /// The effective cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("kiln-native"))
    }
}

const NO_FRAME: u64 = u64::MAX;

/// A session running on a compiled model library.
pub struct NativeSession {
    model: NativeModel,
    netlist: Arc<Netlist>,
    clock: Option<SignalId>,
    clock_name: String,
    frame: Option<SignalId>,
    cycle: u64,
    tap: Option<WaveformTap>,
}

impl NativeSession {
    /// Builds (or reuses) the model library for `netlist` and powers it on.
    ///
    /// Fails with [`SimError::BackendUnavailable`] when no working compiler is
    /// found and with [`SimError::Unsupported`] for netlists the generated
    /// code cannot represent.
    pub fn new(netlist: Arc<Netlist>, options: &SimOptions) -> Result<Self, SimError> {
        let source = codegen::generate(&netlist)?;
        let toolchain = NativeToolchain::detect(&options.native)?;
        let path = toolchain.compile(&source, &options.native)?;
        let model = NativeModel::load(&path)?;
        check_layout(&netlist, model.signal_count(), |m| model.mem_len(m))?;
        let frame = match &options.frame_signal {
            Some(name) => Some(
                netlist
                    .find_signal(name)
                    .ok_or_else(|| SimError::UnknownSignal { name: name.clone() })?,
            ),
            None => None,
        };
        let mut session = Self {
            model,
            clock: netlist.find_signal(&options.clock),
            clock_name: options.clock.clone(),
            netlist,
            frame,
            cycle: 0,
            tap: None,
        };
        session.load_images()?;
        tracing::debug!(library = %path.display(), "native session ready");
        Ok(session)
    }

    fn load_images(&mut self) -> Result<(), SimError> {
        let netlist = Arc::clone(&self.netlist);
        for (id, mem) in netlist.module().memories.iter() {
            if !mem.init.is_empty() {
                self.model.mem_write(id.as_raw(), 0, &mem.initial_contents())?;
            }
        }
        Ok(())
    }

    /// Slot the library reports for `name`.
    pub fn library_slot(&self, name: &str) -> Option<u64> {
        self.model.signal_index(name)
    }

    fn resolve(&self, name: &str) -> Result<SignalId, SimError> {
        self.netlist
            .find_signal(name)
            .ok_or_else(|| SimError::UnknownSignal {
                name: name.to_string(),
            })
    }

    fn resolve_memory(&self, name: &str) -> Result<MemoryId, SimError> {
        self.netlist
            .find_memory(name)
            .ok_or_else(|| SimError::UnknownMemory {
                name: name.to_string(),
            })
    }

    fn step_clock(&self) -> Result<u64, SimError> {
        let clock = self.clock.ok_or_else(|| SimError::UnknownSignal {
            name: self.clock_name.clone(),
        })?;
        if self.netlist.signal(clock).kind != SignalKind::Input {
            return Err(SimError::NotAnInput {
                name: self.clock_name.clone(),
            });
        }
        Ok(u64::from(clock.as_raw()))
    }

    fn read(&self, id: SignalId) -> BitVec {
        let width = self.netlist.signal(id).width;
        BitVec::from_u64(self.model.peek(u64::from(id.as_raw())), width)
    }

    fn sample_waveform(&mut self) -> Result<(), SimError> {
        if let Some(tap) = &mut self.tap {
            let (model, netlist) = (&self.model, &self.netlist);
            tap.sample(self.cycle, |id| {
                let width = netlist.signal(id).width;
                Ok(BitVec::from_u64(model.peek(u64::from(id.as_raw())), width))
            })?;
        }
        Ok(())
    }
}

/// Confirms the library was generated for this netlist's slot layout.
fn check_layout(
    netlist: &Netlist,
    signals: u64,
    depth: impl Fn(u32) -> u64,
) -> KilnResult<()> {
    let expected = netlist.module().signals.len() as u64;
    if signals != expected {
        return Err(InternalError::new(format!(
            "library has {signals} signals, netlist has {expected}"
        )));
    }
    for (id, mem) in netlist.module().memories.iter() {
        if depth(id.as_raw()) != u64::from(mem.depth) {
            return Err(InternalError::new(format!(
                "memory '{}' has a different depth in the library",
                netlist.memory_name(id)
            )));
        }
    }
    Ok(())
}

impl Backend for NativeSession {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn netlist(&self) -> &Netlist {
        &self.netlist
    }

    fn poke(&mut self, name: &str, value: &BitVec) -> Result<(), SimError> {
        let id = self.resolve(name)?;
        if self.netlist.signal(id).kind != SignalKind::Input {
            return Err(SimError::NotAnInput {
                name: name.to_string(),
            });
        }
        self.model.poke(u64::from(id.as_raw()), value.to_u64())
    }

    fn peek(&self, name: &str) -> Result<BitVec, SimError> {
        Ok(self.read(self.resolve(name)?))
    }

    fn settle(&mut self) -> Result<(), SimError> {
        self.model.settle()
    }

    fn tick(&mut self) -> Result<(), SimError> {
        self.model.tick()
    }

    fn step(&mut self) -> Result<(), SimError> {
        let clock = self.step_clock()?;
        let (summary, status) = self.model.run_cycles(1, clock, NO_FRAME);
        self.cycle += summary.cycles_run;
        status?;
        self.sample_waveform()
    }

    fn reset(&mut self) -> Result<(), SimError> {
        let inputs: Vec<(u64, u64)> = self
            .netlist
            .module()
            .inputs()
            .map(|(id, _)| {
                let slot = u64::from(id.as_raw());
                (slot, self.model.peek(slot))
            })
            .collect();
        self.model.reset();
        self.load_images()?;
        for (slot, value) in inputs {
            self.model.poke(slot, value)?;
        }
        self.model.settle()
    }

    fn run_cycles(&mut self, n: u64) -> Result<RunSummary, SimError> {
        if self.tap.is_some() {
            let mut summary = RunSummary::default();
            for _ in 0..n {
                let before = self.frame.is_some_and(|f| self.read(f).bit(0));
                self.step()?;
                summary.cycles_run += 1;
                if self.frame.is_some_and(|f| self.read(f).bit(0)) && !before {
                    summary.frames_completed += 1;
                }
            }
            return Ok(summary);
        }
        let clock = self.step_clock()?;
        let frame = self.frame.map_or(NO_FRAME, |f| u64::from(f.as_raw()));
        let (summary, status) = self.model.run_cycles(n, clock, frame);
        self.cycle += summary.cycles_run;
        status.map(|()| summary)
    }

    fn load_memory(&mut self, name: &str, offset: u64, bytes: &[u8]) -> Result<(), SimError> {
        let id = self.resolve_memory(name)?;
        let mem = &self.netlist.module().memories[id];
        let words = words_from_bytes(bytes, mem);
        check_range(name, mem, offset, words.len() as u64)?;
        self.model.mem_write(id.as_raw(), offset, &words)
    }

    fn dump_memory(&self, name: &str, offset: u64, count: u64) -> Result<Vec<u8>, SimError> {
        let id = self.resolve_memory(name)?;
        let mem = &self.netlist.module().memories[id];
        check_range(name, mem, offset, count)?;
        let words = self.model.mem_read(id.as_raw(), offset, count)?;
        Ok(bytes_from_words(&words, mem))
    }

    fn cycle(&self) -> u64 {
        self.cycle
    }

    fn attach_waveform(&mut self, recorder: Box<dyn WaveformRecorder>) -> Result<(), SimError> {
        self.tap = Some(WaveformTap::attach(recorder, &self.netlist)?);
        self.sample_waveform()
    }

    fn finish_waveform(&mut self) -> Result<(), SimError> {
        match self.tap.take() {
            Some(mut tap) => tap.finish(),
            None => Ok(()),
        }
    }
}
