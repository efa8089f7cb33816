//! Cycle semantics over a [`Kernel`].
//!
//! [`Session`] drives a kernel through the two primitives of the execution
//! model. [`Session::settle`] is one ordered pass over the assignment list.
//! [`Session::tick`] settles, detects rising edges of every distinct clock
//! against the levels recorded after the previous settle, samples every
//! triggered register and write port against the pre-edge state, and only
//! then commits all of them together before settling again.
//!
//! A synchronous reset is honored in the first edge round of every tick even
//! without an edge, and always wins over the register's next-state value.
//! Clocks produced by registers or logic may rise as a result of a commit;
//! up to [`DERIVED_CLOCK_ROUNDS`] further rounds handle those, and each
//! register updates at most once per tick.

use std::sync::Arc;

use kiln_common::BitVec;
use kiln_ir::{MemoryId, Netlist, SignalId, SignalKind};

use crate::error::SimError;
use crate::kernel::Kernel;
use crate::memory::{bytes_from_words, check_range, words_from_bytes};
use crate::waveform::{WaveformTap, WaveformRecorder};
use crate::{Backend, BackendKind, RunSummary, SimOptions};

/// Extra edge rounds per tick for clocks that rise because of a commit.
pub const DERIVED_CLOCK_ROUNDS: usize = 8;

/// One simulation session: a kernel plus clock bookkeeping.
pub struct Session<K: Kernel> {
    kernel: K,
    kind: BackendKind,
    clocks: Vec<SignalId>,
    levels: Vec<bool>,
    clock: Option<SignalId>,
    clock_name: String,
    frame: Option<SignalId>,
    cycle: u64,
    tap: Option<WaveformTap>,
}

impl<K: Kernel> Session<K> {
    /// Wraps a kernel and applies the power-on state.
    ///
    /// Registers start at their reset values and memories at their initial
    /// images; nets stay zero until the first settle.
    pub fn new(kernel: K, kind: BackendKind, options: &SimOptions) -> Result<Self, SimError> {
        let netlist = kernel.netlist();
        let clocks = netlist.module().clocks();
        let clock = netlist.find_signal(&options.clock);
        let frame = match &options.frame_signal {
            Some(name) => Some(
                netlist
                    .find_signal(name)
                    .ok_or_else(|| SimError::UnknownSignal { name: name.clone() })?,
            ),
            None => None,
        };
        let mut session = Self {
            kernel,
            kind,
            levels: vec![false; clocks.len()],
            clocks,
            clock,
            clock_name: options.clock.clone(),
            frame,
            cycle: 0,
            tap: None,
        };
        session.power_on();
        Ok(session)
    }

    /// The kernel driven by this session.
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    fn power_on(&mut self) {
        self.kernel.clear();
        for index in 0..self.kernel.netlist().module().registers.len() {
            let signal = self.kernel.netlist().module().registers[index].signal;
            let value = self.kernel.reset_value(index);
            self.kernel.commit(signal, value);
        }
        self.record_levels();
    }

    fn record_levels(&mut self) {
        for (level, clock) in self.levels.iter_mut().zip(&self.clocks) {
            *level = self.kernel.level(*clock);
        }
    }

    fn resolve(&self, name: &str) -> Result<SignalId, SimError> {
        self.kernel
            .netlist()
            .find_signal(name)
            .ok_or_else(|| SimError::UnknownSignal {
                name: name.to_string(),
            })
    }

    fn resolve_memory(&self, name: &str) -> Result<MemoryId, SimError> {
        self.kernel
            .netlist()
            .find_memory(name)
            .ok_or_else(|| SimError::UnknownMemory {
                name: name.to_string(),
            })
    }

    fn step_clock(&self) -> Result<SignalId, SimError> {
        self.clock.ok_or_else(|| SimError::UnknownSignal {
            name: self.clock_name.clone(),
        })
    }

    /// Drives an input port; the value is truncated or extended to its width.
    pub fn poke(&mut self, name: &str, value: &BitVec) -> Result<(), SimError> {
        let id = self.resolve(name)?;
        if self.kernel.netlist().signal(id).kind != SignalKind::Input {
            return Err(SimError::NotAnInput {
                name: name.to_string(),
            });
        }
        self.kernel.write(id, value);
        Ok(())
    }

    /// Reads the most recently settled or committed value of a signal.
    pub fn peek(&self, name: &str) -> Result<BitVec, SimError> {
        Ok(self.kernel.read(self.resolve(name)?))
    }

    /// One ordered pass over the assignments, then records clock levels.
    pub fn settle(&mut self) -> Result<(), SimError> {
        self.kernel.settle()?;
        self.record_levels();
        Ok(())
    }

    /// Advances every clock that rose since the last recorded levels.
    pub fn tick(&mut self) -> Result<(), SimError> {
        self.kernel.settle()?;
        let registers = self.kernel.netlist().module().registers.len();
        let mut updated = vec![false; registers];

        for round in 0..=DERIVED_CLOCK_ROUNDS {
            let rose: Vec<bool> = self
                .clocks
                .iter()
                .zip(&self.levels)
                .map(|(clock, was)| self.kernel.level(*clock) && !*was)
                .collect();
            let rose_on = |clock: SignalId, clocks: &[SignalId]| {
                clocks
                    .iter()
                    .position(|c| *c == clock)
                    .is_some_and(|i| rose[i])
            };

            let mut samples = Vec::new();
            for index in 0..registers {
                if updated[index] {
                    continue;
                }
                let (signal, clock, reset) = {
                    let reg = &self.kernel.netlist().module().registers[index];
                    (reg.signal, reg.clock, reg.reset.as_ref().map(|r| r.signal))
                };
                let in_reset = round == 0 && reset.is_some_and(|r| self.kernel.level(r));
                let value = if in_reset {
                    self.kernel.reset_value(index)
                } else if rose_on(clock, &self.clocks) {
                    self.kernel.sample_register(index)?
                } else {
                    continue;
                };
                samples.push((index, signal, value));
            }

            let mut writes = Vec::new();
            let mut ports_triggered = false;
            let memories: Vec<(MemoryId, Vec<SignalId>)> = self
                .kernel
                .netlist()
                .module()
                .memories
                .iter()
                .map(|(id, m)| (id, m.write_ports.iter().map(|p| p.clock).collect()))
                .collect();
            for (memory, clocks) in memories {
                for (port, clock) in clocks.into_iter().enumerate() {
                    if rose_on(clock, &self.clocks) {
                        ports_triggered = true;
                        if let Some(write) = self.kernel.sample_write(memory, port)? {
                            writes.push((memory, write));
                        }
                    }
                }
            }

            if samples.is_empty() && !ports_triggered {
                break;
            }
            self.record_levels();
            for (index, signal, value) in samples {
                self.kernel.commit(signal, value);
                updated[index] = true;
            }
            for (memory, (addr, data)) in writes {
                let words = self.kernel.memory_mut(memory);
                if let Some(word) = usize::try_from(addr).ok().and_then(|a| words.get_mut(a)) {
                    *word = data;
                }
            }
            self.kernel.settle()?;
            if round == DERIVED_CLOCK_ROUNDS {
                tracing::warn!(
                    rounds = DERIVED_CLOCK_ROUNDS,
                    "derived clocks still toggling after the last edge round"
                );
            }
        }
        self.record_levels();
        Ok(())
    }

    /// One full cycle of the default clock: low, settle, high, tick.
    pub fn step(&mut self) -> Result<(), SimError> {
        let clock = self.step_clock()?;
        self.poke_id(clock, false)?;
        self.settle()?;
        self.poke_id(clock, true)?;
        self.tick()?;
        self.cycle += 1;
        self.sample_waveform()
    }

    fn poke_id(&mut self, id: SignalId, level: bool) -> Result<(), SimError> {
        if self.kernel.netlist().signal(id).kind != SignalKind::Input {
            return Err(SimError::NotAnInput {
                name: self.kernel.netlist().signal_name(id).to_string(),
            });
        }
        self.kernel.write(id, &BitVec::from_bool(level));
        Ok(())
    }

    /// Returns registers and memories to their power-on state and re-settles.
    ///
    /// Input ports keep their poked values.
    pub fn reset(&mut self) -> Result<(), SimError> {
        let module = self.kernel.netlist().module();
        let inputs: Vec<(SignalId, BitVec)> = module
            .inputs()
            .map(|(id, _)| (id, self.kernel.read(id)))
            .collect();
        self.power_on();
        for (id, value) in &inputs {
            self.kernel.write(*id, value);
        }
        self.settle()
    }

    /// Runs `n` cycles, counting rising edges of the frame signal.
    pub fn run_cycles(&mut self, n: u64) -> Result<RunSummary, SimError> {
        let mut summary = RunSummary::default();
        for _ in 0..n {
            let before = self.frame.is_some_and(|f| self.kernel.level(f));
            self.step()?;
            summary.cycles_run += 1;
            if self.frame.is_some_and(|f| self.kernel.level(f)) && !before {
                summary.frames_completed += 1;
            }
        }
        Ok(summary)
    }

    /// Writes bytes into a memory starting at word `offset`.
    pub fn load_memory(&mut self, name: &str, offset: u64, bytes: &[u8]) -> Result<(), SimError> {
        let id = self.resolve_memory(name)?;
        let mem = &self.kernel.netlist().module().memories[id];
        let words = words_from_bytes(bytes, mem);
        check_range(name, mem, offset, words.len() as u64)?;
        let start = offset as usize;
        self.kernel.memory_mut(id)[start..start + words.len()].copy_from_slice(&words);
        Ok(())
    }

    /// Reads `count` words starting at word `offset` as bytes.
    pub fn dump_memory(&self, name: &str, offset: u64, count: u64) -> Result<Vec<u8>, SimError> {
        let id = self.resolve_memory(name)?;
        let mem = &self.kernel.netlist().module().memories[id];
        check_range(name, mem, offset, count)?;
        let start = offset as usize;
        let words = &self.kernel.memory(id)[start..start + count as usize];
        Ok(bytes_from_words(words, mem))
    }

    /// Records every signal once now and after every following step.
    pub fn attach_waveform(
        &mut self,
        recorder: Box<dyn WaveformRecorder>,
    ) -> Result<(), SimError> {
        let tap = WaveformTap::attach(recorder, self.kernel.netlist())?;
        self.tap = Some(tap);
        self.sample_waveform()
    }

    fn sample_waveform(&mut self) -> Result<(), SimError> {
        if let Some(tap) = &mut self.tap {
            let kernel = &self.kernel;
            tap.sample(self.cycle, |id| Ok(kernel.read(id)))?;
        }
        Ok(())
    }
}

impl<K: Kernel> Backend for Session<K> {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn netlist(&self) -> &Netlist {
        self.kernel.netlist()
    }

    fn poke(&mut self, name: &str, value: &BitVec) -> Result<(), SimError> {
        Session::poke(self, name, value)
    }

    fn peek(&self, name: &str) -> Result<BitVec, SimError> {
        Session::peek(self, name)
    }

    fn settle(&mut self) -> Result<(), SimError> {
        Session::settle(self)
    }

    fn tick(&mut self) -> Result<(), SimError> {
        Session::tick(self)
    }

    fn step(&mut self) -> Result<(), SimError> {
        Session::step(self)
    }

    fn reset(&mut self) -> Result<(), SimError> {
        Session::reset(self)
    }

    fn run_cycles(&mut self, n: u64) -> Result<RunSummary, SimError> {
        Session::run_cycles(self, n)
    }

    fn load_memory(&mut self, name: &str, offset: u64, bytes: &[u8]) -> Result<(), SimError> {
        Session::load_memory(self, name, offset, bytes)
    }

    fn dump_memory(&self, name: &str, offset: u64, count: u64) -> Result<Vec<u8>, SimError> {
        Session::dump_memory(self, name, offset, count)
    }

    fn cycle(&self) -> u64 {
        self.cycle
    }

    fn attach_waveform(&mut self, recorder: Box<dyn WaveformRecorder>) -> Result<(), SimError> {
        Session::attach_waveform(self, recorder)
    }

    fn finish_waveform(&mut self) -> Result<(), SimError> {
        match self.tap.take() {
            Some(mut tap) => tap.finish(),
            None => Ok(()),
        }
    }
}

/// Builds an interpreter session over a shared netlist.
pub fn interpreter_session(
    netlist: Arc<Netlist>,
    options: &SimOptions,
) -> Result<Session<crate::Interpreter>, SimError> {
    Session::new(
        crate::Interpreter::new(netlist),
        BackendKind::Interpreter,
        options,
    )
}

/// Builds a compiled session over a shared netlist.
pub fn compiled_session(
    netlist: Arc<Netlist>,
    options: &SimOptions,
) -> Result<Session<crate::Compiled>, SimError> {
    Session::new(crate::Compiled::new(netlist)?, BackendKind::Compiled, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_common::NameTable;
    use kiln_ir::{Expr, ModuleBuilder};

    fn netlist(build: impl FnOnce(&mut ModuleBuilder)) -> Arc<Netlist> {
        let mut names = NameTable::new();
        let mut b = ModuleBuilder::new("t");
        build(&mut b);
        let module = b.build(&mut names).unwrap();
        Arc::new(Netlist::new(module, names).unwrap())
    }

    fn counter() -> Arc<Netlist> {
        netlist(|b| {
            let clk = b.input("clk", 1);
            let rst = b.input("rst", 1);
            let q = b.output("q", 2);
            let count = b.register("count", 2, clk);
            b.reset(count, rst, 0);
            b.next(count, b.sig(count) + Expr::lit(1, 2));
            b.assign(q, b.sig(count));
        })
    }

    fn both(net: &Arc<Netlist>) -> Vec<Box<dyn Backend>> {
        let options = SimOptions::default();
        vec![
            Box::new(interpreter_session(Arc::clone(net), &options).unwrap()),
            Box::new(compiled_session(Arc::clone(net), &options).unwrap()),
        ]
    }

    #[test]
    fn counter_counts_and_wraps() {
        for mut sim in both(&counter()) {
            sim.poke_u64("rst", 1).unwrap();
            sim.step().unwrap();
            assert_eq!(sim.peek_u64("q").unwrap(), 0);
            sim.poke_u64("rst", 0).unwrap();
            for _ in 0..3 {
                sim.step().unwrap();
            }
            assert_eq!(sim.peek_u64("q").unwrap(), 3);
            sim.step().unwrap();
            assert_eq!(sim.peek_u64("q").unwrap(), 0);
            assert_eq!(sim.cycle(), 5);
        }
    }

    #[test]
    fn settle_alone_does_not_advance_state() {
        for mut sim in both(&counter()) {
            sim.poke_u64("clk", 0).unwrap();
            sim.settle().unwrap();
            sim.settle().unwrap();
            assert_eq!(sim.peek_u64("count").unwrap(), 0);
        }
    }

    #[test]
    fn swap_pair_updates_in_parallel() {
        let net = netlist(|b| {
            let clk = b.input("clk", 1);
            let init = b.input("init", 1);
            let a = b.register("a", 4, clk);
            let c = b.register("b", 4, clk);
            b.next_when(a, b.sig(init), Expr::lit(5, 4));
            b.next(a, b.sig(c));
            b.next_when(c, b.sig(init), Expr::lit(9, 4));
            b.next(c, b.sig(a));
        });
        for mut sim in both(&net) {
            sim.poke_u64("init", 1).unwrap();
            sim.step().unwrap();
            sim.poke_u64("init", 0).unwrap();
            assert_eq!((sim.peek_u64("a").unwrap(), sim.peek_u64("b").unwrap()), (5, 9));
            sim.step().unwrap();
            assert_eq!((sim.peek_u64("a").unwrap(), sim.peek_u64("b").unwrap()), (9, 5));
            sim.step().unwrap();
            assert_eq!((sim.peek_u64("a").unwrap(), sim.peek_u64("b").unwrap()), (5, 9));
        }
    }

    #[test]
    fn reset_wins_over_next_state() {
        let net = netlist(|b| {
            let clk = b.input("clk", 1);
            let rst = b.input("rst", 1);
            let load = b.input("load", 1);
            let r = b.register("r", 8, clk);
            b.reset(r, rst, 0x5a);
            b.next_when(r, b.sig(load), Expr::lit(0xff, 8));
        });
        for mut sim in both(&net) {
            sim.poke_u64("load", 1).unwrap();
            sim.poke_u64("rst", 1).unwrap();
            sim.step().unwrap();
            assert_eq!(sim.peek_u64("r").unwrap(), 0x5a);
            sim.poke_u64("rst", 0).unwrap();
            sim.step().unwrap();
            assert_eq!(sim.peek_u64("r").unwrap(), 0xff);
        }
    }

    #[test]
    fn reset_applies_without_edge() {
        let net = netlist(|b| {
            let clk = b.input("clk", 1);
            let rst = b.input("rst", 1);
            let r = b.register("r", 4, clk);
            b.reset(r, rst, 3);
            b.next(r, b.sig(r) + Expr::lit(1, 4));
        });
        for mut sim in both(&net) {
            sim.step().unwrap();
            sim.step().unwrap();
            assert_eq!(sim.peek_u64("r").unwrap(), 5);
            sim.poke_u64("rst", 1).unwrap();
            sim.tick().unwrap();
            assert_eq!(sim.peek_u64("r").unwrap(), 3);
        }
    }

    #[test]
    fn async_read_sees_write_in_same_cycle() {
        let net = netlist(|b| {
            let clk = b.input("clk", 1);
            let we = b.input("we", 1);
            let addr = b.input("addr", 4);
            let din = b.input("din", 8);
            let dout = b.output("dout", 8);
            let mem = b.memory("ram", 8, 16);
            b.write_port(mem, clk, b.sig(we), b.sig(addr), b.sig(din));
            b.assign(dout, b.read(mem, b.sig(addr)));
        });
        for mut sim in both(&net) {
            sim.poke_u64("we", 1).unwrap();
            sim.poke_u64("addr", 5).unwrap();
            sim.poke_u64("din", 0x42).unwrap();
            sim.step().unwrap();
            assert_eq!(sim.peek_u64("dout").unwrap(), 0x42);
            assert_eq!(sim.dump_memory("ram", 5, 1).unwrap(), vec![0x42]);
        }
    }

    #[test]
    fn derived_clock_drives_second_stage() {
        let net = netlist(|b| {
            let clk = b.input("clk", 1);
            let div = b.register("div", 1, clk);
            b.next(div, !b.sig(div));
            let slow = b.register("slow", 4, div);
            b.next(slow, b.sig(slow) + Expr::lit(1, 4));
        });
        for mut sim in both(&net) {
            for _ in 0..4 {
                sim.step().unwrap();
            }
            assert_eq!(sim.peek_u64("slow").unwrap(), 2);
        }
    }

    #[test]
    fn poke_rejects_non_inputs_and_unknown_names() {
        for mut sim in both(&counter()) {
            assert!(matches!(
                sim.poke_u64("q", 1),
                Err(SimError::NotAnInput { .. })
            ));
            assert!(matches!(
                sim.peek("missing"),
                Err(SimError::UnknownSignal { .. })
            ));
        }
    }

    #[test]
    fn evaluation_error_keeps_committed_state() {
        let net = netlist(|b| {
            let clk = b.input("clk", 1);
            let d = b.input("d", 8);
            let acc = b.register("acc", 8, clk);
            let other = b.register("other", 8, clk);
            b.next(acc, b.sig(acc) + Expr::lit(1, 8));
            b.next(other, Expr::lit(100, 8) / b.sig(d));
        });
        for mut sim in both(&net) {
            sim.poke_u64("d", 1).unwrap();
            sim.step().unwrap();
            assert_eq!(sim.peek_u64("acc").unwrap(), 1);
            sim.poke_u64("d", 0).unwrap();
            assert!(matches!(sim.step(), Err(SimError::DivisionByZero)));
            assert_eq!(sim.peek_u64("acc").unwrap(), 1);
            assert_eq!(sim.peek_u64("other").unwrap(), 100);
        }
    }

    #[test]
    fn run_cycles_counts_frames() {
        let options = SimOptions {
            frame_signal: Some("frame".into()),
            ..SimOptions::default()
        };
        let net = netlist(|b| {
            let clk = b.input("clk", 1);
            let frame = b.output("frame", 1);
            let count = b.register("count", 2, clk);
            b.next(count, b.sig(count) + Expr::lit(1, 2));
            b.assign(frame, b.sig(count).equals(Expr::lit(3, 2)));
        });
        let mut sim = interpreter_session(net, &options).unwrap();
        let summary = sim.run_cycles(10).unwrap();
        assert_eq!(summary.cycles_run, 10);
        assert_eq!(summary.frames_completed, 2);
    }

    #[test]
    fn unknown_frame_signal_is_rejected() {
        let options = SimOptions {
            frame_signal: Some("vsync".into()),
            ..SimOptions::default()
        };
        assert!(matches!(
            interpreter_session(counter(), &options),
            Err(SimError::UnknownSignal { .. })
        ));
    }

    #[test]
    fn reset_restores_memory_image_and_keeps_inputs() {
        let net = netlist(|b| {
            let clk = b.input("clk", 1);
            let addr = b.input("addr", 2);
            let dout = b.output("dout", 8);
            let mem = b.memory("rom", 8, 4);
            b.memory_init(mem, &[0x11, 0x22, 0x33, 0x44]);
            b.write_port(mem, clk, Expr::lit(0, 1), b.sig(addr), Expr::lit(0, 8));
            b.assign(dout, b.read(mem, b.sig(addr)));
        });
        for mut sim in both(&net) {
            sim.poke_u64("addr", 2).unwrap();
            sim.load_memory("rom", 0, &[0xaa, 0xbb, 0xcc]).unwrap();
            sim.settle().unwrap();
            assert_eq!(sim.peek_u64("dout").unwrap(), 0xcc);
            sim.reset().unwrap();
            assert_eq!(sim.peek_u64("dout").unwrap(), 0x33);
            assert_eq!(sim.read_framebuffer("rom").unwrap(), vec![0x11, 0x22, 0x33, 0x44]);
            assert!(matches!(
                sim.load_memory("rom", 3, &[1, 2]),
                Err(SimError::MemoryOutOfRange { .. })
            ));
            assert!(matches!(
                sim.dump_memory("nope", 0, 1),
                Err(SimError::UnknownMemory { .. })
            ));
        }
    }
}
