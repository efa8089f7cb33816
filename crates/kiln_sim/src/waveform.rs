//! Waveform recording for simulation output.
//!
//! The [`WaveformRecorder`] trait abstracts waveform output. [`VcdRecorder`]
//! implements the IEEE 1364 Value Change Dump (VCD) format, producing text
//! files that can be viewed in GTKWave, Surfer, or other waveform viewers.
//! One VCD time unit is one simulated cycle.
//!
//! [`WaveformTap`] connects a recorder to a session: it declares every
//! signal of a netlist, nesting dotted names (`u0.count`) into scopes, and
//! records only the signals whose value changed since the previous sample.

use std::collections::HashMap;
use std::io::Write;

use kiln_common::BitVec;
use kiln_ir::{Netlist, SignalId};

use crate::error::SimError;

/// Trait for recording simulation waveforms.
pub trait WaveformRecorder {
    /// Registers a signal for recording in the current scope.
    fn register_signal(&mut self, id: SignalId, name: &str, width: u32) -> Result<(), SimError>;

    /// Opens a new scope (hierarchy level) in the waveform.
    fn begin_scope(&mut self, name: &str) -> Result<(), SimError>;

    /// Closes the current scope.
    fn end_scope(&mut self) -> Result<(), SimError>;

    /// Records a value change at the given cycle.
    fn record_change(&mut self, time: u64, id: SignalId, value: &BitVec) -> Result<(), SimError>;

    /// Finalizes the waveform output (flush, write trailer, etc.).
    fn finalize(&mut self) -> Result<(), SimError>;
}

/// Value Change Dump writer (IEEE 1364 §18).
///
/// The header is written on the first declaration; `$enddefinitions` on the
/// first value change, or at [`WaveformRecorder::finalize`] if nothing changed.
pub struct VcdRecorder<W: Write> {
    writer: W,
    vars: HashMap<SignalId, Var>,
    phase: Phase,
}

struct Var {
    code: String,
    width: u32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fresh,
    Declaring,
    Dumping { time: u64 },
}

impl<W: Write> VcdRecorder<W> {
    /// Creates a recorder writing to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            vars: HashMap::new(),
            phase: Phase::Fresh,
        }
    }

    /// Consumes the recorder and returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn declare(&mut self) -> Result<(), SimError> {
        if self.phase == Phase::Fresh {
            write!(
                self.writer,
                "$version\n  kiln {}\n$end\n$timescale\n  1ns\n$end\n",
                env!("CARGO_PKG_VERSION")
            )?;
            self.phase = Phase::Declaring;
        }
        Ok(())
    }
}

/// Identifier code for the `index`-th variable: base-94 over `!`..=`~`.
fn id_code(index: usize) -> String {
    let mut code = String::new();
    let mut rest = index;
    loop {
        code.push(char::from(b'!' + (rest % 94) as u8));
        rest /= 94;
        if rest == 0 {
            return code;
        }
        rest -= 1;
    }
}

impl<W: Write> WaveformRecorder for VcdRecorder<W> {
    fn register_signal(&mut self, id: SignalId, name: &str, width: u32) -> Result<(), SimError> {
        self.declare()?;
        let code = id_code(self.vars.len());
        let kind = if width == 1 { "wire" } else { "reg" };
        writeln!(self.writer, "$var {kind} {width} {code} {name} $end")?;
        self.vars.insert(id, Var { code, width });
        Ok(())
    }

    fn begin_scope(&mut self, name: &str) -> Result<(), SimError> {
        self.declare()?;
        writeln!(self.writer, "$scope module {name} $end")?;
        Ok(())
    }

    fn end_scope(&mut self) -> Result<(), SimError> {
        writeln!(self.writer, "$upscope $end")?;
        Ok(())
    }

    fn record_change(&mut self, time: u64, id: SignalId, value: &BitVec) -> Result<(), SimError> {
        let var = self.vars.get(&id).ok_or_else(|| SimError::UnknownSignal {
            name: format!("#{} (not registered with the VCD recorder)", id.as_raw()),
        })?;
        match self.phase {
            Phase::Dumping { time: current } if current == time => {}
            Phase::Dumping { .. } => writeln!(self.writer, "#{time}")?,
            Phase::Fresh | Phase::Declaring => {
                writeln!(self.writer, "$enddefinitions $end\n$dumpvars\n#{time}")?;
            }
        }
        self.phase = Phase::Dumping { time };
        if var.width == 1 {
            writeln!(self.writer, "{}{}", u8::from(value.bit(0)), var.code)?;
        } else {
            writeln!(self.writer, "b{} {}", value.resize(var.width), var.code)?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), SimError> {
        if !matches!(self.phase, Phase::Dumping { .. }) {
            self.declare()?;
            writeln!(self.writer, "$enddefinitions $end")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Samples a netlist's signals into a recorder, change by change.
pub struct WaveformTap {
    recorder: Box<dyn WaveformRecorder>,
    signals: Vec<SignalId>,
    last: Vec<Option<BitVec>>,
}

impl WaveformTap {
    /// Declares every signal of `netlist`, grouped into scopes by dotted path.
    pub fn attach(
        mut recorder: Box<dyn WaveformRecorder>,
        netlist: &Netlist,
    ) -> Result<Self, SimError> {
        let module = netlist.module();
        let mut entries: Vec<(Vec<&str>, SignalId, u32)> = module
            .signals
            .iter()
            .map(|(id, s)| (netlist.signal_name(id).split('.').collect(), id, s.width))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        recorder.begin_scope(netlist.names().resolve(module.name))?;
        let mut open: Vec<&str> = Vec::new();
        for (path, id, width) in &entries {
            let Some((leaf, scopes)) = path.split_last() else {
                continue;
            };
            let shared = open
                .iter()
                .zip(scopes.iter())
                .take_while(|(a, b)| a == b)
                .count();
            while open.len() > shared {
                open.pop();
                recorder.end_scope()?;
            }
            for scope in &scopes[shared..] {
                recorder.begin_scope(scope)?;
                open.push(*scope);
            }
            recorder.register_signal(*id, leaf, *width)?;
        }
        for _ in 0..open.len() {
            recorder.end_scope()?;
        }
        recorder.end_scope()?;

        let signals: Vec<SignalId> = module.signals.ids().collect();
        Ok(Self {
            recorder,
            last: vec![None; signals.len()],
            signals,
        })
    }

    /// Records every signal whose value changed since the last sample.
    pub fn sample(
        &mut self,
        time: u64,
        read: impl Fn(SignalId) -> Result<BitVec, SimError>,
    ) -> Result<(), SimError> {
        for (id, last) in self.signals.iter().zip(self.last.iter_mut()) {
            let value = read(*id)?;
            if last.as_ref() != Some(&value) {
                self.recorder.record_change(time, *id, &value)?;
                *last = Some(value);
            }
        }
        Ok(())
    }

    /// Flushes the recorder.
    pub fn finish(&mut self) -> Result<(), SimError> {
        self.recorder.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn make_recorder() -> VcdRecorder<Vec<u8>> {
        VcdRecorder::new(Vec::new())
    }

    fn sid(raw: u32) -> SignalId {
        SignalId::from_raw(raw)
    }

    #[test]
    fn id_codes_count_in_base_94() {
        assert_eq!(id_code(0), "!");
        assert_eq!(id_code(1), "\"");
        assert_eq!(id_code(93), "~");
        assert_eq!(id_code(94), "!!");
        assert_eq!(id_code(95), "\"!");
    }

    #[test]
    fn register_signal_writes_var() {
        let mut rec = make_recorder();
        rec.begin_scope("top").unwrap();
        rec.register_signal(sid(0), "clk", 1).unwrap();
        rec.register_signal(sid(1), "count", 4).unwrap();
        rec.end_scope().unwrap();

        let output = String::from_utf8(rec.into_inner()).unwrap();
        assert!(output.contains("$scope module top $end"));
        assert!(output.contains("$var wire 1 ! clk $end"));
        assert!(output.contains("$var reg 4 \" count $end"));
        assert!(output.contains("$upscope $end"));
    }

    #[test]
    fn record_changes() {
        let mut rec = make_recorder();
        rec.begin_scope("top").unwrap();
        rec.register_signal(sid(0), "clk", 1).unwrap();
        rec.register_signal(sid(1), "data", 4).unwrap();
        rec.end_scope().unwrap();

        rec.record_change(0, sid(0), &BitVec::from_bool(false)).unwrap();
        rec.record_change(0, sid(1), &BitVec::from_u64(0b1010, 4)).unwrap();
        rec.record_change(3, sid(0), &BitVec::from_bool(true)).unwrap();
        rec.finalize().unwrap();

        let output = String::from_utf8(rec.into_inner()).unwrap();
        assert!(output.contains("$enddefinitions $end\n$dumpvars\n#0\n0!\nb1010 \"\n#3\n1!\n"));
    }

    #[test]
    fn unregistered_signal_is_an_error() {
        let mut rec = make_recorder();
        assert!(rec.record_change(0, sid(9), &BitVec::from_bool(true)).is_err());
    }

    #[test]
    fn finalize_empty_recorder() {
        let mut rec = make_recorder();
        rec.finalize().unwrap();
        let output = String::from_utf8(rec.into_inner()).unwrap();
        assert!(output.contains("$timescale"));
        assert!(output.contains("$enddefinitions $end"));
    }

    /// Test recorder that logs calls.
    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl WaveformRecorder for Log {
        fn register_signal(&mut self, _: SignalId, name: &str, _: u32) -> Result<(), SimError> {
            self.0.lock().unwrap().push(format!("var {name}"));
            Ok(())
        }
        fn begin_scope(&mut self, name: &str) -> Result<(), SimError> {
            self.0.lock().unwrap().push(format!("scope {name}"));
            Ok(())
        }
        fn end_scope(&mut self) -> Result<(), SimError> {
            self.0.lock().unwrap().push("up".into());
            Ok(())
        }
        fn record_change(&mut self, t: u64, id: SignalId, v: &BitVec) -> Result<(), SimError> {
            self.0
                .lock()
                .unwrap()
                .push(format!("#{t} {} {}", id.as_raw(), v.to_u64()));
            Ok(())
        }
        fn finalize(&mut self) -> Result<(), SimError> {
            Ok(())
        }
    }

    fn dotted_netlist() -> Netlist {
        let mut names = kiln_common::NameTable::new();
        let mut b = kiln_ir::ModuleBuilder::new("top");
        let a = b.input("a", 1);
        let q = b.wire("u0.q", 1);
        let y = b.output("y", 1);
        b.assign(q, b.sig(a));
        b.assign(y, b.sig(q));
        let module = b.build(&mut names).unwrap();
        Netlist::new(module, names).unwrap()
    }

    #[test]
    fn tap_nests_dotted_names() {
        let log = Log::default();
        let netlist = dotted_netlist();
        WaveformTap::attach(Box::new(log.clone()), &netlist).unwrap();
        let calls = log.0.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec!["scope top", "var a", "scope u0", "var q", "up", "var y", "up"]
        );
    }

    #[test]
    fn tap_records_only_changes() {
        let log = Log::default();
        let netlist = dotted_netlist();
        let mut tap = WaveformTap::attach(Box::new(log.clone()), &netlist).unwrap();
        log.0.lock().unwrap().clear();
        tap.sample(0, |_| Ok(BitVec::from_bool(false))).unwrap();
        tap.sample(1, |id| Ok(BitVec::from_bool(id.as_raw() == 0))).unwrap();
        let calls = log.0.lock().unwrap().clone();
        assert_eq!(calls, vec!["#0 0 0", "#0 1 0", "#0 2 0", "#1 0 1"]);
    }
}
