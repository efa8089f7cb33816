//! Safe wrapper around a loaded model library.

use std::ffi::c_void;
use std::path::Path;
use std::ptr::NonNull;

use libloading::Library;

use super::codegen::{ABI_VERSION, STATUS_DIVISION_BY_ZERO};
use crate::error::SimError;
use crate::RunSummary;

type Ctx = *mut c_void;

/// `RunResult` as laid out by the generated library.
#[repr(C)]
#[derive(Clone, Copy)]
struct RawRun {
    cycles_run: u64,
    frames_completed: u64,
    status: i32,
}

#[derive(Clone, Copy)]
struct Api {
    abi_version: unsafe extern "C" fn() -> u32,
    signal_count: unsafe extern "C" fn() -> u64,
    signal_index: unsafe extern "C" fn(*const u8, u64) -> u64,
    create: unsafe extern "C" fn() -> Ctx,
    destroy: unsafe extern "C" fn(Ctx),
    reset: unsafe extern "C" fn(Ctx),
    poke: unsafe extern "C" fn(Ctx, u64, u64) -> i32,
    peek: unsafe extern "C" fn(*const c_void, u64) -> u64,
    settle: unsafe extern "C" fn(Ctx) -> i32,
    tick: unsafe extern "C" fn(Ctx) -> i32,
    run_cycles: unsafe extern "C" fn(Ctx, u64, u64, u64) -> RawRun,
    mem_write: unsafe extern "C" fn(Ctx, u64, u64, *const u64, u64) -> i32,
    mem_read: unsafe extern "C" fn(*const c_void, u64, u64, *mut u64, u64) -> i32,
    mem_len: unsafe extern "C" fn(u64) -> u64,
}

/// One model instance inside a loaded library.
///
/// Owns both the library and the context it allocated; the context is
/// destroyed before the library is unloaded.
pub(crate) struct NativeModel {
    ctx: NonNull<c_void>,
    api: Api,
    _library: Library,
}

// SAFETY: the context is only reached through `&mut self` or `&self` methods
// of this wrapper, and the generated code keeps no thread-local or global
// mutable state.
unsafe impl Send for NativeModel {}

unsafe fn symbol<T: Copy>(library: &Library, name: &[u8]) -> Result<T, SimError> {
    library
        .get::<T>(name)
        .map(|s| *s)
        .map_err(|e| SimError::Native {
            reason: format!("missing symbol {}: {e}", String::from_utf8_lossy(name)),
        })
}

impl NativeModel {
    /// Loads the library at `path` and creates one model context.
    pub(crate) fn load(path: &Path) -> Result<Self, SimError> {
        // SAFETY: the library is built from generated source whose only
        // initializers are plain statics, and every symbol below is looked up
        // with the exact signature it was emitted with.
        let library = unsafe { Library::new(path) }.map_err(|e| SimError::Native {
            reason: format!("cannot load {}: {e}", path.display()),
        })?;
        let api = unsafe {
            Api {
                abi_version: symbol(&library, b"kiln_abi_version")?,
                signal_count: symbol(&library, b"kiln_signal_count")?,
                signal_index: symbol(&library, b"kiln_signal_index")?,
                create: symbol(&library, b"kiln_create")?,
                destroy: symbol(&library, b"kiln_destroy")?,
                reset: symbol(&library, b"kiln_reset")?,
                poke: symbol(&library, b"kiln_poke")?,
                peek: symbol(&library, b"kiln_peek")?,
                settle: symbol(&library, b"kiln_settle")?,
                tick: symbol(&library, b"kiln_tick")?,
                run_cycles: symbol(&library, b"kiln_run_cycles")?,
                mem_write: symbol(&library, b"kiln_mem_write")?,
                mem_read: symbol(&library, b"kiln_mem_read")?,
                mem_len: symbol(&library, b"kiln_mem_len")?,
            }
        };
        let version = unsafe { (api.abi_version)() };
        if version != ABI_VERSION {
            return Err(SimError::Native {
                reason: format!("library ABI version {version}, expected {ABI_VERSION}"),
            });
        }
        let ctx = NonNull::new(unsafe { (api.create)() }).ok_or_else(|| SimError::Native {
            reason: "kiln_create returned null".into(),
        })?;
        Ok(Self {
            ctx,
            api,
            _library: library,
        })
    }

    pub(crate) fn signal_count(&self) -> u64 {
        unsafe { (self.api.signal_count)() }
    }

    /// Slot of a signal by name, as the library knows it.
    pub(crate) fn signal_index(&self, name: &str) -> Option<u64> {
        let index = unsafe { (self.api.signal_index)(name.as_ptr(), name.len() as u64) };
        (index != u64::MAX).then_some(index)
    }

    pub(crate) fn reset(&mut self) {
        unsafe { (self.api.reset)(self.ctx.as_ptr()) }
    }

    pub(crate) fn poke(&mut self, slot: u64, value: u64) -> Result<(), SimError> {
        let status = unsafe { (self.api.poke)(self.ctx.as_ptr(), slot, value) };
        check(status, || format!("poke of slot {slot} rejected"))
    }

    pub(crate) fn peek(&self, slot: u64) -> u64 {
        unsafe { (self.api.peek)(self.ctx.as_ptr(), slot) }
    }

    pub(crate) fn settle(&mut self) -> Result<(), SimError> {
        evaluation(unsafe { (self.api.settle)(self.ctx.as_ptr()) })
    }

    pub(crate) fn tick(&mut self) -> Result<(), SimError> {
        evaluation(unsafe { (self.api.tick)(self.ctx.as_ptr()) })
    }

    /// Runs `n` cycles of `clock`; `frame` is `u64::MAX` when unused.
    ///
    /// The summary counts the cycles that completed before any failure.
    pub(crate) fn run_cycles(
        &mut self,
        n: u64,
        clock: u64,
        frame: u64,
    ) -> (RunSummary, Result<(), SimError>) {
        let raw = unsafe { (self.api.run_cycles)(self.ctx.as_ptr(), n, clock, frame) };
        let summary = RunSummary {
            cycles_run: raw.cycles_run,
            frames_completed: raw.frames_completed,
        };
        (summary, evaluation(raw.status))
    }

    pub(crate) fn mem_len(&self, memory: u32) -> u64 {
        unsafe { (self.api.mem_len)(u64::from(memory)) }
    }

    pub(crate) fn mem_write(&mut self, memory: u32, offset: u64, words: &[u64]) -> Result<(), SimError> {
        let status = unsafe {
            (self.api.mem_write)(
                self.ctx.as_ptr(),
                u64::from(memory),
                offset,
                words.as_ptr(),
                words.len() as u64,
            )
        };
        check(status, || format!("write of {} words at {offset} rejected", words.len()))
    }

    pub(crate) fn mem_read(&self, memory: u32, offset: u64, count: u64) -> Result<Vec<u64>, SimError> {
        let mut words = vec![0u64; count as usize];
        let status = unsafe {
            (self.api.mem_read)(
                self.ctx.as_ptr(),
                u64::from(memory),
                offset,
                words.as_mut_ptr(),
                count,
            )
        };
        check(status, || format!("read of {count} words at {offset} rejected"))?;
        Ok(words)
    }
}

impl Drop for NativeModel {
    fn drop(&mut self) {
        unsafe { (self.api.destroy)(self.ctx.as_ptr()) }
    }
}

/// Maps the status of an evaluating call to the interpreter's error.
fn evaluation(status: i32) -> Result<(), SimError> {
    match status {
        0 => Ok(()),
        STATUS_DIVISION_BY_ZERO => Err(SimError::DivisionByZero),
        other => Err(SimError::Native {
            reason: format!("model returned status {other}"),
        }),
    }
}

fn check(status: i32, what: impl FnOnce() -> String) -> Result<(), SimError> {
    if status == 0 {
        Ok(())
    } else {
        Err(SimError::Native { reason: what() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_map_to_evaluation_errors() {
        assert!(evaluation(0).is_ok());
        assert!(matches!(
            evaluation(STATUS_DIVISION_BY_ZERO),
            Err(SimError::DivisionByZero)
        ));
        assert!(matches!(evaluation(7), Err(SimError::Native { .. })));
    }
}
