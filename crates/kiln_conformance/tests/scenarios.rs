//! Reference scenarios on every available backend.

use kiln_conformance::{
    available_backends, counter, datapath, memory, test_options, ConformanceError, Lockstep,
};
use kiln_ir::{Design, Expr, ModuleBuilder};
use kiln_sim::SimError;

#[test]
fn two_bit_counter_resets_counts_and_wraps() {
    let mut run = Lockstep::available(&counter(2).unwrap()).unwrap();

    run.poke_u64("rst", 1).unwrap();
    run.step().unwrap();
    assert_eq!(run.peek_u64("q").unwrap(), 0);

    run.poke_u64("rst", 0).unwrap();
    for _ in 0..3 {
        run.step().unwrap();
    }
    assert_eq!(run.peek_u64("q").unwrap(), 3);

    run.step().unwrap();
    assert_eq!(run.peek_u64("q").unwrap(), 0);
}

#[test]
fn async_read_sees_write_in_the_same_cycle() {
    let mut run = Lockstep::available(&memory().unwrap()).unwrap();
    run.poke_u64("raddr", 5).unwrap();
    run.settle().unwrap();
    assert_eq!(run.peek_u64("rdata").unwrap(), 0);

    run.poke_u64("we", 1).unwrap();
    run.poke_u64("waddr", 5).unwrap();
    run.poke_u64("wdata", 0x42).unwrap();
    run.step().unwrap();
    assert_eq!(run.peek_u64("rdata").unwrap(), 0x42);
}

#[test]
fn disabled_write_port_leaves_memory_alone() {
    let mut run = Lockstep::available(&memory().unwrap()).unwrap();
    run.poke_u64("we", 0).unwrap();
    run.poke_u64("waddr", 2).unwrap();
    run.poke_u64("wdata", 0xff).unwrap();
    run.poke_u64("raddr", 2).unwrap();
    run.step().unwrap();
    assert_eq!(run.peek_u64("rdata").unwrap(), 0x12);
}

#[test]
fn power_on_image_and_bulk_transfers() {
    let mut run = Lockstep::available(&memory().unwrap()).unwrap();
    assert_eq!(run.dump_memory("mem", 0, 5).unwrap(), vec![0x10, 0x11, 0x12, 0x13, 0]);

    run.load_memory("mem", 10, &[1, 2, 3]).unwrap();
    assert_eq!(run.dump_memory("mem", 9, 5).unwrap(), vec![0, 1, 2, 3, 0]);

    run.poke_u64("raddr", 11).unwrap();
    run.settle().unwrap();
    assert_eq!(run.peek_u64("rdata").unwrap(), 2);

    let frame = run.session(0).unwrap().read_framebuffer("mem").unwrap();
    assert_eq!(frame.len(), 256);
    assert_eq!(frame[12], 3);
}

#[test]
fn bulk_transfers_are_range_checked() {
    let mut run = Lockstep::available(&memory().unwrap()).unwrap();
    assert!(matches!(
        run.load_memory("mem", 255, &[1, 2]),
        Err(ConformanceError::Sim(SimError::MemoryOutOfRange { .. }))
    ));
    assert!(matches!(
        run.dump_memory("mem", 200, 57),
        Err(ConformanceError::Sim(SimError::MemoryOutOfRange { .. }))
    ));
    assert!(matches!(
        run.dump_memory("rom", 0, 1),
        Err(ConformanceError::Sim(SimError::UnknownMemory { .. }))
    ));
}

#[test]
fn reset_restores_power_on_state() {
    let mut run = Lockstep::available(&memory().unwrap()).unwrap();
    run.poke_u64("we", 1).unwrap();
    run.poke_u64("waddr", 0).unwrap();
    run.poke_u64("wdata", 0x99).unwrap();
    run.step().unwrap();
    assert_eq!(run.dump_memory("mem", 0, 1).unwrap(), vec![0x99]);

    run.reset().unwrap();
    assert_eq!(run.dump_memory("mem", 0, 1).unwrap(), vec![0x10]);
    run.poke_u64("raddr", 0).unwrap();
    run.settle().unwrap();
    assert_eq!(run.peek_u64("rdata").unwrap(), 0x10);
}

fn wrap_flag() -> Design {
    let mut design = Design::new();
    let mut b = ModuleBuilder::new("wrap");
    let clk = b.input("clk", 1);
    let at_top = b.output("at_top", 1);
    let count = b.register("count", 2, clk);
    b.next(count, b.sig(count) + Expr::lit(1, 2));
    b.assign(at_top, b.sig(count).equals(Expr::lit(3, 2)));
    let module = b.build(&mut design.names).unwrap();
    let id = design.add_module(module);
    design.set_top(id);
    design
}

#[test]
fn run_cycles_counts_frames() {
    let mut options = test_options();
    options.frame_signal = Some("at_top".into());
    let kinds = available_backends(&options);
    let mut run = Lockstep::new(&wrap_flag(), &kinds, &options).unwrap();
    let summary = run.run_cycles(8).unwrap();
    assert_eq!(summary.cycles_run, 8);
    assert_eq!(summary.frames_completed, 2);
    assert_eq!(run.peek_u64("count").unwrap(), 0);
}

#[test]
fn datapath_operators_and_select_chain() {
    let mut run = Lockstep::available(&datapath().unwrap()).unwrap();
    for (name, value) in [("a", 0xf0), ("b", 0x0f), ("sh", 9), ("sel", 0), ("w0", 3), ("w1", 5)] {
        run.poke_u64(name, value).unwrap();
    }
    run.settle().unwrap();
    assert_eq!(run.peek_u64("cat").unwrap(), 0xf00f);
    assert_eq!(run.peek_u64("neg").unwrap(), 0x10);
    assert_eq!(run.peek_u64("flags").unwrap(), 0b0_1001_0011);
    assert_eq!(run.peek_u64("logic").unwrap(), 0b11);
    assert_eq!(run.peek_u64("shl").unwrap(), 0);
    assert_eq!(run.peek_u64("shr").unwrap(), 0);
    assert_eq!(run.peek_u64("quot").unwrap(), 0x10);
    assert_eq!(run.peek_u64("rem").unwrap(), 0);
    assert_eq!(run.peek_u64("pick").unwrap(), 0xf0);
    assert_eq!(run.peek_u64("wide").unwrap(), 0xffff_ffff_ffff_fff2);
    assert_eq!(run.peek_u64("wsh").unwrap(), 0x60);

    run.poke_u64("sh", 3).unwrap();
    run.poke_u64("sel", 1).unwrap();
    run.settle().unwrap();
    assert_eq!(run.peek_u64("shl").unwrap(), 0x80);
    assert_eq!(run.peek_u64("shr").unwrap(), 1);
    assert_eq!(run.peek_u64("pick").unwrap(), 0x0f);

    run.poke_u64("sel", 2).unwrap();
    run.settle().unwrap();
    assert_eq!(run.peek_u64("pick").unwrap(), 0x01);
}

#[test]
fn derived_clock_steps_at_half_rate() {
    let mut run = Lockstep::available(&datapath().unwrap()).unwrap();
    run.poke_u64("a", 0xf0).unwrap();
    run.poke_u64("rst", 1).unwrap();
    run.step().unwrap();
    run.poke_u64("rst", 0).unwrap();
    for _ in 0..4 {
        run.step().unwrap();
    }
    assert_eq!(run.peek_u64("half").unwrap(), 0);
    assert_eq!(run.peek_u64("slow").unwrap(), 0xe0);
    assert_eq!(run.peek_u64("hist").unwrap(), 0);

    run.poke_u64("sel", 3).unwrap();
    run.step().unwrap();
    assert_eq!(run.peek_u64("hist").unwrap(), 0xf0);
    run.step().unwrap();
    assert_eq!(run.peek_u64("hist").unwrap(), 0);
}

#[test]
fn unknown_names_are_reported() {
    let mut run = Lockstep::available(&counter(2).unwrap()).unwrap();
    assert!(matches!(
        run.poke_u64("nope", 1),
        Err(ConformanceError::Sim(SimError::UnknownSignal { .. }))
    ));
    assert!(matches!(
        run.poke_u64("q", 1),
        Err(ConformanceError::Sim(SimError::NotAnInput { .. }))
    ));
    assert!(matches!(
        run.peek("nope"),
        Err(ConformanceError::Sim(SimError::UnknownSignal { .. }))
    ));
}
