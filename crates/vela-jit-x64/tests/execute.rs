//! End-to-end: compile blocks and run them on a real CpuState, checking
//! the architectural results the emitters promise.

mod common;

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Mutex;

use common::{callbacks, loc};
use vela_jit_ir::{IrBuilder, LocationDescriptor, Opcode, Operand, Terminator};
use vela_types::{cpsr, Cond, ExtReg, Fpscr, FpscrFlags, Reg};
use vela_jit_x64::{CpuState, X64Backend, PAGE_TABLE_ENTRIES};

fn state_with_cycles(cycles: i64) -> CpuState {
    let mut state = CpuState::default();
    state.cycles_remaining = cycles;
    state
}

fn backend() -> X64Backend {
    X64Backend::with_capacity(callbacks(), 1 << 20).unwrap()
}

#[test]
fn set_register_and_cycle_accounting() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    b.set_register(Reg::R0, Operand::U32(0xDEAD_BEEF));
    b.set_cycle_count(2);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0xDEAD_BEEF);
    assert_eq!(state.cycles_remaining, 98);
}

#[test]
fn adds_sets_nzcv_on_signed_overflow() {
    // ADDS r0, r1, r2 with r1=0x7FFFFFFF, r2=1
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let lhs = b.get_register(Reg::R1);
    let rhs = b.get_register(Reg::R2);
    let sum = b.add_with_carry(lhs, rhs, Operand::U1(false));
    let carry = b.carry_from(sum);
    let overflow = b.overflow_from(sum);
    let negative = b.most_significant_bit(sum);
    let zero = b.is_zero(sum);
    b.set_register(Reg::R0, sum);
    b.set_n_flag(negative);
    b.set_z_flag(zero);
    b.set_c_flag(carry);
    b.set_v_flag(overflow);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[1] = 0x7FFF_FFFF;
    state.regs[2] = 1;
    unsafe { backend.run(&mut state, &desc) };

    assert_eq!(state.regs[0], 0x8000_0000);
    assert_ne!(state.cpsr & cpsr::N_MASK, 0);
    assert_eq!(state.cpsr & cpsr::Z_MASK, 0);
    assert_eq!(state.cpsr & cpsr::C_MASK, 0);
    assert_ne!(state.cpsr & cpsr::V_MASK, 0);
}

#[test]
fn subs_carry_uses_the_inverted_borrow_convention() {
    // SUBS r0, r1, r2 with r1 >= r2 leaves C set (no borrow).
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let lhs = b.get_register(Reg::R1);
    let rhs = b.get_register(Reg::R2);
    let diff = b.sub_with_carry(lhs, rhs, Operand::U1(true));
    let carry = b.carry_from(diff);
    b.set_register(Reg::R0, diff);
    b.set_c_flag(carry);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[1] = 10;
    state.regs[2] = 3;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 7);
    assert_ne!(state.cpsr & cpsr::C_MASK, 0);

    let mut state = state_with_cycles(100);
    state.regs[1] = 3;
    state.regs[2] = 10;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 3u32.wrapping_sub(10));
    assert_eq!(state.cpsr & cpsr::C_MASK, 0);
}

#[test]
fn lsr_by_32_zeroes_and_carries_the_sign_bit() {
    // LSRS r0, r1, #32 with r1 = 0xDEADBEEF
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let value = b.get_register(Reg::R1);
    let shifted = b.logical_shift_right(value, Operand::U8(32), Operand::U1(false));
    let carry = b.carry_from(shifted);
    b.set_register(Reg::R0, shifted);
    b.set_c_flag(carry);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[1] = 0xDEAD_BEEF;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0);
    assert_ne!(state.cpsr & cpsr::C_MASK, 0);
}

#[test]
fn variable_rotate_by_zero_preserves_result_and_carry() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let value = b.get_register(Reg::R1);
    let count_reg = b.get_register(Reg::R2);
    let count = b.inst(Opcode::LeastSignificantByte, &[count_reg]);
    let carry_in = b.get_c_flag();
    let rotated = b.rotate_right(value, count, carry_in);
    let carry = b.carry_from(rotated);
    b.set_register(Reg::R0, rotated);
    b.set_c_flag(carry);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[1] = 0xA5A5_0001;
    state.regs[2] = 0;
    state.cpsr = cpsr::C_MASK;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0xA5A5_0001);
    assert_ne!(state.cpsr & cpsr::C_MASK, 0);

    // A non-zero count still rotates and latches the new carry.
    let mut state = state_with_cycles(100);
    state.regs[1] = 0xA5A5_0001;
    state.regs[2] = 4;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0x1A5A_5000);
    assert_eq!(state.cpsr & cpsr::C_MASK, 0);
}

#[test]
fn asr_saturates_at_31() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let value = b.get_register(Reg::R1);
    let shifted = b.arithmetic_shift_right(value, Operand::U8(40), Operand::U1(false));
    b.set_register(Reg::R0, shifted);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[1] = 0x8000_0000;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0xFFFF_FFFF);

    let mut state = state_with_cycles(100);
    state.regs[1] = 0x7FFF_FFFF;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0);
}

#[test]
fn uqadd8_saturates_per_byte_lane() {
    // UQADD8 r0, r1, r2
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let lhs = b.get_register(Reg::R1);
    let rhs = b.get_register(Reg::R2);
    let sum = b.inst(Opcode::PackedSaturatedAddU8, &[lhs, rhs]);
    b.set_register(Reg::R0, sum);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[1] = 0x01FF_80FE;
    state.regs[2] = 0x0101_0180;
    unsafe { backend.run(&mut state, &desc) };
    // Lanes: 01+01=02, FF+01 saturates, 80+01=81, FE+80 saturates.
    assert_eq!(state.regs[0], 0x02FF_81FF);
}

#[test]
fn packed_halving_add_u16_averages_lanes() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let lhs = b.get_register(Reg::R1);
    let rhs = b.get_register(Reg::R2);
    let avg = b.inst(Opcode::PackedHalvingAddU16, &[lhs, rhs]);
    b.set_register(Reg::R0, avg);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[1] = 0xFFFF_0002;
    state.regs[2] = 0xFFFF_0004;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0xFFFF_0003);
}

#[test]
fn packed_add_s8_reports_ge_flags() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let lhs = b.get_register(Reg::R1);
    let rhs = b.get_register(Reg::R2);
    let sum = b.inst(Opcode::PackedAddS8, &[lhs, rhs]);
    let ge = b.ge_from(sum);
    b.set_register(Reg::R0, sum);
    b.set_ge_flags(ge);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    // Lane sums (LSB lane first): -1 + -1 = -2 (<0), 0x7F + 1 wraps in the
    // byte but the true sum 128 is >= 0, 1 + 0 = 1 (>=0), 0 + 0 = 0 (>=0).
    state.regs[1] = 0x0001_7FFF;
    state.regs[2] = 0x0000_01FF;
    unsafe { backend.run(&mut state, &desc) };
    // GE bits, lane 0 in bit 0: 0b1110
    assert_eq!((state.cpsr >> cpsr::GE_BIT) & 0xF, 0b1110);
}

#[test]
fn qadd_saturates_and_sets_q() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let lhs = b.get_register(Reg::R1);
    let rhs = b.get_register(Reg::R2);
    let sum = b.signed_saturated_add(lhs, rhs);
    let overflow = b.overflow_from(sum);
    b.set_register(Reg::R0, sum);
    b.or_q_flag(overflow);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[1] = 0x7FFF_FFFF;
    state.regs[2] = 1;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0x7FFF_FFFF);
    assert_ne!(state.cpsr & cpsr::Q_MASK, 0);

    let mut state = state_with_cycles(100);
    state.regs[1] = 5;
    state.regs[2] = 6;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 11);
    assert_eq!(state.cpsr & cpsr::Q_MASK, 0);
}

#[test]
fn ssat_clamps_to_the_requested_width() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let value = b.get_register(Reg::R1);
    let saturated = b.signed_saturation(value, 8);
    b.set_register(Reg::R0, saturated);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    for (input, expected) in [
        (1000u32, 127u32),
        (0xFFFF_FC18, 0xFFFF_FF80), // -1000 -> -128
        (42, 42),
        (0xFFFF_FFF6, 0xFFFF_FFF6), // -10 in range
    ] {
        let mut state = state_with_cycles(100);
        state.regs[1] = input;
        unsafe { backend.run(&mut state, &desc) };
        assert_eq!(state.regs[0], expected, "input {input:#x}");
    }
}

#[test]
fn usat_clamps_to_unsigned_range() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let value = b.get_register(Reg::R1);
    let saturated = b.unsigned_saturation(value, 8);
    b.set_register(Reg::R0, saturated);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    for (input, expected) in [
        (1000u32, 255u32),
        (0x8000_0000, 0), // negative -> 0
        (200, 200),
    ] {
        let mut state = state_with_cycles(100);
        state.regs[1] = input;
        unsafe { backend.run(&mut state, &desc) };
        assert_eq!(state.regs[0], expected, "input {input:#x}");
    }
}

#[test]
fn clz_counts_leading_zeros() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let value = b.get_register(Reg::R1);
    let count = b.count_leading_zeros(value);
    b.set_register(Reg::R0, count);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    for (input, expected) in [(0x00F0_0000u32, 8u32), (1, 31), (0x8000_0000, 0), (0, 32)] {
        let mut state = state_with_cycles(100);
        state.regs[1] = input;
        unsafe { backend.run(&mut state, &desc) };
        assert_eq!(state.regs[0], expected, "input {input:#x}");
    }
}

#[test]
fn bx_write_pc_switches_to_thumb() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let target = b.get_register(Reg::R0);
    b.bx_write_pc(target);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[0] = 0x2001;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[15], 0x2000);
    assert_ne!(state.cpsr & cpsr::T_MASK, 0);

    let mut state = state_with_cycles(100);
    state.regs[0] = 0x2002;
    state.cpsr = cpsr::T_MASK;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[15], 0x2000);
    assert_eq!(state.cpsr & cpsr::T_MASK, 0);
}

#[test]
fn cpsr_round_trips() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let value = b.get_cpsr();
    b.set_register(Reg::R0, value);
    b.set_cpsr(Operand::U32(0xF00F_0220));
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.cpsr = 0x1234_5678;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0x1234_5678);
    assert_eq!(state.cpsr, 0xF00F_0220);
}

#[test]
fn fp_add_under_ftz_flushes_denormal_inputs() {
    // VADD.F32 s0, s1, s2 with a denormal s1 and FTZ set.
    let mut backend = backend();
    let location = LocationDescriptor::new(0x1000, 0, Fpscr::from_bits(FpscrFlags::FTZ.bits()));
    let mut b = IrBuilder::new(location);
    let a = b.get_ext_register(ExtReg::S(1));
    let c = b.get_ext_register(ExtReg::S(2));
    let sum = b.inst(Opcode::FPAdd32, &[a, c]);
    b.set_ext_register(ExtReg::S(0), sum);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.ext_regs[1] = 0x0040_0000; // subnormal
    state.ext_regs[2] = 0;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.ext_regs[0], 0); // +0
    assert_ne!(state.fpscr_idc & FpscrFlags::IDC.bits(), 0);
}

#[test]
fn fp_add_without_ftz_keeps_denormals() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let a = b.get_ext_register(ExtReg::S(1));
    let c = b.get_ext_register(ExtReg::S(2));
    let sum = b.inst(Opcode::FPAdd32, &[a, c]);
    b.set_ext_register(ExtReg::S(0), sum);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.ext_regs[1] = 0x0040_0000;
    state.ext_regs[2] = 0;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.ext_regs[0], 0x0040_0000);
    assert_eq!(state.fpscr_idc, 0);
}

#[test]
fn fp_default_nan_canonicalizes_results() {
    let mut backend = backend();
    let location = LocationDescriptor::new(0x1000, 0, Fpscr::from_bits(FpscrFlags::DN.bits()));
    let mut b = IrBuilder::new(location);
    let a = b.get_ext_register(ExtReg::S(1));
    let c = b.get_ext_register(ExtReg::S(2));
    let sum = b.inst(Opcode::FPAdd32, &[a, c]);
    b.set_ext_register(ExtReg::S(0), sum);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.ext_regs[1] = 0xFFC0_0001; // a signalling-ish NaN with payload
    state.ext_regs[2] = f32::to_bits(1.0);
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.ext_regs[0], 0x7FC0_0000);
}

#[test]
fn fp_double_arithmetic_round_trips_registers() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let a = b.get_ext_register(ExtReg::D(1));
    let c = b.get_ext_register(ExtReg::D(2));
    let product = b.inst(Opcode::FPMul64, &[a, c]);
    b.set_ext_register(ExtReg::D(0), product);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    let write_d = |state: &mut CpuState, idx: usize, v: f64| {
        let bits = v.to_bits();
        state.ext_regs[2 * idx] = bits as u32;
        state.ext_regs[2 * idx + 1] = (bits >> 32) as u32;
    };
    write_d(&mut state, 1, 2.5);
    write_d(&mut state, 2, 4.0);
    unsafe { backend.run(&mut state, &desc) };
    let d0 = u64::from(state.ext_regs[0]) | (u64::from(state.ext_regs[1]) << 32);
    assert_eq!(f64::from_bits(d0), 10.0);
}

#[test]
fn fp_to_int_conversion_saturates() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let value = b.get_ext_register(ExtReg::S(1));
    let converted = b.inst(Opcode::FPSingleToS32, &[value, Operand::U1(true)]);
    b.set_register(Reg::R0, converted);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    for (input, expected) in [
        (1e10f32, 0x7FFF_FFFFu32),
        (-1e10, 0x8000_0000),
        (42.75, 42),
        (-7.9, -7i32 as u32),
    ] {
        let mut state = state_with_cycles(100);
        state.ext_regs[1] = input.to_bits();
        unsafe { backend.run(&mut state, &desc) };
        assert_eq!(state.regs[0], expected, "input {input}");
    }
}

#[test]
fn fp_compare_fills_the_nzcv_mirror() {
    let mut backend = backend();
    let mut b = IrBuilder::new(loc(0x1000));
    let a = b.get_ext_register(ExtReg::S(1));
    let c = b.get_ext_register(ExtReg::S(2));
    b.inst(Opcode::FPCompare32, &[a, c, Operand::U1(true)]);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    for (lhs, rhs, expected) in [
        (1.0f32, 1.0f32, 0x6000_0000u32), // equal
        (1.0, 2.0, 0x8000_0000),          // less
        (2.0, 1.0, 0x2000_0000),          // greater
        (f32::NAN, 1.0, 0x3000_0000),     // unordered
    ] {
        let mut state = state_with_cycles(100);
        state.ext_regs[1] = lhs.to_bits();
        state.ext_regs[2] = rhs.to_bits();
        unsafe { backend.run(&mut state, &desc) };
        assert_eq!(state.fpscr_nzcv, expected, "{lhs} cmp {rhs}");
    }
}

#[test]
fn block_chaining_links_once_the_successor_exists() {
    let mut backend = backend();
    let next = loc(0x2000);

    let mut b = IrBuilder::new(loc(0x1000));
    b.set_register(Reg::R1, Operand::U32(7));
    b.set_cycle_count(1);
    b.set_end_pc(0x1004);
    b.set_terminator(Terminator::LinkBlock { next });
    let mut block_a = b.finish();
    let desc_a = backend.compile(&mut block_a).unwrap();

    // Successor not compiled: execution returns to the dispatcher with
    // the successor's PC stored.
    let mut state = state_with_cycles(100);
    unsafe { backend.run(&mut state, &desc_a) };
    assert_eq!(state.regs[1], 7);
    assert_eq!(state.regs[2], 0);
    assert_eq!(state.regs[15], 0x2000);
    assert_eq!(state.cycles_remaining, 99);

    let mut b = IrBuilder::new(next);
    b.set_register(Reg::R2, Operand::U32(9));
    b.set_cycle_count(1);
    b.set_end_pc(0x2004);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block_b = b.finish();
    backend.compile(&mut block_b).unwrap();

    // Re-running A now falls straight through into B.
    let mut state = state_with_cycles(100);
    unsafe { backend.run(&mut state, &desc_a) };
    assert_eq!(state.regs[1], 7);
    assert_eq!(state.regs[2], 9);
    assert_eq!(state.cycles_remaining, 98);
}

#[test]
fn chaining_stops_when_cycles_run_out() {
    let mut backend = backend();
    let next = loc(0x2000);

    let mut b = IrBuilder::new(loc(0x1000));
    b.set_cycle_count(5);
    b.set_end_pc(0x1004);
    b.set_terminator(Terminator::LinkBlock { next });
    let mut block_a = b.finish();
    let desc_a = backend.compile(&mut block_a).unwrap();

    let mut b = IrBuilder::new(next);
    b.set_register(Reg::R2, Operand::U32(9));
    b.set_cycle_count(1);
    b.set_end_pc(0x2004);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block_b = b.finish();
    backend.compile(&mut block_b).unwrap();

    // Cycles go non-positive inside A, so the chain is not taken even
    // though B is compiled.
    let mut state = state_with_cycles(3);
    unsafe { backend.run(&mut state, &desc_a) };
    assert_eq!(state.regs[2], 0);
    assert_eq!(state.regs[15], 0x2000);
    assert_eq!(state.cycles_remaining, -2);
}

#[test]
fn rsb_hit_jumps_straight_to_the_cached_block() {
    let mut backend = backend();
    let target = loc(0x2000);

    // Compile the return target first so the push stores a live pointer.
    let mut b = IrBuilder::new(target);
    b.set_register(Reg::R7, Operand::U32(1));
    b.set_cycle_count(1);
    b.set_end_pc(0x2004);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block_t = b.finish();
    backend.compile(&mut block_t).unwrap();

    let mut b = IrBuilder::new(loc(0x1000));
    b.push_rsb(target);
    b.set_cycle_count(1);
    b.set_end_pc(0x1004);
    b.set_terminator(Terminator::PopRsbHint);
    let mut block_a = b.finish();
    let desc_a = backend.compile(&mut block_a).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[15] = 0x2000; // what the guest return lands on
    unsafe { backend.run(&mut state, &desc_a) };
    assert_eq!(state.regs[7], 1, "expected the RSB hit to enter the target");
    assert_eq!(state.cycles_remaining, 98);
    assert_eq!(state.rsb_index, 1);
    assert_eq!(state.rsb_location_descriptors[1], target.unique_hash());
}

#[test]
fn rsb_miss_returns_to_the_dispatcher() {
    let mut backend = backend();

    let mut b = IrBuilder::new(loc(0x1000));
    b.set_cycle_count(1);
    b.set_end_pc(0x1004);
    b.set_terminator(Terminator::PopRsbHint);
    let mut block_a = b.finish();
    let desc_a = backend.compile(&mut block_a).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[15] = 0x3000;
    unsafe { backend.run(&mut state, &desc_a) };
    assert_eq!(state.regs[7], 0);
    assert_eq!(state.cycles_remaining, 99);
}

#[test]
fn condition_prelude_routes_the_failed_path() {
    let mut backend = backend();
    let failed = loc(0x1004);

    let mut b = IrBuilder::new(loc(0x1000));
    b.set_condition(Cond::Eq, failed, 1);
    b.set_register(Reg::R0, Operand::U32(1));
    b.set_cycle_count(2);
    b.set_end_pc(0x1004);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    // Z set: the guard passes and the body runs.
    let mut state = state_with_cycles(100);
    state.cpsr = cpsr::Z_MASK;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 1);
    assert_eq!(state.cycles_remaining, 98);

    // Z clear: charge the failure cycles and leave for the failed-edge
    // location without touching r0.
    let mut state = state_with_cycles(100);
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0);
    assert_eq!(state.regs[15], 0x1004);
    assert_eq!(state.cycles_remaining, 99);
}

#[test]
fn check_halt_returns_before_the_tail() {
    let mut backend = backend();
    let next = loc(0x2000);

    let mut b = IrBuilder::new(loc(0x1000));
    b.set_cycle_count(1);
    b.set_end_pc(0x1004);
    b.set_terminator(Terminator::CheckHalt {
        fallthrough: Box::new(Terminator::LinkBlockFast { next }),
    });
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    // Halt requested: the uncompiled-link fallback never runs, so PC is
    // left alone.
    let mut state = state_with_cycles(100);
    state.halt_requested = 1;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[15], 0);

    // No halt: fall through to the link, which stores the successor PC.
    let mut state = state_with_cycles(100);
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[15], 0x2000);
}

static INTERPRETED_PCS: Mutex<Vec<(u32, usize)>> = Mutex::new(Vec::new());

unsafe extern "C" fn record_interpreter(pc: u32, user: *mut c_void) {
    INTERPRETED_PCS.lock().unwrap().push((pc, user as usize));
}

#[test]
fn interpret_terminator_calls_the_fallback() {
    let mut cb = callbacks();
    cb.interpreter_fallback = record_interpreter;
    cb.user_arg = 0x1234 as *mut c_void;
    let mut backend = X64Backend::with_capacity(cb, 1 << 20).unwrap();

    let next = loc(0x2000);
    let mut b = IrBuilder::new(loc(0x1000));
    b.set_cycle_count(1);
    b.set_end_pc(0x1004);
    b.set_terminator(Terminator::Interpret { next });
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[15], 0x2000);
    assert_eq!(
        INTERPRETED_PCS.lock().unwrap().as_slice(),
        &[(0x2000, 0x1234)]
    );
}

static RECORDED_WRITES: Mutex<Vec<(u32, u32)>> = Mutex::new(Vec::new());

unsafe extern "C" fn record_write32(vaddr: u32, value: u32) {
    RECORDED_WRITES.lock().unwrap().push((vaddr, value));
}

#[test]
fn exclusive_store_respects_the_monitor() {
    let mut cb = callbacks();
    cb.write_memory_32 = record_write32;
    let mut backend = X64Backend::with_capacity(cb, 1 << 20).unwrap();

    let mut b = IrBuilder::new(loc(0x1000));
    let addr = b.get_register(Reg::R1);
    let value = b.get_register(Reg::R2);
    let failed = b.exclusive_write_memory_32(addr, value);
    b.set_register(Reg::R0, failed);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    // With a matching reservation the store happens and reports success.
    let mut state = state_with_cycles(100);
    state.regs[1] = 0x100;
    state.regs[2] = 42;
    state.exclusive_state = 1;
    state.exclusive_address = 0x104; // same 8-byte granule
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0);
    assert_eq!(state.exclusive_state, 0);
    assert_eq!(RECORDED_WRITES.lock().unwrap().as_slice(), &[(0x100, 42)]);

    // Without a reservation the store is suppressed and reports failure.
    RECORDED_WRITES.lock().unwrap().clear();
    let mut state = state_with_cycles(100);
    state.regs[1] = 0x100;
    state.regs[2] = 43;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 1);
    assert!(RECORDED_WRITES.lock().unwrap().is_empty());

    // A reservation for a different granule also fails the store.
    let mut state = state_with_cycles(100);
    state.regs[1] = 0x100;
    state.regs[2] = 44;
    state.exclusive_state = 1;
    state.exclusive_address = 0x200;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 1);
    assert!(RECORDED_WRITES.lock().unwrap().is_empty());
}

#[test]
fn page_table_accesses_bypass_the_callbacks() {
    let mut page = vec![0u8; vela_jit_x64::PAGE_SIZE].into_boxed_slice();
    page[4..8].copy_from_slice(&0xCAFE_BABEu32.to_le_bytes());
    let mut table: Vec<*mut u8> = vec![std::ptr::null_mut(); PAGE_TABLE_ENTRIES];
    table[0x10] = page.as_mut_ptr();

    let mut cb = callbacks();
    cb.page_table = NonNull::new(table.as_mut_ptr());
    let mut backend = X64Backend::with_capacity(cb, 1 << 20).unwrap();

    let mut b = IrBuilder::new(loc(0x1000));
    let loaded = b.read_memory_32(Operand::U32(0x1_0004));
    b.set_register(Reg::R0, loaded);
    let store_value = b.get_register(Reg::R1);
    b.write_memory_32(Operand::U32(0x1_0008), store_value);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    state.regs[1] = 0x1122_3344;
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0xCAFE_BABE);
    assert_eq!(&page[8..12], &0x1122_3344u32.to_le_bytes());
}

static UNMAPPED_READS: Mutex<Vec<u32>> = Mutex::new(Vec::new());

unsafe extern "C" fn record_read32(vaddr: u32) -> u32 {
    UNMAPPED_READS.lock().unwrap().push(vaddr);
    0x5555_AAAA
}

#[test]
fn page_table_miss_lands_in_the_callback() {
    let mut table: Vec<*mut u8> = vec![std::ptr::null_mut(); PAGE_TABLE_ENTRIES];

    let mut cb = callbacks();
    cb.read_memory_32 = record_read32;
    cb.page_table = NonNull::new(table.as_mut_ptr());
    let mut backend = X64Backend::with_capacity(cb, 1 << 20).unwrap();

    let mut b = IrBuilder::new(loc(0x1000));
    let loaded = b.read_memory_32(Operand::U32(0x2_0000));
    b.set_register(Reg::R0, loaded);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();

    let mut state = state_with_cycles(100);
    unsafe { backend.run(&mut state, &desc) };
    assert_eq!(state.regs[0], 0x5555_AAAA);
    assert_eq!(UNMAPPED_READS.lock().unwrap().as_slice(), &[0x2_0000]);
    drop(table);
}
