//! Structural checks on emitted code: decode compiled blocks and assert
//! the instruction patterns the emitters promise.

mod common;

use common::{callbacks, decode_all, loc};
use iced_x86::{FlowControl, Mnemonic, OpKind, Register};
use vela_jit_ir::{IrBuilder, Opcode, Operand, Terminator};
use vela_types::Reg;
use vela_jit_x64::X64Backend;

#[test]
fn bx_write_pc_register_path_is_branch_free() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    let mut b = IrBuilder::new(loc(0x1000));
    let target = b.get_register(Reg::R0);
    b.bx_write_pc(target);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();

    let desc = backend.compile(&mut block).unwrap();
    let insts = decode_all(backend.block_code(&desc), desc.entrypoint);

    assert!(
        insts
            .iter()
            .all(|i| i.flow_control() != FlowControl::ConditionalBranch),
        "BXWritePC must not branch"
    );
    assert!(insts.iter().any(|i| i.mnemonic() == Mnemonic::Cmove));
    // The alignment-mask trick: lea off a doubled register.
    assert!(insts.iter().any(|i| i.mnemonic() == Mnemonic::Lea));
}

#[test]
fn variable_shift_guards_large_counts() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    let mut b = IrBuilder::new(loc(0x1000));
    let value = b.get_register(Reg::R0);
    let count_reg = b.get_register(Reg::R1);
    let count = b.inst(Opcode::LeastSignificantByte, &[count_reg]);
    let shifted = b.logical_shift_left(value, count, Operand::U1(false));
    b.set_register(Reg::R2, shifted);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();

    let desc = backend.compile(&mut block).unwrap();
    let insts = decode_all(backend.block_code(&desc), desc.entrypoint);

    // cmp cl, 32 followed by a cmovae onto a zeroed register.
    assert!(insts.iter().any(|i| {
        i.mnemonic() == Mnemonic::Cmp
            && i.op0_kind() == OpKind::Register
            && i.op0_register() == Register::CL
            && i.immediate(1) == 32
    }));
    assert!(insts.iter().any(|i| i.mnemonic() == Mnemonic::Cmovae));
}

#[test]
fn carry_in_selection_matches_the_flag_convention() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();

    // Immediate carry-in of 1: STC; ADC.
    let mut b = IrBuilder::new(loc(0x1000));
    let lhs = b.get_register(Reg::R0);
    let rhs = b.get_register(Reg::R1);
    let sum = b.add_with_carry(lhs, rhs, Operand::U1(true));
    b.set_register(Reg::R2, sum);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();
    let insts = decode_all(backend.block_code(&desc), desc.entrypoint);
    assert!(insts.iter().any(|i| i.mnemonic() == Mnemonic::Stc));
    assert!(insts.iter().any(|i| i.mnemonic() == Mnemonic::Adc));

    // Runtime borrow for subtraction: BT; CMC; SBB, carry out via SETAE.
    let mut b = IrBuilder::new(loc(0x2000));
    let lhs = b.get_register(Reg::R0);
    let rhs = b.get_register(Reg::R1);
    let carry = b.get_c_flag();
    let diff = b.sub_with_carry(lhs, rhs, carry);
    let carry_out = b.carry_from(diff);
    b.set_c_flag(carry_out);
    b.set_register(Reg::R2, diff);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    let desc = backend.compile(&mut block).unwrap();
    let insts = decode_all(backend.block_code(&desc), desc.entrypoint);
    assert!(insts.iter().any(|i| i.mnemonic() == Mnemonic::Bt));
    assert!(insts.iter().any(|i| i.mnemonic() == Mnemonic::Cmc));
    assert!(insts.iter().any(|i| i.mnemonic() == Mnemonic::Sbb));
    assert!(insts.iter().any(|i| i.mnemonic() == Mnemonic::Setae));
}

#[test]
fn cycle_accounting_hits_the_cycle_counter_slot() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    let mut b = IrBuilder::new(loc(0x1000));
    b.set_register(Reg::R0, Operand::U32(5));
    b.set_cycle_count(7);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();

    let desc = backend.compile(&mut block).unwrap();
    let insts = decode_all(backend.block_code(&desc), desc.entrypoint);

    // sub qword [r15+232], 7
    assert!(insts.iter().any(|i| {
        i.mnemonic() == Mnemonic::Sub
            && i.op0_kind() == OpKind::Memory
            && i.memory_base() == Register::R15
            && i.memory_displacement64() == 232
            && i.immediate(1) == 7
    }));
}

#[test]
fn blocks_end_in_a_trap_after_the_terminator() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    let mut b = IrBuilder::new(loc(0x1000));
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();

    let desc = backend.compile(&mut block).unwrap();
    let insts = decode_all(backend.block_code(&desc), desc.entrypoint);

    assert_eq!(insts.last().unwrap().mnemonic(), Mnemonic::Int3);
    // The dispatcher return goes through an absolute register jump.
    let jmp = &insts[insts.len() - 2];
    assert_eq!(jmp.mnemonic(), Mnemonic::Jmp);
    assert_eq!(jmp.op0_kind(), OpKind::Register);
}

#[test]
fn fp_compare_reads_flags_through_lahf() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    let mut b = IrBuilder::new(loc(0x1000));
    let a = b.get_ext_register(vela_types::ExtReg::S(1));
    let c = b.get_ext_register(vela_types::ExtReg::S(2));
    b.inst(Opcode::FPCompare32, &[a, c, Operand::U1(true)]);
    b.set_cycle_count(1);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();

    let desc = backend.compile(&mut block).unwrap();
    let insts = decode_all(backend.block_code(&desc), desc.entrypoint);
    assert!(insts.iter().any(|i| i.mnemonic() == Mnemonic::Ucomiss));
    assert!(insts.iter().any(|i| i.mnemonic() == Mnemonic::Lahf));
    // Four candidate NZCV patterns, selected by cmove.
    assert!(insts.iter().filter(|i| i.mnemonic() == Mnemonic::Cmove).count() >= 4);
}

#[test]
fn rsb_pop_scans_every_slot_with_cmove() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    let mut b = IrBuilder::new(loc(0x1000));
    b.set_cycle_count(1);
    b.set_terminator(Terminator::PopRsbHint);
    let mut block = b.finish();

    let desc = backend.compile(&mut block).unwrap();
    let insts = decode_all(backend.block_code(&desc), desc.entrypoint);

    let cmoves = insts
        .iter()
        .filter(|i| i.mnemonic() == Mnemonic::Cmove && i.op1_kind() == OpKind::Memory)
        .count();
    assert_eq!(cmoves, vela_jit_x64::RSB_SIZE);
}
