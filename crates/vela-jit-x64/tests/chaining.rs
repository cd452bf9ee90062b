//! The block-linking lifecycle: patch sites are written at a fixed size,
//! re-aimed when their target compiles, and diverted back to the
//! dispatcher on invalidation, all without moving a byte.

mod common;

use common::{callbacks, decode_all, loc};
use iced_x86::{Code, Mnemonic};
use vela_jit_ir::{AddressRange, IrBuilder, Terminator};
use vela_types::Reg;
use vela_jit_x64::{
    PatchKind, X64Backend, PATCH_JG_SIZE, PATCH_JMP_SIZE, PATCH_MOV_RCX_SIZE,
};

fn simple_block(backend: &mut X64Backend, pc: u32, terminator: Terminator) -> vela_jit_x64::BlockDescriptor {
    let mut b = IrBuilder::new(loc(pc));
    b.set_register(Reg::R0, vela_jit_ir::Operand::U32(pc));
    b.set_cycle_count(1);
    b.set_end_pc(pc + 4);
    b.set_terminator(terminator);
    let mut block = b.finish();
    backend.compile(&mut block).unwrap()
}

#[test]
fn conditional_link_is_patched_and_unpatched_in_place() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    let target = loc(0x2000);

    simple_block(&mut backend, 0x1000, Terminator::LinkBlock { next: target });

    let sites = backend.patch_sites(target);
    assert_eq!(sites.len(), 1);
    let (kind, addr) = sites[0];
    assert_eq!(kind, PatchKind::Jg);

    // Uncompiled target: the site is a size-preserving nop.
    let insts = decode_all(backend.code_at(addr, PATCH_JG_SIZE), addr);
    assert_eq!(insts.len(), 1);
    assert_eq!(insts[0].code(), Code::Nop_rm16);
    assert_eq!(insts[0].len(), PATCH_JG_SIZE);

    // Compiling the target rewrites the site into a jg aimed at it.
    let desc_b = simple_block(&mut backend, 0x2000, Terminator::ReturnToDispatch);
    let insts = decode_all(backend.code_at(addr, PATCH_JG_SIZE), addr);
    assert_eq!(insts[0].code(), Code::Jg_rel32_64);
    assert_eq!(insts[0].near_branch_target(), desc_b.entrypoint);
    assert_eq!(insts[0].len(), PATCH_JG_SIZE);

    // Invalidating the target reverts the site, same length.
    backend.invalidate_cache_range(AddressRange::Interval {
        start: 0x2000,
        length: 4,
    });
    assert!(backend.get_basic_block(target).is_none());
    let insts = decode_all(backend.code_at(addr, PATCH_JG_SIZE), addr);
    assert_eq!(insts[0].code(), Code::Nop_rm16);
}

#[test]
fn unconditional_link_falls_back_to_a_pc_store() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    let target = loc(0x4000);

    simple_block(&mut backend, 0x3000, Terminator::LinkBlockFast { next: target });
    let (kind, addr) = backend.patch_sites(target)[0];
    assert_eq!(kind, PatchKind::Jmp);

    // Uncompiled: store the successor PC, jump to the dispatcher.
    let insts = decode_all(backend.code_at(addr, PATCH_JMP_SIZE), addr);
    assert_eq!(insts.len(), 2);
    assert_eq!(insts[0].code(), Code::Mov_rm32_imm32);
    assert_eq!(insts[0].immediate(1), 0x4000);
    assert_eq!(insts[1].mnemonic(), Mnemonic::Jmp);
    assert_eq!(insts[1].near_branch_target(), backend.return_trampoline());
    assert_eq!(insts[0].len() + insts[1].len(), PATCH_JMP_SIZE);

    // Compiled: a direct jmp padded out to the same budget.
    let desc_b = simple_block(&mut backend, 0x4000, Terminator::ReturnToDispatch);
    let insts = decode_all(backend.code_at(addr, PATCH_JMP_SIZE), addr);
    assert_eq!(insts[0].code(), Code::Jmp_rel32_64);
    assert_eq!(insts[0].near_branch_target(), desc_b.entrypoint);
    assert_eq!(
        insts.iter().map(iced_x86::Instruction::len).sum::<usize>(),
        PATCH_JMP_SIZE
    );
}

#[test]
fn rsb_pointer_load_tracks_the_target_block() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    let target = loc(0x6000);

    let mut b = IrBuilder::new(loc(0x5000));
    b.push_rsb(target);
    b.set_cycle_count(1);
    b.set_end_pc(0x5004);
    b.set_terminator(Terminator::ReturnToDispatch);
    let mut block = b.finish();
    backend.compile(&mut block).unwrap();

    let (kind, addr) = backend.patch_sites(target)[0];
    assert_eq!(kind, PatchKind::MovRcx);

    let insts = decode_all(backend.code_at(addr, PATCH_MOV_RCX_SIZE), addr);
    assert_eq!(insts[0].code(), Code::Mov_r64_imm64);
    assert_eq!(insts[0].immediate64(), backend.return_trampoline());

    let desc_b = simple_block(&mut backend, 0x6000, Terminator::ReturnToDispatch);
    let insts = decode_all(backend.code_at(addr, PATCH_MOV_RCX_SIZE), addr);
    assert_eq!(insts[0].immediate64(), desc_b.entrypoint);
    assert_eq!(insts[0].len(), PATCH_MOV_RCX_SIZE);
}

#[test]
fn clear_cache_drops_blocks_and_allows_recompilation() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    let a = loc(0x1000);

    simple_block(&mut backend, 0x1000, Terminator::ReturnToDispatch);
    assert!(backend.get_basic_block(a).is_some());

    backend.clear_cache();
    assert!(backend.get_basic_block(a).is_none());

    // Recompiling the same location after a clear is legal.
    simple_block(&mut backend, 0x1000, Terminator::ReturnToDispatch);
    assert!(backend.get_basic_block(a).is_some());
}

#[test]
fn full_range_invalidation_behaves_like_clear() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    simple_block(&mut backend, 0x1000, Terminator::ReturnToDispatch);
    simple_block(&mut backend, 0x2000, Terminator::ReturnToDispatch);

    backend.invalidate_cache_range(AddressRange::Full);
    assert!(backend.get_basic_block(loc(0x1000)).is_none());
    assert!(backend.get_basic_block(loc(0x2000)).is_none());
}

#[test]
fn invalidation_leaves_unrelated_blocks_alone() {
    let mut backend = X64Backend::with_capacity(callbacks(), 1 << 20).unwrap();
    simple_block(&mut backend, 0x1000, Terminator::ReturnToDispatch);
    simple_block(&mut backend, 0x2000, Terminator::ReturnToDispatch);

    backend.invalidate_cache_range(AddressRange::Interval {
        start: 0x1000,
        length: 4,
    });
    assert!(backend.get_basic_block(loc(0x1000)).is_none());
    assert!(backend.get_basic_block(loc(0x2000)).is_some());
}
