//! The CpuState layout is a contract with the frontend (and with the
//! hand-encoded patch fallback, which bakes in the PC slot offset). Pin it.

use memoffset::offset_of;
use vela_jit_x64::{CpuState, RSB_SIZE, SPILL_SLOT_COUNT};

#[test]
fn cpu_state_layout_is_the_documented_contract() {
    assert_eq!(offset_of!(CpuState, regs), 0);
    assert_eq!(offset_of!(CpuState, ext_regs), 64);
    assert_eq!(offset_of!(CpuState, cpsr), 192);
    assert_eq!(offset_of!(CpuState, fpscr_idc), 196);
    assert_eq!(offset_of!(CpuState, fpscr_ufc), 200);
    assert_eq!(offset_of!(CpuState, fpscr_mode), 204);
    assert_eq!(offset_of!(CpuState, fpscr_nzcv), 208);
    assert_eq!(offset_of!(CpuState, guest_mxcsr), 212);
    assert_eq!(offset_of!(CpuState, save_host_mxcsr), 216);
    assert_eq!(offset_of!(CpuState, exclusive_address), 220);
    assert_eq!(offset_of!(CpuState, exclusive_state), 224);
    assert_eq!(offset_of!(CpuState, halt_requested), 225);
    assert_eq!(offset_of!(CpuState, cycles_remaining), 232);
    assert_eq!(offset_of!(CpuState, rsb_index), 240);
    assert_eq!(offset_of!(CpuState, rsb_location_descriptors), 248);
    assert_eq!(offset_of!(CpuState, rsb_codeptrs), 312);
    assert_eq!(offset_of!(CpuState, spill), 376);

    assert_eq!(std::mem::size_of::<CpuState>(), 376 + 8 * SPILL_SLOT_COUNT);
    assert_eq!(std::mem::align_of::<CpuState>(), 8);
}

#[test]
fn pc_slot_is_reachable_with_a_byte_displacement() {
    // The 13-byte uncompiled-link fallback encodes
    // `mov dword [state + 60], imm32` with a disp8.
    let pc_offset = offset_of!(CpuState, regs) + 4 * 15;
    assert_eq!(pc_offset, 60);
    assert!(pc_offset < 128);
}

#[test]
fn rsb_arrays_are_qword_indexed() {
    assert!(RSB_SIZE.is_power_of_two());
    assert_eq!(
        offset_of!(CpuState, rsb_codeptrs) - offset_of!(CpuState, rsb_location_descriptors),
        8 * RSB_SIZE
    );
    assert_eq!(offset_of!(CpuState, rsb_location_descriptors) % 8, 0);
}
