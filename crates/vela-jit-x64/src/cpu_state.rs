//! The guest CPU record generated code runs against.
//!
//! The layout is a public contract: every emitter addresses these fields as
//! fixed offsets from the state register, and the byte offset of the PC slot
//! is baked into the fixed-size patch fallback encoding. `tests/abi.rs`
//! pins the layout.

use std::mem::offset_of;

use vela_types::{ExtReg, Fpscr, FpscrFlags, Reg, RoundingMode};

/// Number of `(location, host pointer)` pairs in the return-stack buffer.
/// Must be a power of two; the cursor wraps with a mask.
pub const RSB_SIZE: usize = 8;

/// Spill slots available to the register allocator, 8 bytes each.
pub const SPILL_SLOT_COUNT: usize = 64;

/// Exclusive-monitor reservation granule: an exclusive store hits only if
/// its address matches the reservation under this mask.
pub const RESERVATION_GRANULE_MASK: u32 = 0xFFFF_FFF8;

/// Power-on MXCSR: all exceptions masked, round to nearest.
pub const MXCSR_DEFAULT: u32 = 0x1F80;

#[repr(C)]
#[derive(Clone)]
pub struct CpuState {
    /// Guest R0-R15. R15 is the PC.
    pub regs: [u32; 16],
    /// The extended register bank: 32 single-precision lanes, doubles
    /// overlaying pairs.
    pub ext_regs: [u32; 32],
    pub cpsr: u32,
    /// FPSCR input-denormal cumulative bit, kept apart for cheap stores.
    pub fpscr_idc: u32,
    /// FPSCR underflow cumulative bit, kept apart for cheap stores.
    pub fpscr_ufc: u32,
    /// The FPSCR mode bits of the code currently executing.
    pub fpscr_mode: u32,
    /// Mirror of FPSCR.NZCV for fast reads and writes.
    pub fpscr_nzcv: u32,
    /// MXCSR image matching the guest FPSCR rounding mode.
    pub guest_mxcsr: u32,
    /// Host MXCSR saved while generated code runs.
    pub save_host_mxcsr: u32,
    pub exclusive_address: u32,
    pub exclusive_state: u8,
    pub halt_requested: u8,
    _reserved: [u8; 6],
    pub cycles_remaining: i64,
    /// RSB cursor, always `< RSB_SIZE`.
    pub rsb_index: u32,
    _reserved2: u32,
    pub rsb_location_descriptors: [u64; RSB_SIZE],
    pub rsb_codeptrs: [u64; RSB_SIZE],
    /// Register-allocator spill area.
    pub spill: [u64; SPILL_SLOT_COUNT],
}

impl Default for CpuState {
    fn default() -> CpuState {
        // All-zero is a valid image for every field.
        let mut state: CpuState = unsafe { std::mem::zeroed() };
        state.guest_mxcsr = MXCSR_DEFAULT;
        state.save_host_mxcsr = MXCSR_DEFAULT;
        state
    }
}

impl CpuState {
    /// Reassembles the architectural FPSCR word from the split fields.
    pub fn fpscr(&self) -> u32 {
        self.fpscr_mode | self.fpscr_nzcv | self.fpscr_idc | self.fpscr_ufc
    }

    /// Splits an architectural FPSCR word into the cached fields and
    /// derives the matching MXCSR rounding control.
    pub fn set_fpscr(&mut self, value: u32) {
        self.fpscr_mode = value & Fpscr::MODE_MASK;
        self.fpscr_nzcv = value & Fpscr::NZCV_MASK;
        self.fpscr_idc = value & FpscrFlags::IDC.bits();
        self.fpscr_ufc = value & FpscrFlags::UFC.bits();

        let rc = match Fpscr::from_bits(value).rounding_mode() {
            RoundingMode::ToNearest => 0b00,
            RoundingMode::TowardsMinusInfinity => 0b01,
            RoundingMode::TowardsPlusInfinity => 0b10,
            RoundingMode::TowardsZero => 0b11,
        };
        self.guest_mxcsr = MXCSR_DEFAULT | (rc << 13);
    }
}

/// `extern "C"` shim for generated code; see `emit::mem`.
pub(crate) unsafe extern "C" fn get_fpscr_impl(state: *mut CpuState) -> u32 {
    (*state).fpscr()
}

/// `extern "C"` shim for generated code; see `emit::mem`.
pub(crate) unsafe extern "C" fn set_fpscr_impl(value: u32, state: *mut CpuState) {
    (*state).set_fpscr(value);
}

pub fn reg_offset(reg: Reg) -> i32 {
    (offset_of!(CpuState, regs) + 4 * reg.index()) as i32
}

pub fn ext_reg_offset(reg: ExtReg) -> i32 {
    (offset_of!(CpuState, ext_regs) + 4 * reg.lane()) as i32
}

pub fn cpsr_offset() -> i32 {
    offset_of!(CpuState, cpsr) as i32
}

pub fn fpscr_idc_offset() -> i32 {
    offset_of!(CpuState, fpscr_idc) as i32
}

pub fn fpscr_ufc_offset() -> i32 {
    offset_of!(CpuState, fpscr_ufc) as i32
}

pub fn fpscr_mode_offset() -> i32 {
    offset_of!(CpuState, fpscr_mode) as i32
}

pub fn fpscr_nzcv_offset() -> i32 {
    offset_of!(CpuState, fpscr_nzcv) as i32
}

pub fn guest_mxcsr_offset() -> i32 {
    offset_of!(CpuState, guest_mxcsr) as i32
}

pub fn save_host_mxcsr_offset() -> i32 {
    offset_of!(CpuState, save_host_mxcsr) as i32
}

pub fn exclusive_address_offset() -> i32 {
    offset_of!(CpuState, exclusive_address) as i32
}

pub fn exclusive_state_offset() -> i32 {
    offset_of!(CpuState, exclusive_state) as i32
}

pub fn halt_requested_offset() -> i32 {
    offset_of!(CpuState, halt_requested) as i32
}

pub fn cycles_remaining_offset() -> i32 {
    offset_of!(CpuState, cycles_remaining) as i32
}

pub fn rsb_index_offset() -> i32 {
    offset_of!(CpuState, rsb_index) as i32
}

pub fn rsb_location_descriptors_offset() -> i32 {
    offset_of!(CpuState, rsb_location_descriptors) as i32
}

pub fn rsb_codeptrs_offset() -> i32 {
    offset_of!(CpuState, rsb_codeptrs) as i32
}

pub fn spill_offset(slot: usize) -> i32 {
    assert!(slot < SPILL_SLOT_COUNT);
    (offset_of!(CpuState, spill) + 8 * slot) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_types::cpsr;

    #[test]
    fn pc_slot_sits_in_disp8_range() {
        // The 13-byte patch fallback hand-encodes `mov dword [r15+PC], imm`
        // with an 8-bit displacement.
        assert_eq!(reg_offset(Reg::PC), 60);
    }

    #[test]
    fn fpscr_split_round_trips() {
        let mut state = CpuState::default();
        let value = (0b11 << 22)
            | FpscrFlags::FTZ.bits()
            | FpscrFlags::DN.bits()
            | FpscrFlags::IDC.bits()
            | FpscrFlags::UFC.bits()
            | cpsr::N_MASK;
        state.set_fpscr(value);
        assert_eq!(state.fpscr(), value);
        // Round-towards-zero selects MXCSR RC = 0b11.
        assert_eq!(state.guest_mxcsr, MXCSR_DEFAULT | (0b11 << 13));

        state.set_fpscr(0);
        assert_eq!(state.fpscr(), 0);
        assert_eq!(state.guest_mxcsr, MXCSR_DEFAULT);
    }

    #[test]
    fn rounding_modes_map_to_mxcsr_rc() {
        let mut state = CpuState::default();
        for (arm, rc) in [(0b00u32, 0b00u32), (0b01, 0b10), (0b10, 0b01), (0b11, 0b11)] {
            state.set_fpscr(arm << 22);
            assert_eq!(state.guest_mxcsr >> 13 & 0b11, rc, "arm mode {arm:#b}");
        }
    }
}
