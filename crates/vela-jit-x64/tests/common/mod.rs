//! Shared scaffolding for backend tests.

#![allow(dead_code)]

use std::ffi::c_void;
use std::ptr;

use iced_x86::{Decoder, DecoderOptions, Instruction};
use vela_jit_ir::LocationDescriptor;
use vela_jit_x64::UserCallbacks;
use vela_types::Fpscr;

unsafe extern "C" fn read8_unreachable(_vaddr: u32) -> u8 {
    unreachable!("unexpected 8-bit read")
}

unsafe extern "C" fn read16_unreachable(_vaddr: u32) -> u16 {
    unreachable!("unexpected 16-bit read")
}

unsafe extern "C" fn read32_unreachable(_vaddr: u32) -> u32 {
    unreachable!("unexpected 32-bit read")
}

unsafe extern "C" fn read64_unreachable(_vaddr: u32) -> u64 {
    unreachable!("unexpected 64-bit read")
}

unsafe extern "C" fn write8_unreachable(_vaddr: u32, _value: u8) {
    unreachable!("unexpected 8-bit write")
}

unsafe extern "C" fn write16_unreachable(_vaddr: u32, _value: u16) {
    unreachable!("unexpected 16-bit write")
}

unsafe extern "C" fn write32_unreachable(_vaddr: u32, _value: u32) {
    unreachable!("unexpected 32-bit write")
}

unsafe extern "C" fn write64_unreachable(_vaddr: u32, _value: u64) {
    unreachable!("unexpected 64-bit write")
}

unsafe extern "C" fn svc_unreachable(_swi: u32) {
    unreachable!("unexpected supervisor call")
}

unsafe extern "C" fn interpreter_unreachable(_pc: u32, _user: *mut c_void) {
    unreachable!("unexpected interpreter fallback")
}

/// Callbacks that abort the test if generated code reaches them.
pub fn callbacks() -> UserCallbacks {
    UserCallbacks {
        read_memory_8: read8_unreachable,
        read_memory_16: read16_unreachable,
        read_memory_32: read32_unreachable,
        read_memory_64: read64_unreachable,
        write_memory_8: write8_unreachable,
        write_memory_16: write16_unreachable,
        write_memory_32: write32_unreachable,
        write_memory_64: write64_unreachable,
        call_svc: svc_unreachable,
        interpreter_fallback: interpreter_unreachable,
        user_arg: ptr::null_mut(),
        page_table: None,
    }
}

pub fn loc(pc: u32) -> LocationDescriptor {
    LocationDescriptor::new(pc, 0, Fpscr::from_bits(0))
}

pub fn decode_all(bytes: &[u8], ip: u64) -> Vec<Instruction> {
    let mut decoder = Decoder::with_ip(64, bytes, ip, DecoderOptions::NONE);
    let mut out = Vec::new();
    while decoder.can_decode() {
        out.push(decoder.decode());
    }
    out
}
