//! Windows stack-unwinding registration.
//!
//! The run trampoline's prologue is described to the OS unwinder with a
//! hand-built UNWIND_INFO (push-nonvol x8, alloc-large, save-xmm128 x10)
//! placed inside the code mapping and registered via RtlAddFunctionTable.
//! Each CodeOffset below is the end offset of the matching prologue
//! instruction emitted in `buffer::emit_trampolines`.

use windows_sys::Win32::System::Diagnostics::Debug::{
    RtlAddFunctionTable, RtlDeleteFunctionTable, IMAGE_RUNTIME_FUNCTION_ENTRY,
};

use crate::buffer::CodeBuffer;
use crate::EmitError;

const UWOP_PUSH_NONVOL: u8 = 0;
const UWOP_ALLOC_LARGE: u8 = 1;
const UWOP_SAVE_XMM128: u8 = 8;

const UWRC_RBX: u8 = 3;
const UWRC_RBP: u8 = 5;
const UWRC_RSI: u8 = 6;
const UWRC_RDI: u8 = 7;
const UWRC_R12: u8 = 12;
const UWRC_R13: u8 = 13;
const UWRC_R14: u8 = 14;
const UWRC_R15: u8 = 15;

#[repr(C)]
struct RuntimeFunction {
    begin_address: u32,
    end_address: u32,
    unwind_data: u32,
}

fn unwind_code(code_offset: u8, op: u8, op_info: u8) -> u16 {
    u16::from_le_bytes([code_offset, (op_info << 4) | op])
}

/// Unwind slots in reverse prologue order, as the format requires.
fn unwind_codes() -> Vec<u16> {
    let mut codes = Vec::new();
    let mut save_xmm128 = |offset: u8, reg: u8, frame_offset: u16| {
        codes.push(unwind_code(offset, UWOP_SAVE_XMM128, reg));
        codes.push(frame_offset / 16);
    };

    save_xmm128(89, 15, 0xB0);
    save_xmm128(80, 14, 0xA0);
    save_xmm128(71, 13, 0x90);
    save_xmm128(62, 12, 0x80);
    save_xmm128(53, 11, 0x70);
    save_xmm128(47, 10, 0x60);
    save_xmm128(41, 9, 0x50);
    save_xmm128(35, 8, 0x40);
    save_xmm128(29, 7, 0x30);
    save_xmm128(24, 6, 0x20);

    // sub rsp, 0xC8
    codes.push(unwind_code(19, UWOP_ALLOC_LARGE, 0));
    codes.push(0xC8 / 8);

    for (offset, reg) in [
        (12, UWRC_R15),
        (10, UWRC_R14),
        (8, UWRC_R13),
        (6, UWRC_R12),
        (4, UWRC_RBP),
        (3, UWRC_RDI),
        (2, UWRC_RSI),
        (1, UWRC_RBX),
    ] {
        codes.push(unwind_code(offset, UWOP_PUSH_NONVOL, reg));
    }
    codes
}

const PROLOG_SIZE: u8 = 89;

pub(crate) struct UnwindHandle {
    table: *const IMAGE_RUNTIME_FUNCTION_ENTRY,
}

impl Drop for UnwindHandle {
    fn drop(&mut self) {
        unsafe { RtlDeleteFunctionTable(self.table) };
    }
}

pub(crate) fn register(buf: &mut CodeBuffer) -> Result<UnwindHandle, EmitError> {
    let mut codes = unwind_codes();
    let count = codes.len();
    // The unwind-code array must have even length.
    if count % 2 == 1 {
        codes.push(0);
    }

    let mut info = vec![
        1u8, // version 1, no handler flags
        PROLOG_SIZE,
        count as u8,
        0, // no frame register
    ];
    for code in &codes {
        info.extend_from_slice(&code.to_le_bytes());
    }

    buf.align16();
    let unwind_info = buf.append(&info)?;

    let rfunc = RuntimeFunction {
        begin_address: 0,
        end_address: buf.capacity() as u32,
        unwind_data: (unwind_info - buf.base()) as u32,
    };
    let mut bytes = [0u8; std::mem::size_of::<RuntimeFunction>()];
    bytes[0..4].copy_from_slice(&rfunc.begin_address.to_le_bytes());
    bytes[4..8].copy_from_slice(&rfunc.end_address.to_le_bytes());
    bytes[8..12].copy_from_slice(&rfunc.unwind_data.to_le_bytes());

    buf.align16();
    let table = buf.append(&bytes)? as *const IMAGE_RUNTIME_FUNCTION_ENTRY;

    unsafe { RtlAddFunctionTable(table, 1, buf.base()) };
    Ok(UnwindHandle { table })
}
