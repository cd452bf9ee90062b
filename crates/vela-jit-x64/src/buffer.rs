//! The executable code buffer and its outer trampolines.
//!
//! One read-write-execute mapping holds, in order: the `run_code` entry
//! thunk, the shared return trampolines, and then every compiled block.
//! Generated code is entered through `run_code`, which saves the host's
//! non-volatile state, pins the guest-state pointer and swaps MXCSR; all
//! block terminators funnel back through the return trampolines.

use iced_x86::code_asm::{dword_ptr, rsp, xmmword_ptr, CodeAssembler};
use iced_x86::BlockEncoderOptions;

use crate::abi::{HostGpr, ABI_PARAMS, CALLEE_SAVED_XMMS, STATE};
use crate::cpu_state::{guest_mxcsr_offset, save_host_mxcsr_offset, CpuState};
use crate::EmitError;

pub const DEFAULT_CAPACITY: usize = 32 * 1024 * 1024;

/// Stack bytes reserved below the pushed registers. Windows needs shadow
/// space for callees plus the XMM save area; SysV only needs realignment.
#[cfg(windows)]
const FRAME_SIZE: i32 = 0xC8;
#[cfg(not(windows))]
const FRAME_SIZE: i32 = 8;

/// Offset of the XMM save area within the frame (above the shadow space).
#[cfg(windows)]
const XMM_SAVE_BASE: i32 = 0x20;
#[cfg(not(windows))]
const XMM_SAVE_BASE: i32 = 0;

/// Push order of the prologue. The Windows order matches the hand-built
/// unwind description in `unwind.rs` entry for entry.
#[cfg(windows)]
const PROLOGUE_PUSHES: [HostGpr; 8] = [
    HostGpr::RBX,
    HostGpr::RSI,
    HostGpr::RDI,
    HostGpr::RBP,
    HostGpr::R12,
    HostGpr::R13,
    HostGpr::R14,
    HostGpr::R15,
];
#[cfg(not(windows))]
const PROLOGUE_PUSHES: [HostGpr; 6] = [
    HostGpr::RBX,
    HostGpr::RBP,
    HostGpr::R12,
    HostGpr::R13,
    HostGpr::R14,
    HostGpr::R15,
];

type RunCodeFn = unsafe extern "C" fn(*mut CpuState, *const u8);

pub struct CodeBuffer {
    base: *mut u8,
    capacity: usize,
    cursor: usize,
    /// Offset of the first block; `reset` rewinds to here, keeping the
    /// trampolines.
    code_begin: usize,
    run_code: u64,
    return_from_run_code: u64,
    return_from_run_code_no_mxcsr: u64,
    #[cfg(windows)]
    _unwind: Option<crate::unwind::UnwindHandle>,
}

impl CodeBuffer {
    pub fn new(capacity: usize) -> Result<CodeBuffer, EmitError> {
        let base = map_rwx(capacity)?;
        let mut buf = CodeBuffer {
            base,
            capacity,
            cursor: 0,
            code_begin: 0,
            run_code: 0,
            return_from_run_code: 0,
            return_from_run_code_no_mxcsr: 0,
            #[cfg(windows)]
            _unwind: None,
        };
        buf.emit_trampolines()?;
        #[cfg(windows)]
        {
            buf._unwind = Some(crate::unwind::register(&mut buf)?);
        }
        buf.align16();
        buf.code_begin = buf.cursor;
        Ok(buf)
    }

    fn emit_trampolines(&mut self) -> Result<(), EmitError> {
        let mut a = CodeAssembler::new(64)?;
        let mut l_return = a.create_label();
        let mut l_return_no_mxcsr = a.create_label();

        // run_code(state, entry)
        for reg in PROLOGUE_PUSHES {
            a.push(reg.r64())?;
        }
        a.sub(rsp, FRAME_SIZE)?;
        for (i, x) in CALLEE_SAVED_XMMS.iter().enumerate() {
            a.movaps(
                xmmword_ptr(rsp + (XMM_SAVE_BASE + 16 * i as i32) as i64),
                x.xmm(),
            )?;
        }
        a.mov(STATE.r64(), ABI_PARAMS[0].r64())?;
        a.stmxcsr(dword_ptr(STATE.r64() + save_host_mxcsr_offset() as i64))?;
        a.ldmxcsr(dword_ptr(STATE.r64() + guest_mxcsr_offset() as i64))?;
        a.jmp(ABI_PARAMS[1].r64())?;

        // return_from_run_code
        a.set_label(&mut l_return)?;
        a.stmxcsr(dword_ptr(STATE.r64() + guest_mxcsr_offset() as i64))?;
        a.ldmxcsr(dword_ptr(STATE.r64() + save_host_mxcsr_offset() as i64))?;

        // return_from_run_code_no_mxcsr
        a.set_label(&mut l_return_no_mxcsr)?;
        for (i, x) in CALLEE_SAVED_XMMS.iter().enumerate() {
            a.movaps(
                x.xmm(),
                xmmword_ptr(rsp + (XMM_SAVE_BASE + 16 * i as i32) as i64),
            )?;
        }
        a.add(rsp, FRAME_SIZE)?;
        for reg in PROLOGUE_PUSHES.iter().rev() {
            a.pop(reg.r64())?;
        }
        a.ret()?;

        let result =
            a.assemble_options(self.base as u64, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)?;
        self.run_code = self.base as u64;
        self.return_from_run_code = result.label_ip(&l_return)?;
        self.return_from_run_code_no_mxcsr = result.label_ip(&l_return_no_mxcsr)?;
        self.append(&result.inner.code_buffer)?;
        Ok(())
    }

    pub fn base(&self) -> u64 {
        self.base as u64
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Address the next `append` will land at.
    pub fn pos(&self) -> u64 {
        self.base as u64 + self.cursor as u64
    }

    /// Pads with `int3` up to a 16-byte boundary.
    pub fn align16(&mut self) {
        while self.cursor % 16 != 0 && self.cursor < self.capacity {
            unsafe { self.base.add(self.cursor).write(0xCC) };
            self.cursor += 1;
        }
    }

    /// Copies `bytes` to the cursor and returns their address.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64, EmitError> {
        if self.capacity - self.cursor < bytes.len() {
            return Err(EmitError::BufferExhausted {
                needed: bytes.len(),
                available: self.capacity - self.cursor,
            });
        }
        let addr = self.pos();
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(self.cursor), bytes.len());
        }
        self.cursor += bytes.len();
        Ok(addr)
    }

    /// Rewrites already-emitted bytes in place. Only patch sites are ever
    /// rewritten, and only while no generated code is running.
    pub fn write_at(&self, addr: u64, bytes: &[u8]) {
        let start = addr
            .checked_sub(self.base as u64)
            .expect("patch address below buffer") as usize;
        assert!(
            start + bytes.len() <= self.cursor,
            "patch write past emitted code"
        );
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.base.add(start), bytes.len());
        }
    }

    pub fn slice(&self, addr: u64, len: usize) -> &[u8] {
        let start = (addr - self.base as u64) as usize;
        assert!(start + len <= self.cursor);
        unsafe { std::slice::from_raw_parts(self.base.add(start), len) }
    }

    /// Drops all compiled blocks, keeping the trampolines.
    pub fn reset(&mut self) {
        self.cursor = self.code_begin;
    }

    pub fn run_code_ptr(&self) -> u64 {
        self.run_code
    }

    pub fn return_from_run_code(&self) -> u64 {
        self.return_from_run_code
    }

    pub fn return_from_run_code_no_mxcsr(&self) -> u64 {
        self.return_from_run_code_no_mxcsr
    }

    /// Entry pointer and size of the whole mapping, for host unwinder
    /// registration.
    pub fn code_view(&self) -> (*const u8, usize) {
        (self.base as *const u8, self.capacity)
    }

    /// Enters generated code at `entry`.
    ///
    /// # Safety
    /// `entry` must be the entrypoint of a block compiled into this buffer
    /// (or a trampoline), and `state` must outlive the run.
    pub unsafe fn run(&self, state: *mut CpuState, entry: u64) {
        let f: RunCodeFn = std::mem::transmute(self.run_code as usize);
        f(state, entry as *const u8);
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        unmap(self.base, self.capacity);
    }
}

#[cfg(unix)]
fn map_rwx(len: usize) -> Result<*mut u8, EmitError> {
    use rustix::mm::{mmap_anonymous, MapFlags, ProtFlags};
    let ptr = unsafe {
        mmap_anonymous(
            std::ptr::null_mut(),
            len,
            ProtFlags::READ | ProtFlags::WRITE | ProtFlags::EXEC,
            MapFlags::PRIVATE,
        )
    }
    .map_err(|e| EmitError::Map(e.to_string()))?;
    Ok(ptr.cast())
}

#[cfg(unix)]
fn unmap(ptr: *mut u8, len: usize) {
    let _ = unsafe { rustix::mm::munmap(ptr.cast(), len) };
}

#[cfg(windows)]
fn map_rwx(len: usize) -> Result<*mut u8, EmitError> {
    use windows_sys::Win32::System::Memory::{
        VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_EXECUTE_READWRITE,
    };
    let ptr = unsafe {
        VirtualAlloc(
            std::ptr::null(),
            len,
            MEM_COMMIT | MEM_RESERVE,
            PAGE_EXECUTE_READWRITE,
        )
    };
    if ptr.is_null() {
        return Err(EmitError::Map("VirtualAlloc failed".into()));
    }
    Ok(ptr.cast())
}

#[cfg(windows)]
fn unmap(ptr: *mut u8, _len: usize) {
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};
    unsafe { VirtualFree(ptr.cast(), 0, MEM_RELEASE) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trampolines_are_emitted_and_aligned() {
        let buf = CodeBuffer::new(64 * 1024).unwrap();
        assert_eq!(buf.run_code_ptr(), buf.base());
        assert!(buf.return_from_run_code() > buf.base());
        assert!(buf.return_from_run_code_no_mxcsr() > buf.return_from_run_code());
        assert_eq!(buf.pos() % 16, 0);
    }

    #[test]
    fn run_round_trips_through_the_return_trampoline() {
        // Entering generated code at the return trampoline exercises the
        // whole prologue/epilogue pair without touching any block.
        let buf = CodeBuffer::new(64 * 1024).unwrap();
        let mut state = CpuState::default();
        unsafe { buf.run(&mut state, buf.return_from_run_code()) };
        assert_eq!(state.guest_mxcsr, crate::cpu_state::MXCSR_DEFAULT);
    }

    #[test]
    fn append_reports_exhaustion() {
        let mut buf = CodeBuffer::new(4096).unwrap();
        let big = vec![0u8; 8192];
        assert!(matches!(
            buf.append(&big),
            Err(EmitError::BufferExhausted { .. })
        ));
    }
}
