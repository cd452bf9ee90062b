//! Host ABI description: register numbering, calling convention and the
//! callee-saved sets preserved by the outer run trampoline.

use iced_x86::code_asm::{
    al, ax, bl, bp, bpl, bx, byte_ptr, cl, cx, di, dil, dl, dword_ptr, dx, eax, ebp, ebx, ecx,
    edi, edx, esi, esp, qword_ptr, r10, r10b, r10d, r10w, r11, r11b, r11d, r11w, r12, r12b, r12d,
    r12w, r13, r13b, r13d, r13w, r14, r14b, r14d, r14w, r15, r15b, r15d, r15w, r8, r8b, r8d, r8w,
    r9, r9b, r9d, r9w, rax, rbp, rbx, rcx, rdi, rdx, rsi, rsp, si, sil, sp, spl, xmm0,
    xmm1, xmm10, xmm11, xmm12, xmm13, xmm14, xmm15, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8,
    xmm9, AsmMemoryOperand, AsmRegister16, AsmRegister32, AsmRegister64, AsmRegister8,
    AsmRegisterXmm,
};

const GPR64: [AsmRegister64; 16] = [
    rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15,
];
const GPR32: [AsmRegister32; 16] = [
    eax, ecx, edx, ebx, esp, ebp, esi, edi, r8d, r9d, r10d, r11d, r12d, r13d, r14d, r15d,
];
const GPR16: [AsmRegister16; 16] = [
    ax, cx, dx, bx, sp, bp, si, di, r8w, r9w, r10w, r11w, r12w, r13w, r14w, r15w,
];
const GPR8: [AsmRegister8; 16] = [
    al, cl, dl, bl, spl, bpl, sil, dil, r8b, r9b, r10b, r11b, r12b, r13b, r14b, r15b,
];
const XMM: [AsmRegisterXmm; 16] = [
    xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13, xmm14,
    xmm15,
];

/// A host general-purpose register, by hardware number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HostGpr(pub u8);

impl HostGpr {
    pub const RAX: HostGpr = HostGpr(0);
    pub const RCX: HostGpr = HostGpr(1);
    pub const RDX: HostGpr = HostGpr(2);
    pub const RBX: HostGpr = HostGpr(3);
    pub const RSP: HostGpr = HostGpr(4);
    pub const RBP: HostGpr = HostGpr(5);
    pub const RSI: HostGpr = HostGpr(6);
    pub const RDI: HostGpr = HostGpr(7);
    pub const R8: HostGpr = HostGpr(8);
    pub const R9: HostGpr = HostGpr(9);
    pub const R10: HostGpr = HostGpr(10);
    pub const R11: HostGpr = HostGpr(11);
    pub const R12: HostGpr = HostGpr(12);
    pub const R13: HostGpr = HostGpr(13);
    pub const R14: HostGpr = HostGpr(14);
    pub const R15: HostGpr = HostGpr(15);

    pub fn r64(self) -> AsmRegister64 {
        GPR64[self.0 as usize]
    }

    pub fn r32(self) -> AsmRegister32 {
        GPR32[self.0 as usize]
    }

    pub fn r16(self) -> AsmRegister16 {
        GPR16[self.0 as usize]
    }

    pub fn r8(self) -> AsmRegister8 {
        GPR8[self.0 as usize]
    }
}

/// A host XMM register, by hardware number.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct HostXmm(pub u8);

impl HostXmm {
    pub fn xmm(self) -> AsmRegisterXmm {
        XMM[self.0 as usize]
    }
}

/// The register that holds the guest-state pointer across all generated
/// code. Nothing may clobber it.
pub const STATE: HostGpr = HostGpr::R15;

/// Return-value register for host calls.
pub const ABI_RETURN: HostGpr = HostGpr::RAX;

/// Argument registers for host calls, in slot order.
#[cfg(windows)]
pub const ABI_PARAMS: [HostGpr; 4] = [HostGpr::RCX, HostGpr::RDX, HostGpr::R8, HostGpr::R9];
#[cfg(not(windows))]
pub const ABI_PARAMS: [HostGpr; 4] = [HostGpr::RDI, HostGpr::RSI, HostGpr::RDX, HostGpr::RCX];

/// GPRs a called host function may clobber.
#[cfg(windows)]
pub const CALLER_SAVED_GPRS: &[HostGpr] = &[
    HostGpr::RAX,
    HostGpr::RCX,
    HostGpr::RDX,
    HostGpr::R8,
    HostGpr::R9,
    HostGpr::R10,
    HostGpr::R11,
];
#[cfg(not(windows))]
pub const CALLER_SAVED_GPRS: &[HostGpr] = &[
    HostGpr::RAX,
    HostGpr::RCX,
    HostGpr::RDX,
    HostGpr::RSI,
    HostGpr::RDI,
    HostGpr::R8,
    HostGpr::R9,
    HostGpr::R10,
    HostGpr::R11,
];

/// GPRs the run trampoline must preserve for its caller. `RSP` is handled
/// by the frame itself.
#[cfg(windows)]
pub const CALLEE_SAVED_GPRS: &[HostGpr] = &[
    HostGpr::RBX,
    HostGpr::RBP,
    HostGpr::RDI,
    HostGpr::RSI,
    HostGpr::R12,
    HostGpr::R13,
    HostGpr::R14,
    HostGpr::R15,
];
#[cfg(not(windows))]
pub const CALLEE_SAVED_GPRS: &[HostGpr] = &[
    HostGpr::RBX,
    HostGpr::RBP,
    HostGpr::R12,
    HostGpr::R13,
    HostGpr::R14,
    HostGpr::R15,
];

/// XMM registers a called host function may clobber.
#[cfg(windows)]
pub const CALLER_SAVED_XMMS: &[HostXmm] = &[
    HostXmm(0),
    HostXmm(1),
    HostXmm(2),
    HostXmm(3),
    HostXmm(4),
    HostXmm(5),
];
#[cfg(not(windows))]
pub const CALLER_SAVED_XMMS: &[HostXmm] = &[
    HostXmm(0),
    HostXmm(1),
    HostXmm(2),
    HostXmm(3),
    HostXmm(4),
    HostXmm(5),
    HostXmm(6),
    HostXmm(7),
    HostXmm(8),
    HostXmm(9),
    HostXmm(10),
    HostXmm(11),
    HostXmm(12),
    HostXmm(13),
    HostXmm(14),
    HostXmm(15),
];

/// XMM registers the run trampoline must save to the stack.
#[cfg(windows)]
pub const CALLEE_SAVED_XMMS: &[HostXmm] = &[
    HostXmm(6),
    HostXmm(7),
    HostXmm(8),
    HostXmm(9),
    HostXmm(10),
    HostXmm(11),
    HostXmm(12),
    HostXmm(13),
    HostXmm(14),
    HostXmm(15),
];
#[cfg(not(windows))]
pub const CALLEE_SAVED_XMMS: &[HostXmm] = &[];

/// Allocation preference order. `RSP` carries the stack and `R15` the guest
/// state, so neither is ever handed out.
pub const ALLOCATABLE_GPRS: [HostGpr; 14] = [
    HostGpr::RAX,
    HostGpr::RBX,
    HostGpr::RCX,
    HostGpr::RDX,
    HostGpr::RSI,
    HostGpr::RDI,
    HostGpr::RBP,
    HostGpr::R8,
    HostGpr::R9,
    HostGpr::R10,
    HostGpr::R11,
    HostGpr::R12,
    HostGpr::R13,
    HostGpr::R14,
];

pub const ALLOCATABLE_XMMS: [HostXmm; 16] = [
    HostXmm(0),
    HostXmm(1),
    HostXmm(2),
    HostXmm(3),
    HostXmm(4),
    HostXmm(5),
    HostXmm(6),
    HostXmm(7),
    HostXmm(8),
    HostXmm(9),
    HostXmm(10),
    HostXmm(11),
    HostXmm(12),
    HostXmm(13),
    HostXmm(14),
    HostXmm(15),
];

/// Byte-sized access to a guest-state field.
pub(crate) fn state_byte(offset: i32) -> AsmMemoryOperand {
    byte_ptr(STATE.r64() + offset as i64)
}

pub(crate) fn state_dword(offset: i32) -> AsmMemoryOperand {
    dword_ptr(STATE.r64() + offset as i64)
}

pub(crate) fn state_qword(offset: i32) -> AsmMemoryOperand {
    qword_ptr(STATE.r64() + offset as i64)
}

/// Host instruction-set extensions probed once at backend construction.
#[derive(Clone, Copy, Debug)]
pub struct HostFeatures {
    pub lzcnt: bool,
    pub bmi2: bool,
    pub ssse3: bool,
    pub sse41: bool,
}

impl HostFeatures {
    pub fn detect() -> HostFeatures {
        HostFeatures {
            lzcnt: std::arch::is_x86_feature_detected!("lzcnt"),
            bmi2: std::arch::is_x86_feature_detected!("bmi2"),
            ssse3: std::arch::is_x86_feature_detected!("ssse3"),
            sse41: std::arch::is_x86_feature_detected!("sse4.1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_register_is_never_allocatable() {
        assert!(!ALLOCATABLE_GPRS.contains(&STATE));
        assert!(!ALLOCATABLE_GPRS.contains(&HostGpr::RSP));
        assert!(CALLEE_SAVED_GPRS.contains(&STATE));
    }

    #[test]
    fn abi_params_are_caller_saved() {
        for p in ABI_PARAMS {
            assert!(CALLER_SAVED_GPRS.contains(&p), "{p:?}");
        }
        assert!(CALLER_SAVED_GPRS.contains(&ABI_RETURN));
    }
}
