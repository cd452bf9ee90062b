//! Fixed-size patchable code sequences.
//!
//! Every cross-block jump is emitted as a placeholder of a fixed byte
//! budget and then written (and later rewritten) by the encoders here, so
//! a site can flip between "jump to the target block" and "fall back to
//! the dispatcher" without moving any byte that follows it.

use vela_types::Reg;

use crate::cpu_state::reg_offset;

/// Byte budget of a conditional-chain site (`jg rel32`).
pub const PATCH_JG_SIZE: usize = 6;
/// Byte budget of an unconditional-chain site (`jmp rel32` padded, or
/// `mov [state+PC], imm32` + `jmp rel32` to the trampoline).
pub const PATCH_JMP_SIZE: usize = 13;
/// Byte budget of an RSB pointer load (`mov rcx, imm64`).
pub const PATCH_MOV_RCX_SIZE: usize = 10;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PatchKind {
    /// Conditional jump taken when cycles remain.
    Jg,
    /// Unconditional jump.
    Jmp,
    /// Load of a block entrypoint into `rcx` for an RSB push.
    MovRcx,
}

impl PatchKind {
    pub fn size(self) -> usize {
        match self {
            PatchKind::Jg => PATCH_JG_SIZE,
            PatchKind::Jmp => PATCH_JMP_SIZE,
            PatchKind::MovRcx => PATCH_MOV_RCX_SIZE,
        }
    }
}

fn rel32(site_end: u64, target: u64) -> [u8; 4] {
    let rel = target.wrapping_sub(site_end) as i64;
    assert!(
        i32::try_from(rel).is_ok(),
        "patch target out of rel32 range"
    );
    (rel as i32).to_le_bytes()
}

/// `jg target`, or a 6-byte nop while the target is not compiled (the
/// fall-through path stores PC and returns to the dispatcher).
pub fn encode_jg(site: u64, target: Option<u64>) -> [u8; PATCH_JG_SIZE] {
    match target {
        Some(target) => {
            let mut bytes = [0x0F, 0x8F, 0, 0, 0, 0];
            bytes[2..].copy_from_slice(&rel32(site + 6, target));
            bytes
        }
        // nopw [rax+rax]
        None => [0x66, 0x0F, 0x1F, 0x44, 0x00, 0x00],
    }
}

/// `jmp target` padded to 13 bytes, or `mov dword [state+PC], pc` followed
/// by `jmp return_trampoline`.
pub fn encode_jmp(
    site: u64,
    target: Option<u64>,
    target_pc: u32,
    return_trampoline: u64,
) -> [u8; PATCH_JMP_SIZE] {
    let mut bytes = [0u8; PATCH_JMP_SIZE];
    match target {
        Some(target) => {
            bytes[0] = 0xE9;
            bytes[1..5].copy_from_slice(&rel32(site + 5, target));
            // nopq [rax+rax]
            bytes[5..].copy_from_slice(&[0x0F, 0x1F, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00]);
        }
        None => {
            let pc_off = reg_offset(Reg::PC);
            assert!((0..128).contains(&pc_off), "PC slot must sit in disp8 range");
            bytes[0] = 0x41; // mov dword [r15+disp8], imm32
            bytes[1] = 0xC7;
            bytes[2] = 0x47;
            bytes[3] = pc_off as u8;
            bytes[4..8].copy_from_slice(&target_pc.to_le_bytes());
            bytes[8] = 0xE9;
            bytes[9..].copy_from_slice(&rel32(site + 13, return_trampoline));
        }
    }
    bytes
}

/// `mov rcx, target` (or the return trampoline while uncompiled).
pub fn encode_mov_rcx(target: u64) -> [u8; PATCH_MOV_RCX_SIZE] {
    let mut bytes = [0u8; PATCH_MOV_RCX_SIZE];
    bytes[0] = 0x48;
    bytes[1] = 0xB9;
    bytes[2..].copy_from_slice(&target.to_le_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use iced_x86::{Code, Decoder, DecoderOptions};

    fn decode(bytes: &[u8], ip: u64) -> Vec<iced_x86::Instruction> {
        let mut decoder = Decoder::with_ip(64, bytes, ip, DecoderOptions::NONE);
        let mut out = Vec::new();
        while decoder.can_decode() {
            out.push(decoder.decode());
        }
        out
    }

    #[test]
    fn jg_encodings_have_fixed_size() {
        let site = 0x10_0000;
        let patched = encode_jg(site, Some(0x10_4000));
        let insts = decode(&patched, site);
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].code(), Code::Jg_rel32_64);
        assert_eq!(insts[0].near_branch_target(), 0x10_4000);
        assert_eq!(insts[0].len(), PATCH_JG_SIZE);

        let unpatched = encode_jg(site, None);
        assert_eq!(unpatched.len(), PATCH_JG_SIZE);
        let insts = decode(&unpatched, site);
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].code(), Code::Nop_rm16);
    }

    #[test]
    fn jmp_encodings_have_fixed_size() {
        let site = 0x20_0000;
        let trampoline = 0x1000;

        let patched = encode_jmp(site, Some(0x20_8000), 0, trampoline);
        let insts = decode(&patched, site);
        assert_eq!(insts[0].code(), Code::Jmp_rel32_64);
        assert_eq!(insts[0].near_branch_target(), 0x20_8000);

        let unpatched = encode_jmp(site, None, 0xDEAD_0000, trampoline);
        let insts = decode(&unpatched, site);
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].code(), Code::Mov_rm32_imm32);
        assert_eq!(insts[0].immediate32(), 0xDEAD_0000);
        assert_eq!(insts[0].memory_displacement64(), reg_offset(Reg::PC) as u64);
        assert_eq!(insts[1].code(), Code::Jmp_rel32_64);
        assert_eq!(insts[1].near_branch_target(), trampoline);
        assert_eq!(insts[0].len() + insts[1].len(), PATCH_JMP_SIZE);
    }

    #[test]
    fn mov_rcx_encoding_has_fixed_size() {
        let bytes = encode_mov_rcx(0x1234_5678_9ABC_DEF0);
        let insts = decode(&bytes, 0x1000);
        assert_eq!(insts.len(), 1);
        assert_eq!(insts[0].code(), Code::Mov_r64_imm64);
        assert_eq!(insts[0].immediate64(), 0x1234_5678_9ABC_DEF0);
        assert_eq!(insts[0].len(), PATCH_MOV_RCX_SIZE);
    }
}
