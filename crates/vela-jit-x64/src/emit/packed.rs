//! Parallel add/sub emitters: 8- and 16-bit lanes packed in a 32-bit word.
//!
//! The plain and saturating forms ride the host's packed integer unit. The
//! GE flags need saturation probes (signed) or min/max comparisons
//! (unsigned) before the result overwrites an input. The halving forms run
//! in GPRs on the masking identity `x+y == ((x&y)<<1) + (x^y)`.

use iced_x86::code_asm::{AsmRegisterXmm, CodeAssembler};
use iced_x86::IcedError;

use vela_jit_ir::{InstId, Opcode};

use crate::abi::HostGpr;
use crate::emit::BlockEmitter;
use crate::EmitError;

impl BlockEmitter<'_> {
    /// Packs the byte MSBs of `value` into its low nibble:
    /// `a-------b-------c-------d-------` becomes `0...0abcd`.
    fn extract_msb_packed_bytes(
        &mut self,
        value: HostGpr,
        tmp: Option<HostGpr>,
    ) -> Result<(), EmitError> {
        if self.features.bmi2 {
            let tmp = match tmp {
                Some(t) => t,
                None => self.ra.scratch_gpr(&mut self.asm)?,
            };
            self.asm.mov(tmp.r32(), 0x8080_8080u32)?;
            self.asm.pext(value.r32(), value.r32(), tmp.r32())?;
        } else {
            self.asm.and(value.r32(), 0x8080_8080u32)?;
            self.asm.imul_3(value.r32(), value.r32(), 0x0020_4081i32)?;
            self.asm.shr(value.r32(), 28u32)?;
        }
        Ok(())
    }

    /// Duplicates and packs the word MSBs of `value` into its low nibble:
    /// `a---------------b---------------` becomes `0...0aabb`.
    fn extract_msb_packed_words(&mut self, value: HostGpr) -> Result<(), EmitError> {
        self.asm.and(value.r32(), 0x8000_8000u32)?;
        self.asm.shr(value.r32(), 1u32)?;
        self.asm.imul_3(value.r32(), value.r32(), 0xC003u32 as i32)?;
        self.asm.shr(value.r32(), 28u32)?;
        Ok(())
    }

    pub(super) fn emit_packed_add_u8(&mut self, inst: InstId) -> Result<(), EmitError> {
        let ge_inst = self.block.pseudo_op(inst, Opcode::GetGEFromOp);
        let args = self.ra.args(self.block, inst);

        let xmm_a = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let xmm_b = self.ra.use_xmm(&mut self.asm, args[1])?;

        self.asm.paddb(xmm_a.xmm(), xmm_b.xmm())?;

        if let Some(ge_inst) = ge_inst {
            self.erase_instruction(ge_inst);

            let reg_ge = self.ra.scratch_gpr(&mut self.asm)?;
            let tmp = self.ra.scratch_xmm(&mut self.asm)?;

            // GE is set where no unsigned overflow happened, i.e. where the
            // wrapped sum is still >= the addend.
            self.asm.movdqa(tmp.xmm(), xmm_a.xmm())?;
            self.asm.pminub(tmp.xmm(), xmm_b.xmm())?;
            self.asm.pcmpeqb(tmp.xmm(), xmm_b.xmm())?;
            self.asm.movd(reg_ge.r32(), tmp.xmm())?;
            self.asm.not(reg_ge.r32())?;

            self.extract_msb_packed_bytes(reg_ge, None)?;
            self.ra.def_gpr(ge_inst, reg_ge);
        }

        self.ra.def_xmm(inst, xmm_a);
        Ok(())
    }

    pub(super) fn emit_packed_add_s8(&mut self, inst: InstId) -> Result<(), EmitError> {
        let ge_inst = self.block.pseudo_op(inst, Opcode::GetGEFromOp);
        let args = self.ra.args(self.block, inst);

        let xmm_a = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let xmm_b = self.ra.use_xmm(&mut self.asm, args[1])?;

        let ge_reg = if let Some(ge_inst) = ge_inst {
            self.erase_instruction(ge_inst);

            // The saturating sum's sign bit tells whether the true sum was
            // negative; probe it before the wrapping add clobbers an input.
            let saturated_sum = self.ra.scratch_xmm(&mut self.asm)?;
            let reg_ge = self.ra.scratch_gpr(&mut self.asm)?;
            self.asm.movdqa(saturated_sum.xmm(), xmm_a.xmm())?;
            self.asm.paddsb(saturated_sum.xmm(), xmm_b.xmm())?;
            self.asm.movd(reg_ge.r32(), saturated_sum.xmm())?;
            Some((ge_inst, reg_ge))
        } else {
            None
        };

        self.asm.paddb(xmm_a.xmm(), xmm_b.xmm())?;

        if let Some((ge_inst, reg_ge)) = ge_reg {
            self.asm.not(reg_ge.r32())?;
            self.extract_msb_packed_bytes(reg_ge, None)?;
            self.ra.def_gpr(ge_inst, reg_ge);
        }

        self.ra.def_xmm(inst, xmm_a);
        Ok(())
    }

    pub(super) fn emit_packed_add_u16(&mut self, inst: InstId) -> Result<(), EmitError> {
        let ge_inst = self.block.pseudo_op(inst, Opcode::GetGEFromOp);
        let args = self.ra.args(self.block, inst);

        let xmm_a = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let xmm_b = self.ra.use_xmm(&mut self.asm, args[1])?;

        self.asm.paddw(xmm_a.xmm(), xmm_b.xmm())?;

        if let Some(ge_inst) = ge_inst {
            self.erase_instruction(ge_inst);

            let reg_ge = self.ra.scratch_gpr(&mut self.asm)?;
            let tmp = self.ra.scratch_xmm(&mut self.asm)?;

            self.asm.movdqa(tmp.xmm(), xmm_a.xmm())?;
            self.asm.pminuw(tmp.xmm(), xmm_b.xmm())?;
            self.asm.pcmpeqw(tmp.xmm(), xmm_b.xmm())?;
            self.asm.movd(reg_ge.r32(), tmp.xmm())?;
            self.asm.not(reg_ge.r32())?;

            // The compare mask is per-word, so packing its byte MSBs
            // already yields the duplicated two-bit groups.
            self.extract_msb_packed_bytes(reg_ge, None)?;
            self.ra.def_gpr(ge_inst, reg_ge);
        }

        self.ra.def_xmm(inst, xmm_a);
        Ok(())
    }

    pub(super) fn emit_packed_add_s16(&mut self, inst: InstId) -> Result<(), EmitError> {
        let ge_inst = self.block.pseudo_op(inst, Opcode::GetGEFromOp);
        let args = self.ra.args(self.block, inst);

        let xmm_a = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let xmm_b = self.ra.use_xmm(&mut self.asm, args[1])?;

        let ge_reg = if let Some(ge_inst) = ge_inst {
            self.erase_instruction(ge_inst);

            let saturated_sum = self.ra.scratch_xmm(&mut self.asm)?;
            let reg_ge = self.ra.scratch_gpr(&mut self.asm)?;
            self.asm.movdqa(saturated_sum.xmm(), xmm_a.xmm())?;
            self.asm.paddsw(saturated_sum.xmm(), xmm_b.xmm())?;
            self.asm.movd(reg_ge.r32(), saturated_sum.xmm())?;
            Some((ge_inst, reg_ge))
        } else {
            None
        };

        self.asm.paddw(xmm_a.xmm(), xmm_b.xmm())?;

        if let Some((ge_inst, reg_ge)) = ge_reg {
            self.asm.not(reg_ge.r32())?;
            self.extract_msb_packed_words(reg_ge)?;
            self.ra.def_gpr(ge_inst, reg_ge);
        }

        self.ra.def_xmm(inst, xmm_a);
        Ok(())
    }

    pub(super) fn emit_packed_sub_u8(&mut self, inst: InstId) -> Result<(), EmitError> {
        let ge_inst = self.block.pseudo_op(inst, Opcode::GetGEFromOp);
        let args = self.ra.args(self.block, inst);

        let xmm_a = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let xmm_b = self.ra.use_xmm(&mut self.asm, args[1])?;

        let ge_reg = if let Some(ge_inst) = ge_inst {
            self.erase_instruction(ge_inst);

            // GE is set where a >= b, i.e. where max(a, b) == a.
            let xmm_ge = self.ra.scratch_xmm(&mut self.asm)?;
            let reg_ge = self.ra.scratch_gpr(&mut self.asm)?;
            self.asm.movdqa(xmm_ge.xmm(), xmm_a.xmm())?;
            self.asm.pmaxub(xmm_ge.xmm(), xmm_b.xmm())?;
            self.asm.pcmpeqb(xmm_ge.xmm(), xmm_a.xmm())?;
            self.asm.movd(reg_ge.r32(), xmm_ge.xmm())?;
            Some((ge_inst, reg_ge))
        } else {
            None
        };

        self.asm.psubb(xmm_a.xmm(), xmm_b.xmm())?;

        if let Some((ge_inst, reg_ge)) = ge_reg {
            self.extract_msb_packed_bytes(reg_ge, None)?;
            self.ra.def_gpr(ge_inst, reg_ge);
        }

        self.ra.def_xmm(inst, xmm_a);
        Ok(())
    }

    pub(super) fn emit_packed_sub_s8(&mut self, inst: InstId) -> Result<(), EmitError> {
        let ge_inst = self.block.pseudo_op(inst, Opcode::GetGEFromOp);
        let args = self.ra.args(self.block, inst);

        let xmm_a = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let xmm_b = self.ra.use_xmm(&mut self.asm, args[1])?;

        let ge_reg = if let Some(ge_inst) = ge_inst {
            self.erase_instruction(ge_inst);

            let xmm_ge = self.ra.scratch_xmm(&mut self.asm)?;
            let reg_ge = self.ra.scratch_gpr(&mut self.asm)?;
            self.asm.movdqa(xmm_ge.xmm(), xmm_a.xmm())?;
            self.asm.psubsb(xmm_ge.xmm(), xmm_b.xmm())?;
            self.asm.movd(reg_ge.r32(), xmm_ge.xmm())?;
            Some((ge_inst, reg_ge))
        } else {
            None
        };

        self.asm.psubb(xmm_a.xmm(), xmm_b.xmm())?;

        if let Some((ge_inst, reg_ge)) = ge_reg {
            self.asm.not(reg_ge.r32())?;
            self.extract_msb_packed_bytes(reg_ge, None)?;
            self.ra.def_gpr(ge_inst, reg_ge);
        }

        self.ra.def_xmm(inst, xmm_a);
        Ok(())
    }

    pub(super) fn emit_packed_sub_u16(&mut self, inst: InstId) -> Result<(), EmitError> {
        let ge_inst = self.block.pseudo_op(inst, Opcode::GetGEFromOp);
        let args = self.ra.args(self.block, inst);

        let xmm_a = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let xmm_b = self.ra.use_xmm(&mut self.asm, args[1])?;

        let ge_reg = if let Some(ge_inst) = ge_inst {
            self.erase_instruction(ge_inst);

            let xmm_ge = self.ra.scratch_xmm(&mut self.asm)?;
            let reg_ge = self.ra.scratch_gpr(&mut self.asm)?;
            self.asm.movdqa(xmm_ge.xmm(), xmm_a.xmm())?;
            self.asm.pmaxuw(xmm_ge.xmm(), xmm_b.xmm())?;
            self.asm.pcmpeqw(xmm_ge.xmm(), xmm_a.xmm())?;
            self.asm.movd(reg_ge.r32(), xmm_ge.xmm())?;
            Some((ge_inst, reg_ge))
        } else {
            None
        };

        self.asm.psubw(xmm_a.xmm(), xmm_b.xmm())?;

        if let Some((ge_inst, reg_ge)) = ge_reg {
            self.extract_msb_packed_words(reg_ge)?;
            self.ra.def_gpr(ge_inst, reg_ge);
        }

        self.ra.def_xmm(inst, xmm_a);
        Ok(())
    }

    pub(super) fn emit_packed_sub_s16(&mut self, inst: InstId) -> Result<(), EmitError> {
        let ge_inst = self.block.pseudo_op(inst, Opcode::GetGEFromOp);
        let args = self.ra.args(self.block, inst);

        let xmm_a = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let xmm_b = self.ra.use_xmm(&mut self.asm, args[1])?;

        let ge_reg = if let Some(ge_inst) = ge_inst {
            self.erase_instruction(ge_inst);

            let xmm_ge = self.ra.scratch_xmm(&mut self.asm)?;
            let reg_ge = self.ra.scratch_gpr(&mut self.asm)?;
            self.asm.movdqa(xmm_ge.xmm(), xmm_a.xmm())?;
            self.asm.psubsw(xmm_ge.xmm(), xmm_b.xmm())?;
            self.asm.movd(reg_ge.r32(), xmm_ge.xmm())?;
            Some((ge_inst, reg_ge))
        } else {
            None
        };

        self.asm.psubw(xmm_a.xmm(), xmm_b.xmm())?;

        if let Some((ge_inst, reg_ge)) = ge_reg {
            self.asm.not(reg_ge.r32())?;
            self.extract_msb_packed_words(reg_ge)?;
            self.ra.def_gpr(ge_inst, reg_ge);
        }

        self.ra.def_xmm(inst, xmm_a);
        Ok(())
    }

    pub(super) fn emit_packed_halving_add_u8(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);

        if self.features.ssse3 {
            // Widen each byte to a word, add, halve, and shuffle back.
            let xmm_a = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
            let xmm_b = self.ra.use_scratch_xmm(&mut self.asm, args[1])?;
            let xmm_mask = self.ra.scratch_xmm(&mut self.asm)?;
            let mask = self.ra.scratch_gpr(&mut self.asm)?;

            self.asm.mov(mask.r64(), 0x8003_8002_8001_8000u64)?;
            self.asm.movq(xmm_mask.xmm(), mask.r64())?;

            self.asm.pshufb(xmm_a.xmm(), xmm_mask.xmm())?;
            self.asm.pshufb(xmm_b.xmm(), xmm_mask.xmm())?;

            self.asm.paddw(xmm_a.xmm(), xmm_b.xmm())?;
            self.asm.psrlw(xmm_a.xmm(), 1u32)?;

            self.asm.mov(mask.r64(), 0x0604_0200u64)?;
            self.asm.movq(xmm_mask.xmm(), mask.r64())?;
            self.asm.pshufb(xmm_a.xmm(), xmm_mask.xmm())?;

            self.ra.def_xmm(inst, xmm_a);
        } else {
            let reg_a = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
            let reg_b = self.ra.use_gpr(&mut self.asm, args[1])?;
            let xor_a_b = self.ra.scratch_gpr(&mut self.asm)?;

            // (a&b) + ((a^b)>>1), masking the shifted-out LSBs so they
            // cannot leak into the lane below.
            self.asm.mov(xor_a_b.r32(), reg_a.r32())?;
            self.asm.and(reg_a.r32(), reg_b.r32())?;
            self.asm.xor(xor_a_b.r32(), reg_b.r32())?;
            self.asm.shr(xor_a_b.r32(), 1u32)?;
            self.asm.and(xor_a_b.r32(), 0x7F7F_7F7Fu32)?;
            self.asm.add(reg_a.r32(), xor_a_b.r32())?;

            self.ra.def_gpr(inst, reg_a);
        }
        Ok(())
    }

    pub(super) fn emit_packed_halving_add_u16(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);

        let reg_a = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let reg_b = self.ra.use_gpr(&mut self.asm, args[1])?;
        let xor_a_b = self.ra.scratch_gpr(&mut self.asm)?;

        self.asm.mov(xor_a_b.r32(), reg_a.r32())?;
        self.asm.and(reg_a.r32(), reg_b.r32())?;
        self.asm.xor(xor_a_b.r32(), reg_b.r32())?;
        self.asm.shr(xor_a_b.r32(), 1u32)?;
        self.asm.and(xor_a_b.r32(), 0x7FFF_7FFFu32)?;
        self.asm.add(reg_a.r32(), xor_a_b.r32())?;

        self.ra.def_gpr(inst, reg_a);
        Ok(())
    }

    fn emit_packed_halving_add_signed(
        &mut self,
        inst: InstId,
        carry_mask: u32,
        lsb_mask: u32,
    ) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);

        let reg_a = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let reg_b = self.ra.use_gpr(&mut self.asm, args[1])?;
        let xor_a_b = self.ra.scratch_gpr(&mut self.asm)?;
        let carry = self.ra.scratch_gpr(&mut self.asm)?;

        // As the unsigned variant, but the halved cross term's sign bit
        // must propagate upward by one lane bit: XOR it back in.
        self.asm.mov(xor_a_b.r32(), reg_a.r32())?;
        self.asm.and(reg_a.r32(), reg_b.r32())?;
        self.asm.xor(xor_a_b.r32(), reg_b.r32())?;
        self.asm.mov(carry.r32(), xor_a_b.r32())?;
        self.asm.and(carry.r32(), carry_mask)?;
        self.asm.shr(xor_a_b.r32(), 1u32)?;
        self.asm.and(xor_a_b.r32(), lsb_mask)?;
        self.asm.add(reg_a.r32(), xor_a_b.r32())?;
        self.asm.xor(reg_a.r32(), carry.r32())?;

        self.ra.def_gpr(inst, reg_a);
        Ok(())
    }

    pub(super) fn emit_packed_halving_add_s8(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_halving_add_signed(inst, 0x8080_8080, 0x7F7F_7F7F)
    }

    pub(super) fn emit_packed_halving_add_s16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_halving_add_signed(inst, 0x8000_8000, 0x7FFF_7FFF)
    }

    fn emit_packed_halving_sub(
        &mut self,
        inst: InstId,
        borrow_mask: u32,
        signed: bool,
    ) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);

        let minuend = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let subtrahend = self.ra.use_scratch_gpr(&mut self.asm, args[1])?;
        let carry = if signed {
            Some(self.ra.scratch_gpr(&mut self.asm)?)
        } else {
            None
        };

        // x-y == (x^y) - (((x^y)&y) << 1), so (x-y)/2 is
        // ((x^y)>>1) - ((x^y)&y) computed per lane.
        self.asm.xor(minuend.r32(), subtrahend.r32())?;
        self.asm.and(subtrahend.r32(), minuend.r32())?;
        if let Some(carry) = carry {
            self.asm.mov(carry.r32(), minuend.r32())?;
            self.asm.and(carry.r32(), borrow_mask)?;
        }
        self.asm.shr(minuend.r32(), 1u32)?;

        // Partitioned subtract: seed each lane's top bit as borrow fuel,
        // then flip it back; for the signed form additionally sign-extend
        // through the recorded cross-term sign bits.
        self.asm.or(minuend.r32(), borrow_mask)?;
        self.asm.sub(minuend.r32(), subtrahend.r32())?;
        self.asm.xor(minuend.r32(), borrow_mask)?;
        if let Some(carry) = carry {
            self.asm.xor(minuend.r32(), carry.r32())?;
        }

        self.ra.def_gpr(inst, minuend);
        Ok(())
    }

    pub(super) fn emit_packed_halving_sub_u8(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_halving_sub(inst, 0x8080_8080, false)
    }

    pub(super) fn emit_packed_halving_sub_s8(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_halving_sub(inst, 0x8080_8080, true)
    }

    pub(super) fn emit_packed_halving_sub_u16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_halving_sub(inst, 0x8000_8000, false)
    }

    pub(super) fn emit_packed_halving_sub_s16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_halving_sub(inst, 0x8000_8000, true)
    }

    /// The crosswise halving ops: one halfword lane gets (a ∓ b)/2, the
    /// other (a ± b)/2, with the operands drawn cross-lane.
    fn emit_packed_halving_sub_add(
        &mut self,
        inst: InstId,
        is_signed: bool,
    ) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);

        let reg_a_hi = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let reg_b_hi = self.ra.use_scratch_gpr(&mut self.asm, args[1])?;
        let reg_a_lo = self.ra.scratch_gpr(&mut self.asm)?;
        let reg_b_lo = self.ra.scratch_gpr(&mut self.asm)?;

        // With asx set the high word carries the sum, otherwise the diff.
        let asx = args[2].imm_u1();

        if is_signed {
            self.asm.movsx(reg_a_lo.r32(), reg_a_hi.r16())?;
            self.asm.movsx(reg_b_lo.r32(), reg_b_hi.r16())?;
            self.asm.sar(reg_a_hi.r32(), 16u32)?;
            self.asm.sar(reg_b_hi.r32(), 16u32)?;
        } else {
            self.asm.movzx(reg_a_lo.r32(), reg_a_hi.r16())?;
            self.asm.movzx(reg_b_lo.r32(), reg_b_hi.r16())?;
            self.asm.shr(reg_a_hi.r32(), 16u32)?;
            self.asm.shr(reg_b_hi.r32(), 16u32)?;
        }

        if asx {
            // reg_a_lo<31:16> := diff<16:1>, reg_a_hi<15:0> := sum<16:1>
            self.asm.sub(reg_a_lo.r32(), reg_b_hi.r32())?;
            self.asm.shl(reg_a_lo.r32(), 15u32)?;
            self.asm.add(reg_a_hi.r32(), reg_b_lo.r32())?;
            self.asm.shr(reg_a_hi.r32(), 1u32)?;
        } else {
            // reg_a_lo<31:16> := sum<16:1>, reg_a_hi<15:0> := diff<16:1>
            self.asm.add(reg_a_lo.r32(), reg_b_hi.r32())?;
            self.asm.shl(reg_a_lo.r32(), 15u32)?;
            self.asm.sub(reg_a_hi.r32(), reg_b_lo.r32())?;
            self.asm.shr(reg_a_hi.r32(), 1u32)?;
        }

        self.asm.shld(reg_a_hi.r32(), reg_a_lo.r32(), 16u32)?;

        self.ra.def_gpr(inst, reg_a_hi);
        Ok(())
    }

    pub(super) fn emit_packed_halving_sub_add_u16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_halving_sub_add(inst, false)
    }

    pub(super) fn emit_packed_halving_sub_add_s16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_halving_sub_add(inst, true)
    }

    fn emit_packed_op(
        &mut self,
        inst: InstId,
        op: impl Fn(&mut CodeAssembler, AsmRegisterXmm, AsmRegisterXmm) -> Result<(), IcedError>,
    ) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let xmm_a = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let xmm_b = self.ra.use_xmm(&mut self.asm, args[1])?;
        op(&mut self.asm, xmm_a.xmm(), xmm_b.xmm())?;
        self.ra.def_xmm(inst, xmm_a);
        Ok(())
    }

    pub(super) fn emit_packed_saturated_add_u8(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_op(inst, |a, x, y| a.paddusb(x, y))
    }

    pub(super) fn emit_packed_saturated_add_s8(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_op(inst, |a, x, y| a.paddsb(x, y))
    }

    pub(super) fn emit_packed_saturated_add_u16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_op(inst, |a, x, y| a.paddusw(x, y))
    }

    pub(super) fn emit_packed_saturated_add_s16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_op(inst, |a, x, y| a.paddsw(x, y))
    }

    pub(super) fn emit_packed_saturated_sub_u8(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_op(inst, |a, x, y| a.psubusb(x, y))
    }

    pub(super) fn emit_packed_saturated_sub_s8(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_op(inst, |a, x, y| a.psubsb(x, y))
    }

    pub(super) fn emit_packed_saturated_sub_u16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_op(inst, |a, x, y| a.psubusw(x, y))
    }

    pub(super) fn emit_packed_saturated_sub_s16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_op(inst, |a, x, y| a.psubsw(x, y))
    }

    pub(super) fn emit_packed_abs_diff_sum_s8(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_packed_op(inst, |a, x, y| a.psadbw(x, y))
    }
}
