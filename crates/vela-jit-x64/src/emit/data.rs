//! Data-processing emitters: moves, tests, shifts, integer arithmetic and
//! scalar saturation.
//!
//! ARM shift semantics differ from x86 in one load-bearing way: the shift
//! amount is not masked modulo the operand width. Counts of 32 and above
//! have architecturally defined results and carries, so the variable-count
//! paths dispatch on the count explicitly.

use iced_x86::code_asm::{dword_ptr, ecx};

use vela_jit_ir::{InstId, Opcode};

use crate::abi::HostGpr;
use crate::emit::BlockEmitter;
use crate::EmitError;

impl BlockEmitter<'_> {
    pub(super) fn emit_pack_2x32_to_1x64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let lo = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let hi = self.ra.use_scratch_gpr(&mut self.asm, args[1])?;

        self.asm.shl(hi.r64(), 32u32)?;
        self.asm.mov(lo.r32(), lo.r32())?; // zero upper half
        self.asm.or(lo.r64(), hi.r64())?;

        self.ra.def_gpr(inst, lo);
        Ok(())
    }

    pub(super) fn emit_least_significant_word(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        self.ra.def_from_arg(&mut self.asm, inst, args[0])
    }

    pub(super) fn emit_most_significant_word(&mut self, inst: InstId) -> Result<(), EmitError> {
        let carry_inst = self.block.pseudo_op(inst, Opcode::GetCarryFromOp);
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.shr(result.r64(), 32u32)?;
        self.ra.def_gpr(inst, result);

        if let Some(carry_inst) = carry_inst {
            self.erase_instruction(carry_inst);
            let carry = self.ra.scratch_gpr(&mut self.asm)?;
            self.asm.setb(carry.r8())?;
            self.ra.def_gpr(carry_inst, carry);
        }
        Ok(())
    }

    pub(super) fn emit_least_significant_half(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        self.ra.def_from_arg(&mut self.asm, inst, args[0])
    }

    pub(super) fn emit_least_significant_byte(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        self.ra.def_from_arg(&mut self.asm, inst, args[0])
    }

    pub(super) fn emit_most_significant_bit(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.shr(result.r32(), 31u32)?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_is_zero(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.test(result.r32(), result.r32())?;
        self.asm.sete(result.r8())?;
        self.asm.movzx(result.r32(), result.r8())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_is_zero64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.test(result.r64(), result.r64())?;
        self.asm.sete(result.r8())?;
        self.asm.movzx(result.r32(), result.r8())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_logical_shift_left(&mut self, inst: InstId) -> Result<(), EmitError> {
        let carry_inst = self.block.pseudo_op(inst, Opcode::GetCarryFromOp);
        let args = self.ra.args(self.block, inst);
        let operand_arg = args[0];
        let shift_arg = args[1];
        let carry_arg = args[2];

        if carry_inst.is_none() {
            if shift_arg.is_immediate() {
                let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
                let shift = shift_arg.imm_u8();
                if shift <= 31 {
                    self.asm.shl(result.r32(), shift as u32)?;
                } else {
                    self.asm.xor(result.r32(), result.r32())?;
                }
                self.ra.def_gpr(inst, result);
            } else {
                // x64 masks the count by 0x1F; ARM does not, so counts of
                // 32 and above must produce zero.
                self.ra
                    .use_gpr_at(&mut self.asm, shift_arg, HostGpr::RCX)?;
                let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
                let zero = self.ra.scratch_gpr(&mut self.asm)?;

                self.asm.shl(result.r32(), iced_x86::code_asm::cl)?;
                self.asm.xor(zero.r32(), zero.r32())?;
                self.asm.cmp(iced_x86::code_asm::cl, 32u32)?;
                self.asm.cmovae(result.r32(), zero.r32())?;

                self.ra.def_gpr(inst, result);
            }
            return Ok(());
        }

        let carry_inst = carry_inst.unwrap();
        self.erase_instruction(carry_inst);

        if shift_arg.is_immediate() {
            let shift = shift_arg.imm_u8();
            let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
            let carry = self.ra.use_scratch_gpr(&mut self.asm, carry_arg)?;

            if shift == 0 {
                // Result and carry pass through unchanged.
            } else if shift < 32 {
                self.asm.shl(result.r32(), shift as u32)?;
                self.asm.setb(carry.r8())?;
            } else if shift > 32 {
                self.asm.xor(result.r32(), result.r32())?;
                self.asm.xor(carry.r32(), carry.r32())?;
            } else {
                self.asm.mov(carry.r32(), result.r32())?;
                self.asm.xor(result.r32(), result.r32())?;
                self.asm.and(carry.r32(), 1u32)?;
            }

            self.ra.def_gpr(inst, result);
            self.ra.def_gpr(carry_inst, carry);
        } else {
            self.ra
                .use_gpr_at(&mut self.asm, shift_arg, HostGpr::RCX)?;
            let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
            let carry = self.ra.use_scratch_gpr(&mut self.asm, carry_arg)?;
            let cl = iced_x86::code_asm::cl;

            let mut rs_gt32 = self.asm.create_label();
            let mut rs_eq32 = self.asm.create_label();
            let mut end = self.asm.create_label();

            self.asm.cmp(cl, 32u32)?;
            self.asm.ja(rs_gt32)?;
            self.asm.je(rs_eq32)?;
            // count in 0..=31: preload CF with the carry-in so a count of
            // zero leaves it unchanged.
            self.asm.bt(carry.r32(), 0u32)?;
            self.asm.shl(result.r32(), cl)?;
            self.asm.setb(carry.r8())?;
            self.asm.jmp(end)?;

            self.asm.set_label(&mut rs_gt32)?;
            self.asm.xor(result.r32(), result.r32())?;
            self.asm.xor(carry.r32(), carry.r32())?;
            self.asm.jmp(end)?;

            self.asm.set_label(&mut rs_eq32)?;
            self.asm.mov(carry.r32(), result.r32())?;
            self.asm.and(carry.r32(), 1u32)?;
            self.asm.xor(result.r32(), result.r32())?;

            self.asm.set_label(&mut end)?;

            self.ra.def_gpr(inst, result);
            self.ra.def_gpr(carry_inst, carry);
        }
        Ok(())
    }

    pub(super) fn emit_logical_shift_right(&mut self, inst: InstId) -> Result<(), EmitError> {
        let carry_inst = self.block.pseudo_op(inst, Opcode::GetCarryFromOp);
        let args = self.ra.args(self.block, inst);
        let operand_arg = args[0];
        let shift_arg = args[1];
        let carry_arg = args[2];
        let cl = iced_x86::code_asm::cl;

        if carry_inst.is_none() {
            if shift_arg.is_immediate() {
                let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
                let shift = shift_arg.imm_u8();
                if shift <= 31 {
                    self.asm.shr(result.r32(), shift as u32)?;
                } else {
                    self.asm.xor(result.r32(), result.r32())?;
                }
                self.ra.def_gpr(inst, result);
            } else {
                self.ra
                    .use_gpr_at(&mut self.asm, shift_arg, HostGpr::RCX)?;
                let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
                let zero = self.ra.scratch_gpr(&mut self.asm)?;

                self.asm.shr(result.r32(), cl)?;
                self.asm.xor(zero.r32(), zero.r32())?;
                self.asm.cmp(cl, 32u32)?;
                self.asm.cmovae(result.r32(), zero.r32())?;

                self.ra.def_gpr(inst, result);
            }
            return Ok(());
        }

        let carry_inst = carry_inst.unwrap();
        self.erase_instruction(carry_inst);

        if shift_arg.is_immediate() {
            let shift = shift_arg.imm_u8();
            let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
            let carry = self.ra.use_scratch_gpr(&mut self.asm, carry_arg)?;

            if shift == 0 {
                // Result and carry pass through unchanged.
            } else if shift < 32 {
                self.asm.shr(result.r32(), shift as u32)?;
                self.asm.setb(carry.r8())?;
            } else if shift == 32 {
                self.asm.bt(result.r32(), 31u32)?;
                self.asm.setb(carry.r8())?;
                self.asm.mov(result.r32(), 0u32)?;
            } else {
                self.asm.xor(result.r32(), result.r32())?;
                self.asm.xor(carry.r32(), carry.r32())?;
            }

            self.ra.def_gpr(inst, result);
            self.ra.def_gpr(carry_inst, carry);
        } else {
            self.ra
                .use_gpr_at(&mut self.asm, shift_arg, HostGpr::RCX)?;
            let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
            let carry = self.ra.use_scratch_gpr(&mut self.asm, carry_arg)?;

            let mut rs_gt32 = self.asm.create_label();
            let mut rs_eq32 = self.asm.create_label();
            let mut end = self.asm.create_label();

            self.asm.cmp(cl, 32u32)?;
            self.asm.ja(rs_gt32)?;
            self.asm.je(rs_eq32)?;
            // A zero count keeps both result and carry.
            self.asm.test(cl, cl)?;
            self.asm.je(end)?;
            self.asm.shr(result.r32(), cl)?;
            self.asm.setb(carry.r8())?;
            self.asm.jmp(end)?;

            self.asm.set_label(&mut rs_gt32)?;
            self.asm.xor(result.r32(), result.r32())?;
            self.asm.xor(carry.r32(), carry.r32())?;
            self.asm.jmp(end)?;

            self.asm.set_label(&mut rs_eq32)?;
            self.asm.bt(result.r32(), 31u32)?;
            self.asm.setb(carry.r8())?;
            self.asm.xor(result.r32(), result.r32())?;

            self.asm.set_label(&mut end)?;

            self.ra.def_gpr(inst, result);
            self.ra.def_gpr(carry_inst, carry);
        }
        Ok(())
    }

    pub(super) fn emit_logical_shift_right64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let shift_arg = args[1];
        assert!(
            shift_arg.is_immediate(),
            "variable 64-bit shifts are not part of the IR contract"
        );
        let shift = shift_arg.imm_u8();
        assert!(shift < 64, "64-bit shift count out of range");

        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.shr(result.r64(), shift as u32)?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_arithmetic_shift_right(&mut self, inst: InstId) -> Result<(), EmitError> {
        let carry_inst = self.block.pseudo_op(inst, Opcode::GetCarryFromOp);
        let args = self.ra.args(self.block, inst);
        let operand_arg = args[0];
        let shift_arg = args[1];
        let carry_arg = args[2];
        let cl = iced_x86::code_asm::cl;

        if carry_inst.is_none() {
            if shift_arg.is_immediate() {
                let shift = shift_arg.imm_u8();
                let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
                // Everything from 31 up behaves like 31.
                self.asm.sar(result.r32(), shift.min(31) as u32)?;
                self.ra.def_gpr(inst, result);
            } else {
                self.ra
                    .use_scratch_gpr_at(&mut self.asm, shift_arg, HostGpr::RCX)?;
                let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
                let const31 = self.ra.scratch_gpr(&mut self.asm)?;

                self.asm.mov(const31.r32(), 31u32)?;
                self.asm.movzx(ecx, cl)?;
                self.asm.cmp(ecx, 31u32)?;
                self.asm.cmovg(ecx, const31.r32())?;
                self.asm.sar(result.r32(), cl)?;

                self.ra.def_gpr(inst, result);
            }
            return Ok(());
        }

        let carry_inst = carry_inst.unwrap();
        self.erase_instruction(carry_inst);

        if shift_arg.is_immediate() {
            let shift = shift_arg.imm_u8();
            let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
            let carry = self.ra.use_scratch_gpr(&mut self.asm, carry_arg)?;

            if shift == 0 {
                // Result and carry pass through unchanged.
            } else if shift <= 31 {
                self.asm.sar(result.r32(), shift as u32)?;
                self.asm.setb(carry.r8())?;
            } else {
                self.asm.sar(result.r32(), 31u32)?;
                self.asm.bt(result.r32(), 31u32)?;
                self.asm.setb(carry.r8())?;
            }

            self.ra.def_gpr(inst, result);
            self.ra.def_gpr(carry_inst, carry);
        } else {
            self.ra
                .use_gpr_at(&mut self.asm, shift_arg, HostGpr::RCX)?;
            let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
            let carry = self.ra.use_scratch_gpr(&mut self.asm, carry_arg)?;

            let mut rs_gt31 = self.asm.create_label();
            let mut end = self.asm.create_label();

            self.asm.cmp(cl, 31u32)?;
            self.asm.ja(rs_gt31)?;
            self.asm.test(cl, cl)?;
            self.asm.je(end)?;
            self.asm.sar(result.r32(), cl)?;
            self.asm.setb(carry.r8())?;
            self.asm.jmp(end)?;

            self.asm.set_label(&mut rs_gt31)?;
            self.asm.sar(result.r32(), 31u32)?;
            self.asm.bt(result.r32(), 31u32)?;
            self.asm.setb(carry.r8())?;

            self.asm.set_label(&mut end)?;

            self.ra.def_gpr(inst, result);
            self.ra.def_gpr(carry_inst, carry);
        }
        Ok(())
    }

    pub(super) fn emit_rotate_right(&mut self, inst: InstId) -> Result<(), EmitError> {
        let carry_inst = self.block.pseudo_op(inst, Opcode::GetCarryFromOp);
        let args = self.ra.args(self.block, inst);
        let operand_arg = args[0];
        let shift_arg = args[1];
        let carry_arg = args[2];
        let cl = iced_x86::code_asm::cl;

        if carry_inst.is_none() {
            if shift_arg.is_immediate() {
                let shift = shift_arg.imm_u8();
                let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
                self.asm.ror(result.r32(), (shift & 0x1F) as u32)?;
                self.ra.def_gpr(inst, result);
            } else {
                // x64 ROR masks by 0x1F itself, which matches ARM for all
                // non-zero counts; a zero count is the identity anyway.
                self.ra
                    .use_gpr_at(&mut self.asm, shift_arg, HostGpr::RCX)?;
                let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
                self.asm.ror(result.r32(), cl)?;
                self.ra.def_gpr(inst, result);
            }
            return Ok(());
        }

        let carry_inst = carry_inst.unwrap();
        self.erase_instruction(carry_inst);

        if shift_arg.is_immediate() {
            let shift = shift_arg.imm_u8();
            let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
            let carry = self.ra.use_scratch_gpr(&mut self.asm, carry_arg)?;

            if shift == 0 {
                // Result and carry pass through unchanged.
            } else if shift & 0x1F == 0 {
                self.asm.bt(result.r32(), 31u32)?;
                self.asm.setb(carry.r8())?;
            } else {
                self.asm.ror(result.r32(), (shift & 0x1F) as u32)?;
                self.asm.setb(carry.r8())?;
            }

            self.ra.def_gpr(inst, result);
            self.ra.def_gpr(carry_inst, carry);
        } else {
            self.ra
                .use_scratch_gpr_at(&mut self.asm, shift_arg, HostGpr::RCX)?;
            let result = self.ra.use_scratch_gpr(&mut self.asm, operand_arg)?;
            let carry = self.ra.use_scratch_gpr(&mut self.asm, carry_arg)?;

            let mut zero_1f = self.asm.create_label();
            let mut end = self.asm.create_label();

            // A zero count must leave both the result and the carry alone.
            self.asm.test(cl, cl)?;
            self.asm.je(end)?;

            self.asm.and(ecx, 0x1Fu32)?;
            self.asm.je(zero_1f)?;
            self.asm.ror(result.r32(), cl)?;
            self.asm.setb(carry.r8())?;
            self.asm.jmp(end)?;

            self.asm.set_label(&mut zero_1f)?;
            self.asm.bt(result.r32(), 31u32)?;
            self.asm.setb(carry.r8())?;

            self.asm.set_label(&mut end)?;

            self.ra.def_gpr(inst, result);
            self.ra.def_gpr(carry_inst, carry);
        }
        Ok(())
    }

    /// 33-bit rotate through the carry flag.
    pub(super) fn emit_rotate_right_extended(&mut self, inst: InstId) -> Result<(), EmitError> {
        let carry_inst = self.block.pseudo_op(inst, Opcode::GetCarryFromOp);
        let args = self.ra.args(self.block, inst);

        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let carry = self.ra.use_scratch_gpr(&mut self.asm, args[1])?;

        self.asm.bt(carry.r32(), 0u32)?;
        self.asm.rcr(result.r32(), 1u32)?;

        self.ra.def_gpr(inst, result);

        if let Some(carry_inst) = carry_inst {
            self.erase_instruction(carry_inst);
            self.asm.setb(carry.r8())?;
            self.ra.def_gpr(carry_inst, carry);
        }
        Ok(())
    }

    pub(super) fn emit_add_with_carry(&mut self, inst: InstId) -> Result<(), EmitError> {
        let carry_inst = self.block.pseudo_op(inst, Opcode::GetCarryFromOp);
        let overflow_inst = self.block.pseudo_op(inst, Opcode::GetOverflowFromOp);

        if let Some(id) = carry_inst {
            self.erase_instruction(id);
        }
        if let Some(id) = overflow_inst {
            self.erase_instruction(id);
        }

        let args = self.ra.args(self.block, inst);
        let carry_in = args[2];

        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let carry = if carry_in.is_immediate() {
            if carry_inst.is_some() {
                Some(self.ra.scratch_gpr(&mut self.asm)?)
            } else {
                None
            }
        } else if carry_inst.is_some() {
            Some(self.ra.use_scratch_gpr(&mut self.asm, carry_in)?)
        } else {
            Some(self.ra.use_gpr(&mut self.asm, carry_in)?)
        };
        let overflow = if overflow_inst.is_some() {
            Some(self.ra.scratch_gpr(&mut self.asm)?)
        } else {
            None
        };
        let op2 = if args[1].is_immediate() {
            None
        } else {
            Some(self.ra.use_gpr(&mut self.asm, args[1])?)
        };

        match (op2, carry_in.is_immediate()) {
            (None, true) => {
                if carry_in.imm_u1() {
                    self.asm.stc()?;
                    self.asm.adc(result.r32(), args[1].imm_u32())?;
                } else {
                    self.asm.add(result.r32(), args[1].imm_u32())?;
                }
            }
            (None, false) => {
                self.asm.bt(carry.unwrap().r32(), 0u32)?;
                self.asm.adc(result.r32(), args[1].imm_u32())?;
            }
            (Some(op2), true) => {
                if carry_in.imm_u1() {
                    self.asm.stc()?;
                    self.asm.adc(result.r32(), op2.r32())?;
                } else {
                    self.asm.add(result.r32(), op2.r32())?;
                }
            }
            (Some(op2), false) => {
                self.asm.bt(carry.unwrap().r32(), 0u32)?;
                self.asm.adc(result.r32(), op2.r32())?;
            }
        }

        self.ra.def_gpr(inst, result);
        if let Some(carry_inst) = carry_inst {
            let carry = carry.unwrap();
            self.asm.setb(carry.r8())?;
            self.ra.def_gpr(carry_inst, carry);
        }
        if let Some(overflow_inst) = overflow_inst {
            let overflow = overflow.unwrap();
            self.asm.seto(overflow.r8())?;
            self.ra.def_gpr(overflow_inst, overflow);
        }
        Ok(())
    }

    /// ARM's borrow convention is inverted relative to x86: carry-in 1
    /// means "no borrow", and the carry-out is the complement of x86 CF.
    pub(super) fn emit_sub_with_carry(&mut self, inst: InstId) -> Result<(), EmitError> {
        let carry_inst = self.block.pseudo_op(inst, Opcode::GetCarryFromOp);
        let overflow_inst = self.block.pseudo_op(inst, Opcode::GetOverflowFromOp);

        if let Some(id) = carry_inst {
            self.erase_instruction(id);
        }
        if let Some(id) = overflow_inst {
            self.erase_instruction(id);
        }

        let args = self.ra.args(self.block, inst);
        let carry_in = args[2];

        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let carry = if carry_in.is_immediate() {
            if carry_inst.is_some() {
                Some(self.ra.scratch_gpr(&mut self.asm)?)
            } else {
                None
            }
        } else if carry_inst.is_some() {
            Some(self.ra.use_scratch_gpr(&mut self.asm, carry_in)?)
        } else {
            Some(self.ra.use_gpr(&mut self.asm, carry_in)?)
        };
        let overflow = if overflow_inst.is_some() {
            Some(self.ra.scratch_gpr(&mut self.asm)?)
        } else {
            None
        };
        let op2 = if args[1].is_immediate() {
            None
        } else {
            Some(self.ra.use_gpr(&mut self.asm, args[1])?)
        };

        match (op2, carry_in.is_immediate()) {
            (None, true) => {
                if carry_in.imm_u1() {
                    self.asm.sub(result.r32(), args[1].imm_u32())?;
                } else {
                    self.asm.stc()?;
                    self.asm.sbb(result.r32(), args[1].imm_u32())?;
                }
            }
            (None, false) => {
                self.asm.bt(carry.unwrap().r32(), 0u32)?;
                self.asm.cmc()?;
                self.asm.sbb(result.r32(), args[1].imm_u32())?;
            }
            (Some(op2), true) => {
                if carry_in.imm_u1() {
                    self.asm.sub(result.r32(), op2.r32())?;
                } else {
                    self.asm.stc()?;
                    self.asm.sbb(result.r32(), op2.r32())?;
                }
            }
            (Some(op2), false) => {
                self.asm.bt(carry.unwrap().r32(), 0u32)?;
                self.asm.cmc()?;
                self.asm.sbb(result.r32(), op2.r32())?;
            }
        }

        self.ra.def_gpr(inst, result);
        if let Some(carry_inst) = carry_inst {
            let carry = carry.unwrap();
            self.asm.setae(carry.r8())?;
            self.ra.def_gpr(carry_inst, carry);
        }
        if let Some(overflow_inst) = overflow_inst {
            let overflow = overflow.unwrap();
            self.asm.seto(overflow.r8())?;
            self.ra.def_gpr(overflow_inst, overflow);
        }
        Ok(())
    }

    pub(super) fn emit_add64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let op2 = self.ra.use_gpr(&mut self.asm, args[1])?;
        self.asm.add(result.r64(), op2.r64())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_sub64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let op2 = self.ra.use_gpr(&mut self.asm, args[1])?;
        self.asm.sub(result.r64(), op2.r64())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    /// Signed multiply; the low 32 bits are identical for signed and
    /// unsigned inputs.
    pub(super) fn emit_mul(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        if args[1].is_immediate() {
            self.asm
                .imul_3(result.r32(), result.r32(), args[1].imm_u32() as i32)?;
        } else {
            let op2 = self.ra.use_gpr(&mut self.asm, args[1])?;
            self.asm.imul_2(result.r32(), op2.r32())?;
        }
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_mul64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let op2 = self.ra.use_gpr(&mut self.asm, args[1])?;
        self.asm.imul_2(result.r64(), op2.r64())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_and(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        if args[1].is_immediate() {
            self.asm.and(result.r32(), args[1].imm_u32())?;
        } else {
            let op2 = self.ra.use_gpr(&mut self.asm, args[1])?;
            self.asm.and(result.r32(), op2.r32())?;
        }
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_eor(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        if args[1].is_immediate() {
            self.asm.xor(result.r32(), args[1].imm_u32())?;
        } else {
            let op2 = self.ra.use_gpr(&mut self.asm, args[1])?;
            self.asm.xor(result.r32(), op2.r32())?;
        }
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_or(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        if args[1].is_immediate() {
            self.asm.or(result.r32(), args[1].imm_u32())?;
        } else {
            let op2 = self.ra.use_gpr(&mut self.asm, args[1])?;
            self.asm.or(result.r32(), op2.r32())?;
        }
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_not(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = if args[0].is_immediate() {
            let result = self.ra.scratch_gpr(&mut self.asm)?;
            self.asm.mov(result.r32(), !args[0].imm_u32())?;
            result
        } else {
            let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
            self.asm.not(result.r32())?;
            result
        };
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_sign_extend_word_to_long(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.movsxd(result.r64(), result.r32())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_sign_extend_half_to_word(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.movsx(result.r32(), result.r16())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_sign_extend_byte_to_word(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.movsx(result.r32(), result.r8())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_zero_extend_word_to_long(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        // A 32-bit move zeroes the upper half.
        self.asm.mov(result.r32(), result.r32())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_zero_extend_half_to_word(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.movzx(result.r32(), result.r16())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_zero_extend_byte_to_word(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.movzx(result.r32(), result.r8())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_byte_reverse_word(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.bswap(result.r32())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_byte_reverse_half(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.rol(result.r16(), 8u32)?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_byte_reverse_dual(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        self.asm.bswap(result.r64())?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    pub(super) fn emit_count_leading_zeros(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        if self.features.lzcnt {
            let source = self.ra.use_gpr(&mut self.asm, args[0])?;
            let result = self.ra.scratch_gpr(&mut self.asm)?;
            self.asm.lzcnt(result.r32(), source.r32())?;
            self.ra.def_gpr(inst, result);
        } else {
            let source = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
            let result = self.ra.scratch_gpr(&mut self.asm)?;
            // BSR leaves the destination undefined on zero input but sets
            // ZF, which patches in the -1 that turns into 32 below.
            self.asm.bsr(result.r32(), source.r32())?;
            self.asm.mov(source.r32(), 0xFFFF_FFFFu32)?;
            self.asm.cmove(result.r32(), source.r32())?;
            self.asm.neg(result.r32())?;
            self.asm.add(result.r32(), 31u32)?;
            self.ra.def_gpr(inst, result);
        }
        Ok(())
    }

    pub(super) fn emit_signed_saturated_add(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_signed_saturated_arith(inst, false)
    }

    pub(super) fn emit_signed_saturated_sub(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_signed_saturated_arith(inst, true)
    }

    fn emit_signed_saturated_arith(&mut self, inst: InstId, sub: bool) -> Result<(), EmitError> {
        let overflow_inst = self.block.pseudo_op(inst, Opcode::GetOverflowFromOp);
        if let Some(id) = overflow_inst {
            self.erase_instruction(id);
        }

        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let operand = self.ra.use_gpr(&mut self.asm, args[1])?;
        let overflow = self.ra.scratch_gpr(&mut self.asm)?;

        // overflow = 0x7FFFFFFF for a non-negative first operand,
        // 0x80000000 otherwise: exactly the saturated result.
        self.asm.mov(overflow.r32(), result.r32())?;
        self.asm.shr(overflow.r32(), 31)?;
        self.asm.add(overflow.r32(), 0x7FFF_FFFFu32)?;
        if sub {
            self.asm.sub(result.r32(), operand.r32())?;
        } else {
            self.asm.add(result.r32(), operand.r32())?;
        }
        self.asm.cmovo(result.r32(), overflow.r32())?;

        self.ra.def_gpr(inst, result);

        if let Some(overflow_inst) = overflow_inst {
            self.asm.seto(overflow.r8())?;
            self.ra.def_gpr(overflow_inst, overflow);
        }
        Ok(())
    }

    pub(super) fn emit_unsigned_saturation(&mut self, inst: InstId) -> Result<(), EmitError> {
        let overflow_inst = self.block.pseudo_op(inst, Opcode::GetOverflowFromOp);
        if let Some(id) = overflow_inst {
            self.erase_instruction(id);
        }

        let args = self.ra.args(self.block, inst);
        let n = args[1].imm_u8();
        assert!(n <= 31, "unsigned saturation bit count out of range");
        let saturated = (1u32 << n) - 1;

        let result = self.ra.scratch_gpr(&mut self.asm)?;
        let reg_a = self.ra.use_gpr(&mut self.asm, args[0])?;
        let overflow = self.ra.scratch_gpr(&mut self.asm)?;

        // result = clamp(a, 0, saturated), branch-free: the signed compare
        // routes negatives to zero, the unsigned one keeps in-range values.
        self.asm.xor(overflow.r32(), overflow.r32())?;
        self.asm.cmp(reg_a.r32(), saturated)?;
        self.asm.mov(result.r32(), saturated)?;
        self.asm.cmovle(result.r32(), overflow.r32())?;
        self.asm.cmovbe(result.r32(), reg_a.r32())?;

        self.ra.def_gpr(inst, result);

        if let Some(overflow_inst) = overflow_inst {
            self.asm.seta(overflow.r8())?;
            self.ra.def_gpr(overflow_inst, overflow);
        }
        Ok(())
    }

    pub(super) fn emit_signed_saturation(&mut self, inst: InstId) -> Result<(), EmitError> {
        let overflow_inst = self.block.pseudo_op(inst, Opcode::GetOverflowFromOp);

        let args = self.ra.args(self.block, inst);
        let n = args[1].imm_u8();
        assert!((1..=32).contains(&n), "signed saturation bit count out of range");

        if n == 32 {
            // Identity; cannot overflow.
            if let Some(id) = overflow_inst {
                self.erase_instruction(id);
                let overflow = self.ra.scratch_gpr(&mut self.asm)?;
                self.asm.xor(overflow.r32(), overflow.r32())?;
                self.ra.def_gpr(id, overflow);
            }
            return self.ra.def_from_arg(&mut self.asm, inst, args[0]);
        }

        if let Some(id) = overflow_inst {
            self.erase_instruction(id);
        }

        let mask = (1u32 << n) - 1;
        let positive = (1u32 << (n - 1)) - 1;
        let negative = 1u32 << (n - 1);
        let sext_negative = !mask | negative;

        let result = self.ra.scratch_gpr(&mut self.asm)?;
        let reg_a = self.ra.use_gpr(&mut self.asm, args[0])?;
        let overflow = self.ra.scratch_gpr(&mut self.asm)?;
        let tmp = self.ra.scratch_gpr(&mut self.asm)?;

        // overflow lands in [0, mask] iff a was within the saturation range.
        self.asm
            .lea(overflow.r32(), dword_ptr(reg_a.r64() + negative as i64))?;

        self.asm.cmp(reg_a.r32(), positive)?;
        self.asm.mov(tmp.r32(), positive)?;
        self.asm.mov(result.r32(), sext_negative)?;
        self.asm.cmovg(result.r32(), tmp.r32())?;

        self.asm.cmp(overflow.r32(), mask)?;
        self.asm.cmovbe(result.r32(), reg_a.r32())?;

        self.ra.def_gpr(inst, result);

        if let Some(overflow_inst) = overflow_inst {
            self.asm.seta(overflow.r8())?;
            self.ra.def_gpr(overflow_inst, overflow);
        }
        Ok(())
    }

    pub(super) fn emit_clear_exclusive(&mut self, _inst: InstId) -> Result<(), EmitError> {
        self.asm.mov(
            crate::abi::state_byte(crate::cpu_state::exclusive_state_offset()),
            0u32,
        )?;
        Ok(())
    }

    pub(super) fn emit_set_exclusive(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        assert!(args[1].is_immediate(), "exclusive size must be a constant");
        let address = self.ra.use_gpr(&mut self.asm, args[0])?;

        self.asm.mov(
            crate::abi::state_byte(crate::cpu_state::exclusive_state_offset()),
            1u32,
        )?;
        self.asm.mov(
            crate::abi::state_dword(crate::cpu_state::exclusive_address_offset()),
            address.r32(),
        )?;
        Ok(())
    }
}
