//! Floating-point emitters.
//!
//! The host FP unit runs with the MXCSR rounding mode derived from the
//! guest FPSCR, but flush-to-zero and default-NaN cannot be delegated to
//! MXCSR because the guest wants the cumulative IDC/UFC bits reported.
//! Each operation therefore brackets the host instruction with explicit
//! denormal and NaN fixups keyed off the block's compiled FPSCR mode.

use iced_x86::code_asm::{AsmRegisterXmm, CodeAssembler};
use iced_x86::IcedError;

use vela_jit_ir::InstId;
use vela_types::{Fpscr, FpscrFlags, RoundingMode};

use crate::abi::{state_dword, HostGpr, HostXmm};
use crate::cpu_state::{fpscr_idc_offset, fpscr_nzcv_offset, fpscr_ufc_offset};
use crate::emit::BlockEmitter;
use crate::EmitError;

const FLOAT_NAN32: u32 = 0x7FC0_0000;
const FLOAT_NAN64: u64 = 0x7FF8_0000_0000_0000;
const FLOAT_NON_SIGN_MASK32: u32 = 0x7FFF_FFFF;
const FLOAT_NON_SIGN_MASK64: u64 = 0x7FFF_FFFF_FFFF_FFFF;
const FLOAT_NEGATIVE_ZERO32: u32 = 0x8000_0000;
const FLOAT_NEGATIVE_ZERO64: u64 = 0x8000_0000_0000_0000;
const FLOAT_PENULTIMATE_POSITIVE_DENORMAL32: u32 = 0x007F_FFFE;
const FLOAT_PENULTIMATE_POSITIVE_DENORMAL64: u64 = 0x000F_FFFF_FFFF_FFFE;
/// `2147483647.0`, `-2147483648.0` and `4294967295.0` as doubles.
const FLOAT_MAX_S32: u64 = 0x41DF_FFFF_FFC0_0000;
const FLOAT_MIN_S32: u64 = 0xC1E0_0000_0000_0000;
const FLOAT_MAX_U32: u64 = 0x41EF_FFFF_FFE0_0000;

impl BlockEmitter<'_> {
    fn fpscr(&self) -> Fpscr {
        self.block.location().fpscr()
    }

    /// Replaces a denormal single in `value` with +0 and latches IDC.
    fn denormals_are_zero32(&mut self, value: HostXmm, scratch: HostGpr) -> Result<(), EmitError> {
        let mut end = self.asm.create_label();
        // abs(x) - 1 <= penultimate-positive-denormal catches every
        // denormal and both zeros in one unsigned compare.
        self.asm.movd(scratch.r32(), value.xmm())?;
        self.asm.and(scratch.r32(), FLOAT_NON_SIGN_MASK32)?;
        self.asm.sub(scratch.r32(), 1u32)?;
        self.asm
            .cmp(scratch.r32(), FLOAT_PENULTIMATE_POSITIVE_DENORMAL32)?;
        self.asm.ja(end)?;
        self.asm.pxor(value.xmm(), value.xmm())?;
        self.asm
            .mov(state_dword(fpscr_idc_offset()), FpscrFlags::IDC.bits())?;
        self.asm.set_label(&mut end)?;
        Ok(())
    }

    fn denormals_are_zero64(
        &mut self,
        value: HostXmm,
        scratch: HostGpr,
        konst: HostGpr,
    ) -> Result<(), EmitError> {
        let mut end = self.asm.create_label();
        self.asm.movq(scratch.r64(), value.xmm())?;
        self.asm.mov(konst.r64(), FLOAT_NON_SIGN_MASK64)?;
        self.asm.and(scratch.r64(), konst.r64())?;
        self.asm.sub(scratch.r64(), 1i32)?;
        self.asm
            .mov(konst.r64(), FLOAT_PENULTIMATE_POSITIVE_DENORMAL64)?;
        self.asm.cmp(scratch.r64(), konst.r64())?;
        self.asm.ja(end)?;
        self.asm.pxor(value.xmm(), value.xmm())?;
        self.asm
            .mov(state_dword(fpscr_idc_offset()), FpscrFlags::IDC.bits())?;
        self.asm.set_label(&mut end)?;
        Ok(())
    }

    /// Replaces a denormal single result with +0 and latches UFC.
    fn flush_to_zero32(&mut self, value: HostXmm, scratch: HostGpr) -> Result<(), EmitError> {
        let mut end = self.asm.create_label();
        self.asm.movd(scratch.r32(), value.xmm())?;
        self.asm.and(scratch.r32(), FLOAT_NON_SIGN_MASK32)?;
        self.asm.sub(scratch.r32(), 1u32)?;
        self.asm
            .cmp(scratch.r32(), FLOAT_PENULTIMATE_POSITIVE_DENORMAL32)?;
        self.asm.ja(end)?;
        self.asm.pxor(value.xmm(), value.xmm())?;
        self.asm
            .mov(state_dword(fpscr_ufc_offset()), FpscrFlags::UFC.bits())?;
        self.asm.set_label(&mut end)?;
        Ok(())
    }

    fn flush_to_zero64(
        &mut self,
        value: HostXmm,
        scratch: HostGpr,
        konst: HostGpr,
    ) -> Result<(), EmitError> {
        let mut end = self.asm.create_label();
        self.asm.movq(scratch.r64(), value.xmm())?;
        self.asm.mov(konst.r64(), FLOAT_NON_SIGN_MASK64)?;
        self.asm.and(scratch.r64(), konst.r64())?;
        self.asm.sub(scratch.r64(), 1i32)?;
        self.asm
            .mov(konst.r64(), FLOAT_PENULTIMATE_POSITIVE_DENORMAL64)?;
        self.asm.cmp(scratch.r64(), konst.r64())?;
        self.asm.ja(end)?;
        self.asm.pxor(value.xmm(), value.xmm())?;
        self.asm
            .mov(state_dword(fpscr_ufc_offset()), FpscrFlags::UFC.bits())?;
        self.asm.set_label(&mut end)?;
        Ok(())
    }

    fn default_nan32(&mut self, value: HostXmm, scratch: HostGpr) -> Result<(), EmitError> {
        let mut end = self.asm.create_label();
        self.asm.ucomiss(value.xmm(), value.xmm())?;
        self.asm.jnp(end)?;
        self.asm.mov(scratch.r32(), FLOAT_NAN32)?;
        self.asm.movd(value.xmm(), scratch.r32())?;
        self.asm.set_label(&mut end)?;
        Ok(())
    }

    fn default_nan64(&mut self, value: HostXmm, scratch: HostGpr) -> Result<(), EmitError> {
        let mut end = self.asm.create_label();
        self.asm.ucomisd(value.xmm(), value.xmm())?;
        self.asm.jnp(end)?;
        self.asm.mov(scratch.r64(), FLOAT_NAN64)?;
        self.asm.movq(value.xmm(), scratch.r64())?;
        self.asm.set_label(&mut end)?;
        Ok(())
    }

    fn zero_if_nan64(&mut self, value: HostXmm, scratch: HostXmm) -> Result<(), EmitError> {
        self.asm.pxor(scratch.xmm(), scratch.xmm())?;
        // ordered-compare mask: all ones unless value is a NaN
        self.asm.cmpsd_3(scratch.xmm(), value.xmm(), 7u32)?;
        self.asm.pand(value.xmm(), scratch.xmm())?;
        Ok(())
    }

    fn fp_three_op32(
        &mut self,
        inst: InstId,
        op: impl Fn(&mut CodeAssembler, AsmRegisterXmm, AsmRegisterXmm) -> Result<(), IcedError>,
    ) -> Result<(), EmitError> {
        let fpscr = self.fpscr();
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let operand = self.ra.use_xmm(&mut self.asm, args[1])?;
        let scratch = self.ra.scratch_gpr(&mut self.asm)?;

        if fpscr.ftz() {
            self.denormals_are_zero32(result, scratch)?;
            self.denormals_are_zero32(operand, scratch)?;
        }
        op(&mut self.asm, result.xmm(), operand.xmm())?;
        if fpscr.ftz() {
            self.flush_to_zero32(result, scratch)?;
        }
        if fpscr.dn() {
            self.default_nan32(result, scratch)?;
        }

        self.ra.def_xmm(inst, result);
        Ok(())
    }

    fn fp_three_op64(
        &mut self,
        inst: InstId,
        op: impl Fn(&mut CodeAssembler, AsmRegisterXmm, AsmRegisterXmm) -> Result<(), IcedError>,
    ) -> Result<(), EmitError> {
        let fpscr = self.fpscr();
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let operand = self.ra.use_xmm(&mut self.asm, args[1])?;
        let scratch = self.ra.scratch_gpr(&mut self.asm)?;
        let konst = self.ra.scratch_gpr(&mut self.asm)?;

        if fpscr.ftz() {
            self.denormals_are_zero64(result, scratch, konst)?;
            self.denormals_are_zero64(operand, scratch, konst)?;
        }
        op(&mut self.asm, result.xmm(), operand.xmm())?;
        if fpscr.ftz() {
            self.flush_to_zero64(result, scratch, konst)?;
        }
        if fpscr.dn() {
            self.default_nan64(result, scratch)?;
        }

        self.ra.def_xmm(inst, result);
        Ok(())
    }

    fn fp_two_op32(
        &mut self,
        inst: InstId,
        op: impl Fn(&mut CodeAssembler, AsmRegisterXmm, AsmRegisterXmm) -> Result<(), IcedError>,
    ) -> Result<(), EmitError> {
        let fpscr = self.fpscr();
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let scratch = self.ra.scratch_gpr(&mut self.asm)?;

        if fpscr.ftz() {
            self.denormals_are_zero32(result, scratch)?;
        }
        op(&mut self.asm, result.xmm(), result.xmm())?;
        if fpscr.ftz() {
            self.flush_to_zero32(result, scratch)?;
        }
        if fpscr.dn() {
            self.default_nan32(result, scratch)?;
        }

        self.ra.def_xmm(inst, result);
        Ok(())
    }

    fn fp_two_op64(
        &mut self,
        inst: InstId,
        op: impl Fn(&mut CodeAssembler, AsmRegisterXmm, AsmRegisterXmm) -> Result<(), IcedError>,
    ) -> Result<(), EmitError> {
        let fpscr = self.fpscr();
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let scratch = self.ra.scratch_gpr(&mut self.asm)?;
        let konst = self.ra.scratch_gpr(&mut self.asm)?;

        if fpscr.ftz() {
            self.denormals_are_zero64(result, scratch, konst)?;
        }
        op(&mut self.asm, result.xmm(), result.xmm())?;
        if fpscr.ftz() {
            self.flush_to_zero64(result, scratch, konst)?;
        }
        if fpscr.dn() {
            self.default_nan64(result, scratch)?;
        }

        self.ra.def_xmm(inst, result);
        Ok(())
    }

    pub(super) fn emit_transfer_to_fp32(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        if args[0].is_immediate() && args[0].imm_u32() == 0 {
            let result = self.ra.scratch_xmm(&mut self.asm)?;
            self.asm.xorps(result.xmm(), result.xmm())?;
            self.ra.def_xmm(inst, result);
            Ok(())
        } else {
            self.ra.def_from_arg(&mut self.asm, inst, args[0])
        }
    }

    pub(super) fn emit_transfer_to_fp64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        if args[0].is_immediate() && args[0].imm_u64() == 0 {
            let result = self.ra.scratch_xmm(&mut self.asm)?;
            self.asm.xorps(result.xmm(), result.xmm())?;
            self.ra.def_xmm(inst, result);
            Ok(())
        } else {
            self.ra.def_from_arg(&mut self.asm, inst, args[0])
        }
    }

    pub(super) fn emit_transfer_from_fp32(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        self.ra.def_from_arg(&mut self.asm, inst, args[0])
    }

    pub(super) fn emit_transfer_from_fp64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        self.ra.def_from_arg(&mut self.asm, inst, args[0])
    }

    pub(super) fn emit_fp_abs32(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let mask = self.ra.scratch_xmm(&mut self.asm)?;
        self.load_xmm_const32(mask, FLOAT_NON_SIGN_MASK32)?;
        self.asm.pand(result.xmm(), mask.xmm())?;
        self.ra.def_xmm(inst, result);
        Ok(())
    }

    pub(super) fn emit_fp_abs64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let mask = self.ra.scratch_xmm(&mut self.asm)?;
        self.load_xmm_const64(mask, FLOAT_NON_SIGN_MASK64)?;
        self.asm.pand(result.xmm(), mask.xmm())?;
        self.ra.def_xmm(inst, result);
        Ok(())
    }

    pub(super) fn emit_fp_neg32(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let mask = self.ra.scratch_xmm(&mut self.asm)?;
        self.load_xmm_const32(mask, FLOAT_NEGATIVE_ZERO32)?;
        self.asm.pxor(result.xmm(), mask.xmm())?;
        self.ra.def_xmm(inst, result);
        Ok(())
    }

    pub(super) fn emit_fp_neg64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let mask = self.ra.scratch_xmm(&mut self.asm)?;
        self.load_xmm_const64(mask, FLOAT_NEGATIVE_ZERO64)?;
        self.asm.pxor(result.xmm(), mask.xmm())?;
        self.ra.def_xmm(inst, result);
        Ok(())
    }

    pub(super) fn emit_fp_add32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.fp_three_op32(inst, |a, x, y| a.addss(x, y))
    }

    pub(super) fn emit_fp_add64(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.fp_three_op64(inst, |a, x, y| a.addsd(x, y))
    }

    pub(super) fn emit_fp_sub32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.fp_three_op32(inst, |a, x, y| a.subss(x, y))
    }

    pub(super) fn emit_fp_sub64(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.fp_three_op64(inst, |a, x, y| a.subsd(x, y))
    }

    pub(super) fn emit_fp_mul32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.fp_three_op32(inst, |a, x, y| a.mulss(x, y))
    }

    pub(super) fn emit_fp_mul64(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.fp_three_op64(inst, |a, x, y| a.mulsd(x, y))
    }

    pub(super) fn emit_fp_div32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.fp_three_op32(inst, |a, x, y| a.divss(x, y))
    }

    pub(super) fn emit_fp_div64(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.fp_three_op64(inst, |a, x, y| a.divsd(x, y))
    }

    pub(super) fn emit_fp_sqrt32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.fp_two_op32(inst, |a, x, y| a.sqrtss(x, y))
    }

    pub(super) fn emit_fp_sqrt64(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.fp_two_op64(inst, |a, x, y| a.sqrtsd(x, y))
    }

    pub(super) fn emit_fp_compare32(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let reg_a = self.ra.use_xmm(&mut self.asm, args[0])?;
        let reg_b = self.ra.use_xmm(&mut self.asm, args[1])?;
        let quiet = args[2].imm_u1();

        self.ra
            .scratch_gpr_at(&mut self.asm, crate::abi::HostGpr::RAX)?;
        let nzcv_imm = self.ra.scratch_gpr(&mut self.asm)?;
        let nzcv = self.ra.scratch_gpr(&mut self.asm)?;

        if quiet {
            self.asm.ucomiss(reg_a.xmm(), reg_b.xmm())?;
        } else {
            self.asm.comiss(reg_a.xmm(), reg_b.xmm())?;
        }
        self.write_nzcv_from_host_flags(nzcv_imm, nzcv)
    }

    pub(super) fn emit_fp_compare64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let reg_a = self.ra.use_xmm(&mut self.asm, args[0])?;
        let reg_b = self.ra.use_xmm(&mut self.asm, args[1])?;
        let quiet = args[2].imm_u1();

        self.ra
            .scratch_gpr_at(&mut self.asm, crate::abi::HostGpr::RAX)?;
        let nzcv_imm = self.ra.scratch_gpr(&mut self.asm)?;
        let nzcv = self.ra.scratch_gpr(&mut self.asm)?;

        if quiet {
            self.asm.ucomisd(reg_a.xmm(), reg_b.xmm())?;
        } else {
            self.asm.comisd(reg_a.xmm(), reg_b.xmm())?;
        }
        self.write_nzcv_from_host_flags(nzcv_imm, nzcv)
    }

    fn write_nzcv_from_host_flags(
        &mut self,
        nzcv_imm: HostGpr,
        nzcv: HostGpr,
    ) -> Result<(), EmitError> {
        use iced_x86::code_asm::ah;

        self.asm.lahf()?;
        self.asm.mov(nzcv_imm.r32(), 0x3000_0000u32)?;
        self.asm.cmp(ah, 0b0100_0111u32)?;
        self.asm.cmove(nzcv.r32(), nzcv_imm.r32())?;
        self.asm.mov(nzcv_imm.r32(), 0x2000_0000u32)?;
        self.asm.cmp(ah, 0b0000_0010u32)?;
        self.asm.cmove(nzcv.r32(), nzcv_imm.r32())?;
        self.asm.mov(nzcv_imm.r32(), 0x8000_0000u32)?;
        self.asm.cmp(ah, 0b0000_0011u32)?;
        self.asm.cmove(nzcv.r32(), nzcv_imm.r32())?;
        self.asm.mov(nzcv_imm.r32(), 0x6000_0000u32)?;
        self.asm.cmp(ah, 0b0100_0010u32)?;
        self.asm.cmove(nzcv.r32(), nzcv_imm.r32())?;
        self.asm.mov(state_dword(fpscr_nzcv_offset()), nzcv.r32())?;
        Ok(())
    }

    pub(super) fn emit_fp_single_to_double(&mut self, inst: InstId) -> Result<(), EmitError> {
        let fpscr = self.fpscr();
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let scratch = self.ra.scratch_gpr(&mut self.asm)?;
        let konst = self.ra.scratch_gpr(&mut self.asm)?;

        if fpscr.ftz() {
            self.denormals_are_zero32(result, scratch)?;
        }
        self.asm.cvtss2sd(result.xmm(), result.xmm())?;
        if fpscr.ftz() {
            self.flush_to_zero64(result, scratch, konst)?;
        }
        if fpscr.dn() {
            self.default_nan64(result, scratch)?;
        }

        self.ra.def_xmm(inst, result);
        Ok(())
    }

    pub(super) fn emit_fp_double_to_single(&mut self, inst: InstId) -> Result<(), EmitError> {
        let fpscr = self.fpscr();
        let args = self.ra.args(self.block, inst);
        let result = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let scratch = self.ra.scratch_gpr(&mut self.asm)?;
        let konst = self.ra.scratch_gpr(&mut self.asm)?;

        if fpscr.ftz() {
            self.denormals_are_zero64(result, scratch, konst)?;
        }
        self.asm.cvtsd2ss(result.xmm(), result.xmm())?;
        if fpscr.ftz() {
            self.flush_to_zero32(result, scratch)?;
        }
        if fpscr.dn() {
            self.default_nan32(result, scratch)?;
        }

        self.ra.def_xmm(inst, result);
        Ok(())
    }

    /// Signed conversion with ARM saturation: promote to double
    /// (lossless), convert once for the status flags, clamp, convert
    /// again for the value.
    fn emit_fp_to_s32(&mut self, inst: InstId, from_single: bool) -> Result<(), EmitError> {
        let fpscr = self.fpscr();
        let args = self.ra.args(self.block, inst);
        let from = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let to = self.ra.scratch_gpr(&mut self.asm)?;
        let konst_gpr = self.ra.scratch_gpr(&mut self.asm)?;
        let xmm_scratch = self.ra.scratch_xmm(&mut self.asm)?;
        let konst = self.ra.scratch_xmm(&mut self.asm)?;
        let round_towards_zero = args[1].imm_u1();

        if from_single {
            if fpscr.ftz() {
                self.denormals_are_zero32(from, to)?;
            }
            self.asm.cvtss2sd(from.xmm(), from.xmm())?;
        } else if fpscr.ftz() {
            self.denormals_are_zero64(from, to, konst_gpr)?;
        }

        // First pass raises the host status flags.
        if round_towards_zero {
            self.asm.cvttsd2si(to.r32(), from.xmm())?;
        } else {
            self.asm.cvtsd2si(to.r32(), from.xmm())?;
        }

        self.zero_if_nan64(from, xmm_scratch)?;
        self.load_xmm_const64(konst, FLOAT_MAX_S32)?;
        self.asm.minsd(from.xmm(), konst.xmm())?;
        self.load_xmm_const64(konst, FLOAT_MIN_S32)?;
        self.asm.maxsd(from.xmm(), konst.xmm())?;

        if round_towards_zero {
            self.asm.cvttsd2si(to.r32(), from.xmm())?;
        } else {
            self.asm.cvtsd2si(to.r32(), from.xmm())?;
        }

        self.ra.def_gpr(inst, to);
        Ok(())
    }

    pub(super) fn emit_fp_single_to_s32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_fp_to_s32(inst, true)
    }

    pub(super) fn emit_fp_double_to_s32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_fp_to_s32(inst, false)
    }

    /// Unsigned conversion: SSE2 has no unsigned convert, so shift the
    /// value into signed range and shift the integer result back.
    fn emit_fp_to_u32(&mut self, inst: InstId, from_single: bool) -> Result<(), EmitError> {
        let fpscr = self.fpscr();
        let args = self.ra.args(self.block, inst);
        let from = self.ra.use_scratch_xmm(&mut self.asm, args[0])?;
        let to = self.ra.scratch_gpr(&mut self.asm)?;
        let konst_gpr = self.ra.scratch_gpr(&mut self.asm)?;
        let xmm_scratch = self.ra.scratch_xmm(&mut self.asm)?;
        let konst = self.ra.scratch_xmm(&mut self.asm)?;
        let round_towards_zero = args[1].imm_u1();

        if fpscr.rounding_mode() != RoundingMode::TowardsZero && !round_towards_zero {
            if from_single {
                if fpscr.ftz() {
                    self.denormals_are_zero32(from, to)?;
                }
                self.asm.cvtss2sd(from.xmm(), from.xmm())?;
            } else if fpscr.ftz() {
                self.denormals_are_zero64(from, to, konst_gpr)?;
            }
            self.zero_if_nan64(from, xmm_scratch)?;
            // Shift into signed range.
            self.load_xmm_const64(konst, FLOAT_MIN_S32)?;
            self.asm.addsd(from.xmm(), konst.xmm())?;
            // First pass raises the host status flags.
            self.asm.cvtsd2si(to.r32(), from.xmm())?;
            self.load_xmm_const64(konst, FLOAT_MAX_S32)?;
            self.asm.minsd(from.xmm(), konst.xmm())?;
            self.load_xmm_const64(konst, FLOAT_MIN_S32)?;
            self.asm.maxsd(from.xmm(), konst.xmm())?;
            self.asm.cvtsd2si(to.r32(), from.xmm())?;
            // Shift back.
            self.asm.add(to.r32(), 0x8000_0000u32)?;
        } else {
            let xmm_mask = self.ra.scratch_xmm(&mut self.asm)?;
            let gpr_mask = self.ra.scratch_gpr(&mut self.asm)?;

            if from_single {
                if fpscr.ftz() {
                    self.denormals_are_zero32(from, to)?;
                }
                self.asm.cvtss2sd(from.xmm(), from.xmm())?;
            } else if fpscr.ftz() {
                self.denormals_are_zero64(from, to, konst_gpr)?;
            }
            self.zero_if_nan64(from, xmm_scratch)?;
            // Branch-free range shift: build an all-ones mask where the
            // value exceeds the signed maximum, and use it to offset both
            // the input and the result.
            self.load_xmm_const64(xmm_mask, FLOAT_MAX_S32)?;
            self.asm.cmpsd_3(xmm_mask.xmm(), from.xmm(), 1u32)?;
            self.asm.movd(gpr_mask.r32(), xmm_mask.xmm())?;
            self.load_xmm_const64(konst, FLOAT_MIN_S32)?;
            self.asm.pand(xmm_mask.xmm(), konst.xmm())?;
            self.asm.and(gpr_mask.r32(), 0x8000_0000u32)?;
            self.asm.addsd(from.xmm(), xmm_mask.xmm())?;
            // First pass raises the host status flags.
            self.asm.cvttsd2si(to.r32(), from.xmm())?;
            self.load_xmm_const64(konst, FLOAT_MAX_S32)?;
            self.asm.minsd(from.xmm(), konst.xmm())?;
            self.asm.pxor(konst.xmm(), konst.xmm())?;
            self.asm.maxsd(from.xmm(), konst.xmm())?;
            self.asm.cvttsd2si(to.r32(), from.xmm())?;
            self.asm.add(to.r32(), gpr_mask.r32())?;
        }

        self.ra.def_gpr(inst, to);
        Ok(())
    }

    pub(super) fn emit_fp_single_to_u32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_fp_to_u32(inst, true)
    }

    pub(super) fn emit_fp_double_to_u32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_fp_to_u32(inst, false)
    }

    pub(super) fn emit_fp_s32_to_single(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let from = self.ra.use_gpr(&mut self.asm, args[0])?;
        let to = self.ra.scratch_xmm(&mut self.asm)?;
        let round_to_nearest = args[1].imm_u1();
        assert!(!round_to_nearest, "forced round-to-nearest is not implemented");

        self.asm.cvtsi2ss(to.xmm(), from.r32())?;

        self.ra.def_xmm(inst, to);
        Ok(())
    }

    pub(super) fn emit_fp_u32_to_single(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let from = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let to = self.ra.scratch_xmm(&mut self.asm)?;
        let round_to_nearest = args[1].imm_u1();
        assert!(!round_to_nearest, "forced round-to-nearest is not implemented");

        // Zero-extend and convert from 64 bits so the value is unsigned.
        self.asm.mov(from.r32(), from.r32())?;
        self.asm.cvtsi2ss(to.xmm(), from.r64())?;

        self.ra.def_xmm(inst, to);
        Ok(())
    }

    pub(super) fn emit_fp_s32_to_double(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let from = self.ra.use_gpr(&mut self.asm, args[0])?;
        let to = self.ra.scratch_xmm(&mut self.asm)?;
        let round_to_nearest = args[1].imm_u1();
        assert!(!round_to_nearest, "forced round-to-nearest is not implemented");

        self.asm.cvtsi2sd(to.xmm(), from.r32())?;

        self.ra.def_xmm(inst, to);
        Ok(())
    }

    pub(super) fn emit_fp_u32_to_double(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let from = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
        let to = self.ra.scratch_xmm(&mut self.asm)?;
        let round_to_nearest = args[1].imm_u1();
        assert!(!round_to_nearest, "forced round-to-nearest is not implemented");

        self.asm.mov(from.r32(), from.r32())?;
        self.asm.cvtsi2sd(to.xmm(), from.r64())?;

        self.ra.def_xmm(inst, to);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_constants_match_their_doubles() {
        assert_eq!(FLOAT_MAX_S32, (2147483647.0f64).to_bits());
        assert_eq!(FLOAT_MIN_S32, (-2147483648.0f64).to_bits());
        assert_eq!(FLOAT_MAX_U32, (4294967295.0f64).to_bits());
    }
}
