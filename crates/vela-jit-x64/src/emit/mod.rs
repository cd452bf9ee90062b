//! The block emitter: drives the per-opcode emitters over an IR block and
//! lowers its guard condition and terminator.

mod data;
mod fp;
mod mem;
mod packed;
mod term;

use iced_x86::code_asm::{rax, CodeAssembler, CodeLabel};

use vela_jit_ir::{InstId, IrBlock, Opcode};
use vela_types::cpsr;

use crate::abi::{state_dword, HostFeatures, HostXmm};
use crate::cache::TranslationCache;
use crate::coproc::{Coprocessor, UserCallbacks, COPROC_SLOTS};
use crate::cpu_state::{
    cpsr_offset, fpscr_nzcv_offset, guest_mxcsr_offset, reg_offset, rsb_codeptrs_offset,
    rsb_index_offset, rsb_location_descriptors_offset, save_host_mxcsr_offset, RSB_SIZE,
};
use crate::patch::PatchKind;
use crate::regalloc::RegAlloc;
use crate::EmitError;

/// A patchable site recorded during emission; resolved to a buffer address
/// once the block is assembled.
pub(crate) struct PendingPatch {
    pub label: CodeLabel,
    pub kind: PatchKind,
    pub target_hash: u64,
}

pub(crate) struct BlockEmitter<'a> {
    pub asm: CodeAssembler,
    pub ra: RegAlloc,
    pub block: &'a mut IrBlock,
    pub cb: &'a UserCallbacks,
    pub coprocs: &'a mut [Option<Box<dyn Coprocessor>>; COPROC_SLOTS],
    pub cache: &'a TranslationCache,
    pub features: HostFeatures,
    /// Address of `return_from_run_code`.
    pub return_trampoline: u64,
    /// Address of the epilogue entry that skips the MXCSR switch.
    pub return_trampoline_no_mxcsr: u64,
    pub pending_patches: Vec<PendingPatch>,
}

type EmitFn = for<'e, 'a> fn(&'e mut BlockEmitter<'a>, InstId) -> Result<(), EmitError>;

impl<'a> BlockEmitter<'a> {
    pub fn new(
        block: &'a mut IrBlock,
        cb: &'a UserCallbacks,
        coprocs: &'a mut [Option<Box<dyn Coprocessor>>; COPROC_SLOTS],
        cache: &'a TranslationCache,
        features: HostFeatures,
        return_trampoline: u64,
        return_trampoline_no_mxcsr: u64,
    ) -> Result<BlockEmitter<'a>, EmitError> {
        Ok(BlockEmitter {
            asm: CodeAssembler::new(64)?,
            ra: RegAlloc::new(block),
            block,
            cb,
            coprocs,
            cache,
            features,
            return_trampoline,
            return_trampoline_no_mxcsr,
            pending_patches: Vec::new(),
        })
    }

    pub fn emit_instruction(&mut self, id: InstId) -> Result<(), EmitError> {
        emitter_for(self.block.instr(id).opcode())(self, id)
    }

    // --- shared helpers ---

    /// `mov rax, target; call rax`. `rax` is reserved around every host
    /// call, so clobbering it here is always safe.
    pub(crate) fn call_abs(&mut self, target: u64) -> Result<(), EmitError> {
        self.asm.mov(rax, target)?;
        self.asm.call(rax)?;
        Ok(())
    }

    /// `mov rax, target; jmp rax`; only used as a block tail.
    pub(crate) fn jmp_abs(&mut self, target: u64) -> Result<(), EmitError> {
        self.asm.mov(rax, target)?;
        self.asm.jmp(rax)?;
        Ok(())
    }

    /// Store the guest MXCSR and restore the host's, before calling out.
    pub(crate) fn switch_mxcsr_on_exit(&mut self) -> Result<(), EmitError> {
        self.asm.stmxcsr(state_dword(guest_mxcsr_offset()))?;
        self.asm.ldmxcsr(state_dword(save_host_mxcsr_offset()))?;
        Ok(())
    }

    /// Store the host MXCSR and install the guest's, after calling out.
    pub(crate) fn switch_mxcsr_on_entry(&mut self) -> Result<(), EmitError> {
        self.asm.stmxcsr(state_dword(save_host_mxcsr_offset()))?;
        self.asm.ldmxcsr(state_dword(guest_mxcsr_offset()))?;
        Ok(())
    }

    /// Removes a consumed pseudo-operation from the block and releases its
    /// argument uses in the allocator.
    pub(crate) fn erase_instruction(&mut self, id: InstId) {
        let args = *self.block.instr(id).args();
        self.block.erase(id);
        self.ra.notify_erased(id, args);
    }

    /// Emits a fixed-size placeholder that the compile driver overwrites
    /// with the initial patch content. One-byte traps keep the assembler's
    /// size bookkeeping exact.
    pub(crate) fn emit_patch_site(
        &mut self,
        kind: PatchKind,
        target_hash: u64,
    ) -> Result<(), EmitError> {
        let mut label = self.asm.create_label();
        self.asm.set_label(&mut label)?;
        for _ in 0..kind.size() {
            self.asm.int3()?;
        }
        self.pending_patches.push(PendingPatch {
            label,
            kind,
            target_hash,
        });
        Ok(())
    }

    /// Loads a 32-bit constant into an XMM register through a GPR.
    pub(crate) fn load_xmm_const32(&mut self, x: HostXmm, bits: u32) -> Result<(), EmitError> {
        let tmp = self.ra.scratch_gpr(&mut self.asm)?;
        self.asm.mov(tmp.r32(), bits)?;
        self.asm.movd(x.xmm(), tmp.r32())?;
        Ok(())
    }

    /// Loads a 64-bit constant into an XMM register through a GPR.
    pub(crate) fn load_xmm_const64(&mut self, x: HostXmm, bits: u64) -> Result<(), EmitError> {
        let tmp = self.ra.scratch_gpr(&mut self.asm)?;
        self.asm.mov(tmp.r64(), bits)?;
        self.asm.movq(x.xmm(), tmp.r64())?;
        Ok(())
    }

    // --- guest state access ---

    fn emit_void(&mut self, _inst: InstId) -> Result<(), EmitError> {
        Ok(())
    }

    fn emit_identity(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        self.ra.def_from_arg(&mut self.asm, inst, args[0])
    }

    fn emit_breakpoint(&mut self, _inst: InstId) -> Result<(), EmitError> {
        self.asm.int3()?;
        Ok(())
    }

    fn emit_get_register(&mut self, inst: InstId) -> Result<(), EmitError> {
        let reg = self.block.instr(inst).arg(0).reg_ref();
        let result = self.ra.scratch_gpr(&mut self.asm)?;
        self.asm.mov(result.r32(), state_dword(reg_offset(reg)))?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    fn emit_set_register(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let reg = args[0].reg_ref();
        if args[1].is_immediate() {
            self.asm
                .mov(state_dword(reg_offset(reg)), args[1].imm_u32())?;
        } else {
            let to_store = self.ra.use_gpr(&mut self.asm, args[1])?;
            self.asm.mov(state_dword(reg_offset(reg)), to_store.r32())?;
        }
        Ok(())
    }

    fn emit_get_extended_register32(&mut self, inst: InstId) -> Result<(), EmitError> {
        let reg = self.block.instr(inst).arg(0).ext_reg_ref();
        assert!(reg.is_single(), "S-form access to {reg}");
        let result = self.ra.scratch_xmm(&mut self.asm)?;
        self.asm.movss(
            result.xmm(),
            crate::abi::state_dword(crate::cpu_state::ext_reg_offset(reg)),
        )?;
        self.ra.def_xmm(inst, result);
        Ok(())
    }

    fn emit_get_extended_register64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let reg = self.block.instr(inst).arg(0).ext_reg_ref();
        assert!(reg.is_double(), "D-form access to {reg}");
        let result = self.ra.scratch_xmm(&mut self.asm)?;
        self.asm.movsd_2(
            result.xmm(),
            crate::abi::state_qword(crate::cpu_state::ext_reg_offset(reg)),
        )?;
        self.ra.def_xmm(inst, result);
        Ok(())
    }

    fn emit_set_extended_register32(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let reg = args[0].ext_reg_ref();
        assert!(reg.is_single(), "S-form access to {reg}");
        let source = self.ra.use_xmm(&mut self.asm, args[1])?;
        self.asm.movss(
            crate::abi::state_dword(crate::cpu_state::ext_reg_offset(reg)),
            source.xmm(),
        )?;
        Ok(())
    }

    fn emit_set_extended_register64(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let reg = args[0].ext_reg_ref();
        assert!(reg.is_double(), "D-form access to {reg}");
        let source = self.ra.use_xmm(&mut self.asm, args[1])?;
        self.asm.movsd_2(
            crate::abi::state_qword(crate::cpu_state::ext_reg_offset(reg)),
            source.xmm(),
        )?;
        Ok(())
    }

    fn emit_get_cpsr(&mut self, inst: InstId) -> Result<(), EmitError> {
        let result = self.ra.scratch_gpr(&mut self.asm)?;
        self.asm.mov(result.r32(), state_dword(cpsr_offset()))?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    fn emit_set_cpsr(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let arg = self.ra.use_gpr(&mut self.asm, args[0])?;
        self.asm.mov(state_dword(cpsr_offset()), arg.r32())?;
        Ok(())
    }

    fn emit_get_flag(&mut self, inst: InstId, bit: u32) -> Result<(), EmitError> {
        let result = self.ra.scratch_gpr(&mut self.asm)?;
        self.asm.mov(result.r32(), state_dword(cpsr_offset()))?;
        self.asm.shr(result.r32(), bit)?;
        if bit < 31 {
            self.asm.and(result.r32(), 1u32)?;
        }
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    fn emit_set_flag(&mut self, inst: InstId, bit: u32) -> Result<(), EmitError> {
        let mask: u32 = 1 << bit;
        let args = self.ra.args(self.block, inst);
        if args[0].is_immediate() {
            if args[0].imm_u1() {
                self.asm.or(state_dword(cpsr_offset()), mask)?;
            } else {
                self.asm.and(state_dword(cpsr_offset()), !mask)?;
            }
        } else {
            let to_store = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
            self.asm.shl(to_store.r32(), bit)?;
            self.asm.and(state_dword(cpsr_offset()), !mask)?;
            self.asm.or(state_dword(cpsr_offset()), to_store.r32())?;
        }
        Ok(())
    }

    fn emit_get_n_flag(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_get_flag(inst, cpsr::N_BIT)
    }

    fn emit_set_n_flag(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_set_flag(inst, cpsr::N_BIT)
    }

    fn emit_get_z_flag(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_get_flag(inst, cpsr::Z_BIT)
    }

    fn emit_set_z_flag(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_set_flag(inst, cpsr::Z_BIT)
    }

    fn emit_get_c_flag(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_get_flag(inst, cpsr::C_BIT)
    }

    fn emit_set_c_flag(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_set_flag(inst, cpsr::C_BIT)
    }

    fn emit_get_v_flag(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_get_flag(inst, cpsr::V_BIT)
    }

    fn emit_set_v_flag(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_set_flag(inst, cpsr::V_BIT)
    }

    /// Q is sticky: only ever OR'd in.
    fn emit_or_q_flag(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        if args[0].is_immediate() {
            if args[0].imm_u1() {
                self.asm.or(state_dword(cpsr_offset()), cpsr::Q_MASK)?;
            }
        } else {
            let to_store = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
            self.asm.shl(to_store.r32(), cpsr::Q_BIT)?;
            self.asm.or(state_dword(cpsr_offset()), to_store.r32())?;
        }
        Ok(())
    }

    fn emit_get_ge_flags(&mut self, inst: InstId) -> Result<(), EmitError> {
        let result = self.ra.scratch_gpr(&mut self.asm)?;
        self.asm.mov(result.r32(), state_dword(cpsr_offset()))?;
        self.asm.shr(result.r32(), cpsr::GE_BIT)?;
        self.asm.and(result.r32(), 0xFu32)?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    fn emit_set_ge_flags(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        if args[0].is_immediate() {
            let imm = (args[0].imm_u32() << cpsr::GE_BIT) & cpsr::GE_MASK;
            self.asm.and(state_dword(cpsr_offset()), !cpsr::GE_MASK)?;
            self.asm.or(state_dword(cpsr_offset()), imm)?;
        } else {
            let to_store = self.ra.use_scratch_gpr(&mut self.asm, args[0])?;
            self.asm.shl(to_store.r32(), cpsr::GE_BIT)?;
            self.asm.and(to_store.r32(), cpsr::GE_MASK)?;
            self.asm.and(state_dword(cpsr_offset()), !cpsr::GE_MASK)?;
            self.asm.or(state_dword(cpsr_offset()), to_store.r32())?;
        }
        Ok(())
    }

    /// BX-style PC write: bit 0 selects Thumb and the PC alignment mask.
    /// The register path is branch-free.
    fn emit_bx_write_pc(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let arg = args[0];

        if arg.is_immediate() {
            let new_pc = arg.imm_u32();
            if new_pc & 1 != 0 {
                self.asm
                    .mov(state_dword(reg_offset(vela_types::Reg::PC)), new_pc & 0xFFFF_FFFE)?;
                self.asm.or(state_dword(cpsr_offset()), cpsr::T_MASK)?;
            } else {
                self.asm
                    .mov(state_dword(reg_offset(vela_types::Reg::PC)), new_pc & 0xFFFF_FFFC)?;
                self.asm.and(state_dword(cpsr_offset()), !cpsr::T_MASK)?;
            }
        } else {
            let new_pc = self.ra.use_scratch_gpr(&mut self.asm, arg)?;
            let tmp1 = self.ra.scratch_gpr(&mut self.asm)?;
            let tmp2 = self.ra.scratch_gpr(&mut self.asm)?;

            self.asm.mov(tmp1.r32(), state_dword(cpsr_offset()))?;
            self.asm.mov(tmp2.r32(), tmp1.r32())?;
            self.asm.and(tmp2.r32(), !cpsr::T_MASK)?;
            self.asm.or(tmp1.r32(), cpsr::T_MASK)?;
            self.asm.test(new_pc.r32(), 1u32)?;
            self.asm.cmove(tmp1.r32(), tmp2.r32())?;
            self.asm.mov(state_dword(cpsr_offset()), tmp1.r32())?;
            // tmp2 = 2*pc | 0xFFFFFFFC = pc&1 ? 0xFFFFFFFE : 0xFFFFFFFC
            self.asm.lea(
                tmp2.r64(),
                iced_x86::code_asm::qword_ptr(new_pc.r64() + new_pc.r64()),
            )?;
            self.asm.or(tmp2.r32(), 0xFFFF_FFFCu32)?;
            self.asm.and(new_pc.r32(), tmp2.r32())?;
            self.asm
                .mov(state_dword(reg_offset(vela_types::Reg::PC)), new_pc.r32())?;
        }
        Ok(())
    }

    fn emit_get_fpscr_nzcv(&mut self, inst: InstId) -> Result<(), EmitError> {
        let result = self.ra.scratch_gpr(&mut self.asm)?;
        self.asm.mov(result.r32(), state_dword(fpscr_nzcv_offset()))?;
        self.ra.def_gpr(inst, result);
        Ok(())
    }

    fn emit_set_fpscr_nzcv(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let value = self.ra.use_gpr(&mut self.asm, args[0])?;
        self.asm.mov(state_dword(fpscr_nzcv_offset()), value.r32())?;
        Ok(())
    }

    /// Push into the return-stack buffer. The stored host pointer is a
    /// patchable `mov rcx, imm64` aimed at the target's entrypoint (or the
    /// return trampoline while uncompiled). Pushing a location already in
    /// the buffer is a no-op, keeping the scan stable.
    fn emit_push_rsb(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        assert!(args[0].is_immediate(), "PushRSB target must be a constant");
        let target_hash = args[0].imm_u64();

        self.ra
            .scratch_gpr_at(&mut self.asm, crate::abi::HostGpr::RCX)?;
        let code_ptr = crate::abi::HostGpr::RCX;
        let loc_desc = self.ra.scratch_gpr(&mut self.asm)?;
        let index = self.ra.scratch_gpr(&mut self.asm)?;

        self.asm.mov(index.r32(), state_dword(rsb_index_offset()))?;
        self.asm.add(index.r32(), 1u32)?;
        self.asm.and(index.r32(), (RSB_SIZE - 1) as u32)?;

        self.asm.mov(loc_desc.r64(), target_hash)?;

        self.emit_patch_site(PatchKind::MovRcx, target_hash)?;

        let mut skip = self.asm.create_label();
        for i in 0..RSB_SIZE {
            self.asm.cmp(
                loc_desc.r64(),
                crate::abi::state_qword(rsb_location_descriptors_offset() + 8 * i as i32),
            )?;
            self.asm.je(skip)?;
        }

        self.asm.mov(state_dword(rsb_index_offset()), index.r32())?;
        self.asm.mov(
            iced_x86::code_asm::qword_ptr(
                crate::abi::STATE.r64()
                    + index.r64() * 8
                    + rsb_location_descriptors_offset() as i64,
            ),
            loc_desc.r64(),
        )?;
        self.asm.mov(
            iced_x86::code_asm::qword_ptr(
                crate::abi::STATE.r64() + index.r64() * 8 + rsb_codeptrs_offset() as i64,
            ),
            code_ptr.r64(),
        )?;
        // Cycle accounting follows every instruction, so the label always
        // has something to bind to.
        self.asm.set_label(&mut skip)?;
        Ok(())
    }

    fn emit_pseudo_as_primary(&mut self, inst: InstId) -> Result<(), EmitError> {
        panic!(
            "{:?} reached as a primary opcode; pseudo-operations must be \
             consumed by their parent",
            self.block.instr(inst).opcode()
        );
    }
}

/// Per-opcode dispatch. The opcode enum plus this table is the ABI between
/// the frontend and this backend.
fn emitter_for(op: Opcode) -> EmitFn {
    use Opcode::*;
    match op {
        Void => |be, inst| BlockEmitter::emit_void(be, inst),
        Identity => |be, inst| BlockEmitter::emit_identity(be, inst),
        Breakpoint => |be, inst| BlockEmitter::emit_breakpoint(be, inst),
        GetRegister => |be, inst| BlockEmitter::emit_get_register(be, inst),
        SetRegister => |be, inst| BlockEmitter::emit_set_register(be, inst),
        GetExtendedRegister32 => |be, inst| BlockEmitter::emit_get_extended_register32(be, inst),
        GetExtendedRegister64 => |be, inst| BlockEmitter::emit_get_extended_register64(be, inst),
        SetExtendedRegister32 => |be, inst| BlockEmitter::emit_set_extended_register32(be, inst),
        SetExtendedRegister64 => |be, inst| BlockEmitter::emit_set_extended_register64(be, inst),
        GetCpsr => |be, inst| BlockEmitter::emit_get_cpsr(be, inst),
        SetCpsr => |be, inst| BlockEmitter::emit_set_cpsr(be, inst),
        GetNFlag => |be, inst| BlockEmitter::emit_get_n_flag(be, inst),
        SetNFlag => |be, inst| BlockEmitter::emit_set_n_flag(be, inst),
        GetZFlag => |be, inst| BlockEmitter::emit_get_z_flag(be, inst),
        SetZFlag => |be, inst| BlockEmitter::emit_set_z_flag(be, inst),
        GetCFlag => |be, inst| BlockEmitter::emit_get_c_flag(be, inst),
        SetCFlag => |be, inst| BlockEmitter::emit_set_c_flag(be, inst),
        GetVFlag => |be, inst| BlockEmitter::emit_get_v_flag(be, inst),
        SetVFlag => |be, inst| BlockEmitter::emit_set_v_flag(be, inst),
        OrQFlag => |be, inst| BlockEmitter::emit_or_q_flag(be, inst),
        GetGEFlags => |be, inst| BlockEmitter::emit_get_ge_flags(be, inst),
        SetGEFlags => |be, inst| BlockEmitter::emit_set_ge_flags(be, inst),
        BXWritePC => |be, inst| BlockEmitter::emit_bx_write_pc(be, inst),
        CallSupervisor => |be, inst| BlockEmitter::emit_call_supervisor(be, inst),
        GetFpscr => |be, inst| BlockEmitter::emit_get_fpscr(be, inst),
        SetFpscr => |be, inst| BlockEmitter::emit_set_fpscr(be, inst),
        GetFpscrNZCV => |be, inst| BlockEmitter::emit_get_fpscr_nzcv(be, inst),
        SetFpscrNZCV => |be, inst| BlockEmitter::emit_set_fpscr_nzcv(be, inst),
        PushRSB => |be, inst| BlockEmitter::emit_push_rsb(be, inst),
        GetCarryFromOp | GetOverflowFromOp | GetGEFromOp => |be, inst| BlockEmitter::emit_pseudo_as_primary(be, inst),
        Pack2x32To1x64 => |be, inst| BlockEmitter::emit_pack_2x32_to_1x64(be, inst),
        LeastSignificantWord => |be, inst| BlockEmitter::emit_least_significant_word(be, inst),
        MostSignificantWord => |be, inst| BlockEmitter::emit_most_significant_word(be, inst),
        LeastSignificantHalf => |be, inst| BlockEmitter::emit_least_significant_half(be, inst),
        LeastSignificantByte => |be, inst| BlockEmitter::emit_least_significant_byte(be, inst),
        MostSignificantBit => |be, inst| BlockEmitter::emit_most_significant_bit(be, inst),
        IsZero => |be, inst| BlockEmitter::emit_is_zero(be, inst),
        IsZero64 => |be, inst| BlockEmitter::emit_is_zero64(be, inst),
        LogicalShiftLeft => |be, inst| BlockEmitter::emit_logical_shift_left(be, inst),
        LogicalShiftRight => |be, inst| BlockEmitter::emit_logical_shift_right(be, inst),
        LogicalShiftRight64 => |be, inst| BlockEmitter::emit_logical_shift_right64(be, inst),
        ArithmeticShiftRight => |be, inst| BlockEmitter::emit_arithmetic_shift_right(be, inst),
        RotateRight => |be, inst| BlockEmitter::emit_rotate_right(be, inst),
        RotateRightExtended => |be, inst| BlockEmitter::emit_rotate_right_extended(be, inst),
        AddWithCarry => |be, inst| BlockEmitter::emit_add_with_carry(be, inst),
        Add64 => |be, inst| BlockEmitter::emit_add64(be, inst),
        SubWithCarry => |be, inst| BlockEmitter::emit_sub_with_carry(be, inst),
        Sub64 => |be, inst| BlockEmitter::emit_sub64(be, inst),
        Mul => |be, inst| BlockEmitter::emit_mul(be, inst),
        Mul64 => |be, inst| BlockEmitter::emit_mul64(be, inst),
        And => |be, inst| BlockEmitter::emit_and(be, inst),
        Eor => |be, inst| BlockEmitter::emit_eor(be, inst),
        Or => |be, inst| BlockEmitter::emit_or(be, inst),
        Not => |be, inst| BlockEmitter::emit_not(be, inst),
        SignExtendWordToLong => |be, inst| BlockEmitter::emit_sign_extend_word_to_long(be, inst),
        SignExtendHalfToWord => |be, inst| BlockEmitter::emit_sign_extend_half_to_word(be, inst),
        SignExtendByteToWord => |be, inst| BlockEmitter::emit_sign_extend_byte_to_word(be, inst),
        ZeroExtendWordToLong => |be, inst| BlockEmitter::emit_zero_extend_word_to_long(be, inst),
        ZeroExtendHalfToWord => |be, inst| BlockEmitter::emit_zero_extend_half_to_word(be, inst),
        ZeroExtendByteToWord => |be, inst| BlockEmitter::emit_zero_extend_byte_to_word(be, inst),
        ByteReverseWord => |be, inst| BlockEmitter::emit_byte_reverse_word(be, inst),
        ByteReverseHalf => |be, inst| BlockEmitter::emit_byte_reverse_half(be, inst),
        ByteReverseDual => |be, inst| BlockEmitter::emit_byte_reverse_dual(be, inst),
        CountLeadingZeros => |be, inst| BlockEmitter::emit_count_leading_zeros(be, inst),
        SignedSaturatedAdd => |be, inst| BlockEmitter::emit_signed_saturated_add(be, inst),
        SignedSaturatedSub => |be, inst| BlockEmitter::emit_signed_saturated_sub(be, inst),
        UnsignedSaturation => |be, inst| BlockEmitter::emit_unsigned_saturation(be, inst),
        SignedSaturation => |be, inst| BlockEmitter::emit_signed_saturation(be, inst),
        PackedAddU8 => |be, inst| BlockEmitter::emit_packed_add_u8(be, inst),
        PackedAddS8 => |be, inst| BlockEmitter::emit_packed_add_s8(be, inst),
        PackedAddU16 => |be, inst| BlockEmitter::emit_packed_add_u16(be, inst),
        PackedAddS16 => |be, inst| BlockEmitter::emit_packed_add_s16(be, inst),
        PackedSubU8 => |be, inst| BlockEmitter::emit_packed_sub_u8(be, inst),
        PackedSubS8 => |be, inst| BlockEmitter::emit_packed_sub_s8(be, inst),
        PackedSubU16 => |be, inst| BlockEmitter::emit_packed_sub_u16(be, inst),
        PackedSubS16 => |be, inst| BlockEmitter::emit_packed_sub_s16(be, inst),
        PackedHalvingAddU8 => |be, inst| BlockEmitter::emit_packed_halving_add_u8(be, inst),
        PackedHalvingAddS8 => |be, inst| BlockEmitter::emit_packed_halving_add_s8(be, inst),
        PackedHalvingAddU16 => |be, inst| BlockEmitter::emit_packed_halving_add_u16(be, inst),
        PackedHalvingAddS16 => |be, inst| BlockEmitter::emit_packed_halving_add_s16(be, inst),
        PackedHalvingSubU8 => |be, inst| BlockEmitter::emit_packed_halving_sub_u8(be, inst),
        PackedHalvingSubS8 => |be, inst| BlockEmitter::emit_packed_halving_sub_s8(be, inst),
        PackedHalvingSubU16 => |be, inst| BlockEmitter::emit_packed_halving_sub_u16(be, inst),
        PackedHalvingSubS16 => |be, inst| BlockEmitter::emit_packed_halving_sub_s16(be, inst),
        PackedHalvingSubAddU16 => |be, inst| BlockEmitter::emit_packed_halving_sub_add_u16(be, inst),
        PackedHalvingSubAddS16 => |be, inst| BlockEmitter::emit_packed_halving_sub_add_s16(be, inst),
        PackedSaturatedAddU8 => |be, inst| BlockEmitter::emit_packed_saturated_add_u8(be, inst),
        PackedSaturatedAddS8 => |be, inst| BlockEmitter::emit_packed_saturated_add_s8(be, inst),
        PackedSaturatedAddU16 => |be, inst| BlockEmitter::emit_packed_saturated_add_u16(be, inst),
        PackedSaturatedAddS16 => |be, inst| BlockEmitter::emit_packed_saturated_add_s16(be, inst),
        PackedSaturatedSubU8 => |be, inst| BlockEmitter::emit_packed_saturated_sub_u8(be, inst),
        PackedSaturatedSubS8 => |be, inst| BlockEmitter::emit_packed_saturated_sub_s8(be, inst),
        PackedSaturatedSubU16 => |be, inst| BlockEmitter::emit_packed_saturated_sub_u16(be, inst),
        PackedSaturatedSubS16 => |be, inst| BlockEmitter::emit_packed_saturated_sub_s16(be, inst),
        PackedAbsDiffSumS8 => |be, inst| BlockEmitter::emit_packed_abs_diff_sum_s8(be, inst),
        TransferToFP32 => |be, inst| BlockEmitter::emit_transfer_to_fp32(be, inst),
        TransferToFP64 => |be, inst| BlockEmitter::emit_transfer_to_fp64(be, inst),
        TransferFromFP32 => |be, inst| BlockEmitter::emit_transfer_from_fp32(be, inst),
        TransferFromFP64 => |be, inst| BlockEmitter::emit_transfer_from_fp64(be, inst),
        FPAbs32 => |be, inst| BlockEmitter::emit_fp_abs32(be, inst),
        FPAbs64 => |be, inst| BlockEmitter::emit_fp_abs64(be, inst),
        FPNeg32 => |be, inst| BlockEmitter::emit_fp_neg32(be, inst),
        FPNeg64 => |be, inst| BlockEmitter::emit_fp_neg64(be, inst),
        FPAdd32 => |be, inst| BlockEmitter::emit_fp_add32(be, inst),
        FPAdd64 => |be, inst| BlockEmitter::emit_fp_add64(be, inst),
        FPSub32 => |be, inst| BlockEmitter::emit_fp_sub32(be, inst),
        FPSub64 => |be, inst| BlockEmitter::emit_fp_sub64(be, inst),
        FPMul32 => |be, inst| BlockEmitter::emit_fp_mul32(be, inst),
        FPMul64 => |be, inst| BlockEmitter::emit_fp_mul64(be, inst),
        FPDiv32 => |be, inst| BlockEmitter::emit_fp_div32(be, inst),
        FPDiv64 => |be, inst| BlockEmitter::emit_fp_div64(be, inst),
        FPSqrt32 => |be, inst| BlockEmitter::emit_fp_sqrt32(be, inst),
        FPSqrt64 => |be, inst| BlockEmitter::emit_fp_sqrt64(be, inst),
        FPCompare32 => |be, inst| BlockEmitter::emit_fp_compare32(be, inst),
        FPCompare64 => |be, inst| BlockEmitter::emit_fp_compare64(be, inst),
        FPSingleToDouble => |be, inst| BlockEmitter::emit_fp_single_to_double(be, inst),
        FPDoubleToSingle => |be, inst| BlockEmitter::emit_fp_double_to_single(be, inst),
        FPSingleToS32 => |be, inst| BlockEmitter::emit_fp_single_to_s32(be, inst),
        FPSingleToU32 => |be, inst| BlockEmitter::emit_fp_single_to_u32(be, inst),
        FPDoubleToS32 => |be, inst| BlockEmitter::emit_fp_double_to_s32(be, inst),
        FPDoubleToU32 => |be, inst| BlockEmitter::emit_fp_double_to_u32(be, inst),
        FPS32ToSingle => |be, inst| BlockEmitter::emit_fp_s32_to_single(be, inst),
        FPU32ToSingle => |be, inst| BlockEmitter::emit_fp_u32_to_single(be, inst),
        FPS32ToDouble => |be, inst| BlockEmitter::emit_fp_s32_to_double(be, inst),
        FPU32ToDouble => |be, inst| BlockEmitter::emit_fp_u32_to_double(be, inst),
        ClearExclusive => |be, inst| BlockEmitter::emit_clear_exclusive(be, inst),
        SetExclusive => |be, inst| BlockEmitter::emit_set_exclusive(be, inst),
        ReadMemory8 => |be, inst| BlockEmitter::emit_read_memory_8(be, inst),
        ReadMemory16 => |be, inst| BlockEmitter::emit_read_memory_16(be, inst),
        ReadMemory32 => |be, inst| BlockEmitter::emit_read_memory_32(be, inst),
        ReadMemory64 => |be, inst| BlockEmitter::emit_read_memory_64(be, inst),
        WriteMemory8 => |be, inst| BlockEmitter::emit_write_memory_8(be, inst),
        WriteMemory16 => |be, inst| BlockEmitter::emit_write_memory_16(be, inst),
        WriteMemory32 => |be, inst| BlockEmitter::emit_write_memory_32(be, inst),
        WriteMemory64 => |be, inst| BlockEmitter::emit_write_memory_64(be, inst),
        ExclusiveWriteMemory8 => |be, inst| BlockEmitter::emit_exclusive_write_memory_8(be, inst),
        ExclusiveWriteMemory16 => |be, inst| BlockEmitter::emit_exclusive_write_memory_16(be, inst),
        ExclusiveWriteMemory32 => |be, inst| BlockEmitter::emit_exclusive_write_memory_32(be, inst),
        ExclusiveWriteMemory64 => |be, inst| BlockEmitter::emit_exclusive_write_memory_64(be, inst),
        CoprocInternalOperation => |be, inst| BlockEmitter::emit_coproc_internal_operation(be, inst),
        CoprocSendOneWord => |be, inst| BlockEmitter::emit_coproc_send_one_word(be, inst),
        CoprocSendTwoWords => |be, inst| BlockEmitter::emit_coproc_send_two_words(be, inst),
        CoprocGetOneWord => |be, inst| BlockEmitter::emit_coproc_get_one_word(be, inst),
        CoprocGetTwoWords => |be, inst| BlockEmitter::emit_coproc_get_two_words(be, inst),
        CoprocLoadWords => |be, inst| BlockEmitter::emit_coproc_load_words(be, inst),
        CoprocStoreWords => |be, inst| BlockEmitter::emit_coproc_store_words(be, inst),
    }
}
