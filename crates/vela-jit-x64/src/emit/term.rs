//! Block guard conditions, cycle accounting and terminator lowering.

use iced_x86::code_asm::{eax, ebx, esi, rax, rbx, rcx, CodeLabel};

use vela_jit_ir::{LocationDescriptor, Terminator};
use vela_types::{cpsr, Cond};

use crate::abi::{state_byte, state_dword, state_qword, ABI_PARAMS, STATE};
use crate::cpu_state::{
    cycles_remaining_offset, fpscr_mode_offset, halt_requested_offset, reg_offset,
    rsb_codeptrs_offset, rsb_location_descriptors_offset, RSB_SIZE,
};
use crate::emit::BlockEmitter;
use crate::patch::PatchKind;
use crate::EmitError;

impl BlockEmitter<'_> {
    pub(crate) fn emit_add_cycles(&mut self, cycles: u64) -> Result<(), EmitError> {
        assert!(cycles < i32::MAX as u64, "cycle count out of range");
        self.asm
            .sub(state_qword(cycles_remaining_offset()), cycles as i32)?;
        Ok(())
    }

    /// Emits the test for `cond` against the CPSR flags, returning the
    /// label to take when the condition passes. Runs with no live values,
    /// so clobbering eax/ebx/esi is fine.
    fn emit_cond(&mut self, cond: Cond) -> Result<CodeLabel, EmitError> {
        let label = self.asm.create_label();

        self.asm.mov(eax, state_dword(crate::cpu_state::cpsr_offset()))?;

        match cond {
            Cond::Eq => {
                self.asm.test(eax, cpsr::Z_MASK)?;
                self.asm.jne(label)?;
            }
            Cond::Ne => {
                self.asm.test(eax, cpsr::Z_MASK)?;
                self.asm.je(label)?;
            }
            Cond::Cs => {
                self.asm.test(eax, cpsr::C_MASK)?;
                self.asm.jne(label)?;
            }
            Cond::Cc => {
                self.asm.test(eax, cpsr::C_MASK)?;
                self.asm.je(label)?;
            }
            Cond::Mi => {
                self.asm.test(eax, cpsr::N_MASK)?;
                self.asm.jne(label)?;
            }
            Cond::Pl => {
                self.asm.test(eax, cpsr::N_MASK)?;
                self.asm.je(label)?;
            }
            Cond::Vs => {
                self.asm.test(eax, cpsr::V_MASK)?;
                self.asm.jne(label)?;
            }
            Cond::Vc => {
                self.asm.test(eax, cpsr::V_MASK)?;
                self.asm.je(label)?;
            }
            Cond::Hi => {
                self.asm.and(eax, cpsr::Z_MASK | cpsr::C_MASK)?;
                self.asm.cmp(eax, cpsr::C_MASK)?;
                self.asm.je(label)?;
            }
            Cond::Ls => {
                self.asm.and(eax, cpsr::Z_MASK | cpsr::C_MASK)?;
                self.asm.cmp(eax, cpsr::C_MASK)?;
                self.asm.jne(label)?;
            }
            Cond::Ge => {
                self.asm.and(eax, cpsr::N_MASK | cpsr::V_MASK)?;
                self.asm.je(label)?;
                self.asm.cmp(eax, cpsr::N_MASK | cpsr::V_MASK)?;
                self.asm.je(label)?;
            }
            Cond::Lt => {
                let mut fail = self.asm.create_label();
                self.asm.and(eax, cpsr::N_MASK | cpsr::V_MASK)?;
                self.asm.je(fail)?;
                self.asm.cmp(eax, cpsr::N_MASK | cpsr::V_MASK)?;
                self.asm.jne(label)?;
                self.asm.set_label(&mut fail)?;
            }
            Cond::Gt => {
                // Z == 0 && N == V, reduced to one bit with shifts + xor.
                self.asm.mov(ebx, eax)?;
                self.asm.mov(esi, eax)?;
                self.asm.shr(ebx, cpsr::N_BIT)?;
                self.asm.shr(esi, cpsr::V_BIT)?;
                self.asm.shr(eax, cpsr::Z_BIT)?;
                self.asm.xor(ebx, esi)?;
                self.asm.or(ebx, eax)?;
                self.asm.test(ebx, 1u32)?;
                self.asm.je(label)?;
            }
            Cond::Le => {
                // Z == 1 || N != V
                self.asm.mov(ebx, eax)?;
                self.asm.mov(esi, eax)?;
                self.asm.shr(ebx, cpsr::N_BIT)?;
                self.asm.shr(esi, cpsr::V_BIT)?;
                self.asm.shr(eax, cpsr::Z_BIT)?;
                self.asm.xor(ebx, esi)?;
                self.asm.or(ebx, eax)?;
                self.asm.test(ebx, 1u32)?;
                self.asm.jne(label)?;
            }
            Cond::Al | Cond::Nv => panic!("condition {cond:?} is not a runtime guard"),
        }

        Ok(label)
    }

    /// If the block is predicated, fail over to the condition-failed
    /// location before any instruction runs.
    pub(crate) fn emit_cond_prelude(&mut self) -> Result<(), EmitError> {
        if self.block.condition() == Cond::Al {
            assert!(self.block.cond_failed_location().is_none());
            return Ok(());
        }
        let failed = self
            .block
            .cond_failed_location()
            .expect("a predicated block carries a fail-over location");

        let mut pass = self.emit_cond(self.block.condition())?;
        self.emit_add_cycles(self.block.cond_failed_cycle_count())?;
        self.emit_terminator(
            &Terminator::LinkBlock { next: failed },
            self.block.location(),
        )?;
        self.asm.set_label(&mut pass)?;
        Ok(())
    }

    pub(crate) fn emit_terminator(
        &mut self,
        terminator: &Terminator,
        initial_location: LocationDescriptor,
    ) -> Result<(), EmitError> {
        match terminator {
            Terminator::ReturnToDispatch => self.emit_term_return_to_dispatch(),
            Terminator::LinkBlock { next } => self.emit_term_link_block(*next, initial_location),
            Terminator::LinkBlockFast { next } => {
                self.emit_term_link_block_fast(*next, initial_location)
            }
            Terminator::PopRsbHint => self.emit_term_pop_rsb_hint(),
            Terminator::Interpret { next } => self.emit_term_interpret(*next, initial_location),
            Terminator::If { cond, pass, fail } => {
                let mut pass_label = self.emit_cond(*cond)?;
                self.emit_terminator(fail, initial_location)?;
                self.asm.set_label(&mut pass_label)?;
                self.emit_terminator(pass, initial_location)
            }
            Terminator::CheckHalt { fallthrough } => {
                let mut keep_going = self.asm.create_label();
                self.asm.cmp(state_byte(halt_requested_offset()), 0u32)?;
                self.asm.je(keep_going)?;
                self.jmp_abs(self.return_trampoline)?;
                self.asm.set_label(&mut keep_going)?;
                self.emit_terminator(fallthrough, initial_location)
            }
        }
    }

    fn emit_term_return_to_dispatch(&mut self) -> Result<(), EmitError> {
        self.jmp_abs(self.return_trampoline)
    }

    /// Brings the mode bits in line with the successor before leaving the
    /// block; the T/E bits are compiled into the code, not re-checked.
    fn emit_mode_transition(
        &mut self,
        next: LocationDescriptor,
        initial: LocationDescriptor,
    ) -> Result<(), EmitError> {
        if next.t_flag() != initial.t_flag() {
            if next.t_flag() {
                self.asm
                    .or(state_dword(crate::cpu_state::cpsr_offset()), cpsr::T_MASK)?;
            } else {
                self.asm
                    .and(state_dword(crate::cpu_state::cpsr_offset()), !cpsr::T_MASK)?;
            }
        }
        if next.e_flag() != initial.e_flag() {
            if next.e_flag() {
                self.asm
                    .or(state_dword(crate::cpu_state::cpsr_offset()), cpsr::E_MASK)?;
            } else {
                self.asm
                    .and(state_dword(crate::cpu_state::cpsr_offset()), !cpsr::E_MASK)?;
            }
        }
        Ok(())
    }

    fn emit_term_link_block(
        &mut self,
        next: LocationDescriptor,
        initial_location: LocationDescriptor,
    ) -> Result<(), EmitError> {
        self.emit_mode_transition(next, initial_location)?;

        // Chain only while cycles remain; otherwise store the successor PC
        // and hand control back to the dispatcher.
        self.asm.cmp(state_qword(cycles_remaining_offset()), 0u32)?;
        self.emit_patch_site(PatchKind::Jg, next.unique_hash())?;

        self.asm
            .mov(state_dword(reg_offset(vela_types::Reg::PC)), next.pc())?;
        self.jmp_abs(self.return_trampoline)?;
        Ok(())
    }

    fn emit_term_link_block_fast(
        &mut self,
        next: LocationDescriptor,
        initial_location: LocationDescriptor,
    ) -> Result<(), EmitError> {
        self.emit_mode_transition(next, initial_location)?;
        // The patch itself carries the uncompiled fallback (store PC, jump
        // to the dispatcher), so nothing follows it.
        self.emit_patch_site(PatchKind::Jmp, next.unique_hash())?;
        Ok(())
    }

    /// Rebuild the location descriptor the frontend pushed and scan the
    /// RSB for it; on a hit jump straight to the cached entrypoint.
    fn emit_term_pop_rsb_hint(&mut self) -> Result<(), EmitError> {
        // This packing has to match LocationDescriptor::unique_hash.
        self.asm.mov(ebx, state_dword(crate::cpu_state::cpsr_offset()))?;
        self.asm
            .mov(iced_x86::code_asm::ecx, state_dword(reg_offset(vela_types::Reg::PC)))?;
        self.asm.and(ebx, cpsr::T_MASK | cpsr::E_MASK)?;
        self.asm.shr(ebx, 2u32)?;
        self.asm.or(ebx, state_dword(fpscr_mode_offset()))?;
        self.asm.shl(rbx, 32u32)?;
        self.asm.or(rbx, rcx)?;

        self.asm.mov(rax, self.return_trampoline)?;
        for i in 0..RSB_SIZE {
            self.asm.cmp(
                rbx,
                state_qword(rsb_location_descriptors_offset() + 8 * i as i32),
            )?;
            self.asm
                .cmove(rax, state_qword(rsb_codeptrs_offset() + 8 * i as i32))?;
        }
        self.asm.jmp(rax)?;
        Ok(())
    }

    fn emit_term_interpret(
        &mut self,
        next: LocationDescriptor,
        initial_location: LocationDescriptor,
    ) -> Result<(), EmitError> {
        assert_eq!(
            next.t_flag(),
            initial_location.t_flag(),
            "interpreter fallback across a Thumb transition"
        );
        assert_eq!(
            next.e_flag(),
            initial_location.e_flag(),
            "interpreter fallback across an endianness transition"
        );

        self.asm.mov(ABI_PARAMS[0].r32(), next.pc())?;
        self.asm.mov(ABI_PARAMS[1].r64(), self.cb.user_arg as u64)?;
        self.asm
            .mov(state_dword(reg_offset(vela_types::Reg::PC)), ABI_PARAMS[0].r32())?;
        self.switch_mxcsr_on_exit()?;
        self.call_abs(self.cb.interpreter_fallback as usize as u64)?;
        // MXCSR is already the host's; skip the switch in the epilogue.
        self.jmp_abs(self.return_trampoline_no_mxcsr)?;
        Ok(())
    }
}

// STATE is pinned across every terminator; nothing above may allocate it.
const _: () = assert!(STATE.0 == 15);
