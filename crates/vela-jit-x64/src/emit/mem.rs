//! Memory, supervisor-call and coprocessor emitters.
//!
//! With a page table configured, loads and stores walk it inline: the
//! guest address indexes an array of host page pointers, and only a null
//! entry falls back to the user callback. Exclusive stores additionally
//! gate on the monitor flag and the reservation granule.

use iced_x86::code_asm::{byte_ptr, dword_ptr, qword_ptr, word_ptr};

use vela_jit_ir::{CoprocInfo, InstId};

use crate::abi::{state_byte, state_dword, ABI_PARAMS, ABI_RETURN};
use crate::coproc::{CoprocAction, CoprocCallback, PAGE_BITS};
use crate::cpu_state::{exclusive_address_offset, exclusive_state_offset, RESERVATION_GRANULE_MASK};
use crate::emit::BlockEmitter;
use crate::regalloc::Argument;
use crate::EmitError;

impl BlockEmitter<'_> {
    pub(super) fn emit_call_supervisor(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        self.ra
            .host_call(&mut self.asm, None, [Some(args[0]), None, None, None])?;

        self.switch_mxcsr_on_exit()?;
        self.call_abs(self.cb.call_svc as usize as u64)?;
        self.switch_mxcsr_on_entry()?;
        Ok(())
    }

    pub(super) fn emit_get_fpscr(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.ra
            .host_call(&mut self.asm, Some(inst), [None, None, None, None])?;
        self.asm
            .mov(ABI_PARAMS[0].r64(), crate::abi::STATE.r64())?;

        self.switch_mxcsr_on_exit()?;
        self.call_abs(crate::cpu_state::get_fpscr_impl as usize as u64)?;
        self.switch_mxcsr_on_entry()?;
        Ok(())
    }

    pub(super) fn emit_set_fpscr(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        self.ra
            .host_call(&mut self.asm, None, [Some(args[0]), None, None, None])?;
        self.asm
            .mov(ABI_PARAMS[1].r64(), crate::abi::STATE.r64())?;

        self.switch_mxcsr_on_exit()?;
        self.call_abs(crate::cpu_state::set_fpscr_impl as usize as u64)?;
        self.switch_mxcsr_on_entry()?;
        Ok(())
    }

    fn emit_read_memory(
        &mut self,
        inst: InstId,
        bit_size: u32,
        callback: u64,
    ) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        self.ra
            .host_call(&mut self.asm, Some(inst), [Some(args[0]), None, None, None])?;

        let Some(page_table) = self.cb.page_table else {
            self.call_abs(callback)?;
            return Ok(());
        };

        let result = ABI_RETURN;
        let vaddr = ABI_PARAMS[0];
        let page_index = ABI_PARAMS[2];
        let page_offset = ABI_PARAMS[3];

        let mut fallback = self.asm.create_label();
        let mut end = self.asm.create_label();

        self.asm.mov(result.r64(), page_table.as_ptr() as u64)?;
        self.asm.mov(page_index.r32(), vaddr.r32())?;
        self.asm.shr(page_index.r32(), PAGE_BITS)?;
        self.asm
            .mov(result.r64(), qword_ptr(result.r64() + page_index.r64() * 8))?;
        self.asm.test(result.r64(), result.r64())?;
        self.asm.je(fallback)?;
        self.asm.mov(page_offset.r32(), vaddr.r32())?;
        self.asm.and(page_offset.r32(), 0xFFFu32)?;
        match bit_size {
            8 => self
                .asm
                .movzx(result.r64(), byte_ptr(result.r64() + page_offset.r64()))?,
            16 => self
                .asm
                .movzx(result.r64(), word_ptr(result.r64() + page_offset.r64()))?,
            32 => self
                .asm
                .mov(result.r32(), dword_ptr(result.r64() + page_offset.r64()))?,
            64 => self
                .asm
                .mov(result.r64(), qword_ptr(result.r64() + page_offset.r64()))?,
            _ => unreachable!("invalid access width"),
        }
        self.asm.jmp(end)?;
        self.asm.set_label(&mut fallback)?;
        self.call_abs(callback)?;
        self.asm.set_label(&mut end)?;
        Ok(())
    }

    fn emit_write_memory(
        &mut self,
        inst: InstId,
        bit_size: u32,
        callback: u64,
    ) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        self.ra.host_call(
            &mut self.asm,
            None,
            [Some(args[0]), Some(args[1]), None, None],
        )?;

        let Some(page_table) = self.cb.page_table else {
            self.call_abs(callback)?;
            return Ok(());
        };

        let base = ABI_RETURN;
        let vaddr = ABI_PARAMS[0];
        let value = ABI_PARAMS[1];
        let page_index = ABI_PARAMS[2];
        let page_offset = ABI_PARAMS[3];

        let mut fallback = self.asm.create_label();
        let mut end = self.asm.create_label();

        self.asm.mov(base.r64(), page_table.as_ptr() as u64)?;
        self.asm.mov(page_index.r32(), vaddr.r32())?;
        self.asm.shr(page_index.r32(), PAGE_BITS)?;
        self.asm
            .mov(base.r64(), qword_ptr(base.r64() + page_index.r64() * 8))?;
        self.asm.test(base.r64(), base.r64())?;
        self.asm.je(fallback)?;
        self.asm.mov(page_offset.r32(), vaddr.r32())?;
        self.asm.and(page_offset.r32(), 0xFFFu32)?;
        match bit_size {
            8 => self
                .asm
                .mov(byte_ptr(base.r64() + page_offset.r64()), value.r8())?,
            16 => self
                .asm
                .mov(word_ptr(base.r64() + page_offset.r64()), value.r16())?,
            32 => self
                .asm
                .mov(dword_ptr(base.r64() + page_offset.r64()), value.r32())?,
            64 => self
                .asm
                .mov(qword_ptr(base.r64() + page_offset.r64()), value.r64())?,
            _ => unreachable!("invalid access width"),
        }
        self.asm.jmp(end)?;
        self.asm.set_label(&mut fallback)?;
        self.call_abs(callback)?;
        self.asm.set_label(&mut end)?;
        Ok(())
    }

    pub(super) fn emit_read_memory_8(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_read_memory(inst, 8, self.cb.read_memory_8 as usize as u64)
    }

    pub(super) fn emit_read_memory_16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_read_memory(inst, 16, self.cb.read_memory_16 as usize as u64)
    }

    pub(super) fn emit_read_memory_32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_read_memory(inst, 32, self.cb.read_memory_32 as usize as u64)
    }

    pub(super) fn emit_read_memory_64(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_read_memory(inst, 64, self.cb.read_memory_64 as usize as u64)
    }

    pub(super) fn emit_write_memory_8(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_write_memory(inst, 8, self.cb.write_memory_8 as usize as u64)
    }

    pub(super) fn emit_write_memory_16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_write_memory(inst, 16, self.cb.write_memory_16 as usize as u64)
    }

    pub(super) fn emit_write_memory_32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_write_memory(inst, 32, self.cb.write_memory_32 as usize as u64)
    }

    pub(super) fn emit_write_memory_64(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_write_memory(inst, 64, self.cb.write_memory_64 as usize as u64)
    }

    /// An exclusive store performs the write only while the monitor holds
    /// a reservation for the same granule; the result is 0 on success and
    /// 1 on failure, as the guest's STREX expects.
    fn emit_exclusive_write(
        &mut self,
        inst: InstId,
        callback: u64,
        prepend_high_word: bool,
    ) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        if prepend_high_word {
            self.ra.host_call(
                &mut self.asm,
                None,
                [Some(args[0]), Some(args[1]), Some(args[2]), None],
            )?;
        } else {
            self.ra.host_call(
                &mut self.asm,
                None,
                [Some(args[0]), Some(args[1]), None, None],
            )?;
        }
        let passed = self.ra.scratch_gpr(&mut self.asm)?;
        let tmp = ABI_RETURN;

        let mut end = self.asm.create_label();

        self.asm.mov(passed.r32(), 1u32)?;
        self.asm.cmp(state_byte(exclusive_state_offset()), 0u32)?;
        self.asm.je(end)?;
        self.asm.mov(tmp.r32(), ABI_PARAMS[0].r32())?;
        self.asm
            .xor(tmp.r32(), state_dword(exclusive_address_offset()))?;
        self.asm.test(tmp.r32(), RESERVATION_GRANULE_MASK)?;
        self.asm.jne(end)?;
        self.asm.mov(state_byte(exclusive_state_offset()), 0u32)?;
        if prepend_high_word {
            self.asm.mov(ABI_PARAMS[1].r32(), ABI_PARAMS[1].r32())?;
            self.asm.shl(ABI_PARAMS[2].r64(), 32u32)?;
            self.asm.or(ABI_PARAMS[1].r64(), ABI_PARAMS[2].r64())?;
        }
        self.call_abs(callback)?;
        self.asm.xor(passed.r32(), passed.r32())?;
        self.asm.set_label(&mut end)?;

        self.ra.def_gpr(inst, passed);
        Ok(())
    }

    pub(super) fn emit_exclusive_write_memory_8(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_exclusive_write(inst, self.cb.write_memory_8 as usize as u64, false)
    }

    pub(super) fn emit_exclusive_write_memory_16(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_exclusive_write(inst, self.cb.write_memory_16 as usize as u64, false)
    }

    pub(super) fn emit_exclusive_write_memory_32(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_exclusive_write(inst, self.cb.write_memory_32 as usize as u64, false)
    }

    pub(super) fn emit_exclusive_write_memory_64(&mut self, inst: InstId) -> Result<(), EmitError> {
        self.emit_exclusive_write(inst, self.cb.write_memory_64 as usize as u64, true)
    }

    // --- coprocessors ---

    /// The canned trap for an absent coprocessor or a refused operation.
    fn emit_coproc_exception(&mut self) -> Result<(), EmitError> {
        self.asm.ud2()?;
        Ok(())
    }

    fn call_coproc_callback(
        &mut self,
        result: Option<InstId>,
        callback: CoprocCallback,
        arg0: Option<Argument>,
        arg1: Option<Argument>,
    ) -> Result<(), EmitError> {
        self.ra
            .host_call(&mut self.asm, result, [None, arg0, arg1, None])?;
        self.asm
            .mov(ABI_PARAMS[0].r64(), callback.user_arg as u64)?;

        self.switch_mxcsr_on_exit()?;
        self.call_abs(callback.function as usize as u64)?;
        self.switch_mxcsr_on_entry()?;
        Ok(())
    }

    fn coproc_action(
        &mut self,
        info: CoprocInfo,
        select: impl FnOnce(&mut dyn crate::coproc::Coprocessor, CoprocInfo) -> CoprocAction,
    ) -> Option<CoprocAction> {
        let coproc = self.coprocs[info.coproc as usize].as_deref_mut()?;
        Some(select(coproc, info))
    }

    pub(super) fn emit_coproc_internal_operation(&mut self, inst: InstId) -> Result<(), EmitError> {
        let info = self.block.instr(inst).arg(0).coproc_info();
        let action = self.coproc_action(info, |c, i| {
            c.compile_internal_operation(i.two, i.opc1, i.crd, i.crn, i.crm, i.opc2)
        });

        match action {
            None | Some(CoprocAction::Raise) => self.emit_coproc_exception(),
            Some(CoprocAction::Call(callback)) => {
                self.call_coproc_callback(None, callback, None, None)
            }
            Some(_) => panic!("internal coprocessor operations transfer no words"),
        }
    }

    pub(super) fn emit_coproc_send_one_word(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let info = args[0].coproc_info();
        let action = self.coproc_action(info, |c, i| {
            c.compile_send_one_word(i.two, i.opc1, i.crn, i.crm, i.opc2)
        });

        match action {
            None | Some(CoprocAction::Raise) => self.emit_coproc_exception(),
            Some(CoprocAction::Call(callback)) => {
                self.call_coproc_callback(None, callback, Some(args[1]), None)
            }
            Some(CoprocAction::OneWord(destination)) => {
                let word = self.ra.use_gpr(&mut self.asm, args[1])?;
                let addr = self.ra.scratch_gpr(&mut self.asm)?;
                self.asm.mov(addr.r64(), destination as u64)?;
                self.asm.mov(dword_ptr(addr.r64()), word.r32())?;
                Ok(())
            }
            Some(CoprocAction::TwoWords(_)) => {
                panic!("one-word coprocessor transfer returned two slots")
            }
        }
    }

    pub(super) fn emit_coproc_send_two_words(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let info = args[0].coproc_info();
        let action = self.coproc_action(info, |c, i| c.compile_send_two_words(i.two, i.opc1, i.crm));

        match action {
            None | Some(CoprocAction::Raise) => self.emit_coproc_exception(),
            Some(CoprocAction::Call(callback)) => {
                self.call_coproc_callback(None, callback, Some(args[1]), Some(args[2]))
            }
            Some(CoprocAction::TwoWords(destinations)) => {
                let word1 = self.ra.use_gpr(&mut self.asm, args[1])?;
                let word2 = self.ra.use_gpr(&mut self.asm, args[2])?;
                let addr = self.ra.scratch_gpr(&mut self.asm)?;
                self.asm.mov(addr.r64(), destinations[0] as u64)?;
                self.asm.mov(dword_ptr(addr.r64()), word1.r32())?;
                self.asm.mov(addr.r64(), destinations[1] as u64)?;
                self.asm.mov(dword_ptr(addr.r64()), word2.r32())?;
                Ok(())
            }
            Some(CoprocAction::OneWord(_)) => {
                panic!("two-word coprocessor transfer returned one slot")
            }
        }
    }

    pub(super) fn emit_coproc_get_one_word(&mut self, inst: InstId) -> Result<(), EmitError> {
        let info = self.block.instr(inst).arg(0).coproc_info();
        let action = self.coproc_action(info, |c, i| {
            c.compile_get_one_word(i.two, i.opc1, i.crn, i.crm, i.opc2)
        });

        match action {
            None | Some(CoprocAction::Raise) => self.emit_coproc_exception(),
            Some(CoprocAction::Call(callback)) => {
                self.call_coproc_callback(Some(inst), callback, None, None)
            }
            Some(CoprocAction::OneWord(source)) => {
                let word = self.ra.scratch_gpr(&mut self.asm)?;
                let addr = self.ra.scratch_gpr(&mut self.asm)?;
                self.asm.mov(addr.r64(), source as u64)?;
                self.asm.mov(word.r32(), dword_ptr(addr.r64()))?;
                self.ra.def_gpr(inst, word);
                Ok(())
            }
            Some(CoprocAction::TwoWords(_)) => {
                panic!("one-word coprocessor transfer returned two slots")
            }
        }
    }

    pub(super) fn emit_coproc_get_two_words(&mut self, inst: InstId) -> Result<(), EmitError> {
        let info = self.block.instr(inst).arg(0).coproc_info();
        let action = self.coproc_action(info, |c, i| c.compile_get_two_words(i.two, i.opc1, i.crm));

        match action {
            None | Some(CoprocAction::Raise) => self.emit_coproc_exception(),
            Some(CoprocAction::Call(callback)) => {
                self.call_coproc_callback(Some(inst), callback, None, None)
            }
            Some(CoprocAction::TwoWords(sources)) => {
                let result = self.ra.scratch_gpr(&mut self.asm)?;
                let addr = self.ra.scratch_gpr(&mut self.asm)?;
                let tmp = self.ra.scratch_gpr(&mut self.asm)?;
                self.asm.mov(addr.r64(), sources[1] as u64)?;
                self.asm.mov(result.r32(), dword_ptr(addr.r64()))?;
                self.asm.shl(result.r64(), 32u32)?;
                self.asm.mov(addr.r64(), sources[0] as u64)?;
                self.asm.mov(tmp.r32(), dword_ptr(addr.r64()))?;
                self.asm.or(result.r64(), tmp.r64())?;
                self.ra.def_gpr(inst, result);
                Ok(())
            }
            Some(CoprocAction::OneWord(_)) => {
                panic!("two-word coprocessor transfer returned one slot")
            }
        }
    }

    pub(super) fn emit_coproc_load_words(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let info = args[0].coproc_info();
        let action = self.coproc_action(info, |c, i| {
            c.compile_load_words(i.two, i.long_transfer, i.crd, i.option)
        });

        match action {
            None | Some(CoprocAction::Raise) => self.emit_coproc_exception(),
            Some(CoprocAction::Call(callback)) => {
                self.call_coproc_callback(None, callback, Some(args[1]), None)
            }
            Some(_) => panic!("coprocessor load must compile to a callback"),
        }
    }

    pub(super) fn emit_coproc_store_words(&mut self, inst: InstId) -> Result<(), EmitError> {
        let args = self.ra.args(self.block, inst);
        let info = args[0].coproc_info();
        let action = self.coproc_action(info, |c, i| {
            c.compile_store_words(i.two, i.long_transfer, i.crd, i.option)
        });

        match action {
            None | Some(CoprocAction::Raise) => self.emit_coproc_exception(),
            Some(CoprocAction::Call(callback)) => {
                self.call_coproc_callback(None, callback, Some(args[1]), None)
            }
            Some(_) => panic!("coprocessor store must compile to a callback"),
        }
    }
}
