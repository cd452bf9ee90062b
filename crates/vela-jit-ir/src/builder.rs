use vela_types::{Cond, ExtReg, Reg};

use crate::block::{IrBlock, Operand, Terminator};
use crate::location::LocationDescriptor;
use crate::opcode::{Opcode, Type};

/// Convenience layer for constructing well-formed [`IrBlock`]s.
///
/// The frontend drives this while decoding; backend tests use it to write
/// blocks by hand. Value-producing helpers return the [`Operand`] naming
/// the new value.
pub struct IrBuilder {
    block: IrBlock,
}

impl IrBuilder {
    pub fn new(location: LocationDescriptor) -> IrBuilder {
        IrBuilder {
            block: IrBlock::new(location),
        }
    }

    pub fn location(&self) -> LocationDescriptor {
        self.block.location()
    }

    /// Appends any instruction. The typed helpers below are preferred where
    /// one exists.
    pub fn inst(&mut self, opcode: Opcode, args: &[Operand]) -> Operand {
        let id = self.block.push(opcode, args);
        if opcode.result_type() == Type::Void {
            Operand::Void
        } else {
            Operand::Value(id)
        }
    }

    fn value(&mut self, opcode: Opcode, args: &[Operand]) -> Operand {
        Operand::Value(self.block.push(opcode, args))
    }

    // --- guest state ---

    pub fn get_register(&mut self, reg: Reg) -> Operand {
        self.value(Opcode::GetRegister, &[Operand::Reg(reg)])
    }

    pub fn set_register(&mut self, reg: Reg, value: Operand) {
        self.block
            .push(Opcode::SetRegister, &[Operand::Reg(reg), value]);
    }

    pub fn get_ext_register(&mut self, reg: ExtReg) -> Operand {
        let op = if reg.is_single() {
            Opcode::GetExtendedRegister32
        } else {
            Opcode::GetExtendedRegister64
        };
        self.value(op, &[Operand::ExtReg(reg)])
    }

    pub fn set_ext_register(&mut self, reg: ExtReg, value: Operand) {
        let op = if reg.is_single() {
            Opcode::SetExtendedRegister32
        } else {
            Opcode::SetExtendedRegister64
        };
        self.block.push(op, &[Operand::ExtReg(reg), value]);
    }

    pub fn get_cpsr(&mut self) -> Operand {
        self.value(Opcode::GetCpsr, &[])
    }

    pub fn set_cpsr(&mut self, value: Operand) {
        self.block.push(Opcode::SetCpsr, &[value]);
    }

    pub fn set_n_flag(&mut self, value: Operand) {
        self.block.push(Opcode::SetNFlag, &[value]);
    }

    pub fn set_z_flag(&mut self, value: Operand) {
        self.block.push(Opcode::SetZFlag, &[value]);
    }

    pub fn set_c_flag(&mut self, value: Operand) {
        self.block.push(Opcode::SetCFlag, &[value]);
    }

    pub fn set_v_flag(&mut self, value: Operand) {
        self.block.push(Opcode::SetVFlag, &[value]);
    }

    pub fn get_c_flag(&mut self) -> Operand {
        self.value(Opcode::GetCFlag, &[])
    }

    pub fn or_q_flag(&mut self, value: Operand) {
        self.block.push(Opcode::OrQFlag, &[value]);
    }

    pub fn get_ge_flags(&mut self) -> Operand {
        self.value(Opcode::GetGEFlags, &[])
    }

    pub fn set_ge_flags(&mut self, value: Operand) {
        self.block.push(Opcode::SetGEFlags, &[value]);
    }

    pub fn bx_write_pc(&mut self, value: Operand) {
        self.block.push(Opcode::BXWritePC, &[value]);
    }

    pub fn call_supervisor(&mut self, swi: Operand) {
        self.block.push(Opcode::CallSupervisor, &[swi]);
    }

    pub fn push_rsb(&mut self, target: LocationDescriptor) {
        self.block
            .push(Opcode::PushRSB, &[Operand::U64(target.unique_hash())]);
    }

    // --- pseudo-operations ---

    pub fn carry_from(&mut self, op: Operand) -> Operand {
        self.value(Opcode::GetCarryFromOp, &[op])
    }

    pub fn overflow_from(&mut self, op: Operand) -> Operand {
        self.value(Opcode::GetOverflowFromOp, &[op])
    }

    pub fn ge_from(&mut self, op: Operand) -> Operand {
        self.value(Opcode::GetGEFromOp, &[op])
    }

    // --- arithmetic ---

    pub fn add_with_carry(&mut self, a: Operand, b: Operand, carry: Operand) -> Operand {
        self.value(Opcode::AddWithCarry, &[a, b, carry])
    }

    pub fn sub_with_carry(&mut self, a: Operand, b: Operand, carry: Operand) -> Operand {
        self.value(Opcode::SubWithCarry, &[a, b, carry])
    }

    pub fn mul(&mut self, a: Operand, b: Operand) -> Operand {
        self.value(Opcode::Mul, &[a, b])
    }

    pub fn and(&mut self, a: Operand, b: Operand) -> Operand {
        self.value(Opcode::And, &[a, b])
    }

    pub fn eor(&mut self, a: Operand, b: Operand) -> Operand {
        self.value(Opcode::Eor, &[a, b])
    }

    pub fn or(&mut self, a: Operand, b: Operand) -> Operand {
        self.value(Opcode::Or, &[a, b])
    }

    pub fn not(&mut self, a: Operand) -> Operand {
        self.value(Opcode::Not, &[a])
    }

    pub fn most_significant_bit(&mut self, a: Operand) -> Operand {
        self.value(Opcode::MostSignificantBit, &[a])
    }

    pub fn is_zero(&mut self, a: Operand) -> Operand {
        self.value(Opcode::IsZero, &[a])
    }

    pub fn count_leading_zeros(&mut self, a: Operand) -> Operand {
        self.value(Opcode::CountLeadingZeros, &[a])
    }

    // --- shifts ---

    pub fn logical_shift_left(&mut self, a: Operand, shift: Operand, carry: Operand) -> Operand {
        self.value(Opcode::LogicalShiftLeft, &[a, shift, carry])
    }

    pub fn logical_shift_right(&mut self, a: Operand, shift: Operand, carry: Operand) -> Operand {
        self.value(Opcode::LogicalShiftRight, &[a, shift, carry])
    }

    pub fn arithmetic_shift_right(
        &mut self,
        a: Operand,
        shift: Operand,
        carry: Operand,
    ) -> Operand {
        self.value(Opcode::ArithmeticShiftRight, &[a, shift, carry])
    }

    pub fn rotate_right(&mut self, a: Operand, shift: Operand, carry: Operand) -> Operand {
        self.value(Opcode::RotateRight, &[a, shift, carry])
    }

    pub fn rotate_right_extended(&mut self, a: Operand, carry: Operand) -> Operand {
        self.value(Opcode::RotateRightExtended, &[a, carry])
    }

    // --- saturation ---

    pub fn signed_saturated_add(&mut self, a: Operand, b: Operand) -> Operand {
        self.value(Opcode::SignedSaturatedAdd, &[a, b])
    }

    pub fn signed_saturated_sub(&mut self, a: Operand, b: Operand) -> Operand {
        self.value(Opcode::SignedSaturatedSub, &[a, b])
    }

    pub fn unsigned_saturation(&mut self, a: Operand, bit_size: u8) -> Operand {
        assert!(bit_size <= 31);
        self.value(Opcode::UnsignedSaturation, &[a, Operand::U8(bit_size)])
    }

    pub fn signed_saturation(&mut self, a: Operand, bit_size: u8) -> Operand {
        assert!((1..=32).contains(&bit_size));
        self.value(Opcode::SignedSaturation, &[a, Operand::U8(bit_size)])
    }

    // --- memory ---

    pub fn read_memory_8(&mut self, addr: Operand) -> Operand {
        self.value(Opcode::ReadMemory8, &[addr])
    }

    pub fn read_memory_16(&mut self, addr: Operand) -> Operand {
        self.value(Opcode::ReadMemory16, &[addr])
    }

    pub fn read_memory_32(&mut self, addr: Operand) -> Operand {
        self.value(Opcode::ReadMemory32, &[addr])
    }

    pub fn read_memory_64(&mut self, addr: Operand) -> Operand {
        self.value(Opcode::ReadMemory64, &[addr])
    }

    pub fn write_memory_32(&mut self, addr: Operand, value: Operand) {
        self.block.push(Opcode::WriteMemory32, &[addr, value]);
    }

    pub fn set_exclusive(&mut self, addr: Operand, size: u8) {
        self.block
            .push(Opcode::SetExclusive, &[addr, Operand::U8(size)]);
    }

    pub fn clear_exclusive(&mut self) {
        self.block.push(Opcode::ClearExclusive, &[]);
    }

    pub fn exclusive_write_memory_32(&mut self, addr: Operand, value: Operand) -> Operand {
        self.value(Opcode::ExclusiveWriteMemory32, &[addr, value])
    }

    // --- block shape ---

    pub fn set_condition(&mut self, cond: Cond, failed: LocationDescriptor, failed_cycles: u64) {
        self.block.set_condition(cond, failed, failed_cycles);
    }

    pub fn set_cycle_count(&mut self, cycles: u64) {
        self.block.set_cycle_count(cycles);
    }

    pub fn set_end_pc(&mut self, end_pc: u32) {
        self.block.set_end_pc(end_pc);
    }

    pub fn set_terminator(&mut self, terminator: Terminator) {
        self.block.set_terminator(terminator);
    }

    pub fn finish(self) -> IrBlock {
        self.block
    }
}
