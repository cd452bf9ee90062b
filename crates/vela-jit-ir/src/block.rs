use vela_types::{Cond, ExtReg, Reg};

use crate::location::LocationDescriptor;
use crate::opcode::{Opcode, Type};

pub const MAX_ARGS: usize = 4;

/// Index of an instruction within its block. Doubles as the name of the
/// value that instruction defines.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct InstId(pub u32);

impl InstId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The fields of a coprocessor transfer, fixed at decode time.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct CoprocInfo {
    pub coproc: u8,
    /// The `*2` instruction form (CDP2/MCR2/...).
    pub two: bool,
    pub opc1: u8,
    pub opc2: u8,
    pub crd: u8,
    pub crn: u8,
    pub crm: u8,
    pub long_transfer: bool,
    pub option: Option<u8>,
}

/// An instruction argument: either a compile-time immediate or a reference
/// to the value defined by an earlier instruction.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Operand {
    Void,
    U1(bool),
    U8(u8),
    U32(u32),
    U64(u64),
    Reg(Reg),
    ExtReg(ExtReg),
    Coproc(CoprocInfo),
    Value(InstId),
}

impl Operand {
    pub fn is_immediate(self) -> bool {
        !matches!(self, Operand::Value(_))
    }

    pub fn imm_u1(self) -> bool {
        match self {
            Operand::U1(v) => v,
            other => panic!("expected U1 immediate, got {other:?}"),
        }
    }

    pub fn imm_u8(self) -> u8 {
        match self {
            Operand::U8(v) => v,
            other => panic!("expected U8 immediate, got {other:?}"),
        }
    }

    pub fn imm_u32(self) -> u32 {
        match self {
            Operand::U32(v) => v,
            other => panic!("expected U32 immediate, got {other:?}"),
        }
    }

    pub fn imm_u64(self) -> u64 {
        match self {
            Operand::U64(v) => v,
            other => panic!("expected U64 immediate, got {other:?}"),
        }
    }

    pub fn reg_ref(self) -> Reg {
        match self {
            Operand::Reg(r) => r,
            other => panic!("expected register reference, got {other:?}"),
        }
    }

    pub fn ext_reg_ref(self) -> ExtReg {
        match self {
            Operand::ExtReg(r) => r,
            other => panic!("expected extended register reference, got {other:?}"),
        }
    }

    pub fn coproc_info(self) -> CoprocInfo {
        match self {
            Operand::Coproc(info) => info,
            other => panic!("expected coprocessor info, got {other:?}"),
        }
    }

    pub fn value(self) -> Option<InstId> {
        match self {
            Operand::Value(id) => Some(id),
            _ => None,
        }
    }

    /// The static type of this operand, resolving value references through
    /// the defining instruction.
    pub fn ty(self, block: &IrBlock) -> Type {
        match self {
            Operand::Void => Type::Void,
            Operand::U1(_) => Type::U1,
            Operand::U8(_) => Type::U8,
            Operand::U32(_) => Type::U32,
            Operand::U64(_) => Type::U64,
            Operand::Reg(_) => Type::Reg,
            Operand::ExtReg(_) => Type::ExtReg,
            Operand::Coproc(_) => Type::Coproc,
            Operand::Value(id) => block.instr(id).opcode().result_type(),
        }
    }
}

/// One IR instruction.
#[derive(Clone, Debug)]
pub struct Instr {
    opcode: Opcode,
    args: [Operand; MAX_ARGS],
    /// Number of later instructions that read this instruction's value.
    use_count: u32,
    alive: bool,
}

impl Instr {
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn arg(&self, index: usize) -> Operand {
        self.args[index]
    }

    pub fn args(&self) -> &[Operand; MAX_ARGS] {
        &self.args
    }

    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

/// How a block ends.
#[derive(Clone, PartialEq, Debug)]
pub enum Terminator {
    /// Return to the dispatcher through the outer trampoline.
    ReturnToDispatch,
    /// Chain to `next` if cycles remain, else store PC and return.
    LinkBlock { next: LocationDescriptor },
    /// Chain to `next` unconditionally.
    LinkBlockFast { next: LocationDescriptor },
    /// Look the current location up in the return-stack buffer and jump to
    /// the cached host pointer on a hit.
    PopRsbHint,
    /// Store PC and hand this location to the interpreter fallback.
    Interpret { next: LocationDescriptor },
    /// Branch between two terminators on a guest condition.
    If {
        cond: Cond,
        pass: Box<Terminator>,
        fail: Box<Terminator>,
    },
    /// Return to the dispatcher if a halt was requested, else fall through.
    CheckHalt { fallthrough: Box<Terminator> },
}

/// A lowered guest basic block: instructions in program order plus a guard
/// condition and a terminator.
#[derive(Clone, Debug)]
pub struct IrBlock {
    location: LocationDescriptor,
    end_pc: u32,
    cond: Cond,
    cond_failed: Option<LocationDescriptor>,
    cond_failed_cycle_count: u64,
    cycle_count: u64,
    instrs: Vec<Instr>,
    terminator: Terminator,
}

impl IrBlock {
    pub fn new(location: LocationDescriptor) -> IrBlock {
        IrBlock {
            location,
            end_pc: location.pc(),
            cond: Cond::Al,
            cond_failed: None,
            cond_failed_cycle_count: 0,
            cycle_count: 0,
            instrs: Vec::new(),
            terminator: Terminator::ReturnToDispatch,
        }
    }

    pub fn location(&self) -> LocationDescriptor {
        self.location
    }

    /// First guest address past the last instruction this block was
    /// translated from; `[pc, end_pc)` is the invalidation span.
    pub fn end_pc(&self) -> u32 {
        self.end_pc
    }

    pub fn set_end_pc(&mut self, end_pc: u32) {
        self.end_pc = end_pc;
    }

    pub fn condition(&self) -> Cond {
        self.cond
    }

    pub fn cond_failed_location(&self) -> Option<LocationDescriptor> {
        self.cond_failed
    }

    pub fn cond_failed_cycle_count(&self) -> u64 {
        self.cond_failed_cycle_count
    }

    pub fn set_condition(
        &mut self,
        cond: Cond,
        failed_location: LocationDescriptor,
        failed_cycle_count: u64,
    ) {
        assert!(cond != Cond::Al, "an always-guard carries no failed edge");
        self.cond = cond;
        self.cond_failed = Some(failed_location);
        self.cond_failed_cycle_count = failed_cycle_count;
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn set_cycle_count(&mut self, cycles: u64) {
        self.cycle_count = cycles;
    }

    pub fn terminator(&self) -> &Terminator {
        &self.terminator
    }

    pub fn set_terminator(&mut self, terminator: Terminator) {
        self.terminator = terminator;
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = InstId> {
        (0..self.instrs.len() as u32).map(InstId)
    }

    pub fn instr(&self, id: InstId) -> &Instr {
        &self.instrs[id.index()]
    }

    /// Appends an instruction, wiring up use counts of its value arguments.
    ///
    /// Panics when an argument does not match the opcode's signature or
    /// references a dead or later instruction; those are frontend bugs.
    pub fn push(&mut self, opcode: Opcode, args: &[Operand]) -> InstId {
        let sig = opcode.arg_types();
        assert!(
            args.len() == sig.len(),
            "{opcode:?} takes {} arguments, got {}",
            sig.len(),
            args.len()
        );
        assert!(args.len() <= MAX_ARGS);

        let id = InstId(self.instrs.len() as u32);
        let mut packed = [Operand::Void; MAX_ARGS];
        for (i, (&arg, &expected)) in args.iter().zip(sig).enumerate() {
            if let Some(value) = arg.value() {
                assert!(
                    value.0 < id.0,
                    "{opcode:?} argument {i} references a later instruction"
                );
                assert!(
                    self.instrs[value.index()].alive,
                    "{opcode:?} argument {i} references an erased instruction"
                );
            }
            let actual = arg.ty(self);
            assert!(
                expected == Type::Opaque || actual == expected,
                "{opcode:?} argument {i}: expected {expected:?}, got {actual:?}"
            );
            packed[i] = arg;
        }

        for arg in &packed {
            if let Some(value) = arg.value() {
                self.instrs[value.index()].use_count += 1;
            }
        }
        self.instrs.push(Instr {
            opcode,
            args: packed,
            use_count: 0,
            alive: true,
        });
        id
    }

    /// Finds the live pseudo-operation of kind `opcode` attached to
    /// `parent`, if any.
    pub fn pseudo_op(&self, parent: InstId, opcode: Opcode) -> Option<InstId> {
        assert!(opcode.is_pseudo_operation());
        self.instrs
            .iter()
            .enumerate()
            .skip(parent.index() + 1)
            .find(|(_, inst)| {
                inst.alive && inst.opcode == opcode && inst.args[0] == Operand::Value(parent)
            })
            .map(|(i, _)| InstId(i as u32))
    }

    /// Removes an instruction from the block, releasing its argument uses.
    /// Later references to its value (if any) stay valid; the caller is
    /// expected to have bound the value elsewhere.
    pub fn erase(&mut self, id: InstId) {
        let args = self.instrs[id.index()].args;
        assert!(self.instrs[id.index()].alive, "double erase of {id:?}");
        self.instrs[id.index()].alive = false;
        self.instrs[id.index()].args = [Operand::Void; MAX_ARGS];
        for arg in args {
            if let Some(value) = arg.value() {
                self.instrs[value.index()].use_count -= 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_types::Fpscr;

    fn block() -> IrBlock {
        IrBlock::new(LocationDescriptor::new(0x100, 0, Fpscr::from_bits(0)))
    }

    #[test]
    fn push_tracks_uses() {
        let mut b = block();
        let a = b.push(Opcode::GetRegister, &[Operand::Reg(Reg::R1)]);
        let sum = b.push(
            Opcode::AddWithCarry,
            &[Operand::Value(a), Operand::U32(1), Operand::U1(false)],
        );
        b.push(Opcode::SetRegister, &[Operand::Reg(Reg::R0), Operand::Value(sum)]);

        assert_eq!(b.instr(a).use_count(), 1);
        assert_eq!(b.instr(sum).use_count(), 1);
        assert_eq!(b.instr(sum).opcode(), Opcode::AddWithCarry);
    }

    #[test]
    fn pseudo_op_lookup_and_erase() {
        let mut b = block();
        let a = b.push(Opcode::GetRegister, &[Operand::Reg(Reg::R1)]);
        let sum = b.push(
            Opcode::AddWithCarry,
            &[Operand::Value(a), Operand::U32(1), Operand::U1(false)],
        );
        let carry = b.push(Opcode::GetCarryFromOp, &[Operand::Value(sum)]);
        b.push(Opcode::SetCFlag, &[Operand::Value(carry)]);

        assert_eq!(b.pseudo_op(sum, Opcode::GetCarryFromOp), Some(carry));
        assert_eq!(b.pseudo_op(sum, Opcode::GetOverflowFromOp), None);
        assert_eq!(b.instr(sum).use_count(), 1);

        b.erase(carry);
        assert_eq!(b.pseudo_op(sum, Opcode::GetCarryFromOp), None);
        assert_eq!(b.instr(sum).use_count(), 0);
        assert!(!b.instr(carry).is_alive());
    }

    #[test]
    #[should_panic(expected = "expected U32")]
    fn push_rejects_mistyped_arguments() {
        let mut b = block();
        b.push(Opcode::SetRegister, &[Operand::Reg(Reg::R0), Operand::U8(1)]);
    }
}
