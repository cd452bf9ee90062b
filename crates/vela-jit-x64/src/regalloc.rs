//! The per-block register allocator.
//!
//! Tracks which host location (GPR, XMM or guest-state spill slot) holds
//! each live IR value, services the emitters' operand queries, and retires
//! values as their last use passes. All state is per-block; nothing
//! survives a block boundary.

use iced_x86::code_asm::CodeAssembler;

use vela_jit_ir::{InstId, IrBlock, Operand, MAX_ARGS};
use vela_types::{ExtReg, Reg};

use crate::abi::{
    state_qword, HostGpr, HostXmm, ABI_PARAMS, ABI_RETURN, ALLOCATABLE_GPRS, ALLOCATABLE_XMMS,
    CALLER_SAVED_GPRS, CALLER_SAVED_XMMS,
};
use crate::cpu_state::{spill_offset, SPILL_SLOT_COUNT};
use crate::EmitError;

/// Where a value currently lives.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum HostLoc {
    Gpr(HostGpr),
    Xmm(HostXmm),
    Spill(u8),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum RegKind {
    Gpr,
    Xmm,
}

/// One argument of the instruction being emitted.
#[derive(Clone, Copy)]
pub(crate) struct Argument(pub Operand);

impl Argument {
    pub fn is_immediate(self) -> bool {
        self.0.is_immediate()
    }

    pub fn imm_u1(self) -> bool {
        self.0.imm_u1()
    }

    pub fn imm_u8(self) -> u8 {
        self.0.imm_u8()
    }

    pub fn imm_u32(self) -> u32 {
        self.0.imm_u32()
    }

    pub fn imm_u64(self) -> u64 {
        self.0.imm_u64()
    }

    pub fn reg_ref(self) -> Reg {
        self.0.reg_ref()
    }

    pub fn ext_reg_ref(self) -> ExtReg {
        self.0.ext_reg_ref()
    }

    pub fn coproc_info(self) -> vela_jit_ir::CoprocInfo {
        self.0.coproc_info()
    }

    /// Any immediate, widened to 64 bits.
    fn imm_bits(self) -> u64 {
        match self.0 {
            Operand::U1(v) => v as u64,
            Operand::U8(v) => v as u64,
            Operand::U32(v) => v as u64,
            Operand::U64(v) => v,
            other => panic!("not a loadable immediate: {other:?}"),
        }
    }

    fn value(self) -> Option<InstId> {
        self.0.value()
    }
}

struct ValueInfo {
    remaining: u32,
    consumers: Vec<u32>,
    loc: Option<HostLoc>,
}

#[derive(Default, Clone)]
struct LocInfo {
    values: Vec<InstId>,
    locked: bool,
}

pub(crate) struct RegAlloc {
    values: Vec<ValueInfo>,
    alive: Vec<bool>,
    gprs: Vec<LocInfo>,
    xmms: Vec<LocInfo>,
    spills: Vec<Vec<InstId>>,
    consumed: Vec<InstId>,
    current: u32,
}

impl RegAlloc {
    pub fn new(block: &IrBlock) -> RegAlloc {
        let mut values: Vec<ValueInfo> = (0..block.len())
            .map(|i| ValueInfo {
                remaining: block.instr(InstId(i as u32)).use_count(),
                consumers: Vec::new(),
                loc: None,
            })
            .collect();
        for id in block.ids() {
            let inst = block.instr(id);
            if !inst.is_alive() {
                continue;
            }
            for arg in inst.args() {
                if let Operand::Value(v) = arg {
                    values[v.index()].consumers.push(id.0);
                }
            }
        }
        RegAlloc {
            values,
            alive: (0..block.len())
                .map(|i| block.instr(InstId(i as u32)).is_alive())
                .collect(),
            gprs: vec![LocInfo::default(); 16],
            xmms: vec![LocInfo::default(); 16],
            spills: vec![Vec::new(); SPILL_SLOT_COUNT],
            consumed: Vec::new(),
            current: 0,
        }
    }

    pub fn start_instruction(&mut self, index: u32) {
        self.current = index;
    }

    /// Fetches the instruction's arguments, accounting one use of every
    /// value argument. The uses are released at `end_of_alloc_scope`
    /// whether or not the emitter materializes them; call once per
    /// instruction.
    pub fn args(&mut self, block: &IrBlock, id: InstId) -> [Argument; MAX_ARGS] {
        let inst = block.instr(id);
        for arg in inst.args() {
            if let Operand::Value(v) = arg {
                self.consumed.push(*v);
            }
        }
        [
            Argument(inst.arg(0)),
            Argument(inst.arg(1)),
            Argument(inst.arg(2)),
            Argument(inst.arg(3)),
        ]
    }

    // --- location bookkeeping ---

    fn loc_values(&self, loc: HostLoc) -> &[InstId] {
        match loc {
            HostLoc::Gpr(g) => &self.gprs[g.0 as usize].values,
            HostLoc::Xmm(x) => &self.xmms[x.0 as usize].values,
            HostLoc::Spill(s) => &self.spills[s as usize],
        }
    }

    fn detach_values(&mut self, loc: HostLoc) -> Vec<InstId> {
        let taken = match loc {
            HostLoc::Gpr(g) => std::mem::take(&mut self.gprs[g.0 as usize].values),
            HostLoc::Xmm(x) => std::mem::take(&mut self.xmms[x.0 as usize].values),
            HostLoc::Spill(s) => std::mem::take(&mut self.spills[s as usize]),
        };
        for v in &taken {
            self.values[v.index()].loc = None;
        }
        taken
    }

    fn attach_values(&mut self, loc: HostLoc, values: Vec<InstId>) {
        for v in &values {
            self.values[v.index()].loc = Some(loc);
        }
        match loc {
            HostLoc::Gpr(g) => self.gprs[g.0 as usize].values.extend(values),
            HostLoc::Xmm(x) => self.xmms[x.0 as usize].values.extend(values),
            HostLoc::Spill(s) => self.spills[s as usize].extend(values),
        }
    }

    fn reg_info_mut(&mut self, loc: HostLoc) -> &mut LocInfo {
        match loc {
            HostLoc::Gpr(g) => &mut self.gprs[g.0 as usize],
            HostLoc::Xmm(x) => &mut self.xmms[x.0 as usize],
            HostLoc::Spill(_) => panic!("spill slots carry no lock state"),
        }
    }

    fn lock(&mut self, loc: HostLoc) {
        self.reg_info_mut(loc).locked = true;
    }

    fn emit_move(
        asm: &mut CodeAssembler,
        to: HostLoc,
        from: HostLoc,
    ) -> Result<(), EmitError> {
        match (to, from) {
            (HostLoc::Gpr(a), HostLoc::Gpr(b)) => asm.mov(a.r64(), b.r64())?,
            (HostLoc::Xmm(a), HostLoc::Xmm(b)) => asm.movaps(a.xmm(), b.xmm())?,
            (HostLoc::Gpr(a), HostLoc::Xmm(b)) => asm.movq(a.r64(), b.xmm())?,
            (HostLoc::Xmm(a), HostLoc::Gpr(b)) => asm.movq(a.xmm(), b.r64())?,
            (HostLoc::Spill(s), HostLoc::Gpr(b)) => {
                asm.mov(state_qword(spill_offset(s as usize)), b.r64())?
            }
            (HostLoc::Gpr(a), HostLoc::Spill(s)) => {
                asm.mov(a.r64(), state_qword(spill_offset(s as usize)))?
            }
            (HostLoc::Spill(s), HostLoc::Xmm(b)) => {
                asm.movq(state_qword(spill_offset(s as usize)), b.xmm())?
            }
            (HostLoc::Xmm(a), HostLoc::Spill(s)) => {
                asm.movq(a.xmm(), state_qword(spill_offset(s as usize)))?
            }
            (HostLoc::Spill(_), HostLoc::Spill(_)) => {
                panic!("spill-to-spill moves are never needed")
            }
        }
        Ok(())
    }

    fn next_use(&self, value: InstId) -> u32 {
        self.values[value.index()]
            .consumers
            .iter()
            .copied()
            .find(|&c| c > self.current && self.alive[c as usize])
            .unwrap_or(u32::MAX)
    }

    fn free_spill_slot(&self) -> u8 {
        self.spills
            .iter()
            .position(Vec::is_empty)
            .expect("out of spill slots") as u8
    }

    /// Moves every value out of `loc` into a spill slot (or drops dead
    /// values outright).
    fn spill_reg(&mut self, asm: &mut CodeAssembler, loc: HostLoc) -> Result<(), EmitError> {
        let live = self
            .loc_values(loc)
            .iter()
            .any(|v| self.values[v.index()].remaining > 0);
        if !live {
            self.detach_values(loc);
            return Ok(());
        }
        let slot = self.free_spill_slot();
        Self::emit_move(asm, HostLoc::Spill(slot), loc)?;
        let values = self.detach_values(loc);
        self.attach_values(HostLoc::Spill(slot), values);
        Ok(())
    }

    fn alloc_reg(
        &mut self,
        asm: &mut CodeAssembler,
        kind: RegKind,
    ) -> Result<HostLoc, EmitError> {
        let candidates: Vec<HostLoc> = match kind {
            RegKind::Gpr => ALLOCATABLE_GPRS.iter().map(|&g| HostLoc::Gpr(g)).collect(),
            RegKind::Xmm => ALLOCATABLE_XMMS.iter().map(|&x| HostLoc::Xmm(x)).collect(),
        };

        for &loc in &candidates {
            let info = match loc {
                HostLoc::Gpr(g) => &self.gprs[g.0 as usize],
                HostLoc::Xmm(x) => &self.xmms[x.0 as usize],
                HostLoc::Spill(_) => unreachable!(),
            };
            if !info.locked && info.values.is_empty() {
                return Ok(loc);
            }
        }

        // Evict the residency whose next use lies furthest away.
        let mut best: Option<(HostLoc, u32)> = None;
        for &loc in &candidates {
            let info = match loc {
                HostLoc::Gpr(g) => &self.gprs[g.0 as usize],
                HostLoc::Xmm(x) => &self.xmms[x.0 as usize],
                HostLoc::Spill(_) => unreachable!(),
            };
            if info.locked {
                continue;
            }
            let score = info
                .values
                .iter()
                .map(|&v| self.next_use(v))
                .min()
                .unwrap_or(u32::MAX);
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((loc, score));
            }
        }
        let (loc, _) = best.expect("all host registers are locked");
        self.spill_reg(asm, loc)?;
        Ok(loc)
    }

    /// Clears a specific register, relocating any live residency.
    fn evacuate(&mut self, asm: &mut CodeAssembler, loc: HostLoc) -> Result<(), EmitError> {
        let occupied = !self.loc_values(loc).is_empty();
        assert!(
            !self.reg_info_mut(loc).locked,
            "pinned register {loc:?} is already in use"
        );
        if occupied {
            self.spill_reg(asm, loc)?;
        }
        Ok(())
    }

    // --- emitter-facing queries ---

    fn use_impl(
        &mut self,
        asm: &mut CodeAssembler,
        arg: Argument,
        kind: RegKind,
        scratch: bool,
        pinned: Option<HostLoc>,
    ) -> Result<HostLoc, EmitError> {
        if let Some(p) = pinned {
            if self.loc_values(p).first().copied() != arg.value() || arg.value().is_none() {
                self.evacuate(asm, p)?;
            }
        }

        let Some(v) = arg.value() else {
            // Immediate: materialize into a register the caller may use
            // freely (never published as a value residency).
            let target = match pinned {
                Some(p) => p,
                None => self.alloc_reg(asm, kind)?,
            };
            match target {
                HostLoc::Gpr(g) => {
                    let imm = arg.imm_bits();
                    if imm == 0 {
                        asm.xor(g.r32(), g.r32())?;
                    } else {
                        asm.mov(g.r64(), imm)?;
                    }
                }
                HostLoc::Xmm(x) => {
                    let tmp = self.scratch_gpr(asm)?;
                    asm.mov(tmp.r64(), arg.imm_bits())?;
                    asm.movq(x.xmm(), tmp.r64())?;
                }
                HostLoc::Spill(_) => unreachable!(),
            }
            self.lock(target);
            return Ok(target);
        };

        let cur = self.values[v.index()]
            .loc
            .unwrap_or_else(|| panic!("use of value {v:?} with no residency"));

        // A register already claimed this scope (for example a count
        // pinned in CL) can be read through, but a scratch request must
        // get its own copy.
        let cur_locked = match cur {
            HostLoc::Gpr(g) => self.gprs[g.0 as usize].locked,
            HostLoc::Xmm(x) => self.xmms[x.0 as usize].locked,
            HostLoc::Spill(_) => false,
        };

        let in_place = !(scratch && cur_locked)
            && match (cur, kind, pinned) {
                (_, _, Some(p)) => cur == p,
                (HostLoc::Gpr(_), RegKind::Gpr, None) => true,
                (HostLoc::Xmm(_), RegKind::Xmm, None) => true,
                _ => false,
            };

        let target = if in_place {
            cur
        } else {
            let target = match pinned {
                Some(p) => p,
                None => self.alloc_reg(asm, kind)?,
            };
            Self::emit_move(asm, target, cur)?;
            if matches!(cur, HostLoc::Spill(_)) && !scratch {
                // Reloads migrate the residency out of the slot.
                let values = self.detach_values(cur);
                self.attach_values(target, values);
            } else if !matches!(cur, HostLoc::Spill(_)) {
                let values = self.detach_values(cur);
                self.attach_values(target, values);
            }
            target
        };

        if scratch {
            let needs_preserving = self.values[v.index()].remaining > 1
                || self.loc_values(target).iter().any(|&o| {
                    o != v && self.values[o.index()].remaining > 0
                });
            if matches!(cur, HostLoc::Spill(_)) && !in_place {
                // Values still live in the slot; the register is a copy.
            } else if needs_preserving {
                let slot = self.free_spill_slot();
                Self::emit_move(asm, HostLoc::Spill(slot), target)?;
                let values = self.detach_values(target);
                self.attach_values(HostLoc::Spill(slot), values);
            } else {
                self.detach_values(target);
            }
        }
        self.lock(target);
        Ok(target)
    }

    pub fn use_gpr(
        &mut self,
        asm: &mut CodeAssembler,
        arg: Argument,
    ) -> Result<HostGpr, EmitError> {
        match self.use_impl(asm, arg, RegKind::Gpr, false, None)? {
            HostLoc::Gpr(g) => Ok(g),
            _ => unreachable!(),
        }
    }

    pub fn use_scratch_gpr(
        &mut self,
        asm: &mut CodeAssembler,
        arg: Argument,
    ) -> Result<HostGpr, EmitError> {
        match self.use_impl(asm, arg, RegKind::Gpr, true, None)? {
            HostLoc::Gpr(g) => Ok(g),
            _ => unreachable!(),
        }
    }

    pub fn use_gpr_at(
        &mut self,
        asm: &mut CodeAssembler,
        arg: Argument,
        reg: HostGpr,
    ) -> Result<(), EmitError> {
        self.use_impl(asm, arg, RegKind::Gpr, false, Some(HostLoc::Gpr(reg)))?;
        Ok(())
    }

    pub fn use_scratch_gpr_at(
        &mut self,
        asm: &mut CodeAssembler,
        arg: Argument,
        reg: HostGpr,
    ) -> Result<(), EmitError> {
        self.use_impl(asm, arg, RegKind::Gpr, true, Some(HostLoc::Gpr(reg)))?;
        Ok(())
    }

    pub fn use_xmm(
        &mut self,
        asm: &mut CodeAssembler,
        arg: Argument,
    ) -> Result<HostXmm, EmitError> {
        match self.use_impl(asm, arg, RegKind::Xmm, false, None)? {
            HostLoc::Xmm(x) => Ok(x),
            _ => unreachable!(),
        }
    }

    pub fn use_scratch_xmm(
        &mut self,
        asm: &mut CodeAssembler,
        arg: Argument,
    ) -> Result<HostXmm, EmitError> {
        match self.use_impl(asm, arg, RegKind::Xmm, true, None)? {
            HostLoc::Xmm(x) => Ok(x),
            _ => unreachable!(),
        }
    }

    pub fn scratch_gpr(&mut self, asm: &mut CodeAssembler) -> Result<HostGpr, EmitError> {
        let loc = self.alloc_reg(asm, RegKind::Gpr)?;
        self.lock(loc);
        match loc {
            HostLoc::Gpr(g) => Ok(g),
            _ => unreachable!(),
        }
    }

    pub fn scratch_gpr_at(
        &mut self,
        asm: &mut CodeAssembler,
        reg: HostGpr,
    ) -> Result<(), EmitError> {
        self.evacuate(asm, HostLoc::Gpr(reg))?;
        self.lock(HostLoc::Gpr(reg));
        Ok(())
    }

    pub fn scratch_xmm(&mut self, asm: &mut CodeAssembler) -> Result<HostXmm, EmitError> {
        let loc = self.alloc_reg(asm, RegKind::Xmm)?;
        self.lock(loc);
        match loc {
            HostLoc::Xmm(x) => Ok(x),
            _ => unreachable!(),
        }
    }

    /// Binds `reg` as the result location of `inst`.
    pub fn def_gpr(&mut self, inst: InstId, reg: HostGpr) {
        self.def(inst, HostLoc::Gpr(reg));
    }

    pub fn def_xmm(&mut self, inst: InstId, reg: HostXmm) {
        self.def(inst, HostLoc::Xmm(reg));
    }

    fn def(&mut self, inst: InstId, loc: HostLoc) {
        self.detach_values(loc);
        self.reg_info_mut(loc).locked = true;
        self.attach_values(loc, vec![inst]);
    }

    /// Aliases `inst` to wherever `arg` already lives (materializing
    /// immediates first).
    pub fn def_from_arg(
        &mut self,
        asm: &mut CodeAssembler,
        inst: InstId,
        arg: Argument,
    ) -> Result<(), EmitError> {
        match arg.value() {
            None => {
                let g = self.scratch_gpr(asm)?;
                let imm = arg.imm_bits();
                if imm == 0 {
                    asm.xor(g.r32(), g.r32())?;
                } else {
                    asm.mov(g.r64(), imm)?;
                }
                self.def(inst, HostLoc::Gpr(g));
            }
            Some(v) => {
                let loc = self.values[v.index()]
                    .loc
                    .unwrap_or_else(|| panic!("alias of value {v:?} with no residency"));
                self.values[inst.index()].loc = Some(loc);
                match loc {
                    HostLoc::Gpr(g) => self.gprs[g.0 as usize].values.push(inst),
                    HostLoc::Xmm(x) => self.xmms[x.0 as usize].values.push(inst),
                    HostLoc::Spill(s) => self.spills[s as usize].push(inst),
                }
                if !matches!(loc, HostLoc::Spill(_)) {
                    self.lock(loc);
                }
            }
        }
        Ok(())
    }

    /// Marshals arguments into ABI registers, saves caller-clobbered
    /// residencies and reserves the return register for `result`.
    /// `args[i]` lands in parameter slot `i`.
    pub fn host_call(
        &mut self,
        asm: &mut CodeAssembler,
        result: Option<InstId>,
        args: [Option<Argument>; 4],
    ) -> Result<(), EmitError> {
        for (i, arg) in args.iter().enumerate() {
            if let Some(arg) = arg {
                self.use_scratch_gpr_at(asm, *arg, ABI_PARAMS[i])?;
            }
        }
        self.scratch_gpr_at(asm, ABI_RETURN)?;

        // Evict and reserve everything the callee may clobber. Scratch
        // registers handed out after this point are callee-saved, so they
        // survive the call; emitters also address the spare parameter
        // registers directly (page-table walks, user-argument loads).
        for &g in CALLER_SAVED_GPRS {
            let loc = HostLoc::Gpr(g);
            if !self.reg_info_mut(loc).locked {
                if !self.loc_values(loc).is_empty() {
                    self.spill_reg(asm, loc)?;
                }
                self.lock(loc);
            }
        }
        for &x in CALLER_SAVED_XMMS {
            let loc = HostLoc::Xmm(x);
            if !self.reg_info_mut(loc).locked {
                if !self.loc_values(loc).is_empty() {
                    self.spill_reg(asm, loc)?;
                }
                self.lock(loc);
            }
        }

        if let Some(inst) = result {
            self.def(inst, HostLoc::Gpr(ABI_RETURN));
        }
        Ok(())
    }

    /// Releases uses consumed by the instruction just emitted and frees
    /// newly-dead values.
    pub fn end_of_alloc_scope(&mut self) {
        for v in std::mem::take(&mut self.consumed) {
            let info = &mut self.values[v.index()];
            assert!(info.remaining > 0, "over-consumed value {v:?}");
            info.remaining -= 1;
        }

        for i in 0..self.values.len() {
            if self.values[i].remaining == 0 {
                if let Some(loc) = self.values[i].loc.take() {
                    let id = InstId(i as u32);
                    match loc {
                        HostLoc::Gpr(g) => self.gprs[g.0 as usize].values.retain(|&v| v != id),
                        HostLoc::Xmm(x) => self.xmms[x.0 as usize].values.retain(|&v| v != id),
                        HostLoc::Spill(s) => self.spills[s as usize].retain(|&v| v != id),
                    }
                }
            }
        }

        for info in self.gprs.iter_mut().chain(self.xmms.iter_mut()) {
            info.locked = false;
        }
    }

    /// An erased instruction no longer consumes its arguments and no
    /// longer counts as a future use.
    pub fn notify_erased(&mut self, id: InstId, args: [Operand; MAX_ARGS]) {
        self.alive[id.index()] = false;
        for arg in args {
            if let Operand::Value(v) = arg {
                let info = &mut self.values[v.index()];
                assert!(info.remaining > 0);
                info.remaining -= 1;
            }
        }
    }

    /// Block-end invariant: every value has been retired.
    pub fn assert_no_more_uses(&self) {
        for (i, info) in self.gprs.iter().enumerate() {
            assert!(
                info.values.is_empty(),
                "gpr {i} still holds {:?} at block end",
                info.values
            );
        }
        for (i, info) in self.xmms.iter().enumerate() {
            assert!(
                info.values.is_empty(),
                "xmm {i} still holds {:?} at block end",
                info.values
            );
        }
        for (i, slot) in self.spills.iter().enumerate() {
            assert!(
                slot.is_empty(),
                "spill slot {i} still holds {slot:?} at block end"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_jit_ir::{IrBuilder, LocationDescriptor, Opcode};
    use vela_types::Fpscr;

    fn asm() -> CodeAssembler {
        CodeAssembler::new(64).unwrap()
    }

    fn sample_block() -> IrBlock {
        let mut b = IrBuilder::new(LocationDescriptor::new(0, 0, Fpscr::from_bits(0)));
        let a = b.get_register(Reg::R0); // 0
        let c = b.get_register(Reg::R1); // 1
        let sum = b.add_with_carry(a, c, Operand::U1(false)); // 2
        b.set_register(Reg::R2, sum); // 3
        b.set_register(Reg::R3, c); // 4: second use of c, far away
        b.finish()
    }

    #[test]
    fn values_retire_after_last_use() {
        let block = sample_block();
        let mut ra = RegAlloc::new(&block);
        let mut a = asm();

        ra.start_instruction(0);
        let r = ra.scratch_gpr(&mut a).unwrap();
        ra.def_gpr(InstId(0), r);
        ra.end_of_alloc_scope();

        ra.start_instruction(1);
        let r = ra.scratch_gpr(&mut a).unwrap();
        ra.def_gpr(InstId(1), r);
        ra.end_of_alloc_scope();

        ra.start_instruction(2);
        let args = ra.args(&block, InstId(2));
        let result = ra.use_scratch_gpr(&mut a, args[0]).unwrap();
        let _rhs = ra.use_gpr(&mut a, args[1]).unwrap();
        ra.def_gpr(InstId(2), result);
        ra.end_of_alloc_scope();

        ra.start_instruction(3);
        let args = ra.args(&block, InstId(3));
        let _v = ra.use_gpr(&mut a, args[1]).unwrap();
        ra.end_of_alloc_scope();

        ra.start_instruction(4);
        let args = ra.args(&block, InstId(4));
        let _v = ra.use_gpr(&mut a, args[1]).unwrap();
        ra.end_of_alloc_scope();

        ra.assert_no_more_uses();
    }

    #[test]
    fn scratch_use_preserves_multi_use_values() {
        let block = sample_block();
        let mut ra = RegAlloc::new(&block);
        let mut a = asm();

        for i in 0..2u32 {
            ra.start_instruction(i);
            let r = ra.scratch_gpr(&mut a).unwrap();
            ra.def_gpr(InstId(i), r);
            ra.end_of_alloc_scope();
        }

        // `c` (inst 1) has a use at inst 4; taking it as scratch here must
        // leave a live copy behind in a spill slot.
        ra.start_instruction(2);
        let args = ra.args(&block, InstId(2));
        let result = ra.use_scratch_gpr(&mut a, args[0]).unwrap();
        let _c = ra.use_scratch_gpr(&mut a, args[1]).unwrap();
        ra.def_gpr(InstId(2), result);
        ra.end_of_alloc_scope();

        assert!(matches!(ra.values[1].loc, Some(HostLoc::Spill(_))));

        ra.start_instruction(3);
        let args = ra.args(&block, InstId(3));
        let _sum = ra.use_gpr(&mut a, args[1]).unwrap();
        ra.end_of_alloc_scope();

        // The reload at the last use migrates `c` back into a register
        // before it retires.
        ra.start_instruction(4);
        let args = ra.args(&block, InstId(4));
        let _again = ra.use_gpr(&mut a, args[1]).unwrap();
        ra.end_of_alloc_scope();
        ra.assert_no_more_uses();
    }

    #[test]
    fn eviction_picks_the_furthest_next_use() {
        let mut b = IrBuilder::new(LocationDescriptor::new(0, 0, Fpscr::from_bits(0)));
        let mut vals = Vec::new();
        // 14 defs fill every allocatable GPR; the 15th forces an eviction.
        for i in 0..15 {
            vals.push(b.get_register(Reg::from_index(i % 16)));
        }
        // Consume val0 soon and val1 last: val1 is the eviction victim.
        b.set_register(Reg::R0, vals[0]);
        for (i, v) in vals.iter().enumerate().skip(2) {
            b.set_register(Reg::from_index(i), *v);
        }
        b.set_register(Reg::R1, vals[1]);
        let block = b.finish();

        let mut ra = RegAlloc::new(&block);
        let mut a = asm();
        let mut locs = Vec::new();
        for i in 0..14u32 {
            ra.start_instruction(i);
            let r = ra.scratch_gpr(&mut a).unwrap();
            ra.def_gpr(InstId(i), r);
            ra.end_of_alloc_scope();
            locs.push(r);
        }

        ra.start_instruction(14);
        let r = ra.scratch_gpr(&mut a).unwrap();
        ra.def_gpr(InstId(14), r);
        ra.end_of_alloc_scope();

        // val0 (used at inst 15) must still be in a register; val1 (used at
        // inst 16, the furthest) must have been spilled.
        assert!(matches!(ra.values[0].loc, Some(HostLoc::Gpr(_))));
        assert!(matches!(ra.values[1].loc, Some(HostLoc::Spill(_))));
    }
}
