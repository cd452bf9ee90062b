//! x86-64 backend for the vela ARM recompiler.
//!
//! Takes IR blocks produced by the frontend and turns them into host
//! machine code operating on a [`CpuState`]. Compiled blocks live in a
//! translation cache keyed by location descriptor, chain to each other
//! through fixed-size patchable jumps, and return to the dispatcher via
//! the shared trampolines in the code buffer.

pub mod abi;
mod buffer;
mod cache;
mod coproc;
mod cpu_state;
mod emit;
mod patch;
mod regalloc;
#[cfg(windows)]
mod unwind;

use iced_x86::{BlockEncoderOptions, IcedError};

use vela_jit_ir::{AddressRange, InstId, IrBlock, LocationDescriptor};

pub use buffer::DEFAULT_CAPACITY;
pub use cache::BlockDescriptor;
pub use coproc::{
    CoprocAction, CoprocCallback, CoprocCallbackFn, Coprocessor, UserCallbacks, COPROC_SLOTS,
    PAGE_BITS, PAGE_SIZE, PAGE_TABLE_ENTRIES,
};
pub use cpu_state::{
    CpuState, MXCSR_DEFAULT, RESERVATION_GRANULE_MASK, RSB_SIZE, SPILL_SLOT_COUNT,
};
pub use patch::{PatchKind, PATCH_JG_SIZE, PATCH_JMP_SIZE, PATCH_MOV_RCX_SIZE};

use abi::HostFeatures;
use buffer::CodeBuffer;
use cache::{PatchSite, TranslationCache};
use emit::BlockEmitter;

/// Errors surfaced while emitting a block. Contract violations between
/// frontend and backend (malformed IR, allocator misuse) abort instead.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("assembler error: {0}")]
    Assembler(#[from] IcedError),
    #[error("code buffer exhausted: need {needed} bytes, {available} available")]
    BufferExhausted { needed: usize, available: usize },
    #[error("failed to map code buffer: {0}")]
    Map(String),
}

pub struct X64Backend {
    buffer: CodeBuffer,
    cache: TranslationCache,
    callbacks: UserCallbacks,
    coprocessors: [Option<Box<dyn Coprocessor>>; COPROC_SLOTS],
    features: HostFeatures,
}

impl X64Backend {
    pub fn new(callbacks: UserCallbacks) -> Result<X64Backend, EmitError> {
        Self::with_capacity(callbacks, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(
        callbacks: UserCallbacks,
        capacity: usize,
    ) -> Result<X64Backend, EmitError> {
        Ok(X64Backend {
            buffer: CodeBuffer::new(capacity)?,
            cache: TranslationCache::default(),
            callbacks,
            coprocessors: std::array::from_fn(|_| None),
            features: HostFeatures::detect(),
        })
    }

    pub fn set_coprocessor(&mut self, slot: usize, coprocessor: Box<dyn Coprocessor>) {
        self.coprocessors[slot] = Some(coprocessor);
    }

    /// Compiles one IR block and registers it in the translation cache.
    ///
    /// Consumed pseudo-operations are erased from `block` as a side
    /// effect. Compiling a location that is already cached (without
    /// invalidating it first) is a contract violation.
    pub fn compile(&mut self, block: &mut IrBlock) -> Result<BlockDescriptor, EmitError> {
        self.buffer.align16();
        let base = self.buffer.pos();

        let mut emitter = BlockEmitter::new(
            block,
            &self.callbacks,
            &mut self.coprocessors,
            &self.cache,
            self.features,
            self.buffer.return_from_run_code(),
            self.buffer.return_from_run_code_no_mxcsr(),
        )?;

        emitter.emit_cond_prelude()?;

        for i in 0..emitter.block.len() as u32 {
            let id = InstId(i);
            if !emitter.block.instr(id).is_alive() {
                continue;
            }
            emitter.ra.start_instruction(i);
            emitter.emit_instruction(id)?;
            emitter.ra.end_of_alloc_scope();
        }
        emitter.ra.assert_no_more_uses();

        emitter.emit_add_cycles(emitter.block.cycle_count())?;
        let terminator = emitter.block.terminator().clone();
        let location = emitter.block.location();
        emitter.emit_terminator(&terminator, location)?;
        emitter.asm.int3()?;

        let result = emitter
            .asm
            .assemble_options(base, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)?;
        let pending = std::mem::take(&mut emitter.pending_patches);
        drop(emitter);

        let code = &result.inner.code_buffer;
        let placed_at = self.buffer.append(code)?;
        assert_eq!(placed_at, base);

        // Write the initial content of this block's own patch sites, then
        // register them for later retargeting.
        for p in &pending {
            let site = result.label_ip(&p.label)?;
            let target = self.cache.block(p.target_hash).map(|b| b.entrypoint);
            self.write_patch(p.kind, site, p.target_hash, target);
            self.cache.register_patch(
                p.target_hash,
                PatchSite {
                    kind: p.kind,
                    addr: site,
                },
            );
        }

        // Any site already aimed at this location now points at real code.
        let hash = block.location().unique_hash();
        self.retarget_patches(hash, Some(base));

        let descriptor = BlockDescriptor {
            entrypoint: base,
            size: code.len(),
            start_location: block.location(),
            end_pc: block.end_pc(),
        };
        self.cache.insert_block(hash, descriptor);
        tracing::trace!(
            location = ?block.location(),
            entrypoint = base,
            size = code.len(),
            "compiled block"
        );
        Ok(descriptor)
    }

    pub fn get_basic_block(&self, location: LocationDescriptor) -> Option<BlockDescriptor> {
        self.cache.block(location.unique_hash()).copied()
    }

    /// Drops every compiled block whose guest range overlaps `range` and
    /// diverts the patch sites that pointed at them back to the
    /// dispatcher, in place and without changing their size.
    pub fn invalidate_cache_range(&mut self, range: AddressRange) {
        if range == AddressRange::Full {
            self.clear_cache();
            return;
        }
        let removed = self.cache.take_overlapping(range);
        for &hash in &removed {
            self.retarget_patches(hash, None);
        }
        tracing::debug!(blocks = removed.len(), ?range, "invalidated cache range");
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.buffer.reset();
        tracing::debug!("cleared translation cache");
    }

    fn write_patch(&self, kind: PatchKind, site: u64, target_hash: u64, target: Option<u64>) {
        let trampoline = self.buffer.return_from_run_code();
        match kind {
            PatchKind::Jg => {
                self.buffer.write_at(site, &patch::encode_jg(site, target));
            }
            PatchKind::Jmp => {
                let target_pc = (target_hash & 0xFFFF_FFFF) as u32;
                self.buffer
                    .write_at(site, &patch::encode_jmp(site, target, target_pc, trampoline));
            }
            PatchKind::MovRcx => {
                self.buffer
                    .write_at(site, &patch::encode_mov_rcx(target.unwrap_or(trampoline)));
            }
        }
    }

    fn retarget_patches(&self, target_hash: u64, target: Option<u64>) {
        for site in self.cache.patches(target_hash) {
            self.write_patch(site.kind, site.addr, target_hash, target);
        }
    }

    /// Entry pointer and size of the code mapping, for host unwinder
    /// registration by the embedder.
    pub fn code_view(&self) -> (*const u8, usize) {
        self.buffer.code_view()
    }

    /// Host address every diverted patch site falls back to.
    pub fn return_trampoline(&self) -> u64 {
        self.buffer.return_from_run_code()
    }

    /// The emitted bytes of a compiled block, for inspection.
    pub fn block_code(&self, descriptor: &BlockDescriptor) -> &[u8] {
        self.buffer.slice(descriptor.entrypoint, descriptor.size)
    }

    /// Raw bytes at a host code address, for inspection of patch sites.
    pub fn code_at(&self, addr: u64, len: usize) -> &[u8] {
        self.buffer.slice(addr, len)
    }

    /// Patch sites currently registered against `location`.
    pub fn patch_sites(&self, location: LocationDescriptor) -> Vec<(PatchKind, u64)> {
        self.cache
            .patches(location.unique_hash())
            .iter()
            .map(|s| (s.kind, s.addr))
            .collect()
    }

    /// Runs compiled code starting at `descriptor`'s entrypoint until it
    /// returns to the dispatcher.
    ///
    /// # Safety
    /// The descriptor must refer to a block still present in this
    /// backend's cache, and `state` must be the layout the block was
    /// compiled against.
    pub unsafe fn run(&self, state: &mut CpuState, descriptor: &BlockDescriptor) {
        self.buffer.run(state, descriptor.entrypoint);
    }
}
