//! The callback surface generated code calls out through, and the
//! coprocessor compile-action protocol.

use std::ffi::c_void;
use std::ptr::NonNull;

/// Guest page size assumed by the inline page-table walk.
pub const PAGE_BITS: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;
/// Entries in a page table covering the full 32-bit guest space.
pub const PAGE_TABLE_ENTRIES: usize = 1 << (32 - PAGE_BITS);

pub type ReadMemory8 = unsafe extern "C" fn(vaddr: u32) -> u8;
pub type ReadMemory16 = unsafe extern "C" fn(vaddr: u32) -> u16;
pub type ReadMemory32 = unsafe extern "C" fn(vaddr: u32) -> u32;
pub type ReadMemory64 = unsafe extern "C" fn(vaddr: u32) -> u64;
pub type WriteMemory8 = unsafe extern "C" fn(vaddr: u32, value: u8);
pub type WriteMemory16 = unsafe extern "C" fn(vaddr: u32, value: u16);
pub type WriteMemory32 = unsafe extern "C" fn(vaddr: u32, value: u32);
pub type WriteMemory64 = unsafe extern "C" fn(vaddr: u32, value: u64);
pub type CallSvc = unsafe extern "C" fn(swi: u32);
pub type InterpreterFallback = unsafe extern "C" fn(pc: u32, user_arg: *mut c_void);

/// Function pointers the backend compiles calls to.
///
/// When `page_table` is set, loads and stores first walk it inline and only
/// fall back to the callbacks for unmapped pages; otherwise every access is
/// a direct call.
#[derive(Clone, Copy)]
pub struct UserCallbacks {
    pub read_memory_8: ReadMemory8,
    pub read_memory_16: ReadMemory16,
    pub read_memory_32: ReadMemory32,
    pub read_memory_64: ReadMemory64,
    pub write_memory_8: WriteMemory8,
    pub write_memory_16: WriteMemory16,
    pub write_memory_32: WriteMemory32,
    pub write_memory_64: WriteMemory64,
    pub call_svc: CallSvc,
    pub interpreter_fallback: InterpreterFallback,
    pub user_arg: *mut c_void,
    /// Base of an array of [`PAGE_TABLE_ENTRIES`] host page pointers
    /// indexed by guest page number; null entries are unmapped.
    pub page_table: Option<NonNull<*mut u8>>,
}

pub type CoprocCallbackFn = unsafe extern "C" fn(user_arg: *mut c_void, arg0: u32, arg1: u32) -> u64;

/// A host function a coprocessor asks the backend to call.
#[derive(Clone, Copy)]
pub struct CoprocCallback {
    pub function: CoprocCallbackFn,
    pub user_arg: *mut c_void,
}

/// What a coprocessor wants compiled for one operation.
pub enum CoprocAction {
    /// The operation is undefined; generated code raises a trap.
    Raise,
    /// Call out to the coprocessor at run time.
    Call(CoprocCallback),
    /// Access a single word-sized slot directly.
    OneWord(*mut u32),
    /// Access two word-sized slots directly.
    TwoWords([*mut u32; 2]),
}

/// A guest coprocessor. Each hook is consulted once per compiled operation
/// and decides how the backend lowers it.
pub trait Coprocessor {
    fn compile_internal_operation(
        &mut self,
        two: bool,
        opc1: u8,
        crd: u8,
        crn: u8,
        crm: u8,
        opc2: u8,
    ) -> CoprocAction;

    fn compile_send_one_word(
        &mut self,
        two: bool,
        opc1: u8,
        crn: u8,
        crm: u8,
        opc2: u8,
    ) -> CoprocAction;

    fn compile_send_two_words(&mut self, two: bool, opc: u8, crm: u8) -> CoprocAction;

    fn compile_get_one_word(
        &mut self,
        two: bool,
        opc1: u8,
        crn: u8,
        crm: u8,
        opc2: u8,
    ) -> CoprocAction;

    fn compile_get_two_words(&mut self, two: bool, opc: u8, crm: u8) -> CoprocAction;

    fn compile_load_words(
        &mut self,
        two: bool,
        long_transfer: bool,
        crd: u8,
        option: Option<u8>,
    ) -> CoprocAction;

    fn compile_store_words(
        &mut self,
        two: bool,
        long_transfer: bool,
        crd: u8,
        option: Option<u8>,
    ) -> CoprocAction;
}

/// Number of coprocessor slots an engine owns.
pub const COPROC_SLOTS: usize = 16;
