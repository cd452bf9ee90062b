//! The intermediate representation exchanged between the ARM frontend and
//! the x86-64 backend.
//!
//! A frontend lowers one guest basic block into an [`IrBlock`]: a linear
//! sequence of [`Instr`]s in program order, a guard condition, a cycle count
//! and a [`Terminator`]. Values are pure SSA: every instruction defines at
//! most one value, referenced by later instructions through
//! [`Operand::Value`]. Flag side effects are modelled as pseudo-operations
//! (`GetCarryFromOp`, `GetOverflowFromOp`, `GetGEFromOp`) attached to their
//! parent instruction; the backend folds them into the parent's emission and
//! erases them.

mod block;
mod builder;
mod location;
mod opcode;

pub use block::{CoprocInfo, InstId, Instr, IrBlock, Operand, Terminator, MAX_ARGS};
pub use builder::IrBuilder;
pub use location::{AddressRange, LocationDescriptor};
pub use opcode::{Opcode, Type};
