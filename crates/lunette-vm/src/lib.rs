//! Lunette virtual machine: stack-machine interpreter, coroutines,
//! metatables, binary chunks and debugger hooks.

pub mod arith;
pub mod binary_chunk;
pub mod callback;
pub mod callinfo;
pub mod coerce;
pub mod compare;
pub mod debugger;
pub mod dispatch;
pub mod error;
pub mod metamethod;
pub mod options;
pub mod vm;

pub use callback::{CallbackResult, ExecutionContext, TailCallRequest};
pub use callinfo::Protection;
pub use debugger::{DebugService, Debugger, DebuggerAction, PauseInfo, PauseReason};
pub use error::LuaError;
pub use options::VmOptions;
pub use vm::{CoroutineStatus, ResumeOutcome, Vm};

/// Compile and run a chunk in a fresh VM without any library loaded.
pub fn execute_source(source: &str) -> Result<Vec<lunette_core::Value>, LuaError> {
    let mut vm = Vm::new();
    vm.do_string(source, "=input")
}
