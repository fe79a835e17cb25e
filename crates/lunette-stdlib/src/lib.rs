//! Lunette standard library: base functions plus the `coroutine`, `table`,
//! `math` and `string` tables, all registered through the VM's callback
//! mechanism.

pub mod base_lib;
pub mod coroutine_lib;
pub mod math;
pub mod string_lib;
pub mod table_lib;

use lunette_core::gc::GcIdx;
use lunette_core::table::Table;
use lunette_core::value::Value;
use lunette_vm::{CallbackResult, ExecutionContext, LuaError, Vm};
use std::rc::Rc;

/// Result type of every library function.
pub type LibResult = Result<CallbackResult, LuaError>;

/// Plain library function.
pub type LibFn = fn(&mut ExecutionContext<'_>, Vec<Value>) -> LibResult;

/// Where `print` writes one finished line (without the newline).
pub type PrintSink = Rc<dyn Fn(&str)>;

/// Register every library into the VM's globals, printing to stdout.
pub fn open_libs(vm: &mut Vm) {
    open_libs_with_print(vm, Rc::new(|line: &str| println!("{line}")));
}

/// Register every library, sending `print` output to `sink`.
#[tracing::instrument(level = "debug", skip_all)]
pub fn open_libs_with_print(vm: &mut Vm, sink: PrintSink) {
    base_lib::register(vm, sink);
    coroutine_lib::register(vm);
    table_lib::register(vm);
    math::register(vm);
    string_lib::register(vm);
}

/// Create a table of `funcs` and store it in the global `name`.
fn register_lib(vm: &mut Vm, name: &str, funcs: &[(&str, LibFn)]) -> GcIdx<Table> {
    let lib = vm.gc.alloc_table(0, funcs.len());
    for &(fname, func) in funcs {
        vm.set_function(lib, fname, func);
    }
    vm.set_global(name, Value::Table(lib));
    lib
}

fn set_field(vm: &mut Vm, table: GcIdx<Table>, name: &str, value: Value) {
    let key = vm.strings.intern(name.as_bytes());
    vm.gc.get_table_mut(table).raw_set_str(key, value);
}
