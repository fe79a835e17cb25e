//! VM tuning knobs.

use lunette_compiler::LuaVersion;

/// Runtime limits and collector pacing for one [`crate::vm::Vm`].
#[derive(Clone, Debug)]
pub struct VmOptions {
    /// Dialect used by `load` when compiling at run time.
    pub version: LuaVersion,
    /// Lua frames per thread before "stack overflow".
    pub max_call_depth: usize,
    /// Nested host re-entries (metamethods, callbacks calling back into
    /// Lua) before "C stack overflow".
    pub max_native_depth: usize,
    /// Allocations between automatic collections.
    pub gc_step_threshold: usize,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            version: LuaVersion::default(),
            max_call_depth: 7000,
            max_native_depth: 200,
            gc_step_threshold: 10_000,
        }
    }
}

impl VmOptions {
    pub fn with_version(mut self, version: LuaVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_max_native_depth(mut self, depth: usize) -> Self {
        self.max_native_depth = depth;
        self
    }

    pub fn with_gc_step_threshold(mut self, threshold: usize) -> Self {
        self.gc_step_threshold = threshold.max(1);
        self
    }
}
