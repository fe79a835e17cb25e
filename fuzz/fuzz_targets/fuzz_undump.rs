#![no_main]

use libfuzzer_sys::fuzz_target;
use lunette_core::string::StringInterner;
use lunette_vm::binary_chunk;

// Arbitrary bytes behind a valid signature must be rejected, not loaded
// into a state the VM can trip over.
fuzz_target!(|data: &[u8]| {
    let mut chunk = b"\x1bLNT".to_vec();
    chunk.extend_from_slice(data);
    let mut strings = StringInterner::new();
    let _ = binary_chunk::undump(&chunk, &mut strings);
});
