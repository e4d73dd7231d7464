// Drives the in-memory execution path end to end: emit, map executable,
// allocate a data stack, call, tear down.

use crate::codegen::{Emitter, Mode};
use crate::error::CompileResult;
use crate::function::FunctionTable;

use super::memory::ExecutableMemory;

const DATA_STACK_SIZE: usize = 8 * 1024 * 1024;
const DATA_STACK_ALIGN: usize = 16;

// The data stack handed to an in-memory invocation ("at
// least 8 MiB aligned to 16 bytes; overflow is not checked at runtime").
struct DataStack {
    ptr: *mut u8,
    layout: std::alloc::Layout,
}

impl DataStack {
    fn new() -> DataStack {
        let layout = std::alloc::Layout::from_size_align(DATA_STACK_SIZE, DATA_STACK_ALIGN)
            .expect("fixed size/align is always a valid Layout");
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        assert!(!ptr.is_null(), "data stack allocation failed");
        DataStack { ptr, layout }
    }
}

impl Drop for DataStack {
    fn drop(&mut self) {
        unsafe {
            std::alloc::dealloc(self.ptr, self.layout);
        }
    }
}

// Emits `table` for in-memory execution, maps it executable, and invokes
// `main` (function 0), returning its slot-0 result.
pub fn run_in_memory(table: &FunctionTable, alignment: usize) -> CompileResult<i64> {
    let result = Emitter::emit(table, Mode::InMemory, alignment)?;
    let mem = ExecutableMemory::new(&result.code)?;
    let stack = DataStack::new();
    Ok(mem.invoke(result.entry_offset, stack.ptr))
}
