// Scoped executable memory: a scoped resource owned by the in-memory
// program wrapper.
//
// `ExecutableMemory` owns one `mmap`'d region for the lifetime of an
// in-memory invocation: RW while the emitted bytes are copied in, then
// switched to RX before the call, and `munmap`'d on drop regardless of
// how the invocation ended.

use crate::error::{CompileError, CompileResult};

pub struct ExecutableMemory {
    ptr: *mut libc::c_void,
    len: usize,
}

impl ExecutableMemory {
    pub fn new(code: &[u8]) -> CompileResult<ExecutableMemory> {
        let len = code.len().max(1);
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(CompileError::AllocationFailed(
                std::io::Error::last_os_error().to_string(),
            ));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr as *mut u8, code.len());
        }
        let rc = unsafe { libc::mprotect(ptr, len, libc::PROT_READ | libc::PROT_EXEC) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::munmap(ptr, len);
            }
            return Err(CompileError::AllocationFailed(err.to_string()));
        }
        Ok(ExecutableMemory { ptr, len })
    }

    // Invokes the in-memory entry point (`int64_t (*)(void *data_stack)`)
    // at `entry_offset` bytes into the mapped region, passing `data_stack`
    // as its sole argument.
    pub fn invoke(&self, entry_offset: usize, data_stack: *mut u8) -> i64 {
        debug_assert!(entry_offset <= self.len);
        let entry = unsafe { self.ptr.add(entry_offset) };
        let f: extern "C" fn(*mut u8) -> i64 = unsafe { std::mem::transmute(entry) };
        f(data_stack)
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}
