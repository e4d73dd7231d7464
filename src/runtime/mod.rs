//! Everything downstream of code emission: wrapping emitted bytes as an
//! ELF64 executable, or mapping them into memory and invoking them
//! directly.

pub mod elf;
pub mod invoke;
pub mod memory;

pub use invoke::run_in_memory;
pub use memory::ExecutableMemory;
