// x86-64 general-purpose register encoding, shared by the addressing-mode
// helper (src/codegen/encoder.rs) and the per-opcode templates
// (src/codegen/mod.rs): a common encoder handling REX bits for the
// extended registers R8-R15.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reg {
    Rax,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Reg {
    // The shared data-stack base pointer : every slot
    // access is `[RBX + slot*8]`.
    pub const DATA_STACK: Reg = Reg::Rbx;

    // System V AMD64 integer argument registers, in order.
    pub const SYSV_ARGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];
    // Raw Linux syscall argument registers: note RCX is replaced by R10
    // (the kernel clobbers RCX as part of the `syscall` instruction).
    pub const SYSCALL_ARGS: [Reg; 6] = [Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::R10, Reg::R8, Reg::R9];
    // Microsoft x64 integer argument registers, in order.
    pub const MS_ARGS: [Reg; 4] = [Reg::Rcx, Reg::Rdx, Reg::R8, Reg::R9];

    pub fn code(self) -> u8 {
        match self {
            Reg::Rax => 0,
            Reg::Rcx => 1,
            Reg::Rdx => 2,
            Reg::Rbx => 3,
            Reg::Rsp => 4,
            Reg::Rbp => 5,
            Reg::Rsi => 6,
            Reg::Rdi => 7,
            Reg::R8 => 8,
            Reg::R9 => 9,
            Reg::R10 => 10,
            Reg::R11 => 11,
            Reg::R12 => 12,
            Reg::R13 => 13,
            Reg::R14 => 14,
            Reg::R15 => 15,
        }
    }

    // The 3-bit field stored directly in ModRM/SIB/opcode; REX carries the
    // 4th (high) bit separately.
    pub fn low3(self) -> u8 {
        self.code() & 0x7
    }

    pub fn is_extended(self) -> bool {
        self.code() >= 8
    }
}
