// Minimal ELF64 executable envelope: one R|X `LOAD` segment
// covering the whole emitted buffer, loaded at a fixed virtual address.
// No sections, no dynamic linking, no relocations beyond what the
// emitter already resolved internally.

const VADDR: u64 = 0x1000;

const EHDR_SIZE: u64 = 64;
const PHDR_SIZE: u64 = 56;

// Lays the emitted code buffer out behind a 64-byte ELF header and a
// single 56-byte program header, both at file offset 0, so the first
// mapped byte of the code sits at `VADDR + EHDR_SIZE + PHDR_SIZE`.
pub fn build(code: &[u8], entry_offset: usize) -> Vec<u8> {
    let code_offset = EHDR_SIZE + PHDR_SIZE;
    let total_size = code_offset + code.len() as u64;
    let entry = VADDR + code_offset + entry_offset as u64;

    let mut out = Vec::with_capacity(total_size as usize);

    // e_ident
    out.extend_from_slice(&[0x7F, 0x45, 0x4C, 0x46, 0x02, 0x01, 0x01, 0x00]);
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    out.extend_from_slice(&0x3Eu16.to_le_bytes()); // e_machine = EM_X86_64
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&entry.to_le_bytes()); // e_entry
    out.extend_from_slice(&EHDR_SIZE.to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u64.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes()); // e_ehsize
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes()); // e_phentsize
    out.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    debug_assert_eq!(out.len() as u64, EHDR_SIZE);

    // Program header: one PT_LOAD, R|X, covering the whole file.
    out.extend_from_slice(&1u32.to_le_bytes()); // p_type = PT_LOAD
    out.extend_from_slice(&(libc::PF_R as u32 | libc::PF_X as u32).to_le_bytes()); // p_flags
    out.extend_from_slice(&0u64.to_le_bytes()); // p_offset
    out.extend_from_slice(&VADDR.to_le_bytes()); // p_vaddr
    out.extend_from_slice(&VADDR.to_le_bytes()); // p_paddr
    out.extend_from_slice(&total_size.to_le_bytes()); // p_filesz
    out.extend_from_slice(&total_size.to_le_bytes()); // p_memsz
    out.extend_from_slice(&0x1000u64.to_le_bytes()); // p_align
    debug_assert_eq!(out.len() as u64, EHDR_SIZE + PHDR_SIZE);

    out.extend_from_slice(code);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_identifies_as_elf64_little_endian_x86_64_exec() {
        let bytes = build(&[0xC3], 0);
        assert_eq!(&bytes[0..8], &[0x7F, 0x45, 0x4C, 0x46, 0x02, 0x01, 0x01, 0x00]);
        assert_eq!(u16::from_le_bytes([bytes[16], bytes[17]]), 2);
        assert_eq!(u16::from_le_bytes([bytes[18], bytes[19]]), 0x3E);
    }

    #[test]
    fn entry_offset_is_biased_by_header_and_vaddr() {
        let bytes = build(&[0x90, 0x90, 0xC3], 1);
        let entry = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        assert_eq!(entry, VADDR + EHDR_SIZE + PHDR_SIZE + 1);
    }
}
