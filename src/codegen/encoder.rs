// The common encoder: REX-prefixed ModRM/SIB addressing with the shortest
// legal displacement form, shared by every per-opcode template in
// src/codegen/mod.rs. Every function here appends
// to a caller-owned byte buffer rather than returning a fresh `Vec`, since
// almost every instruction template is itself just a few calls into this
// module back to back.

use crate::error::CompileError;

use super::regs::Reg;

// REX prefix: 0100WRXB. `w` selects 64-bit operand size (used by nearly
// every template here, since every slot holds a full 8-byte value).
// `reg`/`index`/`base` are the three fields that may need their high bit
// set for R8-R15; pass `None` for a field the instruction doesn't use.
fn rex(w: bool, reg: Option<Reg>, index: Option<Reg>, base: Option<Reg>) -> Option<u8> {
    let r = reg.is_some_and(Reg::is_extended) as u8;
    let x = index.is_some_and(Reg::is_extended) as u8;
    let b = base.is_some_and(Reg::is_extended) as u8;
    if !w && r == 0 && x == 0 && b == 0 {
        return None;
    }
    Some(0x40 | ((w as u8) << 3) | (r << 2) | (x << 1) | b)
}

pub fn push_rex_w(out: &mut Vec<u8>, reg: Option<Reg>, index: Option<Reg>, base: Option<Reg>) {
    if let Some(byte) = rex(true, reg, index, base) {
        out.push(byte);
    }
}

// ModRM + (SIB) + displacement for `[base + disp]`, with `reg_field`
// (already REX-stripped to 3 bits) as the ModRM.reg operand. RSP can only
// be addressed through a SIB byte with no index, which is a distinct
// addressing mode callers must ask for explicitly via `mem_rsp` below;
// passing it here is an internal error.
pub fn mem_base_disp(out: &mut Vec<u8>, reg_field: u8, base: Reg, disp: i32) -> Result<(), CompileError> {
    if base == Reg::Rsp {
        return Err(CompileError::InvalidRegisterCombination(
            "RSP cannot be used as a plain r/m base; use mem_rsp".to_string(),
        ));
    }
    let base_low = base.low3();
    let needs_sib = base_low == 0b100; // R12 aliases RSP's low bits
    let force_disp32 = base_low == 0b101 && disp == 0; // RBP/R13 with disp 0 means RIP-relative otherwise
    encode_modrm(out, reg_field, base_low, needs_sib, disp, force_disp32);
    Ok(())
}

// `[RSP + disp]`: always needs a SIB byte (scale 0, no index, base RSP).
// Used for the environment-pointer chain (`get_env`/
// `set_env`/`ref_env` address `[RSP + level*8]`).
pub fn mem_rsp(out: &mut Vec<u8>, reg_field: u8, disp: i32) {
    encode_modrm(out, reg_field, Reg::Rsp.low3(), true, disp, false);
}

fn encode_modrm(out: &mut Vec<u8>, reg_field: u8, base_low3: u8, needs_sib: bool, disp: i32, force_disp32: bool) {
    let (mode, small_disp) = if disp == 0 && !force_disp32 {
        (0b00, None)
    } else if let Ok(d) = i8::try_from(disp) {
        (0b01, Some(d))
    } else {
        (0b10, None)
    };
    let rm = if needs_sib { 0b100 } else { base_low3 };
    out.push((mode << 6) | ((reg_field & 0x7) << 3) | rm);
    if needs_sib {
        out.push((0b00 << 6) | (0b100 << 3) | base_low3); // scale 1, no index, base
    }
    match (mode, small_disp) {
        (0b00, _) => {}
        (0b01, Some(d)) => out.push(d as u8),
        _ => out.extend_from_slice(&disp.to_le_bytes()),
    }
}

// SIB addressing with a scaled index and no displacement: `[base + index*scale]`
// (the `lea` template). `scale` must be 1, 2, 4, or 8.
pub fn mem_base_index_scale(
    out: &mut Vec<u8>,
    reg_field: u8,
    base: Reg,
    index: Reg,
    scale: u8,
) -> Result<(), CompileError> {
    if index == Reg::Rsp {
        return Err(CompileError::InvalidRegisterCombination(
            "RSP cannot be used as a SIB index".to_string(),
        ));
    }
    let scale_bits = match scale {
        1 => 0b00,
        2 => 0b01,
        4 => 0b10,
        8 => 0b11,
        other => {
            return Err(CompileError::InvalidRegisterCombination(format!(
                "invalid SIB scale: {}",
                other
            )))
        }
    };
    let base_low = base.low3();
    let force_disp32 = base_low == 0b101; // RBP/R13 base always needs an explicit (zero) disp8
    out.push((0b00 << 6) | ((reg_field & 0x7) << 3) | 0b100);
    out.push((scale_bits << 6) | (index.low3() << 3) | base_low);
    if force_disp32 {
        out.push(0);
    }
    Ok(())
}

pub fn push_u32_le(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn push_i32_le(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

pub fn push_u64_le(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rbx_plus_small_disp_needs_no_sib() {
        let mut out = Vec::new();
        mem_base_disp(&mut out, 0, Reg::Rbx, 8).unwrap();
        // mod=01 (disp8), reg=000, rm=011 (rbx); one displacement byte.
        assert_eq!(out, vec![0b01_000_011, 8]);
    }

    #[test]
    fn rsp_as_plain_base_is_rejected() {
        let mut out = Vec::new();
        assert!(mem_base_disp(&mut out, 0, Reg::Rsp, 0).is_err());
    }

    #[test]
    fn rsp_mem_always_emits_sib() {
        let mut out = Vec::new();
        mem_rsp(&mut out, 0, 16);
        assert_eq!(out, vec![0b01_000_100, 0b00_100_100, 16]);
    }
}
