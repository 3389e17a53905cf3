//! x86-64 redirect encoding and prologue length decoding.
//!
//! The decoder only knows the instruction forms that show up in ordinary
//! function prologues. Anything else is refused rather than guessed at:
//! relocating a half-understood instruction corrupts the genuine
//! implementation.

use memguard_core::PatchError;

use super::MAX_PATCH_LEN;

/// `jmp qword ptr [rip + 0]` followed by the absolute target.
pub(super) const JUMP_LEN: usize = 14;

const INT3: u8 = 0xCC;

/// Absolute jump to `to`; position independent.
pub(super) fn encode_jump(to: usize) -> [u8; JUMP_LEN] {
    let mut out = [0u8; JUMP_LEN];
    out[..6].copy_from_slice(&[0xFF, 0x25, 0x00, 0x00, 0x00, 0x00]);
    out[6..].copy_from_slice(&(to as u64).to_le_bytes());
    out
}

/// Redirect written over the first `stolen` bytes of a patched function.
/// Leftover bytes of split instructions become `int3`.
pub(super) fn encode_patch(to: usize, stolen: usize) -> [u8; MAX_PATCH_LEN] {
    let mut out = [INT3; MAX_PATCH_LEN];
    out[..JUMP_LEN].copy_from_slice(&encode_jump(to));
    debug_assert!(stolen >= JUMP_LEN && stolen <= MAX_PATCH_LEN);
    out
}

/// Number of whole instructions covering at least [`JUMP_LEN`] bytes.
pub(super) fn relocatable_len(code: &[u8]) -> Result<usize, PatchError> {
    let mut offset = 0usize;
    while offset < JUMP_LEN {
        offset += instruction_len(code, offset)?;
    }
    if offset > MAX_PATCH_LEN {
        return Err(PatchError::UnsupportedInstruction { offset });
    }
    Ok(offset)
}

fn byte(code: &[u8], at: usize) -> Result<u8, PatchError> {
    code.get(at)
        .copied()
        .ok_or(PatchError::FunctionTooShort { needed: JUMP_LEN })
}

/// Length of the instruction starting at `start`.
pub(super) fn instruction_len(code: &[u8], start: usize) -> Result<usize, PatchError> {
    let unsupported = PatchError::UnsupportedInstruction { offset: start };
    let pc_relative = PatchError::PcRelative { offset: start };

    // endbr64
    if code.get(start..start + 4) == Some(&[0xF3, 0x0F, 0x1E, 0xFA]) {
        return Ok(4);
    }

    let mut at = start;
    let mut operand16 = false;
    if byte(code, at)? == 0x66 {
        operand16 = true;
        at += 1;
    }
    let mut rex_w = false;
    let prefix = byte(code, at)?;
    if prefix & 0xF0 == 0x40 {
        rex_w = prefix & 0x08 != 0;
        at += 1;
    }
    let imm_z = if operand16 { 2 } else { 4 };

    let opcode = byte(code, at)?;
    at += 1;
    let end = match opcode {
        // push/pop r64, nop
        0x50..=0x5F | 0x90 => at,
        // ALU and mov forms with a ModRM operand.
        0x01 | 0x03 | 0x09 | 0x0B | 0x21 | 0x23 | 0x29 | 0x2B | 0x31 | 0x33 | 0x39 | 0x3B | 0x63 | 0x85
        | 0x89 | 0x8B | 0x8D => modrm_end(code, at, start)?,
        0x80 | 0x83 | 0xC6 => modrm_end(code, at, start)? + 1,
        0x81 | 0xC7 => modrm_end(code, at, start)? + imm_z,
        0xB8..=0xBF => at + if rex_w { 8 } else { imm_z },
        0x0F => {
            let second = byte(code, at)?;
            at += 1;
            match second {
                // nop r/m, movzx, movsx, movups/movaps, xorps, pxor
                0x1F | 0xB6 | 0xB7 | 0xBE | 0xBF | 0x10 | 0x11 | 0x28 | 0x29 | 0x57 | 0xEF => {
                    modrm_end(code, at, start)?
                }
                0x80..=0x8F => return Err(pc_relative),
                _ => return Err(unsupported),
            }
        }
        // ret
        0xC2 | 0xC3 => return Err(PatchError::FunctionTooShort { needed: JUMP_LEN }),
        // rel8/rel32 branches and calls
        0x70..=0x7F | 0xE8 | 0xE9 | 0xEB => return Err(pc_relative),
        _ => return Err(unsupported),
    };
    Ok(end - start)
}

/// End offset of a ModRM operand (plus SIB and displacement) at `at`.
fn modrm_end(code: &[u8], mut at: usize, start: usize) -> Result<usize, PatchError> {
    let modrm = byte(code, at)?;
    at += 1;
    let mode = modrm >> 6;
    let rm = modrm & 0x07;
    if mode == 0b00 && rm == 0b101 {
        return Err(PatchError::PcRelative { offset: start });
    }
    if mode != 0b11 && rm == 0b100 {
        let sib = byte(code, at)?;
        at += 1;
        if mode == 0b00 && sib & 0x07 == 0b101 {
            at += 4;
        }
    }
    Ok(match mode {
        0b01 => at + 1,
        0b10 => at + 4,
        _ => at,
    })
}
