//! AArch64 redirect encoding and prologue screening.

use memguard_core::PatchError;

use super::MAX_PATCH_LEN;

/// `ldr x16, #8; br x16; .quad target`
pub(super) const JUMP_LEN: usize = 16;

const LDR_X16_LITERAL_8: u32 = 0x5800_0050;
const BR_X16: u32 = 0xD61F_0200;
const RET: u32 = 0xD65F_03C0;

pub(super) fn encode_jump(to: usize) -> [u8; JUMP_LEN] {
    let mut out = [0u8; JUMP_LEN];
    out[0..4].copy_from_slice(&LDR_X16_LITERAL_8.to_le_bytes());
    out[4..8].copy_from_slice(&BR_X16.to_le_bytes());
    out[8..16].copy_from_slice(&(to as u64).to_le_bytes());
    out
}

/// Fixed-width instructions: the redirect always displaces exactly four.
pub(super) fn encode_patch(to: usize, stolen: usize) -> [u8; MAX_PATCH_LEN] {
    debug_assert_eq!(stolen, JUMP_LEN);
    let mut out = [0u8; MAX_PATCH_LEN];
    out[..JUMP_LEN].copy_from_slice(&encode_jump(to));
    out
}

pub(super) fn relocatable_len(code: &[u8]) -> Result<usize, PatchError> {
    let mut offset = 0usize;
    while offset < JUMP_LEN {
        let word = code
            .get(offset..offset + 4)
            .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
            .map(u32::from_le_bytes)
            .ok_or(PatchError::FunctionTooShort { needed: JUMP_LEN })?;
        screen(word, offset)?;
        offset += 4;
    }
    Ok(offset)
}

/// Reject instructions whose meaning depends on where they execute.
pub(super) fn screen(word: u32, offset: usize) -> Result<(), PatchError> {
    if word == RET {
        return Err(PatchError::FunctionTooShort { needed: JUMP_LEN });
    }
    let pc_relative =
        // adr / adrp
        word & 0x1F00_0000 == 0x1000_0000
        // b / bl
        || word & 0x7C00_0000 == 0x1400_0000
        // b.cond
        || word & 0xFF00_0010 == 0x5400_0000
        // cbz / cbnz
        || word & 0x7E00_0000 == 0x3400_0000
        // tbz / tbnz
        || word & 0x7E00_0000 == 0x3600_0000
        // ldr (literal), including simd variants
        || word & 0x3B00_0000 == 0x1800_0000;
    if pc_relative {
        return Err(PatchError::PcRelative { offset });
    }
    Ok(())
}
