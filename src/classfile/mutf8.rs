//! Modified UTF-8 as used by `CONSTANT_Utf8_info`.
//!
//! Differs from standard UTF-8 in two ways: `U+0000` is written as `C0 80`,
//! and supplementary characters are written as a surrogate pair of two
//! three-byte sequences.

use super::ClassFileError;

pub fn decode(bytes: &[u8]) -> Result<String, ClassFileError> {
    // Fast path: plain ASCII and BMP text without NUL is identical in both encodings.
    if !bytes.contains(&0) {
        if let Ok(s) = std::str::from_utf8(bytes) {
            return Ok(s.to_owned());
        }
    }

    let mut out = String::with_capacity(bytes.len());
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        let unit = if b0 & 0x80 == 0 {
            if b0 == 0 {
                return Err(ClassFileError::InvalidUtf8);
            }
            i += 1;
            b0 as u16
        } else if b0 & 0xe0 == 0xc0 {
            let b1 = continuation(bytes, i + 1)?;
            i += 2;
            (((b0 & 0x1f) as u16) << 6) | b1 as u16
        } else if b0 & 0xf0 == 0xe0 {
            let b1 = continuation(bytes, i + 1)?;
            let b2 = continuation(bytes, i + 2)?;
            i += 3;
            (((b0 & 0x0f) as u16) << 12) | ((b1 as u16) << 6) | b2 as u16
        } else {
            return Err(ClassFileError::InvalidUtf8);
        };
        units.push(unit);
    }

    for c in char::decode_utf16(units) {
        // Lone surrogates cannot be carried in a `String`.
        out.push(c.map_err(|_| ClassFileError::InvalidUtf8)?);
    }
    Ok(out)
}

fn continuation(bytes: &[u8], at: usize) -> Result<u8, ClassFileError> {
    match bytes.get(at) {
        Some(b) if b & 0xc0 == 0x80 => Ok(b & 0x3f),
        _ => Err(ClassFileError::InvalidUtf8),
    }
}

pub fn encode(s: &str) -> Vec<u8> {
    if !s.contains('\0') && s.chars().all(|c| (c as u32) < 0x10000) {
        return s.as_bytes().to_vec();
    }

    let mut out = Vec::with_capacity(s.len() + 8);
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}
