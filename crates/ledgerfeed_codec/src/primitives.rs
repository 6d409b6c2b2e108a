//! Type codes and variable-length integer primitives of the binary format.
//!
//! ```text
//! type descriptor:  | T (4 bits) | L (4 bits) |
//! VarUInt:          7 data bits per byte, high bit marks the last byte
//! VarInt:           as VarUInt, sign in bit 0x40 of the first byte
//! UInt / Int:       big-endian fixed width; Int is sign-and-magnitude
//! ```

/// Binary version marker that opens every stream.
pub const VERSION_MARKER: [u8; 4] = [0xE0, 0x01, 0x00, 0xEA];

pub(crate) const T_NULL: u8 = 0;
pub(crate) const T_BOOL: u8 = 1;
pub(crate) const T_POS_INT: u8 = 2;
pub(crate) const T_NEG_INT: u8 = 3;
pub(crate) const T_FLOAT: u8 = 4;
pub(crate) const T_DECIMAL: u8 = 5;
pub(crate) const T_TIMESTAMP: u8 = 6;
pub(crate) const T_SYMBOL: u8 = 7;
pub(crate) const T_STRING: u8 = 8;
pub(crate) const T_CLOB: u8 = 9;
pub(crate) const T_BLOB: u8 = 10;
pub(crate) const T_LIST: u8 = 11;
pub(crate) const T_SEXP: u8 = 12;
pub(crate) const T_STRUCT: u8 = 13;
pub(crate) const T_ANNOTATION: u8 = 14;

/// Low nibble meaning "length follows as a VarUInt".
pub(crate) const L_VARIABLE: u8 = 14;
/// Low nibble meaning "typed null".
pub(crate) const L_NULL: u8 = 15;

/// Appends a type descriptor and length prefix.
pub(crate) fn write_header(out: &mut Vec<u8>, type_code: u8, len: usize) {
    if len < usize::from(L_VARIABLE) {
        out.push((type_code << 4) | len as u8);
    } else {
        out.push((type_code << 4) | L_VARIABLE);
        write_varuint(out, len as u64);
    }
}

/// Appends a VarUInt.
pub(crate) fn write_varuint(out: &mut Vec<u8>, value: u64) {
    let mut groups = Vec::with_capacity(10);
    let mut rest = value;
    loop {
        groups.push((rest & 0x7f) as u8);
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    groups.reverse();
    if let Some(last) = groups.last_mut() {
        *last |= 0x80;
    }
    out.extend_from_slice(&groups);
}

/// Appends a VarInt from a magnitude and sign.
pub(crate) fn write_varint(out: &mut Vec<u8>, magnitude: u64, negative: bool) {
    let mut groups = Vec::with_capacity(10);
    let mut rest = magnitude;
    loop {
        groups.push((rest & 0x7f) as u8);
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    groups.reverse();
    // The first byte only has six data bits next to the sign bit.
    if groups[0] & 0x40 != 0 {
        groups.insert(0, 0);
    }
    if negative {
        groups[0] |= 0x40;
    }
    if let Some(last) = groups.last_mut() {
        *last |= 0x80;
    }
    out.extend_from_slice(&groups);
}

/// Returns the minimal big-endian bytes of an unsigned magnitude (empty for zero).
pub(crate) fn uint_bytes(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

/// Returns the sign-and-magnitude bytes of a signed integer (empty for zero).
pub(crate) fn int_bytes(value: i128) -> Vec<u8> {
    let mut bytes = uint_bytes(value.unsigned_abs());
    if bytes.is_empty() {
        return bytes;
    }
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0);
    }
    if value < 0 {
        bytes[0] |= 0x80;
    }
    bytes
}
