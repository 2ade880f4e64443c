//! Minimal signed little-endian script number encoding.

pub const INT_MAX_LEN: usize = 5;

/// Encode n in the minimal script number form: little-endian magnitude with
/// the sign carried in the top bit of the most significant byte.
pub fn encode_int(n: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(INT_MAX_LEN);

    if n == 0 {
        return buf;
    }

    let neg = n < 0;
    let mut abs = n.unsigned_abs();
    while abs != 0 {
        buf.push(abs as u8);
        abs >>= 8;
    }

    if (buf[buf.len() - 1] & 0x80) != 0 {
        buf.push(if neg { 0x80 } else { 0x00 });
    } else if neg {
        let last = buf.len() - 1;
        buf[last] |= 0x80;
    }

    buf
}

/// Decode a script number; None when the encoding is longer than
/// `INT_MAX_LEN` bytes.
pub fn decode_int(bytes: &[u8]) -> Option<i64> {
    if bytes.len() > INT_MAX_LEN {
        return None;
    }
    if bytes.is_empty() {
        return Some(0);
    }

    let neg = (bytes[bytes.len() - 1] & 0x80) != 0;

    let mut n = 0u64;
    for (i, &byte) in bytes.iter().enumerate() {
        let byte = if i == bytes.len() - 1 {
            byte & 0x7f
        } else {
            byte
        };
        n |= (byte as u64) << (i * 8);
    }

    Some(if neg { -(n as i64) } else { n as i64 })
}

#[cfg(test)]
mod tests {
    use super::{decode_int, encode_int};

    const CASES: &[(i64, &[u8])] = &[
        (0, &[]),
        (1, &[0x01]),
        (3, &[0x03]),
        (-5, &[0x85]),
        (16, &[0x10]),
        (17, &[0x11]),
        (127, &[0x7f]),
        (128, &[0x80, 0x00]),
        (-127, &[0xff]),
        (-128, &[0x80, 0x80]),
        (1008, &[0xf0, 0x03]),
        (2016, &[0xe0, 0x07]),
        (i32::MIN as i64 + 1, &[0xff, 0xff, 0xff, 0xff]),
        (i32::MAX as i64, &[0xff, 0xff, 0xff, 0x7f]),
    ];

    #[test]
    fn test_int_encode() {
        for &(n, bytes) in CASES {
            assert_eq!(encode_int(n), bytes, "n = {n}");
            assert_eq!(decode_int(bytes), Some(n), "n = {n}");
        }
    }

    #[test]
    fn test_negative_zero_decodes_to_zero() {
        assert_eq!(decode_int(&[0x80]), Some(0));
        assert_eq!(decode_int(&[0x00, 0x80]), Some(0));
        assert_eq!(decode_int(&[0x00, 0x00, 0x80]), Some(0));
        assert_eq!(decode_int(&[0x00, 0x00, 0x00, 0x80]), Some(0));
    }

    #[test]
    fn test_decode_rejects_oversized() {
        assert_eq!(decode_int(&[0x01; 6]), None);
    }
}
