/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use num_traits::CheckedAdd;
use num_traits::CheckedMul;
use num_traits::FromPrimitive;
use num_traits::Zero;
use thiserror::Error;

/// Decode gdb hex error code
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum GdbHexError {
    /// Invalid hex digit
    #[error("Input contains non-hex chars")]
    NotHex,
    /// Input is empty
    #[error("Input is empty")]
    Empty,
    /// Output is too small: overflowed
    #[error("Output is too small/overflowed")]
    Overflow,
    /// Invalid Output (num) type.
    #[error("Invalid output num type")]
    InvalidOutput,
}

/// Value of a single ASCII hex digit, either case.
pub fn from_hex(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Lowercase ASCII hex digit for a nibble.
pub fn to_hex(nibble: u8) -> Option<u8> {
    match nibble {
        0..=9 => Some(b'0' + nibble),
        10..=15 => Some(b'a' + nibble - 10),
        _ => None,
    }
}

pub fn is_hex_digit(c: u8) -> bool {
    from_hex(c).is_some()
}

/// Decode a GDB hex string into the specified integer.
pub fn decode_hex<I>(buf: &[u8]) -> Result<I, GdbHexError>
where
    I: FromPrimitive + Zero + CheckedAdd + CheckedMul,
{
    if buf.is_empty() {
        return Err(GdbHexError::Empty);
    }

    let radix = I::from_u8(16).ok_or(GdbHexError::InvalidOutput)?;
    let mut result = I::zero();

    for &digit in buf {
        let x = I::from_u8(from_hex(digit).ok_or(GdbHexError::NotHex)?)
            .ok_or(GdbHexError::InvalidOutput)?;
        result = result.checked_mul(&radix).ok_or(GdbHexError::Overflow)?;
        result = result.checked_add(&x).ok_or(GdbHexError::Overflow)?
    }

    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn decode_hex_numbers() {
        assert_eq!(decode_hex::<u64>(b"1000"), Ok(0x1000));
        assert_eq!(decode_hex::<usize>(b"4"), Ok(4));
        assert_eq!(decode_hex::<u8>(b"fF"), Ok(0xff));
        assert_eq!(
            decode_hex::<u64>(b"ffffffffffffffff"),
            Ok(0xffff_ffff_ffff_ffff)
        );
    }

    #[test]
    fn decode_hex_rejects_garbage() {
        assert_eq!(decode_hex::<u64>(b""), Err(GdbHexError::Empty));
        assert_eq!(decode_hex::<u64>(b"12g4"), Err(GdbHexError::NotHex));
        assert_eq!(decode_hex::<u8>(b"100"), Err(GdbHexError::Overflow));
        assert_eq!(
            decode_hex::<u64>(b"10000000000000000"),
            Err(GdbHexError::Overflow)
        );
    }

    #[test]
    fn hex_digit_tables_agree() {
        for nibble in 0..16u8 {
            let c = to_hex(nibble).unwrap();
            assert!(is_hex_digit(c));
            assert_eq!(from_hex(c), Some(nibble));
        }
        assert_eq!(to_hex(16), None);
        assert!(!is_hex_digit(b'#'));
        assert!(!is_hex_digit(b'x'));
    }
}
