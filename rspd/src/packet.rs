/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Packet framing: `$<payload>#<checksum>`, where the checksum is the sum of
//! the payload bytes modulo 256 rendered as two lowercase hex digits.

use bytes::Bytes;
use bytes::BytesMut;
use thiserror::Error;

use crate::hex::GdbHexError;
use crate::hex::decode_hex;
use crate::response::PacketWriter;

/// Packet parse error.
#[derive(PartialEq, Eq, Debug, Error)]
pub enum PacketParseError {
    #[error("Checksum mismatch, expected: {checksum:02x}, got: {calculated:02x}")]
    ChecksumMismatched { checksum: u8, calculated: u8 },
    #[error("empty packet buffer")]
    EmptyBuf,
    #[error("missing checksum")]
    MissingChecksum,
    #[error("malformed checksum")]
    MalformedChecksum,
    #[error("unexpected header {0:#04x}")]
    UnexpectedHeader(u8),
    #[error("unexpected byte {0:#04x} in packet field")]
    UnexpectedByte(u8),
    #[error("packet field longer than {0} hex digits")]
    FieldTooLong(usize),
    #[error("missing separator {0:#04x}")]
    MissingSeparator(u8),
    #[error(transparent)]
    DecodeHexError(#[from] GdbHexError),
}

/// Sum of `payload` modulo 256.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |a, x| a.wrapping_add(*x))
}

/// Parse the two hex digits following a `#`.
pub fn parse_checksum(trailer: &[u8]) -> Result<u8, PacketParseError> {
    if trailer.len() != 2 {
        return Err(PacketParseError::MalformedChecksum);
    }
    decode_hex(trailer).map_err(|_| PacketParseError::MalformedChecksum)
}

/// Frame `payload` as a complete packet.
pub fn encode(payload: &[u8]) -> Bytes {
    let mut writer = PacketWriter::new(BytesMut::with_capacity(payload.len() + 4));
    writer.put_slice(payload);
    writer.finish()
}

/// Remove leading `$' and trailing `#[xx]`, and validate checksum.
pub fn decode(mut bytes: BytesMut) -> Result<BytesMut, PacketParseError> {
    match bytes.first() {
        None => return Err(PacketParseError::EmptyBuf),
        Some(b'$') => {}
        Some(&other) => return Err(PacketParseError::UnexpectedHeader(other)),
    }
    let end_of_body = bytes
        .iter()
        .position(|b| *b == b'#')
        .ok_or(PacketParseError::MissingChecksum)?;

    let (body, trailer) = bytes.split_at(end_of_body);
    let checksum = parse_checksum(trailer.get(1..3).unwrap_or_default())?;
    let calculated = self::checksum(&body[1..]);
    if calculated != checksum {
        return Err(PacketParseError::ChecksumMismatched {
            checksum,
            calculated,
        });
    }

    Ok(bytes.split_to(end_of_body).split_off(1))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn checksum_is_two_lowercase_digits() {
        assert_eq!(encode(b""), Bytes::from_static(b"$#00"));
        assert_eq!(encode(b"S05"), Bytes::from_static(b"$S05#b8"));
        assert_eq!(encode(b"OK"), Bytes::from_static(b"$OK#9a"));
        // 0xff + 0x01 wraps to zero.
        assert_eq!(encode(b"\xff\x01"), Bytes::from_static(b"$\xff\x01#00"));
        assert_eq!(checksum(b"z"), 0x7a);
    }

    #[test]
    fn can_decode_packet() {
        assert_eq!(
            decode(BytesMut::from("$m1000,4#8e")),
            Ok(BytesMut::from("m1000,4"))
        );
        assert_eq!(decode(BytesMut::from("$#00")), Ok(BytesMut::new()));
        assert_eq!(
            decode(BytesMut::from("$?#3F")),
            Ok(BytesMut::from("?")),
            "uppercase checksum digits are accepted"
        );
    }

    #[test]
    fn decode_reports_framing_errors() {
        assert_eq!(decode(BytesMut::new()), Err(PacketParseError::EmptyBuf));
        assert_eq!(
            decode(BytesMut::from("+$?#3f")),
            Err(PacketParseError::UnexpectedHeader(b'+'))
        );
        assert_eq!(
            decode(BytesMut::from("$?")),
            Err(PacketParseError::MissingChecksum)
        );
        assert_eq!(
            decode(BytesMut::from("$?#3")),
            Err(PacketParseError::MalformedChecksum)
        );
        assert_eq!(
            decode(BytesMut::from("$?#zz")),
            Err(PacketParseError::MalformedChecksum)
        );
        assert_eq!(
            decode(BytesMut::from("$?#40")),
            Err(PacketParseError::ChecksumMismatched {
                checksum: 0x40,
                calculated: 0x3f
            })
        );
    }

    #[test]
    fn encoded_payloads_decode_back() {
        let payloads: [&[u8]; 5] = [b"", b"S05", b"0123456789abcdef", b"E22", &[0x7fu8; 300]];
        for payload in payloads {
            let framed = encode(payload);
            assert_eq!(decode(BytesMut::from(&framed[..])).unwrap(), payload);
        }
    }
}
