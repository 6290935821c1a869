// @lint-ignore LICENSELINT
/*
 * MIT License
 *
 * Copyright (c) 2021 Daniel Prilik
 *
 * Permission is hereby granted, free of charge, to any person obtaining a copy
 * of this software and associated documentation files (the "Software"), to deal
 * in the Software without restriction, including without limitation the rights
 * to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
 * copies of the Software, and to permit persons to whom the Software is
 * furnished to do so, subject to the following conditions:
 *
 * The above copyright notice and this permission notice shall be included in all
 * copies or substantial portions of the Software.
 *
 * THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
 * IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
 * FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
 * AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
 * LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
 * OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
 * SOFTWARE.
 */

//! Outgoing packet construction.

use bytes::BufMut;
use bytes::Bytes;
use bytes::BytesMut;
use num_traits::AsPrimitive;
use num_traits::PrimInt;

use crate::hex::to_hex;
use crate::logger::PacketLogger;

/// Builds one outgoing packet incrementally, keeping a running checksum.
#[derive(PartialEq, Eq, Debug)]
pub struct PacketWriter {
    checksum: u8,
    buf: BytesMut,
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new(BytesMut::new())
    }
}

impl PacketWriter {
    /// Creates a new writer, reusing the storage of `tx_buf`.
    pub fn new(mut tx_buf: BytesMut) -> Self {
        let mut buf = tx_buf.split();
        buf.clear();
        buf.put_u8(b'$');
        Self { checksum: 0, buf }
    }

    fn put_u8(&mut self, byte: u8) {
        self.checksum = self.checksum.wrapping_add(byte);
        self.buf.put_u8(byte);
    }

    /// encode u8 as gdb hex
    fn put_u8_hex(&mut self, byte: u8) {
        for digit in [byte >> 4, byte & 0x0f] {
            if let Some(c) = to_hex(digit) {
                self.put_u8(c);
            }
        }
    }

    /// Append raw payload bytes.
    pub fn put_slice(&mut self, s: &[u8]) {
        s.iter().for_each(|c| self.put_u8(*c))
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_slice(s.as_bytes())
    }

    /// Write data as (gdb) hex string.
    pub fn put_hex_encoded(&mut self, data: &[u8]) {
        data.iter().for_each(|c| self.put_u8_hex(*c));
    }

    /// Write a number as a big-endian hex string using the most compact
    /// representation possible (i.e: trimming leading zeros).
    pub fn put_num<I: AsPrimitive<u64> + PrimInt>(&mut self, digit: I) {
        if digit.is_zero() {
            return self.put_u8_hex(0);
        }

        let mut buf = [0; 16];
        let mut k = 15;
        let mut x = digit;

        while !x.is_zero() {
            buf[k] = (x.as_() & 0xffu64) as u8;
            k -= 1;
            x = x.unsigned_shr(8);
        }

        self.put_hex_encoded(&buf[1 + k..]);
    }

    /// Consumes self, writing out the final '#' and checksum.
    pub fn finish(mut self) -> Bytes {
        let checksum = self.checksum;

        tracing::trace!("{:?}", PacketLogger::outgoing(&self.buf[1..], checksum));

        self.buf.put_u8(b'#');
        for digit in [checksum >> 4, checksum & 0x0f] {
            if let Some(c) = to_hex(digit) {
                self.buf.put_u8(c);
            }
        }
        self.buf.freeze()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::packet::decode;

    #[test]
    fn writer_helpers() {
        let mut writer = PacketWriter::default();
        writer.put_str("T");
        writer.put_hex_encoded(&[0x05, 0xab]);
        writer.put_str(";");
        writer.put_num(0x1000u32);
        writer.put_str(";");
        writer.put_num(0u8);
        let framed = writer.finish();
        assert_eq!(
            decode(BytesMut::from(&framed[..])).unwrap(),
            BytesMut::from("T05ab;1000;00")
        );
    }

    #[test]
    fn writer_reuses_storage() {
        let mut tx_buf = BytesMut::with_capacity(64);
        tx_buf.extend_from_slice(b"stale");
        let mut writer = PacketWriter::new(tx_buf);
        writer.put_num(0xdeadu16);
        assert_eq!(writer.finish(), Bytes::from_static(b"$dead#8e"));
    }
}
