/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! Decoder for the commands the stub understands: `?`, `g`,
//! `m<addr>,<len>`, `s`, `c` and `k`. Anything else framed as a packet is
//! discarded and answered with an empty reply.
//!
//! The decoder works on the bytes buffered for the connection and only ever
//! consumes complete commands. A partial packet stays in the buffer until the
//! rest of it arrives.

use bytes::Buf;
use bytes::Bytes;
use bytes::BytesMut;
use parking_lot::Mutex;

use crate::error::Capability;
use crate::error::Error;
use crate::hex::decode_hex;
use crate::hex::is_hex_digit;
use crate::link::Link;
use crate::logger::PacketLogger;
use crate::packet::PacketParseError;
use crate::packet::checksum;
use crate::packet::parse_checksum;
use crate::target::Context;
use crate::target::Target;
use crate::target::invoke;
use crate::token::Token;

/// Out-of-band interrupt request (Ctrl-C).
const INTERRUPT: u8 = 0x03;

/// Upper bound on the digits of an `m` packet field.
const MAX_FIELD_DIGITS: usize = 16;

/// Initial size of the receive buffer. A packet that has not seen its `#`
/// within this many bytes is dropped.
pub(crate) const PACKET_BUFFER_CAPACITY: usize = 0x8000;

pub(crate) struct Decoder<'a> {
    buf: &'a mut BytesMut,
    link: &'a Link,
    target: &'a Mutex<dyn Target>,
    debug: bool,
    strict_checksum: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a mut BytesMut, link: &'a Link, target: &'a Mutex<dyn Target>) -> Self {
        Decoder {
            buf,
            link,
            target,
            debug: false,
            strict_checksum: false,
        }
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn strict_checksum(mut self, strict: bool) -> Self {
        self.strict_checksum = strict;
        self
    }

    /// Decode the next command from the buffer.
    ///
    /// `Ok(None)` means the buffer holds no complete command yet. Malformed
    /// packets are consumed and yield [`Token::None`]. An `Err` is either a
    /// transport failure (the connection must be dropped) or a missing target
    /// capability (fatal).
    pub fn decode(&mut self) -> Result<Option<Token>, Error> {
        loop {
            let Some(&c) = self.buf.first() else {
                return Ok(None);
            };
            match c {
                b'+' => self.buf.advance(1),
                INTERRUPT => {
                    self.buf.advance(1);
                    if self.debug {
                        tracing::debug!("Got interrupt request");
                    }
                    invoke(self.target, self.context(), Capability::Interrupt, |t, cx| {
                        t.interrupt(cx)
                    })?;
                    return Ok(Some(Token::None));
                }
                b'$' => return self.packet(),
                other => {
                    self.buf.advance(1);
                    if self.debug {
                        tracing::debug!("Received unknown async byte {:#04x}", other);
                    }
                    return Ok(Some(Token::None));
                }
            }
        }
    }

    /// Split off one `$...#xx` frame, once all of it is buffered.
    fn packet(&mut self) -> Result<Option<Token>, Error> {
        let Some(hash) = self.buf.iter().position(|b| *b == b'#') else {
            if self.buf.len() > PACKET_BUFFER_CAPACITY {
                tracing::warn!(
                    "Dropping {} bytes of unterminated packet",
                    self.buf.len()
                );
                self.buf.clear();
                return Ok(Some(Token::None));
            }
            return Ok(None);
        };
        if self.buf.len() < hash + 3 {
            return Ok(None);
        }

        let frame = self.buf.split_to(hash + 3).freeze();
        let body = &frame[1..hash];
        let digits = &frame[hash + 1..];
        match self.command(body, digits) {
            Err(Error::PacketError(err)) => {
                if self.debug {
                    tracing::debug!(
                        "Dropping packet {:?}: {}",
                        PacketLogger::incoming(body, checksum(body)),
                        err
                    );
                }
                Ok(Some(Token::None))
            }
            other => other.map(Some),
        }
    }

    fn command(&self, body: &[u8], digits: &[u8]) -> Result<Token, Error> {
        self.verify(body, digits)?;
        let Some((&verb, args)) = body.split_first() else {
            return self.unsupported(body);
        };
        match verb {
            b'?' => self.simple(args, Token::Question),
            b's' => self.simple(args, Token::SingleStep),
            b'c' => self.simple(args, Token::Continue),
            b'k' => self.simple(args, Token::Kill),
            b'g' => {
                no_args(args)?;
                self.ack()?;
                invoke(self.target, self.context(), Capability::GetRegs, |t, cx| {
                    t.get_regs(cx)
                })?;
                Ok(Token::None)
            }
            b'm' => {
                let (addr, len) = read_mem_args(args)?;
                self.ack()?;
                invoke(self.target, self.context(), Capability::ReadMem, |t, cx| {
                    t.read_mem(cx, addr, len)
                })?;
                Ok(Token::None)
            }
            _ => self.unsupported(body),
        }
    }

    /// A single letter command handed over to the execution driver.
    fn simple(&self, args: &[u8], token: Token) -> Result<Token, Error> {
        no_args(args)?;
        self.ack()?;
        Ok(token)
    }

    fn unsupported(&self, body: &[u8]) -> Result<Token, Error> {
        if self.debug {
            tracing::debug!(
                "Unsupported command {:?}",
                PacketLogger::incoming(body, checksum(body))
            );
        }
        self.ack()?;
        self.link.send(b"")?;
        Ok(Token::None)
    }

    /// Compare the transmitted checksum digits against the payload. A
    /// mismatch is only fatal to the packet in strict mode.
    fn verify(&self, body: &[u8], digits: &[u8]) -> Result<(), Error> {
        let expected = parse_checksum(digits)?;
        let calculated = checksum(body);
        if self.debug {
            tracing::debug!("{:?}", PacketLogger::incoming(body, expected));
        }
        if expected != calculated {
            let err = PacketParseError::ChecksumMismatched {
                checksum: expected,
                calculated,
            };
            if self.strict_checksum {
                self.link.send_raw(Bytes::from_static(b"-"))?;
                return Err(err.into());
            }
            tracing::warn!("{}, accepting packet anyway", err);
        }
        Ok(())
    }

    fn context(&self) -> Context<'a> {
        Context::new(self.link)
    }

    fn ack(&self) -> Result<(), Error> {
        self.link.send_raw(Bytes::from_static(b"+"))
    }
}

fn no_args(args: &[u8]) -> Result<(), PacketParseError> {
    match args.first() {
        Some(&c) => Err(PacketParseError::UnexpectedByte(c)),
        None => Ok(()),
    }
}

/// `<addr>,<len>`, both hex.
fn read_mem_args(args: &[u8]) -> Result<(u64, usize), PacketParseError> {
    let comma = args
        .iter()
        .position(|b| *b == b',')
        .ok_or(PacketParseError::MissingSeparator(b','))?;
    // Both fields must be present: `m,4` or `m1000,` is rejected rather
    // than read as a zero address or length.
    let addr = hex_field(&args[..comma])?;
    let len = hex_field(&args[comma + 1..])?;
    Ok((addr, len))
}

fn hex_field<I>(field: &[u8]) -> Result<I, PacketParseError>
where
    I: num_traits::FromPrimitive
        + num_traits::Zero
        + num_traits::CheckedAdd
        + num_traits::CheckedMul,
{
    if let Some(&c) = field.iter().find(|c| !is_hex_digit(**c)) {
        return Err(PacketParseError::UnexpectedByte(c));
    }
    if field.len() > MAX_FIELD_DIGITS {
        return Err(PacketParseError::FieldTooLong(MAX_FIELD_DIGITS));
    }
    Ok(decode_hex(field)?)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        GetRegs,
        ReadMem(u64, usize),
        Interrupt,
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
        with_interrupt: bool,
    }

    impl Target for Recorder {
        fn get_regs(&mut self, cx: &mut Context<'_>) -> Option<()> {
            self.calls.push(Call::GetRegs);
            cx.send_hex(&[0; 4]).ok()
        }

        fn read_mem(&mut self, cx: &mut Context<'_>, addr: u64, len: usize) -> Option<()> {
            self.calls.push(Call::ReadMem(addr, len));
            cx.send_hex(&vec![0xaa; len]).ok()
        }

        fn interrupt(&mut self, _cx: &mut Context<'_>) -> Option<()> {
            if self.with_interrupt {
                self.calls.push(Call::Interrupt);
                Some(())
            } else {
                None
            }
        }
    }

    struct Harness {
        link: Link,
        wire: tokio::sync::mpsc::UnboundedReceiver<Bytes>,
        target: Arc<Mutex<Recorder>>,
        inbound: BytesMut,
        strict: bool,
    }

    impl Harness {
        fn new() -> Self {
            let link = Link::new();
            let wire = link.attach();
            Harness {
                link,
                wire,
                target: Arc::new(Mutex::new(Recorder::default())),
                inbound: BytesMut::new(),
                strict: false,
            }
        }

        /// Buffer `input` and decode one command.
        fn decode(&mut self, input: &[u8]) -> Result<Option<Token>, Error> {
            self.inbound.extend_from_slice(input);
            self.next()
        }

        /// Decode one command from what is already buffered.
        fn next(&mut self) -> Result<Option<Token>, Error> {
            let target: Arc<Mutex<dyn Target>> = self.target.clone();
            Decoder::new(&mut self.inbound, &self.link, &target)
                .debug(true)
                .strict_checksum(self.strict)
                .decode()
        }

        fn wire(&mut self) -> Vec<u8> {
            let mut out = Vec::new();
            while let Ok(frame) = self.wire.try_recv() {
                out.extend_from_slice(&frame);
            }
            out
        }

        fn calls(&self) -> Vec<Call> {
            self.target.lock().calls.clone()
        }
    }

    #[test]
    fn single_letter_commands_become_tokens() {
        let mut h = Harness::new();
        assert_eq!(h.decode(b"$?#3f").unwrap(), Some(Token::Question));
        assert_eq!(h.decode(b"+$s#73").unwrap(), Some(Token::SingleStep));
        assert_eq!(h.decode(b"$c#63").unwrap(), Some(Token::Continue));
        assert_eq!(h.decode(b"$k#6b").unwrap(), Some(Token::Kill));
        assert_eq!(h.wire(), b"++++");
        assert!(h.calls().is_empty());
        assert!(h.inbound.is_empty());
    }

    #[test]
    fn read_memory_parses_hex_fields() {
        let mut h = Harness::new();
        assert_eq!(h.decode(b"$m1000,4#8e").unwrap(), Some(Token::None));
        assert_eq!(h.calls(), vec![Call::ReadMem(0x1000, 4)]);
        assert_eq!(h.wire(), b"+$aaaaaaaa#08");

        assert_eq!(h.decode(b"$mFFFF,10#12").unwrap(), Some(Token::None));
        assert_eq!(h.calls()[1], Call::ReadMem(0xffff, 0x10));
    }

    #[test]
    fn read_memory_rejects_malformed_fields() {
        let mut h = Harness::new();
        let packets: [&[u8]; 6] = [
            // Empty address.
            b"$m,4#00",
            // Non hex digit in the address.
            b"$m10x0,4#00",
            // Seventeen digit address.
            b"$m12345678901234567,4#00",
            // Empty length.
            b"$m1000,#00",
            // No separator.
            b"$m1000#00",
            // Trailing bytes after a single letter command.
            b"$g0#00",
        ];
        for packet in packets {
            assert_eq!(h.decode(packet).unwrap(), Some(Token::None));
            assert!(h.inbound.is_empty());
        }
        assert!(h.calls().is_empty());
        assert!(h.wire().is_empty());
    }

    #[test]
    fn register_read_is_answered_synchronously() {
        let mut h = Harness::new();
        assert_eq!(h.decode(b"$g#67").unwrap(), Some(Token::None));
        assert_eq!(h.calls(), vec![Call::GetRegs]);
        assert_eq!(h.wire(), b"+$00000000#80");
    }

    #[test]
    fn unknown_command_gets_empty_reply() {
        let mut h = Harness::new();
        assert_eq!(h.decode(b"$z#7a").unwrap(), Some(Token::None));
        assert_eq!(h.wire(), b"+$#00");
        assert_eq!(h.decode(b"$#00").unwrap(), Some(Token::None));
        assert_eq!(h.wire(), b"+$#00");

        // Only the unknown packet is consumed, the next one stays buffered.
        assert_eq!(
            h.decode(b"$qSupported:multiprocess+#c6$?#3f").unwrap(),
            Some(Token::None)
        );
        assert_eq!(h.wire(), b"+$#00");
        assert_eq!(h.next().unwrap(), Some(Token::Question));
        assert_eq!(h.next().unwrap(), None);
    }

    #[test]
    fn checksum_mismatch_is_tolerated_unless_strict() {
        let mut h = Harness::new();
        assert_eq!(h.decode(b"$?#00").unwrap(), Some(Token::Question));
        assert_eq!(h.wire(), b"+");

        h.strict = true;
        assert_eq!(h.decode(b"$?#00").unwrap(), Some(Token::None));
        assert_eq!(h.decode(b"$m1000,4#00").unwrap(), Some(Token::None));
        assert_eq!(h.wire(), b"--");
        assert!(h.calls().is_empty());

        assert_eq!(h.decode(b"$?#3f").unwrap(), Some(Token::Question));
        assert_eq!(h.decode(b"$?#zz").unwrap(), Some(Token::None));
    }

    #[test]
    fn out_of_band_bytes() {
        let mut h = Harness::new();
        assert_eq!(h.decode(b"-").unwrap(), Some(Token::None));
        assert_eq!(h.decode(b"+++X").unwrap(), Some(Token::None));
        // A lone ack is consumed without producing a command.
        assert_eq!(h.decode(b"+").unwrap(), None);
        assert!(h.inbound.is_empty());

        let err = h.decode(b"\x03").unwrap_err();
        assert!(matches!(err, Error::MissingCapability(Capability::Interrupt)));

        h.target.lock().with_interrupt = true;
        assert_eq!(h.decode(b"\x03").unwrap(), Some(Token::None));
        assert_eq!(h.calls(), vec![Call::Interrupt]);
        assert!(h.wire().is_empty());
    }

    #[test]
    fn partial_packets_wait_for_the_rest() {
        let mut h = Harness::new();
        let pieces: [&[u8]; 4] = [b"$", b"m10", b"00,4#", b"8"];
        for piece in pieces {
            assert_eq!(h.decode(piece).unwrap(), None);
        }
        assert_eq!(&h.inbound[..], b"$m1000,4#8");
        assert!(h.wire().is_empty());

        assert_eq!(h.decode(b"e$?").unwrap(), Some(Token::None));
        assert_eq!(h.calls(), vec![Call::ReadMem(0x1000, 4)]);
        assert_eq!(h.next().unwrap(), None);
        assert_eq!(h.decode(b"#3f").unwrap(), Some(Token::Question));
        assert_eq!(h.wire(), b"+$aaaaaaaa#08+");
    }

    #[test]
    fn back_to_back_packets_decode_in_order() {
        let mut h = Harness::new();
        h.inbound.extend_from_slice(b"$?#3f+$s#73$k#6b");
        assert_eq!(h.next().unwrap(), Some(Token::Question));
        assert_eq!(h.next().unwrap(), Some(Token::SingleStep));
        assert_eq!(h.next().unwrap(), Some(Token::Kill));
        assert_eq!(h.next().unwrap(), None);
    }

    #[test]
    fn unterminated_packet_is_dropped() {
        let mut h = Harness::new();
        h.inbound.extend_from_slice(b"$");
        h.inbound
            .extend_from_slice(&vec![b'a'; PACKET_BUFFER_CAPACITY]);
        assert_eq!(h.next().unwrap(), Some(Token::None));
        assert!(h.inbound.is_empty());
        assert!(h.wire().is_empty());
    }
}
