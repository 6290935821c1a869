/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::sync::Arc;

use bytes::Bytes;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::response::PacketWriter;

/// The send primitive shared by the network thread, the execution driver and
/// target callbacks.
///
/// Frames are queued on the current connection's outbound channel, and the
/// network thread is the only writer to the control socket. The slot is
/// swapped under a lock whenever a debugger attaches or the connection is
/// invalidated, so a send never races with descriptor teardown: it either
/// lands on the live connection or fails with [`Error::Detached`].
#[derive(Clone, Default)]
pub struct Link {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Bytes>>>>,
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route subsequent sends to a fresh outbound queue, replacing (and
    /// thereby closing) any previous one.
    pub(crate) fn attach(&self) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.tx.lock() = Some(tx);
        rx
    }

    pub(crate) fn detach(&self) {
        self.tx.lock().take();
    }

    pub fn is_attached(&self) -> bool {
        self.tx.lock().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Queue already framed bytes (or a bare `+`/`-`).
    pub(crate) fn send_raw(&self, bytes: Bytes) -> Result<(), Error> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(Error::Detached)?;
        tx.send(bytes).map_err(|_| Error::Detached)
    }

    /// Send `payload` as one `$payload#xx` packet.
    pub fn send(&self, payload: impl AsRef<[u8]>) -> Result<(), Error> {
        self.reply_with(|w| w.put_slice(payload.as_ref()))
    }

    /// Send `data` hex encoded, two digits per byte.
    pub fn send_hex(&self, data: &[u8]) -> Result<(), Error> {
        self.reply_with(|w| w.put_hex_encoded(data))
    }

    /// Build a packet with `f` and send it.
    pub fn reply_with<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut PacketWriter),
    {
        let mut writer = PacketWriter::new(BytesMut::new());
        f(&mut writer);
        self.send_raw(writer.finish())
    }
}
