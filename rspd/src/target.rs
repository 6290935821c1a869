/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use parking_lot::Mutex;

use crate::error::Capability;
use crate::error::Error;
use crate::link::Link;
use crate::response::PacketWriter;

/// The capability set of a stepping target (emulator, simulator, device
/// proxy).
///
/// Every slot is optional. A default method returns `None`, meaning the
/// target does not provide it. Missing `question`, `get_regs`, `read_mem`,
/// `stepi` and `interrupt` are configuration errors reported the first time
/// the debugger needs them; a missing `kill` is tolerated.
///
/// Replies are pushed through the [`Context`]. `get_regs`, `read_mem` and
/// `interrupt` run on the network thread; the other slots run on whichever
/// thread calls [`Session::execute`](crate::Session::execute).
pub trait Target: Send + 'static {
    /// Report the current stop status, e.g. `S05`. Returns a status code; a
    /// non-zero value is handed back to the host.
    fn question(&mut self, _cx: &mut Context<'_>) -> Option<i32> {
        None
    }

    /// Reply with the register file, hex encoded.
    fn get_regs(&mut self, _cx: &mut Context<'_>) -> Option<()> {
        None
    }

    /// Reply with `len` bytes of memory at `addr`, hex encoded.
    fn read_mem(&mut self, _cx: &mut Context<'_>, _addr: u64, _len: usize) -> Option<()> {
        None
    }

    /// Execute one instruction.
    ///
    /// A negative result is an implicit stop, zero means nothing happened
    /// yet, and a positive result is one unit of completed work.
    fn stepi(&mut self, _cx: &mut Context<'_>) -> Option<i32> {
        None
    }

    /// Continue acknowledgement hook. The stub never calls it; hosts that
    /// need it invoke it themselves.
    fn cont(&mut self, _cx: &mut Context<'_>) -> Option<i32> {
        None
    }

    fn kill(&mut self, _cx: &mut Context<'_>) -> Option<i32> {
        None
    }

    /// The debugger sent an out-of-band interrupt (Ctrl-C).
    fn interrupt(&mut self, _cx: &mut Context<'_>) -> Option<()> {
        None
    }
}

/// Handle given to target callbacks.
pub struct Context<'a> {
    link: &'a Link,
    continuing: bool,
    stop_requested: bool,
}

impl<'a> Context<'a> {
    pub(crate) fn new(link: &'a Link) -> Self {
        Self {
            link,
            continuing: false,
            stop_requested: false,
        }
    }

    pub(crate) fn with_continuing(mut self, continuing: bool) -> Self {
        self.continuing = continuing;
        self
    }

    /// Send `payload` to the debugger as one packet.
    pub fn send(&self, payload: impl AsRef<[u8]>) -> Result<(), Error> {
        self.link.send(payload)
    }

    /// Send `data` to the debugger hex encoded.
    pub fn send_hex(&self, data: &[u8]) -> Result<(), Error> {
        self.link.send_hex(data)
    }

    pub fn reply_with<F>(&self, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut PacketWriter),
    {
        self.link.reply_with(f)
    }

    pub fn link(&self) -> &Link {
        self.link
    }

    /// True while the debugger has the target running continuously, i.e.
    /// `stepi` is being called on behalf of a `c` command rather than `s`.
    pub fn continuing(&self) -> bool {
        self.continuing
    }

    /// Ask the execution driver to report a halt once this callback returns.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}

/// Result of one callback invocation.
pub(crate) struct Outcome<R> {
    pub value: R,
    pub stop_requested: bool,
}

/// Run one capability slot under the target lock. `None` from the slot
/// becomes [`Error::MissingCapability`].
pub(crate) fn invoke<R, F>(
    target: &Mutex<dyn Target>,
    mut cx: Context<'_>,
    capability: Capability,
    f: F,
) -> Result<Outcome<R>, Error>
where
    F: FnOnce(&mut dyn Target, &mut Context<'_>) -> Option<R>,
{
    let value = {
        let mut target = target.lock();
        f(&mut *target, &mut cx)
    }
    .ok_or(Error::MissingCapability(capability))?;
    Ok(Outcome {
        value,
        stop_requested: cx.stop_requested,
    })
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;

    struct OnlyQuestion;

    impl Target for OnlyQuestion {
        fn question(&mut self, cx: &mut Context<'_>) -> Option<i32> {
            cx.stop();
            Some(7)
        }
    }

    #[test]
    fn invoke_reports_missing_slots() {
        let target: Arc<Mutex<dyn Target>> = Arc::new(Mutex::new(OnlyQuestion));
        let link = Link::new();

        let cx = Context::new(&link).with_continuing(true);
        let outcome = invoke(&target, cx, Capability::Question, |t, cx| {
            assert!(cx.continuing());
            t.question(cx)
        })
        .unwrap();
        assert_eq!(outcome.value, 7);
        assert!(outcome.stop_requested);

        let cx = Context::new(&link);
        let err = invoke(&target, cx, Capability::GetRegs, |t, cx| t.get_regs(cx))
            .err()
            .unwrap();
        assert!(matches!(err, Error::MissingCapability(Capability::GetRegs)));
        assert_eq!(
            err.to_string(),
            "Target does not support the `get_regs` callback"
        );
    }
}
