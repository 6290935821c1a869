/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

/// One decoded debugger request, sent from the network thread to the
/// execution driver. Exactly one token is produced per complete command
/// or out-of-band byte. A partial packet produces none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Nothing for the driver to do: the packet was answered on the network
    /// thread, discarded, or the connection dropped.
    None,
    /// The connection state machine moved (the listener is up).
    StateChanged,
    /// `?`
    Question,
    /// `s`
    SingleStep,
    /// `c`
    Continue,
    /// `k`
    Kill,
}

/// Host originated notification, sent from the execution driver to the
/// network thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// The target reported a halt.
    Stopped,
}
