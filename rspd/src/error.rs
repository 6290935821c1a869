/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::fmt;
use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::hex::GdbHexError;
use crate::packet::PacketParseError;

/// A slot of the [`Target`](crate::Target) capability set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Question,
    GetRegs,
    ReadMem,
    Stepi,
    Cont,
    Kill,
    Interrupt,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Capability::Question => "question",
            Capability::GetRegs => "get_regs",
            Capability::ReadMem => "read_mem",
            Capability::Stepi => "stepi",
            Capability::Cont => "cont",
            Capability::Kill => "kill",
            Capability::Interrupt => "intr",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to listen on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("Failed to accept gdb client connection")]
    Accept {
        #[source]
        source: io::Error,
    },
    #[error("Failed to start the network session thread")]
    Spawn {
        #[source]
        source: io::Error,
    },
    #[error("Connection reset")]
    ConnReset,
    #[error("No debugger attached")]
    Detached,
    #[error("Target does not support the `{0}` callback")]
    MissingCapability(Capability),
    #[error("Network session thread exited")]
    SessionClosed,
    #[error("Network session thread panicked")]
    SessionPanicked,
    #[error(transparent)]
    PacketError(#[from] PacketParseError),
}

impl From<GdbHexError> for Error {
    fn from(err: GdbHexError) -> Self {
        Error::PacketError(err.into())
    }
}

impl Error {
    /// Transport errors only tear down the current connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::ConnReset | Error::Detached)
    }
}
