/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A debug stub speaking a subset of the GDB remote serial protocol.
//!
//! A [`Session`] listens for one debugger at a time on a TCP port. A
//! dedicated network thread decodes incoming packets; status queries, step,
//! continue and kill requests are handed to the host, which drives the
//! [`Target`] by calling [`Session::execute`] from its own loop. Each call
//! performs at most one unit of target work:
//!
//! ```no_run
//! use rspd::{Config, Context, Session, Target};
//!
//! struct Cpu;
//!
//! impl Target for Cpu {
//!     fn question(&mut self, cx: &mut Context<'_>) -> Option<i32> {
//!         let _ = cx.send("S05");
//!         Some(1)
//!     }
//!
//!     fn stepi(&mut self, _cx: &mut Context<'_>) -> Option<i32> {
//!         Some(1)
//!     }
//! }
//!
//! let mut session = Session::new(Config::new(1234), Cpu)?;
//! while session.execute()? > 0 {}
//! # Ok::<(), rspd::Error>(())
//! ```

mod config;
mod decoder;
mod error;
mod hex;
mod link;
mod logger;
pub mod packet;
mod response;
mod server;
mod session;
mod target;
mod token;

pub use config::Config;
pub use config::DEFAULT_PORT;
pub use config::DEFAULT_TOKEN_CAPACITY;
pub use error::Capability;
pub use error::Error;
pub use hex::GdbHexError;
pub use link::Link;
pub use packet::PacketParseError;
pub use response::PacketWriter;
pub use server::ConnState;
pub use session::KILLED;
pub use session::Session;
pub use target::Context;
pub use target::Target;
