/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A stub in front of a target that never runs: it is always stopped with
//! SIGTRAP, its registers read as zero and memory at `addr` reads as the
//! decimal digit `addr % 10`.

use clap::Parser;
use clap::ValueEnum;
use rspd::Context;
use rspd::Session;
use rspd::Target;
use rspd_util::CommonStubArguments;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Xlen {
    #[value(name = "32")]
    X32,
    #[value(name = "64")]
    X64,
}

impl Xlen {
    /// Size of the `g` reply in hex digits.
    fn regs_len(self) -> usize {
        match self {
            Xlen::X32 => 312 * 2,
            Xlen::X64 => 560 * 2,
        }
    }
}

#[derive(Debug, Parser)]
struct Args {
    #[clap(flatten)]
    common: CommonStubArguments,

    /// Register width reported to the debugger.
    #[clap(long, value_enum, default_value = "32")]
    xlen: Xlen,
}

/// Largest `m` reply, in hex digits.
const MAX_MEM_REPLY: usize = 0x4000;

/// `len` bytes at `addr`, as the hex digits of the reply. `None` when the
/// reply would not fit.
fn memory_reply(addr: u64, len: usize) -> Option<Vec<u8>> {
    let digits = len.checked_mul(2).filter(|n| *n <= MAX_MEM_REPLY)?;
    // `addr % 10` always fits a digit.
    Some(vec![b'0' + (addr % 10) as u8; digits])
}

struct Echo {
    xlen: Xlen,
    interrupted: bool,
}

impl Target for Echo {
    fn question(&mut self, cx: &mut Context<'_>) -> Option<i32> {
        if let Err(err) = cx.send("S05") {
            tracing::warn!("Dropping stop reply: {}", err);
        }
        Some(0)
    }

    fn get_regs(&mut self, cx: &mut Context<'_>) -> Option<()> {
        if let Err(err) = cx.send(vec![b'0'; self.xlen.regs_len()]) {
            tracing::warn!("Dropping register reply: {}", err);
        }
        Some(())
    }

    fn read_mem(&mut self, cx: &mut Context<'_>, addr: u64, len: usize) -> Option<()> {
        let sent = match memory_reply(addr, len) {
            Some(digits) => cx.send(digits),
            None => {
                tracing::warn!("Refusing to read {:#x} bytes at {:#x}", len, addr);
                cx.send("E01")
            }
        };
        if let Err(err) = sent {
            tracing::warn!("Dropping memory reply: {}", err);
        }
        Some(())
    }

    fn stepi(&mut self, _cx: &mut Context<'_>) -> Option<i32> {
        // Nothing ever executes. A pending interrupt ends a continue.
        if std::mem::take(&mut self.interrupted) {
            return Some(-1);
        }
        Some(0)
    }

    fn kill(&mut self, _cx: &mut Context<'_>) -> Option<i32> {
        tracing::info!("Killed by the debugger");
        Some(0)
    }

    fn interrupt(&mut self, _cx: &mut Context<'_>) -> Option<()> {
        self.interrupted = true;
        Some(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_guard = args.common.init_tracing();

    let target = Echo {
        xlen: args.xlen,
        interrupted: false,
    };
    let mut session = Session::new(args.common.config(), target)?;
    eprintln!(" [echo stub] Waiting for gdb on port {}", session.port());

    while !session.is_killed() {
        let ret = session.execute()?;
        if ret != 0 {
            tracing::info!("execute returned {}", ret);
            break;
        }
    }

    session.shutdown()?;
    drop(log_guard); // Flush logs before exiting.
    Ok(())
}
