/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! A stub in front of a fake one-cycle CPU. Its only state is a register
//! that counts executed cycles, which the debugger sees in every register
//! slot. A `c` runs ten cycles before the CPU stops again.

use clap::Parser;
use clap::ValueEnum;
use rspd::Context;
use rspd::KILLED;
use rspd::Session;
use rspd::Target;
use rspd_util::CommonStubArguments;

/// Cycles run by a continue before the CPU halts.
const CONTINUE_CYCLES: u32 = 10;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Xlen {
    #[value(name = "32")]
    X32,
    #[value(name = "64")]
    X64,
}

impl Xlen {
    /// Number of 32-bit slots in the `g` reply.
    fn reg_slots(self) -> usize {
        match self {
            Xlen::X32 => 312 * 2 / 8,
            Xlen::X64 => 560 * 2 / 8,
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

#[derive(Debug)]
struct Counter {
    xlen: Xlen,
    reg: u32,
    /// Cycles since the last halt.
    count: u32,
    cont: bool,
    interrupted: bool,
}

impl Counter {
    fn new(xlen: Xlen) -> Self {
        Counter {
            xlen,
            reg: 0,
            count: 0,
            cont: false,
            interrupted: false,
        }
    }

    /// Fetch, decode and execute one (imaginary) instruction.
    fn run(&mut self) -> i32 {
        self.count += 1;
        self.reg = self.reg.wrapping_add(1);
        1
    }

    /// Run one cycle. Returns the cycle result and whether the CPU halted.
    fn cycle(&mut self) -> (i32, bool) {
        let ret = self.run();
        if !self.cont || self.count >= CONTINUE_CYCLES {
            self.cont = false;
            self.count = 0;
            (ret, true)
        } else {
            (ret, false)
        }
    }

    fn step(&mut self, cx: &mut Context<'_>) -> i32 {
        let (ret, halted) = self.cycle();
        if halted {
            cx.stop();
        }
        ret
    }
}

impl Target for Counter {
    fn question(&mut self, cx: &mut Context<'_>) -> Option<i32> {
        if let Err(err) = cx.send("S05") {
            tracing::warn!("Dropping stop reply: {}", err);
        }
        Some(0)
    }

    fn get_regs(&mut self, cx: &mut Context<'_>) -> Option<()> {
        let bytes = self.reg.to_le_bytes();
        let slots = self.xlen.reg_slots();
        let sent = cx.reply_with(|w| {
            for _ in 0..slots {
                w.put_hex_encoded(&bytes);
            }
        });
        if let Err(err) = sent {
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

    fn stepi(&mut self, cx: &mut Context<'_>) -> Option<i32> {
        // An interrupt only matters to a running CPU.
        if std::mem::take(&mut self.interrupted) && cx.continuing() {
            self.cont = false;
            self.count = 0;
            return Some(-1);
        }
        if cx.continuing() && !self.cont {
            return self.cont(cx);
        }
        Some(self.step(cx))
    }

    fn cont(&mut self, cx: &mut Context<'_>) -> Option<i32> {
        if self.cont {
            tracing::warn!("Continue already in progress");
        }
        self.cont = true;
        Some(self.step(cx))
    }

    fn kill(&mut self, _cx: &mut Context<'_>) -> Option<i32> {
        tracing::info!("Killed after {} cycles", self.reg);
        Some(KILLED)
    }

    fn interrupt(&mut self, _cx: &mut Context<'_>) -> Option<()> {
        // Halt before the next cycle.
        self.interrupted = true;
        Some(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_guard = args.common.init_tracing();

    let mut session = Session::new(args.common.config(), Counter::new(args.xlen))?;
    eprintln!(" [counter stub] Waiting for gdb on port {}", session.port());

    while !session.is_killed() {
        if session.execute()? == 0 {
            tracing::error!(
                "execute returned 0, this should not happen (killed={})",
                session.is_killed()
            );
            break;
        }
    }

    session.shutdown()?;
    drop(log_guard); // Flush logs before exiting.
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_cycle_halts() {
        let mut cpu = Counter::new(Xlen::X32);
        assert_eq!(cpu.cycle(), (1, true));
        assert_eq!(cpu.cycle(), (1, true));
        assert_eq!(cpu.reg, 2);
        assert_eq!(cpu.count, 0);
    }

    #[test]
    fn continue_runs_ten_cycles() {
        let mut cpu = Counter::new(Xlen::X64);
        cpu.cont = true;
        for _ in 1..CONTINUE_CYCLES {
            assert_eq!(cpu.cycle(), (1, false));
        }
        assert_eq!(cpu.cycle(), (1, true));
        assert!(!cpu.cont);
        assert_eq!(cpu.reg, CONTINUE_CYCLES);
    }

    #[test]
    fn memory_reply_is_capped() {
        assert_eq!(memory_reply(0x1000, 4).unwrap(), b"66666666");
        assert_eq!(memory_reply(0x1000, MAX_MEM_REPLY), None);
        assert_eq!(memory_reply(0x1000, usize::MAX), None);
    }

    #[test]
    fn register_file_size() {
        assert_eq!(Xlen::X32.reg_slots() * 8, 624);
        assert_eq!(Xlen::X64.reg_slots() * 8, 1120);
    }
}
