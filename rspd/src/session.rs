/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;

use crate::config::Config;
use crate::error::Capability;
use crate::error::Error;
use crate::link::Link;
use crate::server::ConnState;
use crate::server::NetworkSession;
use crate::target::Context;
use crate::target::Outcome;
use crate::target::Target;
use crate::target::invoke;
use crate::token::Notice;
use crate::token::Token;

/// Returned by [`Session::execute`] once the debugger killed the session.
pub const KILLED: i32 = -1;

/// A debug stub session: the network thread plus the execution driver.
///
/// The network thread is started by [`Session::new`] and runs until the
/// session is dropped or [`shut down`](Session::shutdown). The host drives
/// the target by calling [`Session::execute`] from its own loop.
pub struct Session {
    config: Config,
    local_addr: SocketAddr,
    link: Link,
    target: Arc<Mutex<dyn Target>>,
    token_rx: mpsc::Receiver<Token>,
    notice_tx: Option<mpsc::Sender<Notice>>,
    state_rx: watch::Receiver<ConnState>,
    thread: Option<JoinHandle<Result<(), Error>>>,

    /// In a debugger requested continuous run.
    active: bool,
    /// The target reported a halt since the last run request.
    stopped: bool,
    killed: bool,
}

impl Session {
    /// Bind the control port and start the network thread.
    pub fn new<T: Target>(config: Config, target: T) -> Result<Self, Error> {
        let addr = config.addr();
        let listener = std::net::TcpListener::bind(addr)
            .and_then(|listener| listener.set_nonblocking(true).map(|_| listener))
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| Error::Bind { addr, source })?;

        let target: Arc<Mutex<dyn Target>> = Arc::new(Mutex::new(target));
        let link = Link::new();
        let capacity = config.token_capacity.max(1);
        let (token_tx, token_rx) = mpsc::channel(capacity);
        let (notice_tx, notice_rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(ConnState::Invalid);

        let thread = NetworkSession {
            config: config.clone(),
            link: link.clone(),
            target: target.clone(),
            token_tx,
            notice_rx,
            state_tx,
        }
        .spawn(listener)?;

        tracing::debug!("Session bound to {}", local_addr);

        Ok(Session {
            config,
            local_addr,
            link,
            target,
            token_rx,
            notice_tx: Some(notice_tx),
            state_rx,
            thread: Some(thread),
            active: false,
            stopped: false,
            killed: false,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The send primitive, for replies issued outside target callbacks.
    pub fn link(&self) -> Link {
        self.link.clone()
    }

    pub fn state(&self) -> ConnState {
        *self.state_rx.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Perform at most one unit of work and return.
    ///
    /// A positive value means the target made progress and the host should
    /// call again. [`KILLED`] (negative) means the debugger killed the
    /// session. Zero is never returned by the stub itself and should be
    /// treated as an anomaly by the host.
    ///
    /// Blocks while the target is halted and no debugger command is pending.
    /// Must not be called from within an async runtime.
    pub fn execute(&mut self) -> Result<i32, Error> {
        if self.killed {
            return Ok(KILLED);
        }
        loop {
            if self.active {
                let ret = self.step()?;
                if ret < 0 {
                    let status = self.report_stopped()?;
                    if status != 0 {
                        return Ok(status);
                    }
                } else if ret > 0 {
                    return Ok(ret);
                }
            }

            let token = if self.active {
                // Keep stepping rather than stall when the debugger is quiet.
                match self.token_rx.try_recv() {
                    Ok(token) => token,
                    Err(TryRecvError::Empty) => continue,
                    Err(TryRecvError::Disconnected) => return Err(self.network_failure()),
                }
            } else {
                match self.token_rx.blocking_recv() {
                    Some(token) => token,
                    None => return Err(self.network_failure()),
                }
            };

            if self.config.debug {
                tracing::debug!(
                    "Got {:?} (active={} stopped={})",
                    token,
                    self.active,
                    self.stopped
                );
            }

            match token {
                Token::None | Token::StateChanged => {}
                Token::Question => {
                    let status = self.question()?;
                    if status != 0 {
                        return Ok(status);
                    }
                }
                Token::Continue => {
                    self.active = true;
                    self.stopped = false;
                }
                Token::SingleStep => {
                    let outcome = self.stepi()?;
                    if self.config.debug {
                        tracing::debug!("stepi returned {}", outcome.value);
                    }
                    let status = self.report_stopped()?;
                    if status != 0 {
                        return Ok(status);
                    }
                }
                Token::Kill => {
                    self.killed = true;
                    self.active = false;
                    match invoke(&self.target, self.context(), Capability::Kill, |t, cx| {
                        t.kill(cx)
                    }) {
                        Ok(outcome) => tracing::debug!("kill returned {}", outcome.value),
                        Err(err) => tracing::warn!("{}, killing the session anyway", err),
                    }
                    return Ok(KILLED);
                }
            }
        }
    }

    /// Report a halt: leave the continuous run and send the stop status.
    /// Returns the status code of the target's `question` callback.
    pub fn stopped(&mut self) -> Result<i32, Error> {
        self.report_stopped()
    }

    /// Stop the network thread and wait for it to exit.
    pub fn shutdown(mut self) -> Result<(), Error> {
        self.close();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| Error::SessionPanicked)?,
            None => Ok(()),
        }
    }

    /// One step of a continuous run. A stop requested by the target from
    /// within the callback is reported here, unless the step result already
    /// signals one.
    fn step(&mut self) -> Result<i32, Error> {
        let outcome = self.stepi()?;
        if self.config.debug {
            tracing::debug!("active stepi returned {}", outcome.value);
        }
        if outcome.stop_requested && outcome.value >= 0 {
            self.report_stopped()?;
        }
        Ok(outcome.value)
    }

    fn stepi(&self) -> Result<Outcome<i32>, Error> {
        invoke(&self.target, self.context(), Capability::Stepi, |t, cx| t.stepi(cx))
    }

    fn context(&self) -> Context<'_> {
        Context::new(&self.link).with_continuing(self.active)
    }

    fn question(&mut self) -> Result<i32, Error> {
        let outcome = invoke(&self.target, self.context(), Capability::Question, |t, cx| {
            t.question(cx)
        })?;
        Ok(outcome.value)
    }

    fn report_stopped(&mut self) -> Result<i32, Error> {
        self.active = false;
        self.stopped = true;
        if let Some(tx) = self.notice_tx.as_ref() {
            notify(tx, Notice::Stopped);
        }
        self.question()
    }

    /// The token channel closed: collect why the network thread exited.
    fn network_failure(&mut self) -> Error {
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(Err(err))) => err,
            Some(Err(_)) => Error::SessionPanicked,
            Some(Ok(Ok(()))) | None => Error::SessionClosed,
        }
    }

    fn close(&mut self) {
        // Closing the notice channel asks the network thread to exit.
        self.notice_tx.take();
        self.token_rx.close();
        self.link.detach();
    }
}

/// Post a notice without blocking the driver. The driver must not wait on
/// the network thread, which may itself be waiting in `forward`.
///
/// Notices coalesce: `Stopped` is the only notice, so a full channel
/// already holds an undelivered `Stopped` and the new one is redundant.
/// Returns whether the notice was queued.
fn notify(tx: &mpsc::Sender<Notice>, notice: Notice) -> bool {
    match tx.try_send(notice) {
        Ok(()) => true,
        Err(TrySendError::Full(notice)) => {
            tracing::debug!("{:?} already pending, coalescing", notice);
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
