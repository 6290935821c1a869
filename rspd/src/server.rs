/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use bytes::Bytes;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::config::Config;
use crate::decoder::Decoder;
use crate::decoder::PACKET_BUFFER_CAPACITY;
use crate::error::Error;
use crate::link::Link;
use crate::logger::PacketLogger;
use crate::target::Target;
use crate::token::Notice;
use crate::token::Token;

/// Lifecycle of the control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// The listening socket is not bound yet, or the network thread exited.
    Invalid,
    /// Waiting for a debugger.
    Listening,
    /// A debugger is attached.
    Accepted,
}

/// The attached debugger.
struct Connection {
    reader: OwnedReadHalf,
    /// Received bytes not yet decoded, including any partial packet.
    inbound: BytesMut,
    writer: OwnedWriteHalf,
    /// Frames queued through the [`Link`].
    outbound: mpsc::UnboundedReceiver<Bytes>,
    peer: SocketAddr,
}

enum Event {
    Notice(Option<Notice>),
    Outbound(Option<Bytes>),
    Read(io::Result<usize>),
    Accepted(io::Result<(TcpStream, SocketAddr)>),
}

/// Owns every socket. Accepts one debugger at a time, decodes its packets
/// and forwards one [`Token`] per complete command to the execution driver.
///
/// The socket is only ever awaited from the `select!` below, so queued
/// replies keep flowing while a packet is still arriving.
pub(crate) struct NetworkSession {
    pub config: Config,
    pub link: Link,
    pub target: Arc<Mutex<dyn Target>>,
    pub token_tx: mpsc::Sender<Token>,
    pub notice_rx: mpsc::Receiver<Notice>,
    pub state_tx: watch::Sender<ConnState>,
}

impl NetworkSession {
    /// Run on a dedicated thread with its own single threaded runtime.
    pub fn spawn(
        self,
        listener: std::net::TcpListener,
    ) -> Result<JoinHandle<Result<(), Error>>, Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()
            .map_err(|source| Error::Spawn { source })?;
        thread::Builder::new()
            .name("rspd-net".to_owned())
            .spawn(move || runtime.block_on(self.run(listener)))
            .map_err(|source| Error::Spawn { source })
    }

    async fn run(mut self, listener: std::net::TcpListener) -> Result<(), Error> {
        let addr = self.config.addr();
        let listener =
            TcpListener::from_std(listener).map_err(|source| Error::Bind { addr, source })?;
        let port = listener
            .local_addr()
            .map_or(self.config.port, |addr| addr.port());

        tracing::info!("Listening on port {}..", port);
        self.state_tx.send_replace(ConnState::Listening);
        if !self.forward(Token::StateChanged).await {
            return Ok(());
        }

        let mut conn: Option<Connection> = None;
        let result = loop {
            let event = match conn.as_mut() {
                Some(c) => tokio::select! {
                    biased;
                    notice = self.notice_rx.recv() => Event::Notice(notice),
                    frame = c.outbound.recv() => Event::Outbound(frame),
                    read = c.reader.read_buf(&mut c.inbound) => Event::Read(read),
                    accepted = listener.accept() => Event::Accepted(accepted),
                },
                None => tokio::select! {
                    biased;
                    notice = self.notice_rx.recv() => Event::Notice(notice),
                    accepted = listener.accept() => Event::Accepted(accepted),
                },
            };

            match event {
                Event::Notice(Some(notice)) => {
                    if self.config.debug {
                        tracing::debug!("Got notice {:?}", notice);
                    }
                }
                Event::Notice(None) => {
                    tracing::info!("Session closed, stopping listener on port {}", port);
                    break Ok(());
                }
                Event::Outbound(Some(frame)) => {
                    if let Some(c) = conn.as_mut() {
                        if let Err(err) = self.write(c, &frame).await {
                            self.hangup(&mut conn, port, &err);
                        }
                    }
                }
                Event::Outbound(None) => {
                    self.hangup(&mut conn, port, &io::ErrorKind::NotConnected.into());
                }
                Event::Read(Ok(0)) => {
                    self.hangup(&mut conn, port, &io::ErrorKind::UnexpectedEof.into());
                    if !self.forward(Token::None).await {
                        break Ok(());
                    }
                }
                Event::Read(Err(err)) => {
                    self.hangup(&mut conn, port, &err);
                    if !self.forward(Token::None).await {
                        break Ok(());
                    }
                }
                Event::Read(Ok(n)) => {
                    if self.config.debug {
                        tracing::trace!("Read {} bytes", n);
                    }
                    match self.dispatch(&mut conn, port).await {
                        Ok(true) => {}
                        Ok(false) => break Ok(()),
                        Err(err) => {
                            tracing::error!("Fatal error while decoding: {}", err);
                            break Err(err);
                        }
                    }
                }
                Event::Accepted(Err(source)) => {
                    tracing::error!("accept: {}", source);
                    break Err(Error::Accept { source });
                }
                Event::Accepted(Ok((stream, peer))) => {
                    if let Some(old) = conn.take() {
                        tracing::warn!("Replacing connection from {}", old.peer);
                    }
                    conn = Some(self.attach(stream, peer));
                    tracing::info!("Accepted {} on port {}", peer, port);
                }
            }
        };

        drop(conn);
        self.link.detach();
        self.state_tx.send_replace(ConnState::Invalid);
        result
    }

    fn attach(&self, stream: TcpStream, peer: SocketAddr) -> Connection {
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay: {}", err);
        }
        let (reader, writer) = stream.into_split();
        let outbound = self.link.attach();
        self.state_tx.send_replace(ConnState::Accepted);
        Connection {
            reader,
            inbound: BytesMut::with_capacity(PACKET_BUFFER_CAPACITY),
            writer,
            outbound,
            peer,
        }
    }

    async fn write(&self, c: &mut Connection, frame: &Bytes) -> io::Result<()> {
        if self.config.debug {
            tracing::debug!("{:?}", PacketLogger::raw(frame));
        }
        c.writer.write_all(frame).await?;
        c.writer.flush().await
    }

    /// Decode and forward every complete command buffered for the
    /// connection. `Ok(false)` once the driver is gone.
    async fn dispatch(&self, conn: &mut Option<Connection>, port: u16) -> Result<bool, Error> {
        loop {
            let Some(c) = conn.as_mut() else {
                return Ok(true);
            };
            let decoded = Decoder::new(&mut c.inbound, &self.link, &self.target)
                .debug(self.config.debug)
                .strict_checksum(self.config.strict_checksum)
                .decode();
            let token = match decoded {
                Ok(Some(token)) => token,
                Ok(None) => return Ok(true),
                Err(err) if err.is_transport() => {
                    self.hangup(conn, port, &io::ErrorKind::NotConnected.into());
                    Token::None
                }
                Err(err) => return Err(err),
            };
            if self.config.debug {
                tracing::debug!("Forwarding {:?}", token);
            }
            if !self.forward(token).await {
                return Ok(false);
            }
        }
    }

    /// Drop the control connection and go back to listening.
    fn hangup(&self, conn: &mut Option<Connection>, port: u16, reason: &io::Error) {
        if let Some(c) = conn.take() {
            tracing::info!("Connection from {} closed: {}", c.peer, reason);
        }
        self.link.detach();
        tracing::info!("Listening on port {}..", port);
        self.state_tx.send_replace(ConnState::Listening);
    }

    /// Hand a token to the driver. `false` once the driver is gone.
    async fn forward(&self, token: Token) -> bool {
        if self.token_tx.send(token).await.is_err() {
            tracing::info!("Execution driver went away");
            return false;
        }
        true
    }
}
