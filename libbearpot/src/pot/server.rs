// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The ssh front door. One `PotServer` value per listener, all
//! sharing the same core; russh builds a `ConnHandler` per inbound
//! connection.
//!
//! Authentication takes anything, that is the whole point, but only
//! while there is a free seat under the max user count. After the
//! channel opens the handler does its bookkeeping in middleware
//! order: session accounting, the login event, then exec vs
//! interactive dispatch with a pty gate in front of the interactive
//! path. A crashing session is isolated to its own connection task
//! and never touches the accept loop.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use russh::{
    Channel, ChannelId, CryptoVec,
    server::{self, Auth, Handle, Msg, Session as SshSession},
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

use crate::{
    core::Core,
    pot::{commands, keys::Decoder, session::Session},
};

const ENTER_ALT_SCREEN: &[u8] = b"\x1b[?1049h";
const EXIT_ALT_SCREEN: &[u8] = b"\x1b[?1049l";

#[derive(Clone)]
pub struct PotServer {
    core: Arc<Core>,
    shutdown: watch::Receiver<bool>,
    conn_counter: Arc<AtomicUsize>,
}

impl PotServer {
    pub fn new(core: Arc<Core>, shutdown: watch::Receiver<bool>) -> PotServer {
        PotServer { core, shutdown, conn_counter: Arc::new(AtomicUsize::new(0)) }
    }
}

impl server::Server for PotServer {
    type Handler = ConnHandler;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> ConnHandler {
        let conn_id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        info!("new connection cid={} peer={:?}", conn_id, peer);
        ConnHandler {
            core: Arc::clone(&self.core),
            shutdown: self.shutdown.clone(),
            conn_id,
            peer: peer.map(|a| a.to_string()).unwrap_or_else(|| String::from("unknown")),
            user: String::new(),
            counted: false,
            pty_size: None,
            channels: HashMap::new(),
            input_tx: None,
        }
    }

    fn handle_session_error(&mut self, error: <Self::Handler as server::Handler>::Error) {
        // per-session errors never propagate to the accept loop
        debug!("session error: {:?}", error);
    }
}

/// Input forwarded from the connection callbacks to the interactive
/// session task.
enum SessionInput {
    Data(Vec<u8>),
    Resize(usize, usize),
}

pub struct ConnHandler {
    core: Arc<Core>,
    shutdown: watch::Receiver<bool>,
    conn_id: usize,
    peer: String,
    user: String,
    /// Whether this connection holds a seat in the active user table.
    counted: bool,
    pty_size: Option<(usize, usize)>,
    channels: HashMap<ChannelId, Channel<Msg>>,
    input_tx: Option<mpsc::UnboundedSender<SessionInput>>,
}

impl server::Handler for ConnHandler {
    type Error = anyhow::Error;

    #[instrument(skip_all, fields(cid = self.conn_id))]
    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        // the credentials are the intel
        info!("authorization used: {}, {}", user, password);

        if !self.core.admit(user) {
            return Ok(Auth::Reject { proceed_with_methods: None, partial_success: false });
        }

        self.user = String::from(user);
        Ok(Auth::Accept)
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut SshSession,
    ) -> Result<bool, Self::Error> {
        if !self.counted {
            self.counted = true;
            self.core.user_enter(&self.user);
            self.core.session_opened();

            if let Err(err) =
                self.core.record_event(&self.user, &self.peer, true, "login", "Logged in!")
            {
                warn!("saving login event: {:?}", err);
            }
        }

        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        debug!("pty requested term={} {}x{}", term, col_width, row_height);
        self.pty_size = Some((col_width as usize, row_height as usize));
        session.channel_success(channel)?;
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        self.pty_size = Some((col_width as usize, row_height as usize));
        if let Some(tx) = &self.input_tx {
            let _ = tx.send(SessionInput::Resize(col_width as usize, row_height as usize));
        }
        Ok(())
    }

    /// A raw `ssh host cmd` style request: run the one line through
    /// the command engine synchronously and hand back the text.
    #[instrument(skip_all, fields(cid = self.conn_id))]
    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        let line = String::from_utf8_lossy(data).to_string();
        info!("exec from {}: {}", self.peer, line);

        if let Err(err) = self.core.record_event(&self.user, &self.peer, true, "typed", &line) {
            warn!("saving exec event: {:?}", err);
        }

        let home = self
            .core
            .vfs
            .resolve(&self.core.vfs.root, &self.core.vfs.home)
            .unwrap_or_else(|_| Arc::clone(&self.core.vfs.root));
        let msgs = commands::run_line(&self.core.vfs, &home, &self.user, &self.user, &line);
        let out = commands::render_plain(&msgs).replace('\n', "\r\n");

        session.channel_success(channel)?;
        session.data(channel, CryptoVec::from(out.into_bytes()))?;
        session.exit_status_request(channel, 0)?;
        session.eof(channel)?;
        session.close(channel)?;
        Ok(())
    }

    #[instrument(skip_all, fields(cid = self.conn_id))]
    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        session.channel_success(channel)?;

        // interactive mode is all full screen redraws, no pty no dice
        let Some((width, height)) = self.pty_size else {
            session.data(
                channel,
                CryptoVec::from(b"Requires an active PTY\r\n".to_vec()),
            )?;
            session.exit_status_request(channel, 1)?;
            session.eof(channel)?;
            session.close(channel)?;
            return Ok(());
        };

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        self.input_tx = Some(input_tx);

        let driver = SessionDriver {
            core: Arc::clone(&self.core),
            handle: session.handle(),
            channel,
            sub_name: format!("ssh-{}", self.conn_id),
            user: self.user.clone(),
            peer: self.peer.clone(),
            width,
            height,
        };
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move { driver.run(input_rx, shutdown).await });

        Ok(())
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        if let Some(tx) = &self.input_tx {
            let _ = tx.send(SessionInput::Data(data.to_vec()));
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        self.input_tx = None;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut SshSession,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        self.input_tx = None;
        Ok(())
    }
}

impl Drop for ConnHandler {
    fn drop(&mut self) {
        // release the seat no matter how the connection ended
        if self.counted {
            self.core.user_exit(&self.user);
            self.core.session_closed();
            info!("connection cid={} closed, {} still active", self.conn_id, self.core.open_sessions());
        }
    }
}

/// Everything the interactive session task needs, bundled up so the
/// spawn stays readable.
struct SessionDriver {
    core: Arc<Core>,
    handle: Handle,
    channel: ChannelId,
    sub_name: String,
    user: String,
    peer: String,
    width: usize,
    height: usize,
}

impl SessionDriver {
    #[instrument(skip_all, fields(s = self.sub_name))]
    async fn run(
        self,
        mut input: mpsc::UnboundedReceiver<SessionInput>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mailbox = self.core.bus.subscribe(&self.sub_name);
        let mut session =
            Session::new(Arc::clone(&self.core), &self.user, &self.peer, self.width, self.height);
        let mut decoder = Decoder::new();

        self.write(ENTER_ALT_SCREEN.to_vec()).await;
        self.paint(&session).await;

        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first interval fire is immediate, skip past it
        tick.tick().await;

        loop {
            // animations want frames, everyone else can sleep
            let frame_period = session.frame_period().unwrap_or(Duration::from_secs(3600));

            tokio::select! {
                _ = tick.tick() => {
                    session.on_tick(Instant::now());
                    for event in mailbox.try_iter() {
                        session.on_bus_event(event);
                    }
                }
                _ = tokio::time::sleep(frame_period) => {
                    session.on_frame(Instant::now());
                }
                msg = input.recv() => match msg {
                    Some(SessionInput::Data(bytes)) => {
                        for key in decoder.feed(&bytes) {
                            session.handle_key(key);
                        }
                    }
                    Some(SessionInput::Resize(width, height)) => session.resize(width, height),
                    // the connection went away
                    None => break,
                },
                _ = shutdown.changed() => {
                    self.write(b"\r\nThe server is going down now.\r\n".to_vec()).await;
                    break;
                }
            }

            if session.should_quit() {
                break;
            }

            self.paint(&session).await;
        }

        self.write(EXIT_ALT_SCREEN.to_vec()).await;
        self.write(b"logout\r\n".to_vec()).await;
        let _ = self.handle.exit_status_request(self.channel, 0).await;
        let _ = self.handle.eof(self.channel).await;
        let _ = self.handle.close(self.channel).await;

        self.core.bus.unsubscribe(&self.sub_name);
        debug!("session task finished");
    }

    async fn paint(&self, session: &Session) {
        self.write(session.render().into_bytes()).await;
    }

    async fn write(&self, bytes: Vec<u8>) {
        if self.handle.data(self.channel, CryptoVec::from(bytes)).await.is_err() {
            debug!("client hung up mid-write");
        }
    }
}
