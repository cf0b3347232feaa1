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

//! The reverse tunnel supervisor. The honeypot usually sits behind
//! someone's home NAT, so instead of the collector dialing in, we
//! dial out to the collector over ssh and ask it to listen on a
//! public port. Connections accepted there get forwarded back down
//! the ssh connection and spliced onto our own local listener.
//!
//! The supervisor never gives up and never propagates errors upward.
//! Every failure mode sleeps the prescribed amount and tries again;
//! only an unreadable key file ends the loop, since no amount of
//! retrying fixes that. The collector can watch `tunnel_active` via
//! the stats surface.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, anyhow};
use russh::{
    Disconnect,
    client::{self, AuthResult},
    keys::{self, PrivateKeyWithHashAlg},
};
use tokio::{net::TcpStream, sync::watch, time::timeout};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    consts,
    core::{Core, TUNNEL_DOWN, TUNNEL_UP},
};

const DEFAULT_COLLECTOR_SSH_PORT: u16 = 22;
const DEFAULT_REMOTE_BIND: &str = "0.0.0.0";
const DEFAULT_REMOTE_PORT: u32 = 8022;

/// Where and how to reach the collector, plus what to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub key_path: PathBuf,
    /// When unset or unreadable we warn and accept any host key.
    pub known_hosts_path: Option<PathBuf>,
    /// The local honeypot listener tunneled traffic is spliced onto.
    pub local_target: String,
    pub remote_bind: String,
    pub remote_port: u32,
}

impl TunnelConfig {
    /// Parse a `user@host[:port]` collector spec.
    pub fn parse(
        spec: &str,
        key_path: &str,
        known_hosts_path: Option<&str>,
        local_port: &str,
    ) -> anyhow::Result<TunnelConfig> {
        let (user, rest) =
            spec.split_once('@').ok_or(anyhow!("tunnel spec must look like user@host[:port]"))?;
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                (host, port.parse::<u16>().with_context(|| format!("bad tunnel port {port:?}"))?)
            }
            None => (rest, DEFAULT_COLLECTOR_SSH_PORT),
        };
        if user.is_empty() || host.is_empty() {
            return Err(anyhow!("tunnel spec must look like user@host[:port]"));
        }

        Ok(TunnelConfig {
            user: String::from(user),
            host: String::from(host),
            port,
            key_path: PathBuf::from(key_path),
            known_hosts_path: known_hosts_path.map(PathBuf::from),
            local_target: format!("127.0.0.1:{local_port}"),
            remote_bind: String::from(DEFAULT_REMOTE_BIND),
            remote_port: DEFAULT_REMOTE_PORT,
        })
    }
}

/// The listen-request backoff: 10s, 20s, 30s, ... for consecutive
/// failures.
fn listen_retry_delay(retry_factor: u32) -> Duration {
    consts::TUNNEL_DIAL_RETRY * retry_factor
}

pub fn spawn(
    core: Arc<Core>,
    config: TunnelConfig,
    shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { supervise(core, config, shutdown).await })
}

#[instrument(skip_all)]
async fn supervise(core: Arc<Core>, config: TunnelConfig, mut shutdown: watch::Receiver<bool>) {
    info!(
        "tunnel supervisor starting: {}@{}:{} forwarding {}:{} back to {}",
        config.user,
        config.host,
        config.port,
        config.remote_bind,
        config.remote_port,
        config.local_target,
    );
    core.set_tunnel_state(TUNNEL_DOWN);

    let mut retry_factor: u32 = 1;
    while !*shutdown.borrow() {
        // an unreadable key is the one unrecoverable failure
        let key = match keys::load_secret_key(&config.key_path, None) {
            Ok(key) => key,
            Err(err) => {
                error!("cannot read tunnel key {}: {:?}", config.key_path.display(), err);
                return;
            }
        };

        let handler = CollectorHandler {
            host: config.host.clone(),
            port: config.port,
            known_hosts_path: config.known_hosts_path.clone(),
            local_target: config.local_target.clone(),
        };
        let ssh_config = Arc::new(client::Config::default());
        let dial = timeout(
            consts::TUNNEL_DIAL_TIMEOUT,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await;
        let mut handle = match dial {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                warn!("failed to dial collector, retrying in 10 seconds: {:?}", err);
                core.set_tunnel_state(TUNNEL_DOWN);
                core.set_tunnel_error(Some(format!("dial: {err}")));
                if !sleep_or_shutdown(consts::TUNNEL_DIAL_RETRY, &mut shutdown).await {
                    return;
                }
                continue;
            }
            Err(_) => {
                warn!("dialing collector timed out, retrying in 10 seconds");
                core.set_tunnel_state(TUNNEL_DOWN);
                core.set_tunnel_error(Some(String::from("dial: timed out")));
                if !sleep_or_shutdown(consts::TUNNEL_DIAL_RETRY, &mut shutdown).await {
                    return;
                }
                continue;
            }
        };

        let auth = handle
            .authenticate_publickey(
                config.user.clone(),
                PrivateKeyWithHashAlg::new(Arc::new(key), None),
            )
            .await;
        if !matches!(auth, Ok(AuthResult::Success)) {
            warn!("collector rejected our key, retrying in 10 seconds: {:?}", auth.err());
            core.set_tunnel_state(TUNNEL_DOWN);
            core.set_tunnel_error(Some(String::from("auth rejected")));
            if !sleep_or_shutdown(consts::TUNNEL_DIAL_RETRY, &mut shutdown).await {
                return;
            }
            continue;
        }

        // ask the collector to open the public listener for us
        let forwarded =
            handle.tcpip_forward(config.remote_bind.clone(), config.remote_port).await;
        match forwarded {
            Ok(_) => {}
            other => {
                warn!(
                    "collector refused remote listen on {}:{} (check AllowTcpForwarding), \
                     retrying in {:?}: {:?}",
                    config.remote_bind,
                    config.remote_port,
                    listen_retry_delay(retry_factor),
                    other.err(),
                );
                core.set_tunnel_state(TUNNEL_DOWN);
                core.set_tunnel_error(Some(String::from("remote listen refused")));
                let _ = handle.disconnect(Disconnect::ByApplication, "", "en").await;
                let wait = listen_retry_delay(retry_factor);
                retry_factor += 1;
                if !sleep_or_shutdown(wait, &mut shutdown).await {
                    return;
                }
                continue;
            }
        }

        info!(
            "tunnel is up: collector listening on {}:{}",
            config.remote_bind, config.remote_port
        );
        core.set_tunnel_state(TUNNEL_UP);
        core.set_tunnel_error(None);
        retry_factor = 1;

        // forwarded connections now arrive through the handler; all
        // that is left to do here is notice when the link dies
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    if handle.is_closed() {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    let _ = handle.disconnect(Disconnect::ByApplication, "", "en").await;
                    core.set_tunnel_state(TUNNEL_DOWN);
                    return;
                }
            }
        }

        warn!("tunnel link lost, reconnecting in 5 seconds");
        core.set_tunnel_state(TUNNEL_DOWN);
        core.set_tunnel_error(Some(String::from("link lost")));
        if !sleep_or_shutdown(consts::TUNNEL_ACCEPT_RETRY, &mut shutdown).await {
            return;
        }
    }
}

/// Sleep unless shutdown arrives first. Returns false when it is
/// time to stop retrying.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}

struct CollectorHandler {
    host: String,
    port: u16,
    known_hosts_path: Option<PathBuf>,
    local_target: String,
}

impl client::Handler for CollectorHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let Some(path) = &self.known_hosts_path else {
            warn!("no known hosts file set, accepting any collector host key");
            return Ok(true);
        };

        match keys::check_known_hosts_path(&self.host, self.port, server_public_key, path) {
            Ok(known) => {
                if !known {
                    error!("collector host key mismatch for {}", self.host);
                }
                Ok(known)
            }
            Err(err) => {
                warn!(
                    "could not check known hosts file {}, accepting any collector host key: {:?}",
                    path.display(),
                    err
                );
                Ok(true)
            }
        }
    }

    /// One inbound connection accepted by the collector's public
    /// listener. Splice it onto the local honeypot port.
    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: russh::Channel<client::Msg>,
        _connected_address: &str,
        _connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        info!("tunneled connection from {}:{}", originator_address, originator_port);

        let target = self.local_target.clone();
        tokio::spawn(async move {
            let dial = timeout(consts::TUNNEL_LOCAL_DIAL_TIMEOUT, TcpStream::connect(&target)).await;
            let mut local = match dial {
                Ok(Ok(stream)) => stream,
                Ok(Err(err)) => {
                    warn!("failed to dial local target {}: {:?}", target, err);
                    return;
                }
                Err(_) => {
                    warn!("dialing local target {} timed out", target);
                    return;
                }
            };

            let mut tunneled = channel.into_stream();
            match tokio::io::copy_bidirectional(&mut tunneled, &mut local).await {
                Ok((up, down)) => {
                    debug!("tunneled connection finished, {} bytes up, {} bytes down", up, down);
                }
                // a peer dropping mid-copy is everyday weather here
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {}
                Err(err) => warn!("tunnel splice error: {:?}", err),
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_tunnel_spec() {
        let config = TunnelConfig::parse(
            "collector@honey.example.com:2022",
            "/etc/bearpot/id_ed25519",
            Some("/etc/bearpot/known_hosts"),
            "2222",
        )
        .expect("spec to parse");

        assert_eq!(config.user, "collector");
        assert_eq!(config.host, "honey.example.com");
        assert_eq!(config.port, 2022);
        assert_eq!(config.local_target, "127.0.0.1:2222");
        assert_eq!(config.remote_bind, DEFAULT_REMOTE_BIND);
        assert_eq!(config.remote_port, DEFAULT_REMOTE_PORT);

        // the ssh port defaults to 22
        let config = TunnelConfig::parse("c@host", "/k", None, "2222").expect("spec to parse");
        assert_eq!(config.port, 22);
        assert_eq!(config.known_hosts_path, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let cases = vec!["", "justahost", "@host", "user@", "user@host:notaport"];
        for spec in cases.into_iter() {
            assert!(TunnelConfig::parse(spec, "/k", None, "2222").is_err(), "accepted {spec:?}");
        }
    }

    #[test]
    fn test_listen_backoff_grows() {
        assert_eq!(listen_retry_delay(1), Duration::from_secs(10));
        assert_eq!(listen_retry_delay(2), Duration::from_secs(20));
        assert_eq!(listen_retry_delay(3), Duration::from_secs(30));
    }
}
