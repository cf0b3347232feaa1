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

//! Wiring for the honeypot proper: the host key, the listeners, the
//! tunnel supervisor, and the graceful shutdown dance.

use std::{
    fs,
    io::Write as _,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, anyhow};
use russh::{
    SshId,
    keys::ssh_key::{LineEnding, rand_core::OsRng},
    server::Server as _,
};
use tokio::{net::TcpListener, sync::watch};
use tracing::{error, info, instrument, warn};

use crate::{config::Config, consts, core::Core};

mod commands;
mod confetti;
mod ctf;
mod keys;
mod matrix;
mod server;
mod session;
mod stats;
mod tunnel;

pub use tunnel::TunnelConfig;

use self::server::PotServer;

/// Run the front door until a termination signal arrives. `injected`
/// is the overlay-network contract: an already bound listener that
/// gets served exactly like the configured ports.
#[instrument(skip_all)]
pub async fn run(
    core: Arc<Core>,
    config: &Config,
    app_dir: &Path,
    injected: Option<TcpListener>,
) -> anyhow::Result<()> {
    let host_key = load_or_generate_host_key(app_dir).context("loading ssh host key")?;

    let mut ssh_config = russh::server::Config::default();
    // look like any other tired ubuntu box
    ssh_config.server_id = SshId::Standard(String::from("SSH-2.0-OpenSSH_8.9p1 Ubuntu-3ubuntu0.4"));
    ssh_config.keys.push(host_key);
    ssh_config.auth_rejection_time = Duration::from_millis(300);
    ssh_config.auth_rejection_time_initial = Some(Duration::ZERO);
    ssh_config.inactivity_timeout = Some(Duration::from_secs(3600));
    let ssh_config = Arc::new(ssh_config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ports = config.ssh_ports();
    let primary_port = ports[0].clone();

    // the tunnel is optional, but once configured its key is
    // mandatory and must load before we bother dialing anything
    let mut tunnel_task = None;
    if let Some(spec) = &config.tunnel {
        let key_path = config
            .tunnel_key
            .as_deref()
            .ok_or(anyhow!("tunnel is configured but tunnel_key is not"))?;
        russh::keys::load_secret_key(key_path, None)
            .with_context(|| format!("cannot load tunnel key {key_path}"))?;

        let tunnel_config = TunnelConfig::parse(
            spec,
            key_path,
            config.tunnel_known_hosts.as_deref(),
            &primary_port,
        )
        .context("parsing tunnel config")?;
        tunnel_task = Some(tunnel::spawn(Arc::clone(&core), tunnel_config, shutdown_rx.clone()));
    }

    // the primary port must bind, extra ports are best effort
    let mut listeners = vec![];
    let primary = TcpListener::bind(format!("0.0.0.0:{primary_port}"))
        .await
        .with_context(|| format!("binding primary ssh port {primary_port}"))?;
    info!("starting ssh server on port {}", primary_port);
    listeners.push(primary);
    for port in ports[1..].iter() {
        match TcpListener::bind(format!("0.0.0.0:{port}")).await {
            Ok(listener) => {
                info!("added listener on port {}", port);
                listeners.push(listener);
            }
            Err(err) => error!("failed to add listener on port {}: {:?}", port, err),
        }
    }
    if let Some(listener) = injected {
        info!("attaching injected listener");
        listeners.push(listener);
    }

    // one server instance shared by every listener; clones share the
    // connection counter so session names stay unique
    let pot = PotServer::new(Arc::clone(&core), shutdown_rx.clone());
    let mut accept_tasks = vec![];
    for listener in listeners.into_iter() {
        let mut pot = pot.clone();
        let ssh_config = Arc::clone(&ssh_config);
        let mut shutdown = shutdown_rx.clone();
        accept_tasks.push(tokio::spawn(async move {
            tokio::select! {
                res = pot.run_on_socket(ssh_config, &listener) => {
                    if let Err(err) = res {
                        error!("accept loop ended: {:?}", err);
                    }
                }
                _ = shutdown.changed() => {}
            }
        }));
    }

    wait_for_termination().await?;

    info!("stopping ssh server");
    let _ = shutdown_tx.send(true);
    for task in accept_tasks.into_iter() {
        let _ = task.await;
    }

    // give in-flight sessions a bounded window to say goodbye
    let deadline = Instant::now() + consts::SHUTDOWN_GRACE;
    while core.open_sessions() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    let stragglers = core.open_sessions();
    if stragglers > 0 {
        warn!("forcing shutdown with {} sessions still open", stragglers);
    }

    if let Some(task) = tunnel_task {
        task.abort();
    }

    Ok(())
}

#[cfg(unix)]
async fn wait_for_termination() -> anyhow::Result<()> {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("registering SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("waiting for ctrl-c")?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_termination() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")
}

/// Load the ed25519 host key, generating and stashing a fresh one on
/// first boot. A stable key keeps us from tripping the known-hosts
/// alarms of returning visitors.
fn load_or_generate_host_key(app_dir: &Path) -> anyhow::Result<russh::keys::PrivateKey> {
    let key_path = app_dir.join(consts::HOST_KEY_REL_PATH);

    if key_path.exists() {
        let pem = fs::read_to_string(&key_path)
            .with_context(|| format!("reading host key {}", key_path.display()))?;
        let key = russh::keys::PrivateKey::from_openssh(&pem)
            .with_context(|| format!("parsing host key {}", key_path.display()))?;
        return Ok(key);
    }

    let parent = key_path.parent().ok_or(anyhow!("host key path has no parent"))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("creating host key dir {}", parent.display()))?;

    let key = russh::keys::PrivateKey::random(&mut OsRng, russh::keys::Algorithm::Ed25519)
        .context("generating host key")?;
    let pem = key.to_openssh(LineEnding::LF).context("serializing host key")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&key_path)
            .with_context(|| format!("creating host key file {}", key_path.display()))?
            .write_all(pem.as_bytes())
            .context("writing host key")?;
    }
    #[cfg(not(unix))]
    fs::write(&key_path, pem.as_bytes()).context("writing host key")?;

    info!("generated new ssh host key at {}", key_path.display());
    Ok(key)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_host_key_survives_restarts() {
        let dir = tempfile::tempdir().expect("tmp dir");

        let first = load_or_generate_host_key(dir.path()).expect("generate");
        assert!(dir.path().join(consts::HOST_KEY_REL_PATH).exists());

        let second = load_or_generate_host_key(dir.path()).expect("reload");
        assert_eq!(first.public_key().to_openssh().ok(), second.public_key().to_openssh().ok());
    }
}
