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

use std::{io, sync::Arc};

use anyhow::{Context, anyhow};
use clap::Parser;
use tracing::{debug, error, info};

mod assets;
pub mod bus;
pub mod config;
pub mod consts;
pub mod core;
mod pot;
pub mod store;
pub mod vfs;

pub use pot::TunnelConfig;

/// The command line arguments that bearpot expects. These can be
/// directly parsed with clap or manually constructed in order to
/// present some other user interface.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
pub struct Args {
    #[clap(short, long, action, help = "a json file containing configuration")]
    pub config: Option<String>,

    #[clap(long, action, help = "Run headless, without the touchscreen display")]
    pub no_gui: bool,

    #[clap(long = "fs", action, help = "Ask the touchscreen display to go fullscreen")]
    pub fs: bool,

    #[clap(long = "no-fs", action, overrides_with = "fs", help = "Windowed display")]
    pub no_fs: bool,

    #[clap(
        long,
        value_delimiter = ',',
        help = "SSH listen port(s), comma separated; the first is the primary"
    )]
    pub ssh_port: Option<Vec<String>>,

    #[clap(long, help = "Display width in pixels")]
    pub width: Option<u32>,

    #[clap(long, help = "Display height in pixels")]
    pub height: Option<u32>,

    #[clap(long, help = "debug|info|warn|error|fatal")]
    pub log_level: Option<String>,

    #[clap(long, help = "Reset the admin pin to the given digits")]
    pub pin_reset: Option<String>,

    #[clap(long, help = "Reverse tunnel collector, user@host[:port]")]
    pub tunnel: Option<String>,

    #[clap(long, help = "Private key used to authenticate to the tunnel collector")]
    pub tunnel_key: Option<String>,
}

/// Run the honeypot with the given arguments. If `injected_listener`
/// is provided (overlay networks bind their own sockets), it is
/// served alongside the configured ports.
pub fn run(args: Args, injected_listener: Option<tokio::net::TcpListener>) -> anyhow::Result<()> {
    let config = config::read_config(&args).context("reading config")?;
    init_tracing(config.log_level.as_deref())?;

    info!("Starting Honey Bear Honey Pot...");

    let res = setup_and_serve(&config, &args, injected_listener);
    if let Err(err) = res {
        error!("{:?}", err);
        std::process::exit(1);
    }

    Ok(())
}

fn setup_and_serve(
    config: &config::Config,
    args: &Args,
    injected_listener: Option<tokio::net::TcpListener>,
) -> anyhow::Result<()> {
    // everything in here is fatal: no data dir, no database, no pot
    let user_config_dir = dirs::config_dir().ok_or(anyhow!("no user config directory"))?;
    let app_dir = user_config_dir.join(consts::APP_DIR);
    std::fs::create_dir_all(&app_dir)
        .with_context(|| format!("creating app dir {}", app_dir.display()))?;
    debug!("app data directory: {}", app_dir.display());

    let store = store::Store::open(&app_dir).context("opening database")?;

    if let Some(pin) = &args.pin_reset {
        store.option_set(consts::OPT_ADMIN_PIN, pin).context("resetting admin pin")?;
        info!("admin pin reset");
    }

    // the admin surfaces read the primary port back out of options
    if let Err(err) = store.option_set(consts::OPT_POT_SSH_PORT, &config.ssh_ports()[0]) {
        error!("recording primary port option: {:?}", err);
    }

    let vfs = vfs::Vfs::build(config.filesystem()).context("building filesystem")?;
    let core = Arc::new(core::Core::new(store, vfs, config.tasks().to_vec()));

    if config.no_gui.unwrap_or(false) {
        info!("running headless");
    } else {
        // the touchscreen display is a separate process subscribing
        // to the event bus; its knobs are parsed here only so one
        // config file can serve both
        debug!(
            "display options: full_screen={:?} width={:?} height={:?}",
            config.full_screen, config.width, config.height
        );
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(pot::run(core, config, &app_dir, injected_listener))
}

fn init_tracing(level: Option<&str>) -> anyhow::Result<()> {
    let level = match level.unwrap_or("info") {
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        // we have no true fatal tier, fatal errors log and exit
        "error" | "fatal" => tracing::Level::ERROR,
        other => return Err(anyhow!("unknown log level: {}", other)),
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_ids(true)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
    Ok(())
}
