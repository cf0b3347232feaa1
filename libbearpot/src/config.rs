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

use std::fs;

use anyhow::Context;
use serde_derive::Deserialize;
use tracing::{info, instrument};

use crate::{Args, consts};

/// Read the json config file, if any, and fold the command line
/// flags in on top. Built-in defaults lose to the file, the file
/// loses to flags.
#[instrument(skip_all)]
pub fn read_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = Config::default();
    if let Some(config_path) = &args.config {
        info!("parsing explicitly passed in config ({})", config_path);
        let config_str = fs::read_to_string(config_path).context("reading config json")?;
        config = serde_json::from_str(&config_str).context("parsing config file")?;
    }

    config.apply_args(args);
    Ok(config)
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    /// The tcp ports the honeypot listens on. The first entry is the
    /// primary port, the rest get extra listeners sharing the same
    /// server. Defaults to just "2222".
    pub ssh_ports: Option<Vec<String>>,

    /// Reverse tunnel collector in user@host[:port] form. When unset
    /// the tunnel supervisor never starts.
    pub tunnel: Option<String>,

    /// Path to the private key used to authenticate to the tunnel
    /// collector. Mandatory once `tunnel` is set.
    pub tunnel_key: Option<String>,

    /// Optional known_hosts file for verifying the collector's host
    /// key. When unset or unreadable we warn and accept any key.
    pub tunnel_known_hosts: Option<String>,

    // The remaining display fields belong to the external touchscreen
    // process. They are parsed and carried so one config file can
    // serve both binaries, but the core only logs them.
    pub no_gui: Option<bool>,
    pub full_screen: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,

    /// debug|info|warn|error|fatal
    pub log_level: Option<String>,

    /// Extra filesystem nodes merged into the template tree at
    /// startup. Parents must already exist.
    pub filesystem: Option<Vec<NodeSpec>>,

    /// The capture-the-flag task list.
    pub tasks: Option<Vec<TaskSpec>>,
}

impl Config {
    fn apply_args(&mut self, args: &Args) {
        if let Some(ports) = &args.ssh_port {
            self.ssh_ports = Some(ports.clone());
        }
        if let Some(tunnel) = &args.tunnel {
            self.tunnel = Some(tunnel.clone());
        }
        if let Some(key) = &args.tunnel_key {
            self.tunnel_key = Some(key.clone());
        }
        if args.no_gui {
            self.no_gui = Some(true);
        }
        if args.fs {
            self.full_screen = Some(true);
        }
        if args.no_fs {
            self.full_screen = Some(false);
        }
        if let Some(width) = args.width {
            self.width = Some(width);
        }
        if let Some(height) = args.height {
            self.height = Some(height);
        }
        if let Some(level) = &args.log_level {
            self.log_level = Some(level.clone());
        }
    }

    /// The listen ports with the built-in default applied.
    pub fn ssh_ports(&self) -> Vec<String> {
        match &self.ssh_ports {
            Some(ports) if !ports.is_empty() => ports.clone(),
            _ => vec![String::from(consts::DEFAULT_SSH_PORT)],
        }
    }

    pub fn filesystem(&self) -> &[NodeSpec] {
        self.filesystem.as_deref().unwrap_or(&[])
    }

    pub fn tasks(&self) -> &[TaskSpec] {
        self.tasks.as_deref().unwrap_or(&[])
    }
}

/// One filesystem node declared in the config file. This is the
/// serializable face of vfs::Node: executables can't be declared
/// here, and file bytes arrive either inline (`content_text`) or as
/// a reference into the embedded asset table (`asset_name`).
#[derive(Deserialize, Debug, Clone)]
pub struct NodeSpec {
    pub path: String,
    pub name: Option<String>,
    pub directory: Option<bool>,
    pub owner: Option<String>,
    pub group: Option<String>,
    /// Octal digits, e.g. "644".
    pub mode: Option<String>,
    pub content_text: Option<String>,
    pub asset_name: Option<String>,
    pub help_text: Option<String>,
}

/// One capture-the-flag task.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TaskSpec {
    pub name: String,
    pub description: String,
    pub flag: String,
    pub points: i64,
}
