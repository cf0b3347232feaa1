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

use std::time;

/// The name of the per-user config subdirectory where we keep the
/// database and the generated host key. The name predates the rust
/// rewrite and must stay stable so that upgrades keep their data.
pub const APP_DIR: &str = "HoneyBearHoneyPot";

/// The sqlite database file, stored directly under the app dir.
pub const DB_FILE: &str = "database.db";

/// Where the ssh host key lives, relative to the app dir.
pub const HOST_KEY_REL_PATH: &str = ".ssh/id_ed25519";

/// The port the honeypot listens on when no port is configured.
pub const DEFAULT_SSH_PORT: &str = "2222";

/// How many concurrent sessions we admit when the pot_max_users
/// option is unset.
pub const DEFAULT_MAX_USERS: usize = 10;

// Option names recognized by the admin surfaces. The options table
// itself is schema free.
pub const OPT_ADMIN_PIN: &str = "admin_pin";
pub const OPT_POT_SSH_PORT: &str = "pot_ssh_port";
pub const OPT_POT_MAX_USERS: &str = "pot_max_users";

/// Capacity of each event bus mailbox. Publishing to a full mailbox
/// drops the event for that subscriber only.
pub const BUS_MAILBOX_CAP: usize = 10;

/// How long we wait for in-flight sessions to drain on shutdown
/// before we force the issue.
pub const SHUTDOWN_GRACE: time::Duration = time::Duration::from_secs(30);

// Reverse tunnel timing knobs, see pot::tunnel.
pub const TUNNEL_DIAL_TIMEOUT: time::Duration = time::Duration::from_secs(15);
pub const TUNNEL_LOCAL_DIAL_TIMEOUT: time::Duration = time::Duration::from_secs(10);
pub const TUNNEL_DIAL_RETRY: time::Duration = time::Duration::from_secs(10);
pub const TUNNEL_ACCEPT_RETRY: time::Duration = time::Duration::from_secs(5);

/// Sessions get a narrative nudge if they idle around long enough.
pub const KNOCK_AFTER: time::Duration = time::Duration::from_secs(3 * 60);

// Animation frame periods. These are a design knob, not a contract.
pub const CONFETTI_FRAME: time::Duration = time::Duration::from_millis(33);
pub const MATRIX_FRAME: time::Duration = time::Duration::from_millis(100);

/// How long the celebrate animation runs before handing the shell back.
pub const CONFETTI_TIMEOUT: time::Duration = time::Duration::from_secs(4);
