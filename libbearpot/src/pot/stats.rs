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

//! Read-only counters surfaced to the status display. Everything here
//! is a snapshot; nothing blocks for long or takes a lock across I/O.

use std::time::{Duration, Instant};

use tracing::error;

use crate::{consts, core::Core};

const ALL_TIME_CACHE_TTL: Duration = Duration::from_secs(10);

impl Core {
    /// How many sessions are connected right now.
    pub fn stat_active_users(&self) -> usize {
        self.active_users().len()
    }

    /// Accepted logins since this process started.
    pub fn stat_users_this_session(&self) -> u64 {
        self.users_this_session()
    }

    /// Accepted logins over the lifetime of the database. The query
    /// is cheap but the display polls aggressively, so we only hit
    /// sqlite every ten seconds and fall back to the last good value
    /// on error.
    pub fn stat_users_all_time(&self) -> i64 {
        let mut cache = self.all_time_cache.lock().unwrap();
        if let Some(expires) = cache.1 {
            if Instant::now() < expires {
                return cache.0;
            }
        }

        let counts = self.store.event_count_query(
            "SELECT 'logins' AS value, COUNT(*) AS count
             FROM events
             WHERE events.type = 'login' AND events.source = 'user'",
        );
        match counts {
            Ok(counts) => {
                cache.0 = counts.first().map(|(_, count)| *count).unwrap_or(0);
                cache.1 = Some(Instant::now() + ALL_TIME_CACHE_TTL);
                cache.0
            }
            Err(err) => {
                error!("stat_users_all_time: {:?}", err);
                // fall back to the last cached value
                cache.0
            }
        }
    }

    /// The configured session cap, or the default when the option is
    /// unset or unreadable.
    pub fn stat_max_users(&self) -> usize {
        match self.store.option_get_int(consts::OPT_POT_MAX_USERS) {
            Ok(Some(max)) if max > 0 => max as usize,
            Ok(_) => consts::DEFAULT_MAX_USERS,
            Err(err) => {
                error!("stat_max_users: {:?}", err);
                consts::DEFAULT_MAX_USERS
            }
        }
    }

    /// -1 unconfigured, 0 configured but down, 1 up.
    pub fn stat_tunnel_active(&self) -> i32 {
        self.tunnel_state()
    }

    /// Why the tunnel last went down, if it has.
    pub fn stat_tunnel_error(&self) -> Option<String> {
        self.tunnel_error()
    }
}

#[cfg(test)]
mod test {
    use crate::{consts, core::test::test_core};

    #[test]
    fn test_max_users_default_and_option() {
        let (_dir, core) = test_core();
        assert_eq!(core.stat_max_users(), consts::DEFAULT_MAX_USERS);

        core.store.option_set(consts::OPT_POT_MAX_USERS, "3").expect("set");
        assert_eq!(core.stat_max_users(), 3);

        // junk falls back to the default
        core.store.option_set(consts::OPT_POT_MAX_USERS, "lots").expect("set");
        assert_eq!(core.stat_max_users(), consts::DEFAULT_MAX_USERS);
    }

    #[test]
    fn test_users_all_time_counts_user_logins() {
        let (_dir, core) = test_core();
        for _ in 0..4 {
            core.record_event("alice", "10.0.0.1:50000", true, "login", "Logged in!")
                .expect("record");
        }
        // system events don't count
        core.record_event("ui", "-", false, "login", "admin").expect("record");

        assert_eq!(core.stat_users_all_time(), 4);
    }

    #[test]
    fn test_tunnel_state_starts_unconfigured() {
        let (_dir, core) = test_core();
        assert_eq!(core.stat_tunnel_active(), crate::core::TUNNEL_UNCONFIGURED);
        core.set_tunnel_state(crate::core::TUNNEL_DOWN);
        assert_eq!(core.stat_tunnel_active(), crate::core::TUNNEL_DOWN);
    }
}
