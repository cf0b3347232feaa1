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

//! The process-wide context object. Everything that used to be a
//! loose global in earlier drafts lives here with its
//! synchronization spelled out: the store (sequenced writer), the
//! bus (rwlock registry), the filesystem (immutable), the user
//! accounting table (mutex), and the tunnel flag (atomic).
//! Constructed once at startup and threaded through every component.

use std::{
    sync::{
        Mutex,
        atomic::{AtomicI32, AtomicUsize, Ordering},
    },
    time::Instant,
};

use tracing::warn;

use crate::{
    bus::EventBus,
    config,
    store::{Event, Store},
    vfs::Vfs,
};

/// Reverse tunnel states surfaced to the status display.
pub const TUNNEL_UNCONFIGURED: i32 = -1;
pub const TUNNEL_DOWN: i32 = 0;
pub const TUNNEL_UP: i32 = 1;

#[derive(Default)]
struct UserTable {
    /// One entry per live session, in arrival order. Duplicate names
    /// are expected; removal takes the first occurrence.
    active: Vec<String>,
    /// Total accepted authentications since this process started.
    total: u64,
}

pub struct Core {
    pub store: Store,
    pub bus: EventBus,
    pub vfs: Vfs,
    /// The ctf task list from the config file.
    pub tasks: Vec<config::TaskSpec>,

    users: Mutex<UserTable>,
    /// Sessions currently between enter and exit, used by the
    /// shutdown drain.
    open_sessions: AtomicUsize,
    tunnel_active: AtomicI32,
    /// The most recent tunnel failure, for the status display.
    tunnel_last_error: Mutex<Option<String>>,
    /// (last value, expiry) for the lifetime login count, see
    /// pot::stats.
    pub(crate) all_time_cache: Mutex<(i64, Option<Instant>)>,
}

impl Core {
    pub fn new(store: Store, vfs: Vfs, tasks: Vec<config::TaskSpec>) -> Core {
        Core {
            store,
            bus: EventBus::new(),
            vfs,
            tasks,
            users: Mutex::new(UserTable::default()),
            open_sessions: AtomicUsize::new(0),
            tunnel_active: AtomicI32::new(TUNNEL_UNCONFIGURED),
            tunnel_last_error: Mutex::new(None),
            all_time_cache: Mutex::new((0, None)),
        }
    }

    /// Save an event and fan it out to live subscribers. The returned
    /// event carries the id the store assigned. Store failures bubble
    /// up so the caller can decide how loudly to complain, but the
    /// event is still published either way.
    pub fn record_event(
        &self,
        user: &str,
        host: &str,
        user_event: bool,
        kind: &str,
        action: &str,
    ) -> anyhow::Result<Event> {
        let mut event = Event::new(user, host, user_event, kind, action);
        let saved = self.store.save_event(&event);
        match saved {
            Ok(id) => {
                event.id = id;
                self.bus.publish(&event);
                Ok(event)
            }
            Err(err) => {
                self.bus.publish(&event);
                Err(err)
            }
        }
    }

    /// Gatekeeper for authentication: admit the login only if it
    /// keeps us at or under the max user count. Every admission
    /// bumps the lifetime counter.
    pub fn admit(&self, user: &str) -> bool {
        let max = self.stat_max_users();
        let mut users = self.users.lock().unwrap();
        if users.active.len() + 1 > max {
            warn!("refusing '{}', {} sessions active (max {})", user, users.active.len(), max);
            return false;
        }

        users.total += 1;
        true
    }

    pub fn user_enter(&self, user: &str) {
        let mut users = self.users.lock().unwrap();
        users.active.push(String::from(user));
    }

    pub fn user_exit(&self, user: &str) {
        let mut users = self.users.lock().unwrap();
        if let Some(idx) = users.active.iter().position(|u| u == user) {
            users.active.remove(idx);
        }
    }

    /// A snapshot of who is connected right now.
    pub fn active_users(&self) -> Vec<String> {
        self.users.lock().unwrap().active.clone()
    }

    pub(crate) fn users_this_session(&self) -> u64 {
        self.users.lock().unwrap().total
    }

    pub fn session_opened(&self) {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
    }

    pub fn session_closed(&self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn set_tunnel_state(&self, state: i32) {
        self.tunnel_active.store(state, Ordering::SeqCst);
    }

    pub(crate) fn tunnel_state(&self) -> i32 {
        self.tunnel_active.load(Ordering::SeqCst)
    }

    pub fn set_tunnel_error(&self, error: Option<String>) {
        *self.tunnel_last_error.lock().unwrap() = error;
    }

    pub(crate) fn tunnel_error(&self) -> Option<String> {
        self.tunnel_last_error.lock().unwrap().clone()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) fn test_core() -> (tempfile::TempDir, Core) {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = Store::open(dir.path()).expect("store");
        let vfs = Vfs::build(&[]).expect("vfs");
        (dir, Core::new(store, vfs, vec![]))
    }

    #[test]
    fn test_admission_respects_max_users() {
        let (_dir, core) = test_core();
        core.store.option_set(crate::consts::OPT_POT_MAX_USERS, "2").expect("set max");

        assert!(core.admit("alice"));
        core.user_enter("alice");
        assert!(core.admit("bob"));
        core.user_enter("bob");

        // third seat is refused while both are active
        assert!(!core.admit("carol"));

        // one leaves, the next knock gets in
        core.user_exit("alice");
        assert!(core.admit("carol"));

        // refusals don't count toward the lifetime total
        assert_eq!(core.users_this_session(), 3);
    }

    #[test]
    fn test_user_exit_removes_first_occurrence() {
        let (_dir, core) = test_core();
        core.user_enter("alice");
        core.user_enter("bob");
        core.user_enter("alice");

        core.user_exit("alice");
        assert_eq!(core.active_users(), vec!["bob", "alice"]);
    }

    #[test]
    fn test_record_event_assigns_id_and_publishes() {
        let (_dir, core) = test_core();
        let feed = core.bus.subscribe("display");

        let event =
            core.record_event("alice", "10.0.0.1:50000", true, "login", "Logged in!").expect("record");
        assert!(event.id > 0);

        let seen = feed.recv().expect("published");
        assert_eq!(seen.id, event.id);
        assert_eq!(seen.kind, "login");
    }
}
