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

//! A tiny in-process publish/subscribe fan-out for events.
//!
//! The bus is a live feed, not a log: every subscriber owns a bounded
//! mailbox and a publish that finds the mailbox full simply drops the
//! event for that subscriber. Durability is the store's job.

use std::{collections::HashMap, sync::RwLock};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::debug;

use crate::{consts, store::Event};

#[derive(Default)]
pub struct EventBus {
    subscriptions: RwLock<HashMap<String, Sender<Event>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named subscriber and hand back its mailbox. A
    /// second subscribe under the same name replaces the first, which
    /// closes the old mailbox.
    pub fn subscribe(&self, name: &str) -> Receiver<Event> {
        let (tx, rx) = crossbeam_channel::bounded(consts::BUS_MAILBOX_CAP);
        // unwrap to propagate the poison as an unwind
        let mut subscriptions = self.subscriptions.write().unwrap();
        subscriptions.insert(String::from(name), tx);
        rx
    }

    /// Drop a named subscriber. Its mailbox is closed; events already
    /// queued can still be drained from the receiver.
    pub fn unsubscribe(&self, name: &str) {
        let mut subscriptions = self.subscriptions.write().unwrap();
        subscriptions.remove(name);
    }

    /// Fan an event out to every subscriber without ever blocking.
    /// Full or abandoned mailboxes miss out.
    pub fn publish(&self, event: &Event) {
        let subscriptions = self.subscriptions.read().unwrap();
        for (name, tx) in subscriptions.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    debug!("subscriber '{}' mailbox full, dropping event", name);
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("subscriber '{}' mailbox gone, dropping event", name);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn event(action: &str) -> Event {
        Event {
            id: 0,
            user: String::from("alice"),
            host: String::from("127.0.0.1:9999"),
            app: String::from("ssh"),
            source: String::from("user"),
            kind: String::from("typed"),
            action: String::from(action),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_fan_out() {
        let bus = EventBus::new();
        let a = bus.subscribe("a");
        let b = bus.subscribe("b");

        bus.publish(&event("whoami"));

        assert_eq!(a.recv().unwrap().action, "whoami");
        assert_eq!(b.recv().unwrap().action, "whoami");
    }

    #[test]
    fn test_full_mailbox_drops_without_blocking() {
        let bus = EventBus::new();
        let slow = bus.subscribe("slow");
        let healthy = bus.subscribe("healthy");

        // the slow subscriber never drains; the healthy one keeps up
        // and sees every event even while its neighbor overflows
        for i in 0..=consts::BUS_MAILBOX_CAP {
            bus.publish(&event(&format!("cmd-{i}")));
            assert_eq!(healthy.try_recv().unwrap().action, format!("cmd-{i}"));
        }

        // the slow one is missing exactly the overflow event
        let got: Vec<_> = slow.try_iter().map(|e| e.action).collect();
        assert_eq!(got.len(), consts::BUS_MAILBOX_CAP);
        assert_eq!(got.last().map(String::as_str), Some("cmd-9"));

        // once drained, delivery resumes
        bus.publish(&event("after-drain"));
        assert_eq!(slow.recv().unwrap().action, "after-drain");
    }

    #[test]
    fn test_unsubscribe_closes_mailbox() {
        let bus = EventBus::new();
        let rx = bus.subscribe("gone");
        bus.unsubscribe("gone");

        // publishing to a closed mailbox is a silent drop
        bus.publish(&event("anyone home?"));
        assert!(rx.try_recv().is_err());
    }
}
