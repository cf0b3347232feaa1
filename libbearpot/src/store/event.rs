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

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{Row, types::Value};
use serde_derive::{Deserialize, Serialize};

use super::Store;

pub const SOURCE_SYSTEM: &str = "system";
pub const SOURCE_USER: &str = "user";

/// One observable thing that happened: a login, a typed line, a ctf
/// flag capture. Immutable once written; the store assigns the id and
/// ids totally order events across sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub user: String,
    /// host:port of the remote peer
    pub host: String,
    /// which surface produced this, e.g. "ssh"
    pub app: String,
    /// SOURCE_SYSTEM or SOURCE_USER
    pub source: String,
    /// "login", "typed", ...
    #[serde(rename = "type")]
    pub kind: String,
    /// free-form payload
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(user: &str, host: &str, user_event: bool, kind: &str, action: &str) -> Event {
        Event {
            id: 0,
            user: String::from(user),
            host: String::from(host),
            app: String::from("ssh"),
            source: String::from(if user_event { SOURCE_USER } else { SOURCE_SYSTEM }),
            kind: String::from(kind),
            action: String::from(action),
            timestamp: Utc::now(),
        }
    }
}

fn event_from_row(row: &Row) -> rusqlite::Result<Event> {
    let stamp: String = row.get(7)?;
    let timestamp = NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S")
        .map(|t| t.and_utc())
        .unwrap_or_else(|_| Utc::now());
    Ok(Event {
        id: row.get(0)?,
        user: row.get(1)?,
        host: row.get(2)?,
        app: row.get(3)?,
        source: row.get(4)?,
        kind: row.get(5)?,
        action: row.get(6)?,
        timestamp,
    })
}

impl Store {
    /// Append an event, returning the id the store assigned to it.
    pub fn save_event(&self, event: &Event) -> anyhow::Result<i64> {
        self.write(
            "INSERT INTO events (user, host, app, source, type, action)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            vec![
                Value::from(event.user.clone()),
                Value::from(event.host.clone()),
                Value::from(event.app.clone()),
                Value::from(event.source.clone()),
                Value::from(event.kind.clone()),
                Value::from(event.action.clone()),
            ],
        )
        .context("saving event")
    }

    /// Run an arbitrary SELECT over the events table. The query must
    /// produce the full column set. Every matching row is returned.
    pub fn event_query(&self, sql: &str, params: Vec<Value>) -> anyhow::Result<Vec<Event>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(sql).context("preparing event query")?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(params.iter()), event_from_row)
                .context("running event query")?;

            let mut events = Vec::new();
            for row in rows {
                events.push(row.context("scanning event row")?);
            }
            Ok(events)
        })
    }

    /// Run a grouped count query, returning (value, count) pairs.
    /// The query must produce exactly those two columns.
    pub fn event_count_query(&self, sql: &str) -> anyhow::Result<Vec<(String, i64)>> {
        self.with_read(|conn| {
            let mut stmt = conn.prepare(sql).context("preparing count query")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .context("running count query")?;

            let mut counts = Vec::new();
            for row in rows {
                counts.push(row.context("scanning count row")?);
            }
            Ok(counts)
        })
    }
}

#[cfg(test)]
mod test {
    use super::{super::test::test_store, *};

    const ALL_EVENTS: &str =
        "SELECT id, user, host, app, source, type, action, timestamp FROM events ORDER BY id";

    #[test]
    fn test_save_assigns_ordered_ids() {
        let (_dir, store) = test_store();

        let first = store
            .save_event(&Event::new("alice", "10.0.0.1:50000", true, "login", "Logged in!"))
            .expect("first save");
        let second = store
            .save_event(&Event::new("alice", "10.0.0.1:50000", true, "typed", "whoami"))
            .expect("second save");
        let third = store
            .save_event(&Event::new("bob", "10.0.0.2:50001", true, "login", "Logged in!"))
            .expect("third save");

        assert!(first < second && second < third);
    }

    #[test]
    fn test_query_returns_every_row() {
        let (_dir, store) = test_store();
        for i in 0..5 {
            store
                .save_event(&Event::new("alice", "10.0.0.1:50000", true, "typed", &format!("cmd{i}")))
                .expect("save");
        }

        let events = store.event_query(ALL_EVENTS, vec![]).expect("query");
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].action, "cmd0");
        assert_eq!(events[4].action, "cmd4");
        assert_eq!(events[0].kind, "typed");
    }

    #[test]
    fn test_query_with_params() {
        let (_dir, store) = test_store();
        store
            .save_event(&Event::new("alice", "10.0.0.1:50000", true, "login", "Logged in!"))
            .expect("save");
        store
            .save_event(&Event::new("bob", "10.0.0.2:50001", true, "typed", "ls"))
            .expect("save");

        let events = store
            .event_query(
                "SELECT id, user, host, app, source, type, action, timestamp
                 FROM events WHERE user = ?1",
                vec![Value::from(String::from("bob"))],
            )
            .expect("query");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "ls");
    }

    #[test]
    fn test_count_query() {
        let (_dir, store) = test_store();
        for _ in 0..3 {
            store
                .save_event(&Event::new("alice", "10.0.0.1:50000", true, "login", "Logged in!"))
                .expect("save");
        }
        store
            .save_event(&Event::new("ui", "-", false, "login", "admin"))
            .expect("save");

        let counts = store
            .event_count_query(
                "SELECT 'logins' AS value, COUNT(*) AS count
                 FROM events WHERE type = 'login' AND source = 'user'",
            )
            .expect("count");
        assert_eq!(counts, vec![(String::from("logins"), 3)]);
    }
}
