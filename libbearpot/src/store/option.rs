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
use rusqlite::{OptionalExtension, types::Value};

use super::Store;

impl Store {
    /// Upsert an option. The second write for a name wins.
    pub fn option_set(&self, name: &str, value: &str) -> anyhow::Result<()> {
        self.write(
            "INSERT INTO options (name, value)
             VALUES (?1, ?2)
             ON CONFLICT(name)
             DO UPDATE SET value = excluded.value, timestamp = CURRENT_TIMESTAMP",
            vec![Value::from(String::from(name)), Value::from(String::from(value))],
        )
        .context("saving option")?;
        Ok(())
    }

    pub fn option_get(&self, name: &str) -> anyhow::Result<Option<String>> {
        self.with_read(|conn| {
            conn.query_row("SELECT value FROM options WHERE name = ?1", [name], |row| row.get(0))
                .optional()
                .context("loading option")
        })
    }

    /// Parse an option as an integer. Unset or unparseable values
    /// come back as None so callers can apply their default.
    pub fn option_get_int(&self, name: &str) -> anyhow::Result<Option<i64>> {
        Ok(self.option_get(name)?.and_then(|v| v.parse().ok()))
    }
}

#[cfg(test)]
mod test {
    use super::super::test::test_store;
    use crate::consts;

    #[test]
    fn test_upsert_round_trip() {
        let (_dir, store) = test_store();

        assert_eq!(store.option_get(consts::OPT_POT_MAX_USERS).unwrap(), None);

        store.option_set(consts::OPT_POT_MAX_USERS, "5").expect("set");
        assert_eq!(store.option_get(consts::OPT_POT_MAX_USERS).unwrap().as_deref(), Some("5"));

        // second set wins
        store.option_set(consts::OPT_POT_MAX_USERS, "7").expect("set again");
        assert_eq!(store.option_get_int(consts::OPT_POT_MAX_USERS).unwrap(), Some(7));
    }

    #[test]
    fn test_get_int_ignores_junk() {
        let (_dir, store) = test_store();
        store.option_set("weird", "not a number").expect("set");
        assert_eq!(store.option_get_int("weird").unwrap(), None);
    }
}
