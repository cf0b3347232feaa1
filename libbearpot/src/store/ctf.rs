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

//! Accounts and completions for the capture-the-flag side game.
//! These share the honeypot's database but nothing else; the game
//! itself lives in pot::ctf.

use anyhow::{Context, anyhow};
use rusqlite::{OptionalExtension, types::Value};

use super::Store;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtfUser {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub points: i64,
}

impl Store {
    pub fn ctf_user_load(&self, username: &str) -> anyhow::Result<Option<CtfUser>> {
        self.with_read(|conn| {
            conn.query_row(
                "SELECT id, username, password, points FROM ctf_users WHERE username = ?1",
                [username],
                |row| {
                    Ok(CtfUser {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password: row.get(2)?,
                        points: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("loading ctf user")
        })
    }

    /// Create an account. Usernames are unique; racing creates lose.
    pub fn ctf_user_create(&self, username: &str, password: &str) -> anyhow::Result<CtfUser> {
        let id = self
            .write(
                "INSERT INTO ctf_users (username, password, points) VALUES (?1, ?2, 0)",
                vec![Value::from(String::from(username)), Value::from(String::from(password))],
            )
            .context("creating ctf user")?;
        Ok(CtfUser { id, username: String::from(username), password: String::from(password), points: 0 })
    }

    /// Mark a task completed for a user and credit its points. A task
    /// can only be completed once per user; the unique index on
    /// (username, task) makes the insert the gate, so the points
    /// update never runs for a duplicate.
    pub fn ctf_complete_task(&self, username: &str, task: &str, points: i64) -> anyhow::Result<()> {
        self.write(
            "INSERT INTO ctf_user_tasks (username, task, points) VALUES (?1, ?2, ?3)",
            vec![
                Value::from(String::from(username)),
                Value::from(String::from(task)),
                Value::from(points),
            ],
        )
        .map_err(|_| anyhow!("task already completed"))?;

        self.write(
            "UPDATE ctf_users SET points = points + ?1 WHERE username = ?2",
            vec![Value::from(points), Value::from(String::from(username))],
        )
        .context("crediting points")?;
        Ok(())
    }

    pub fn ctf_completed_tasks(&self, username: &str) -> anyhow::Result<Vec<String>> {
        self.with_read(|conn| {
            let mut stmt = conn
                .prepare("SELECT task FROM ctf_user_tasks WHERE username = ?1")
                .context("preparing completed tasks query")?;
            let rows = stmt
                .query_map([username], |row| row.get::<_, String>(0))
                .context("listing completed tasks")?;

            let mut tasks = Vec::new();
            for row in rows {
                tasks.push(row.context("scanning task row")?);
            }
            Ok(tasks)
        })
    }

    /// The top scorers, best first.
    pub fn ctf_leaderboard(&self, limit: i64) -> anyhow::Result<Vec<CtfUser>> {
        self.with_read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, username, password, points FROM ctf_users
                     ORDER BY points DESC LIMIT ?1",
                )
                .context("preparing leaderboard query")?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok(CtfUser {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        password: row.get(2)?,
                        points: row.get(3)?,
                    })
                })
                .context("running leaderboard query")?;

            let mut users = Vec::new();
            for row in rows {
                users.push(row.context("scanning leaderboard row")?);
            }
            Ok(users)
        })
    }
}
