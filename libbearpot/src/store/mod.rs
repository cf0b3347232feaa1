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

//! The durable half of the event pipeline: a sqlite file holding the
//! append-only event log, the options key/value table, and the ctf
//! accounts.
//!
//! All writes are funneled through a single writer thread. Callers
//! hand the sql over a channel and block on a rendezvous reply, which
//! both serializes mutations (sessions run on many threads) and
//! surfaces the error to whoever asked for the write. Reads use a
//! separate connection behind a mutex.
//!
//! A failing store must never take a session down with it. Callers
//! log write errors and move on; events are best-effort durability,
//! not correctness-critical.

use std::{
    path::Path,
    sync::Mutex,
    thread,
};

use anyhow::{Context, anyhow};
use crossbeam_channel::{Receiver, Sender};
use rusqlite::{Connection, types::Value};
use tracing::{info, instrument, warn};

use crate::consts;

mod ctf;
mod event;
mod option;

pub use ctf::CtfUser;
pub use event::{Event, SOURCE_SYSTEM, SOURCE_USER};

const INIT_SQL: &str = "
    PRAGMA user_version = 1;
    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user TEXT NOT NULL,
        host TEXT NOT NULL,
        app TEXT NOT NULL,
        source TEXT NOT NULL,
        type TEXT NOT NULL,
        action TEXT NOT NULL,
        timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS options (
        name TEXT PRIMARY KEY,
        value TEXT,
        timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS ctf_users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT UNIQUE,
        password TEXT,
        points INTEGER DEFAULT 0,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    );
    CREATE TABLE IF NOT EXISTS ctf_user_tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL,
        task TEXT NOT NULL,
        points INTEGER NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(username, task)
    );
";

struct WriteReq {
    sql: String,
    params: Vec<Value>,
    resp: Sender<anyhow::Result<i64>>,
}

pub struct Store {
    write_tx: Sender<WriteReq>,
    read_conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database file under the given
    /// app directory and bring the schema up. Initialization is
    /// idempotent.
    #[instrument(skip_all)]
    pub fn open(app_dir: &Path) -> anyhow::Result<Store> {
        let db_path = app_dir.join(consts::DB_FILE);

        let write_conn = Connection::open(&db_path)
            .with_context(|| format!("opening database at {}", db_path.display()))?;
        write_conn
            .execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .context("setting sqlite pragmas")?;
        write_conn.execute_batch(INIT_SQL).context("creating tables")?;

        let read_conn = Connection::open(&db_path).context("opening read connection")?;
        read_conn.execute_batch("PRAGMA busy_timeout=5000;").context("setting busy timeout")?;

        let (write_tx, write_rx) = crossbeam_channel::unbounded();
        thread::spawn(move || writer(write_conn, write_rx));

        info!("store opened at {}", db_path.display());
        Ok(Store { write_tx, read_conn: Mutex::new(read_conn) })
    }

    /// Execute one mutating statement on the writer thread and wait
    /// for the outcome. Returns the last insert rowid.
    pub(crate) fn write(&self, sql: &str, params: Vec<Value>) -> anyhow::Result<i64> {
        let (resp_tx, resp_rx) = crossbeam_channel::bounded(1);
        self.write_tx
            .send(WriteReq { sql: String::from(sql), params, resp: resp_tx })
            .map_err(|_| anyhow!("store writer is gone"))?;
        resp_rx.recv().context("store writer hung up")?
    }

    pub(crate) fn with_read<T>(
        &self,
        f: impl FnOnce(&Connection) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let conn = self.read_conn.lock().unwrap();
        f(&conn)
    }
}

fn writer(conn: Connection, rx: Receiver<WriteReq>) {
    for req in rx.iter() {
        let res = conn
            .execute(&req.sql, rusqlite::params_from_iter(req.params.iter()))
            .map(|_| conn.last_insert_rowid())
            .map_err(anyhow::Error::from);
        if let Err(err) = &res {
            warn!("store write failed: {:?}", err);
        }
        // the caller may have given up on us, that's fine
        let _ = req.resp.send(res);
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    pub(crate) fn test_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().expect("tmp dir");
        let store = Store::open(dir.path()).expect("store to open");
        (dir, store)
    }

    #[test]
    fn test_open_is_idempotent() {
        let dir = tempfile::tempdir().expect("tmp dir");
        {
            let _store = Store::open(dir.path()).expect("first open");
        }
        let _store = Store::open(dir.path()).expect("second open");
    }

    #[test]
    fn test_write_surfaces_errors() {
        let (_dir, store) = test_store();
        assert!(store.write("INSERT INTO no_such_table VALUES (1)", vec![]).is_err());
    }
}
