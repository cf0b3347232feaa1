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

//! Per-connection session state: the fake shell a visitor actually
//! talks to. A session is a little state machine over its running
//! sub-program; shell mode feeds keystrokes into a line editor and
//! the command engine, every other mode routes input to the
//! sub-program (pager, confetti, matrix rain, the ctf game) until it
//! cancels back to the shell.
//!
//! The session itself is plain synchronous state. The server drives
//! it from the connection task with decoded keys, 1 Hz ticks, and
//! animation frames, and renders the returned view after every step.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    consts,
    core::Core,
    pot::{
        commands::{self, Msg, Sub},
        confetti::Confetti,
        ctf::{CtfEvent, CtfGame},
        keys::Key,
        matrix::Matrix,
    },
    store::Event,
    vfs::Node,
};

const PROMPT: &str = "\u{276f}";

struct Pager {
    content: String,
    scroll: usize,
}

enum SubProgram {
    None,
    Pager(Pager),
    /// The confetti system plus when it started, for the timeout.
    Confetti(Confetti, Instant),
    Matrix(Matrix),
    Ctf(Box<CtfGame>),
}

pub struct Session {
    core: Arc<Core>,
    user: String,
    group: String,
    host: String,

    width: usize,
    height: usize,

    cwd: Arc<Node>,
    input: String,
    /// Append-only scrollback, cleared only by `clear` and the knock.
    output: String,
    /// Most recent line first.
    history: Vec<String>,
    history_idx: usize,
    running: SubProgram,

    /// Named milestones (session_start, knock, enter, ...).
    event_times: HashMap<&'static str, Instant>,
    started: Instant,
    /// When the pending knock line should actually print.
    knock_due: Option<Instant>,

    quit: bool,
}

impl Session {
    pub fn new(core: Arc<Core>, user: &str, host: &str, width: usize, height: usize) -> Session {
        let cwd = core
            .vfs
            .resolve(&core.vfs.root, &core.vfs.home)
            .unwrap_or_else(|_| Arc::clone(&core.vfs.root));

        let now = Instant::now();
        let mut event_times = HashMap::new();
        event_times.insert("session_start", now);

        Session {
            group: String::from(user),
            user: String::from(user),
            host: String::from(host),
            core,
            width: width.max(2),
            height: height.max(4),
            cwd,
            input: String::new(),
            output: String::new(),
            history: vec![],
            history_idx: 0,
            running: SubProgram::None,
            event_times,
            started: now,
            knock_due: None,
            quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width.max(2);
        self.height = height.max(4);
        match &mut self.running {
            SubProgram::Confetti(confetti, _) => confetti.resize(self.width, self.height),
            SubProgram::Matrix(matrix) => matrix.resize(self.width, self.height),
            _ => {}
        }
    }

    /// The frame period the current sub-program wants, if any.
    pub fn frame_period(&self) -> Option<Duration> {
        match self.running {
            SubProgram::Confetti(..) => Some(consts::CONFETTI_FRAME),
            SubProgram::Matrix(_) => Some(consts::MATRIX_FRAME),
            _ => None,
        }
    }

    pub fn handle_key(&mut self, key: Key) {
        if matches!(self.running, SubProgram::None) {
            self.shell_key(key);
            return;
        }

        // ctrl-c cancels any sub-program back to the shell and
        // clears its viewport
        if key == Key::Ctrl('c') {
            self.running = SubProgram::None;
            return;
        }

        let mut done = false;
        match &mut self.running {
            SubProgram::Pager(pager) => match key {
                Key::Up => pager.scroll = pager.scroll.saturating_sub(1),
                Key::Down => pager.scroll += 1,
                _ => {}
            },
            SubProgram::Confetti(confetti, _) => {
                // any key throws more confetti
                confetti.burst();
            }
            SubProgram::Matrix(_) => {}
            SubProgram::Ctf(game) => {
                if game.handle_key(key, &self.core.store) == CtfEvent::Quit {
                    done = true;
                }
            }
            SubProgram::None => {}
        }
        if done {
            self.running = SubProgram::None;
        }
    }

    fn shell_key(&mut self, key: Key) {
        match key {
            Key::Enter => self.run_input_line(),
            Key::Up => {
                self.input = self.history_peek();
                if self.history_idx + 1 < self.history.len() {
                    self.history_idx += 1;
                }
            }
            Key::Down => {
                self.input = self.history_peek();
                self.history_idx = self.history_idx.saturating_sub(1);
            }
            Key::Backspace => {
                self.input.pop();
            }
            Key::Char(c) => self.input.push(c),
            _ => {}
        }
    }

    fn history_peek(&self) -> String {
        self.history.get(self.history_idx).cloned().unwrap_or_default()
    }

    fn run_input_line(&mut self) {
        let line = std::mem::take(&mut self.input);
        debug!("command entered by {}:{}: {}", self.user, self.host, line);
        self.history_idx = 0;
        self.mark("enter");
        self.output.push_str(&format!("\n\x1b[38;5;8m{PROMPT} {line}\x1b[0m\n"));

        if line.split_whitespace().next().is_none() {
            return;
        }

        self.history.insert(0, line.clone());

        // the typed event is durable before any command output lands
        // in the scrollback
        if let Err(err) = self.core.record_event(&self.user, &self.host, true, "typed", &line) {
            warn!("saving typed event: {:?}", err);
        }

        let msgs = commands::run_line(&self.core.vfs, &self.cwd, &self.user, &self.group, &line);
        self.apply(msgs);
    }

    /// Consume a command's output stream, strictly in order.
    fn apply(&mut self, msgs: Vec<Msg>) {
        for msg in msgs.into_iter() {
            match msg {
                Msg::Output(text) => {
                    self.output.push_str(&format!("\n{text}\n"));
                }
                Msg::FileContents(contents) => {
                    self.running = SubProgram::Pager(Pager { content: contents, scroll: 0 });
                }
                Msg::ClearOutput => self.output.clear(),
                Msg::ChangeDir { path, node } => {
                    self.cwd = node;
                    self.output.push_str(&format!("\ncd {path}\n"));
                }
                Msg::SetRunningSub(sub) => self.enter_sub(sub),
                Msg::HistoryList => self.print_history(),
                Msg::ListActiveUsers => self.print_active_users(),
                Msg::Quit => self.quit = true,
            }
        }
    }

    fn enter_sub(&mut self, sub: Sub) {
        self.running = match sub {
            Sub::Pager => SubProgram::Pager(Pager { content: String::new(), scroll: 0 }),
            Sub::Confetti => {
                SubProgram::Confetti(Confetti::new(self.width, self.height), Instant::now())
            }
            Sub::Matrix => SubProgram::Matrix(Matrix::new(self.width, self.height)),
            Sub::Ctf => SubProgram::Ctf(Box::new(CtfGame::new(self.core.tasks.clone()))),
        };
    }

    /// The last ten commands, newest numbered 0 at the bottom.
    fn print_history(&mut self) {
        let count = self.history.len().min(10);
        let list = &self.history[..count];
        for i in (0..list.len()).rev() {
            self.output.push_str(&format!("\n{i}: {}", list[i]));
        }
        self.output.push('\n');
    }

    fn print_active_users(&mut self) {
        let users = self.core.active_users();
        self.output.push_str(&format!(
            "\n04:25:58 up 10 days, 23:21,  {} users,  load average: 0.10, 0.18, 0.10\n",
            users.len()
        ));
        self.output.push_str("USER\tTTY\tFROM\tLOGIN@\tIDLE\tJCPU\tPCPU WHAT\n");
        for (i, user) in users.iter().enumerate() {
            self.output.push_str(&format!("{user}\tpts/{i}\t--\t--\t--\t--\t--\n"));
        }
    }

    /// The 1 Hz tick: drives the knock-knock narrative beat. Sessions
    /// that have been connected for a few minutes get their screen
    /// wiped and, a second later, a greeting.
    pub fn on_tick(&mut self, now: Instant) {
        if now.duration_since(self.started) > consts::KNOCK_AFTER
            && !self.event_times.contains_key("knock")
        {
            self.mark("knock");
            self.output.clear();
            self.knock_due = Some(now + Duration::from_secs(1));
        }

        if let Some(due) = self.knock_due {
            if now >= due {
                self.output.push_str("\nKnock, knock, Neo.\n");
                self.knock_due = None;
            }
        }
    }

    /// Animation frames, only scheduled while a sub-program wants
    /// them.
    pub fn on_frame(&mut self, now: Instant) {
        let mut done = false;
        match &mut self.running {
            SubProgram::Confetti(confetti, entered) => {
                confetti.tick();
                if confetti.is_spent() || now.duration_since(*entered) > consts::CONFETTI_TIMEOUT {
                    done = true;
                }
            }
            SubProgram::Matrix(matrix) => matrix.tick(),
            _ => {}
        }
        if done {
            self.running = SubProgram::None;
        }
    }

    /// Events fanned out by the bus. The admin surfaces use these to
    /// talk at connected visitors.
    pub fn on_bus_event(&mut self, event: Event) {
        if event.source == crate::store::SOURCE_SYSTEM && event.kind == "broadcast" {
            self.output.push_str(&format!("\n{}\n", event.action));
        }
    }

    fn mark(&mut self, milestone: &'static str) {
        self.event_times.insert(milestone, Instant::now());
    }

    /// Render the whole screen. The returned frame starts with a
    /// clear+home and uses \r\n line endings, ready to write straight
    /// down the channel.
    pub fn render(&self) -> String {
        let body = match &self.running {
            SubProgram::None => self.render_shell(),
            SubProgram::Pager(pager) => self.render_pager(pager),
            SubProgram::Confetti(confetti, _) => format!(
                "{}\x1b[38;5;8mPress any key for more confetti. ctrl+c to quit.\x1b[0m\n",
                confetti.render()
            ),
            SubProgram::Matrix(matrix) => matrix.render(),
            SubProgram::Ctf(game) => game.render(&self.core.store),
        };

        format!("\x1b[2J\x1b[H{}", body.replace('\n', "\r\n"))
    }

    fn render_shell(&self) -> String {
        let content_height = self.height.saturating_sub(3);
        let lines: Vec<&str> = self.output.split('\n').collect();
        let tail = if lines.len() > content_height {
            &lines[lines.len() - content_height..]
        } else {
            &lines[..]
        };

        let mut view = String::new();
        for _ in 0..content_height.saturating_sub(tail.len()) {
            view.push('\n');
        }
        view.push_str(&tail.join("\n"));
        view.push('\n');
        view.push_str(&format!("\x1b[38;5;10m{PROMPT}\x1b[0m {}\u{2588}\n", self.input));
        view.push_str("\x1b[38;5;8mTry 'help' if you're lost.\x1b[0m\n");
        view
    }

    fn render_pager(&self, pager: &Pager) -> String {
        let page_height = self.height.saturating_sub(2);
        let lines: Vec<&str> = pager.content.split('\n').collect();
        let top = pager.scroll.min(lines.len().saturating_sub(1));
        let window: Vec<&str> = lines.iter().skip(top).take(page_height).copied().collect();

        let mut view = window.join("\n");
        view.push('\n');
        for _ in 0..page_height.saturating_sub(window.len()) {
            view.push('\n');
        }
        view.push_str("\x1b[38;5;8mctrl + c to exit this file.\x1b[0m\n");
        view
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::test::test_core;

    fn test_session() -> (tempfile::TempDir, Session) {
        let (dir, core) = test_core();
        let session = Session::new(Arc::new(core), "alice", "10.0.0.1:50000", 80, 24);
        (dir, session)
    }

    fn type_line(session: &mut Session, line: &str) {
        for c in line.chars() {
            session.handle_key(Key::Char(c));
        }
        session.handle_key(Key::Enter);
    }

    #[test]
    fn test_history_order() {
        let (_dir, mut session) = test_session();
        type_line(&mut session, "pwd");
        type_line(&mut session, "whoami");
        type_line(&mut session, "ping");
        // blank lines don't make history
        session.handle_key(Key::Enter);

        assert_eq!(session.history, vec!["ping", "whoami", "pwd"]);
    }

    #[test]
    fn test_history_cursor_bounds() {
        let (_dir, mut session) = test_session();
        type_line(&mut session, "first");
        type_line(&mut session, "second");

        // up recalls, bounded at the oldest entry
        session.handle_key(Key::Up);
        assert_eq!(session.input, "second");
        session.handle_key(Key::Backspace); // dirty the input a little
        session.handle_key(Key::Up);
        assert_eq!(session.input, "first");
        session.handle_key(Key::Up);
        assert_eq!(session.input, "first");
        assert_eq!(session.history_idx, 1);

        // down walks back, floored at zero
        session.handle_key(Key::Down);
        session.handle_key(Key::Down);
        session.handle_key(Key::Down);
        assert_eq!(session.history_idx, 0);

        // enter resets the cursor
        session.handle_key(Key::Enter);
        assert_eq!(session.history_idx, 0);
    }

    #[test]
    fn test_typed_event_precedes_command_effects() {
        let (_dir, mut session) = test_session();
        type_line(&mut session, "whoami");

        assert!(session.output.contains("alice"));

        let events = session
            .core
            .store
            .event_query(
                "SELECT id, user, host, app, source, type, action, timestamp
                 FROM events ORDER BY id",
                vec![],
            )
            .expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "typed");
        assert_eq!(events[0].action, "whoami");

        // anything recorded later gets a larger id
        let later = session
            .core
            .record_event("alice", "10.0.0.1:50000", true, "typed", "ls")
            .expect("record");
        assert!(later.id > events[0].id);
    }

    #[test]
    fn test_cd_moves_cwd() {
        let (_dir, mut session) = test_session();
        type_line(&mut session, "cd ../../usr/bin/ls");
        assert_eq!(session.cwd.path, "/usr/bin/ls");

        type_line(&mut session, "pwd");
        assert!(session.output.contains("/usr/bin/ls"));
    }

    #[test]
    fn test_pager_round_trip() {
        let (_dir, mut session) = test_session();
        type_line(&mut session, "cat notes.txt");
        assert!(matches!(session.running, SubProgram::Pager(_)));
        assert!(session.render().contains("This is a note."));

        // while paging, keystrokes don't reach the line editor
        session.handle_key(Key::Char('x'));
        assert_eq!(session.input, "");

        session.handle_key(Key::Ctrl('c'));
        assert!(matches!(session.running, SubProgram::None));
    }

    #[test]
    fn test_confetti_times_out() {
        let (_dir, mut session) = test_session();
        type_line(&mut session, "celebrate");
        assert!(matches!(session.running, SubProgram::Confetti(..)));
        assert_eq!(session.frame_period(), Some(consts::CONFETTI_FRAME));

        session.on_frame(Instant::now() + consts::CONFETTI_TIMEOUT + Duration::from_secs(1));
        assert!(matches!(session.running, SubProgram::None));
    }

    #[test]
    fn test_matrix_until_ctrl_c() {
        let (_dir, mut session) = test_session();
        type_line(&mut session, "matrix");
        assert!(matches!(session.running, SubProgram::Matrix(_)));
        session.on_frame(Instant::now());
        assert!(matches!(session.running, SubProgram::Matrix(_)));
        session.handle_key(Key::Ctrl('c'));
        assert!(matches!(session.running, SubProgram::None));
    }

    #[test]
    fn test_exit_quits() {
        let (_dir, mut session) = test_session();
        type_line(&mut session, "exit");
        assert!(session.should_quit());
    }

    #[test]
    fn test_clear_wipes_scrollback() {
        let (_dir, mut session) = test_session();
        type_line(&mut session, "ping");
        assert!(session.output.contains("Pong!"));
        type_line(&mut session, "clear");
        assert!(!session.output.contains("Pong!"));
    }

    #[test]
    fn test_knock_after_idle() {
        let (_dir, mut session) = test_session();
        type_line(&mut session, "ping");

        // nothing yet at two minutes
        let now = session.started + Duration::from_secs(120);
        session.on_tick(now);
        assert!(session.output.contains("Pong!"));

        // past three minutes the scrollback is wiped...
        let now = session.started + consts::KNOCK_AFTER + Duration::from_secs(1);
        session.on_tick(now);
        assert!(!session.output.contains("Pong!"));
        assert!(!session.output.contains("Knock"));

        // ...and the line lands a second later, exactly once
        session.on_tick(now + Duration::from_secs(1));
        assert!(session.output.contains("Knock, knock, Neo."));

        let before = session.output.clone();
        session.on_tick(now + Duration::from_secs(300));
        assert_eq!(session.output, before);
    }

    #[test]
    fn test_history_listing() {
        let (_dir, mut session) = test_session();
        for i in 0..12 {
            type_line(&mut session, &format!("cmd{i}"));
        }
        type_line(&mut session, "history");

        // ten entries, newest numbered 0 ("history" itself)
        assert!(session.output.contains("0: history"));
        assert!(session.output.contains("9: cmd3"));
        assert!(!session.output.contains("10:"));
    }

    #[test]
    fn test_w_listing() {
        let (_dir, mut session) = test_session();
        session.core.user_enter("alice");
        session.core.user_enter("bob");
        type_line(&mut session, "w");

        assert!(session.output.contains("2 users"));
        assert!(session.output.contains("alice\tpts/0"));
        assert!(session.output.contains("bob\tpts/1"));
    }

    #[test]
    fn test_broadcast_events_reach_scrollback() {
        let (_dir, mut session) = test_session();
        let event = Event::new("admin", "-", false, "broadcast", "We see you.");
        session.on_bus_event(event);
        assert!(session.output.contains("We see you."));

        // ordinary events don't leak to visitors
        let event = Event::new("bob", "10.0.0.2:5", true, "typed", "ls");
        session.on_bus_event(event);
        assert!(!session.output.contains("ls"));
    }

    #[test]
    fn test_render_smoke() {
        let (_dir, mut session) = test_session();
        type_line(&mut session, "echo hello there");
        let frame = session.render();
        assert!(frame.starts_with("\x1b[2J\x1b[H"));
        assert!(frame.contains("hello there"));
        assert!(frame.contains("\r\n"));
    }
}
