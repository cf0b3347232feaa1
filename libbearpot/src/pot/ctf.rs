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

//! The capture-the-flag side game, reachable from the shell through
//! the `ctf` command. A tiny screen machine: login (create or check
//! an account), task menu, answer prompt. Accounts and completions
//! live in the same sqlite file as everything else.

use crate::{
    config::TaskSpec,
    pot::keys::Key,
    store::{CtfUser, Store},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Login,
    Menu,
    Answer,
}

/// What the session should do after a keypress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtfEvent {
    None,
    /// Hand control back to the shell.
    Quit,
}

pub struct CtfGame {
    screen: Screen,
    tasks: Vec<TaskSpec>,

    username_input: String,
    password_input: String,
    answer_input: String,
    /// On the login screen, whether the password field has focus.
    password_focused: bool,

    user: Option<CtfUser>,
    cursor: usize,
    selected: Option<usize>,
    err_msg: String,
}

impl CtfGame {
    pub fn new(tasks: Vec<TaskSpec>) -> CtfGame {
        CtfGame {
            screen: Screen::Login,
            tasks,
            username_input: String::new(),
            password_input: String::new(),
            answer_input: String::new(),
            password_focused: false,
            user: None,
            cursor: 0,
            selected: None,
            err_msg: String::new(),
        }
    }

    pub fn handle_key(&mut self, key: Key, store: &Store) -> CtfEvent {
        if key == Key::Ctrl('c') {
            return CtfEvent::Quit;
        }

        match self.screen {
            Screen::Login => self.handle_login_key(key, store),
            Screen::Menu => self.handle_menu_key(key),
            Screen::Answer => self.handle_answer_key(key, store),
        }
    }

    fn handle_login_key(&mut self, key: Key, store: &Store) -> CtfEvent {
        match key {
            Key::Enter => self.authenticate(store),
            Key::Tab | Key::BackTab | Key::Up | Key::Down => {
                self.password_focused = !self.password_focused;
            }
            Key::Backspace => {
                self.focused_input().pop();
            }
            Key::Char(c) => {
                let input = self.focused_input();
                if input.chars().count() < 32 {
                    input.push(c);
                }
            }
            _ => {}
        }
        CtfEvent::None
    }

    fn focused_input(&mut self) -> &mut String {
        if self.password_focused { &mut self.password_input } else { &mut self.username_input }
    }

    fn authenticate(&mut self, store: &Store) {
        if self.username_input.is_empty() {
            self.err_msg = String::from("username required");
            return;
        }

        let loaded = match store.ctf_user_load(&self.username_input) {
            Ok(loaded) => loaded,
            Err(err) => {
                self.err_msg = format!("{err}");
                return;
            }
        };

        let user = match loaded {
            Some(user) => user,
            None => match store.ctf_user_create(&self.username_input, &self.password_input) {
                Ok(user) => user,
                Err(err) => {
                    self.err_msg = format!("{err}");
                    return;
                }
            },
        };

        if user.password != self.password_input {
            self.err_msg = String::from("invalid password");
            return;
        }

        self.user = Some(user);
        self.screen = Screen::Menu;
        self.err_msg.clear();
    }

    fn handle_menu_key(&mut self, key: Key) -> CtfEvent {
        match key {
            Key::Up | Key::Char('k') => {
                self.cursor = self.cursor.saturating_sub(1);
            }
            Key::Down | Key::Char('j') => {
                if self.cursor + 1 < self.tasks.len() {
                    self.cursor += 1;
                }
            }
            Key::Enter => {
                if !self.tasks.is_empty() {
                    self.selected = Some(self.cursor);
                    self.answer_input.clear();
                    self.screen = Screen::Answer;
                }
            }
            Key::Char('q') => return CtfEvent::Quit,
            _ => {}
        }
        CtfEvent::None
    }

    fn handle_answer_key(&mut self, key: Key, store: &Store) -> CtfEvent {
        match key {
            Key::Enter => {
                self.check_answer(store);
                self.screen = Screen::Menu;
            }
            Key::Esc => {
                self.screen = Screen::Menu;
            }
            Key::Backspace => {
                self.answer_input.pop();
            }
            Key::Char(c) => {
                if self.answer_input.chars().count() < 256 {
                    self.answer_input.push(c);
                }
            }
            _ => {}
        }
        CtfEvent::None
    }

    fn check_answer(&mut self, store: &Store) {
        let Some(task) = self.selected.and_then(|idx| self.tasks.get(idx)) else {
            return;
        };
        let Some(user) = &mut self.user else {
            return;
        };

        if self.answer_input.trim() != task.flag {
            self.err_msg = String::from("Incorrect flag");
            return;
        }

        match store.ctf_complete_task(&user.username, &task.name, task.points) {
            Ok(()) => {
                user.points += task.points;
                self.err_msg = format!("Correct! +{} points", task.points);
            }
            Err(err) => {
                self.err_msg = format!("{err}");
            }
        }
    }

    pub fn render(&self, store: &Store) -> String {
        match self.screen {
            Screen::Login => format!(
                "\x1b[1mHoney Bear Honey Pot CTF\x1b[0m\n\
                 Welcome! Create an account by entering a new username and\n\
                 password, or log in with your existing credentials.\n\n\
                 {}\n\
                 {}username: {}\n\
                 {}password: {}\n\n\
                 (tab switches fields, enter submits, ctrl+c leaves)\n",
                self.err_msg,
                if self.password_focused { "  " } else { "> " },
                self.username_input,
                if self.password_focused { "> " } else { "  " },
                "*".repeat(self.password_input.chars().count()),
            ),
            Screen::Menu => {
                let user = self.user.as_ref();
                let header = format!(
                    "Honey Bear Honey Pot CTF - {} ({} pts)",
                    user.map(|u| u.username.as_str()).unwrap_or("?"),
                    user.map(|u| u.points).unwrap_or(0),
                );
                format!(
                    "\x1b[1m{header}\x1b[0m\n\n{}\n{}\n\n\
                     (enter picks a task, q leaves)\n",
                    self.render_tasks(store),
                    self.err_msg,
                )
            }
            Screen::Answer => {
                let task = self.selected.and_then(|idx| self.tasks.get(idx));
                format!(
                    "\x1b[1m{}\x1b[0m\n{}\n\nflag: {}\n{}\n\n\
                     (enter submits, esc goes back)\n",
                    task.map(|t| t.name.as_str()).unwrap_or("?"),
                    task.map(|t| t.description.as_str()).unwrap_or(""),
                    self.answer_input,
                    self.err_msg,
                )
            }
        }
    }

    fn render_tasks(&self, store: &Store) -> String {
        if self.tasks.is_empty() {
            return String::from("No tasks are configured yet. Come back later.");
        }

        let done: Vec<String> = self
            .user
            .as_ref()
            .and_then(|u| store.ctf_completed_tasks(&u.username).ok())
            .unwrap_or_default();

        self.tasks
            .iter()
            .enumerate()
            .map(|(idx, task)| {
                let marker = if idx == self.cursor && self.screen == Screen::Menu { ">" } else { " " };
                let status = if done.contains(&task.name) { "[done]" } else { "      " };
                format!("{marker} {status} {} ({} pts) - {}", task.name, task.points, task.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::test::test_store;

    fn tasks() -> Vec<TaskSpec> {
        vec![
            TaskSpec {
                name: String::from("warmup"),
                description: String::from("find the flag"),
                flag: String::from("CTF{hi}"),
                points: 10,
            },
            TaskSpec {
                name: String::from("harder"),
                description: String::from("find the other flag"),
                flag: String::from("CTF{bye}"),
                points: 50,
            },
        ]
    }

    fn type_str(game: &mut CtfGame, store: &Store, s: &str) {
        for c in s.chars() {
            game.handle_key(Key::Char(c), store);
        }
    }

    #[test]
    fn test_login_creates_account() {
        let (_dir, store) = test_store();
        let mut game = CtfGame::new(tasks());

        type_str(&mut game, &store, "alice");
        game.handle_key(Key::Tab, &store);
        type_str(&mut game, &store, "hunter2");
        game.handle_key(Key::Enter, &store);

        assert_eq!(game.screen, Screen::Menu);
        assert!(store.ctf_user_load("alice").unwrap().is_some());
    }

    #[test]
    fn test_login_rejects_wrong_password() {
        let (_dir, store) = test_store();
        store.ctf_user_create("alice", "right").expect("create");

        let mut game = CtfGame::new(tasks());
        type_str(&mut game, &store, "alice");
        game.handle_key(Key::Tab, &store);
        type_str(&mut game, &store, "wrong");
        game.handle_key(Key::Enter, &store);

        assert_eq!(game.screen, Screen::Login);
        assert_eq!(game.err_msg, "invalid password");
    }

    #[test]
    fn test_capture_flow() {
        let (_dir, store) = test_store();
        let mut game = CtfGame::new(tasks());

        type_str(&mut game, &store, "alice");
        game.handle_key(Key::Tab, &store);
        type_str(&mut game, &store, "pw");
        game.handle_key(Key::Enter, &store);

        // pick the second task
        game.handle_key(Key::Down, &store);
        game.handle_key(Key::Enter, &store);
        assert_eq!(game.screen, Screen::Answer);

        type_str(&mut game, &store, "CTF{bye}");
        game.handle_key(Key::Enter, &store);

        assert_eq!(game.screen, Screen::Menu);
        assert_eq!(game.err_msg, "Correct! +50 points");
        assert_eq!(store.ctf_user_load("alice").unwrap().unwrap().points, 50);

        // a second capture of the same task does not double-credit
        game.handle_key(Key::Enter, &store);
        type_str(&mut game, &store, "CTF{bye}");
        game.handle_key(Key::Enter, &store);
        assert_eq!(game.err_msg, "task already completed");
        assert_eq!(store.ctf_user_load("alice").unwrap().unwrap().points, 50);
    }

    #[test]
    fn test_wrong_flag() {
        let (_dir, store) = test_store();
        let mut game = CtfGame::new(tasks());
        type_str(&mut game, &store, "alice");
        game.handle_key(Key::Enter, &store);
        game.handle_key(Key::Enter, &store);
        type_str(&mut game, &store, "nope");
        game.handle_key(Key::Enter, &store);

        assert_eq!(game.err_msg, "Incorrect flag");
        assert_eq!(store.ctf_user_load("alice").unwrap().unwrap().points, 0);
    }

    #[test]
    fn test_quit_paths() {
        let (_dir, store) = test_store();
        let mut game = CtfGame::new(tasks());
        assert_eq!(game.handle_key(Key::Ctrl('c'), &store), CtfEvent::Quit);

        type_str(&mut game, &store, "alice");
        game.handle_key(Key::Enter, &store);
        assert_eq!(game.handle_key(Key::Char('q'), &store), CtfEvent::Quit);
    }

    #[test]
    fn test_menu_cursor_bounds() {
        let (_dir, store) = test_store();
        let mut game = CtfGame::new(tasks());
        type_str(&mut game, &store, "alice");
        game.handle_key(Key::Enter, &store);

        game.handle_key(Key::Up, &store);
        assert_eq!(game.cursor, 0);
        game.handle_key(Key::Down, &store);
        game.handle_key(Key::Down, &store);
        game.handle_key(Key::Down, &store);
        assert_eq!(game.cursor, 1);
    }
}
