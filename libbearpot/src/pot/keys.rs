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

//! Decoding the raw byte stream an ssh client sends for a pty into
//! key events. The stream is scanned byte by byte and the decoder
//! keeps whatever tail might be the start of an escape sequence or a
//! split utf8 character, since the network is free to chop sequences
//! anywhere it likes.

/// One decoded keypress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Tab,
    BackTab,
    Backspace,
    Up,
    Down,
    Left,
    Right,
    Esc,
    /// Ctrl plus a lowercase letter, e.g. Ctrl('c').
    Ctrl(char),
}

#[derive(Default)]
pub struct Decoder {
    pending: Vec<u8>,
    last_was_cr: bool,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder::default()
    }

    /// Scan a chunk of input, returning every complete key in it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Key> {
        self.pending.extend_from_slice(bytes);

        let mut keys = vec![];
        let mut idx = 0;
        while idx < self.pending.len() {
            match self.scan(idx) {
                Scan::Key(key, len) => {
                    keys.push(key);
                    idx += len;
                }
                Scan::Skip(len) => idx += len,
                Scan::Incomplete => break,
            }
        }

        self.pending.drain(..idx);
        keys
    }

    fn scan(&mut self, idx: usize) -> Scan {
        let byte = self.pending[idx];
        let was_cr = self.last_was_cr;
        self.last_was_cr = byte == b'\r';

        match byte {
            0x1b => scan_escape(&self.pending[idx..]),
            b'\r' => Scan::Key(Key::Enter, 1),
            // a bare \n is an enter too, but swallow the \n of a \r\n pair
            b'\n' if was_cr => Scan::Skip(1),
            b'\n' => Scan::Key(Key::Enter, 1),
            0x7f | 0x08 => Scan::Key(Key::Backspace, 1),
            b'\t' => Scan::Key(Key::Tab, 1),
            // the rest of the C0 range maps to ctrl-letter chords
            0x01..=0x1a => Scan::Key(Key::Ctrl((b'a' + byte - 1) as char), 1),
            0x00 | 0x1c..=0x1f => Scan::Skip(1),
            _ => scan_char(&self.pending[idx..]),
        }
    }
}

fn scan_escape(buf: &[u8]) -> Scan {
    // a lone ESC at the end of the chunk might grow into a sequence
    // once more bytes arrive
    let Some(&kind) = buf.get(1) else {
        return Scan::Incomplete;
    };

    match kind {
        // CSI: ESC [ ... final-byte in 0x40..=0x7e
        b'[' => {
            for (off, &b) in buf.iter().enumerate().skip(2) {
                if (0x40..=0x7e).contains(&b) {
                    let key = match b {
                        b'A' => Some(Key::Up),
                        b'B' => Some(Key::Down),
                        b'C' => Some(Key::Right),
                        b'D' => Some(Key::Left),
                        b'Z' => Some(Key::BackTab),
                        _ => None,
                    };
                    return match key {
                        Some(key) => Scan::Key(key, off + 1),
                        None => Scan::Skip(off + 1),
                    };
                }
            }
            Scan::Incomplete
        }
        // SS3: ESC O final-byte, arrows in application mode
        b'O' => {
            let Some(&b) = buf.get(2) else {
                return Scan::Incomplete;
            };
            let key = match b {
                b'A' => Some(Key::Up),
                b'B' => Some(Key::Down),
                b'C' => Some(Key::Right),
                b'D' => Some(Key::Left),
                _ => None,
            };
            match key {
                Some(key) => Scan::Key(key, 3),
                None => Scan::Skip(3),
            }
        }
        _ => Scan::Key(Key::Esc, 1),
    }
}

enum Scan {
    Key(Key, usize),
    Skip(usize),
    Incomplete,
}

fn scan_char(buf: &[u8]) -> Scan {
    let len = utf8_len(buf[0]);
    if len == 0 {
        // continuation byte with no lead, drop it
        return Scan::Skip(1);
    }
    if buf.len() < len {
        return Scan::Incomplete;
    }

    match std::str::from_utf8(&buf[..len]) {
        Ok(s) => match s.chars().next() {
            Some(c) => Scan::Key(Key::Char(c), len),
            None => Scan::Skip(len),
        },
        Err(_) => Scan::Skip(1),
    }
}

fn utf8_len(lead: u8) -> usize {
    match lead {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 0,
    }
}
