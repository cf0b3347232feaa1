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

//! The obligatory digital rain. Each column carries a palette index
//! per row; on every tick the indices cascade one row down, the head
//! fades, and a dormant head occasionally reseeds at full brightness.
//! Glyphs are chosen once and stay put, only the colors move.

use rand::Rng;

// 256-color ansi codes, dimmest first. Index 0 is the dormant state.
const PALETTE: [u8; 10] = [17, 59, 240, 28, 70, 22, 46, 28, 47, 70];

const GLYPHS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ12345678909qwertyuiopasdfghjklzxcvbnm";

/// Odds (out of 100) that a dormant column head reseeds on a tick.
const SEED_CHANCE: u32 = 1;

pub struct Matrix {
    width: usize,
    height: usize,
    /// Indexed [column][row].
    symbols: Vec<Vec<char>>,
    colors: Vec<Vec<usize>>,
}

impl Matrix {
    pub fn new(width: usize, height: usize) -> Matrix {
        let mut m =
            Matrix { width: 0, height: 0, symbols: vec![], colors: vec![] };
        m.resize(width, height);
        m
    }

    /// Rebuild the grid for a new terminal size. Glyphs are rolled
    /// fresh, colors start dormant.
    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;

        let ncolumns = width / 2;
        let mut rng = rand::thread_rng();
        self.symbols = (0..ncolumns)
            .map(|_| {
                (0..height)
                    .map(|_| GLYPHS[rng.gen_range(0..GLYPHS.len())] as char)
                    .collect()
            })
            .collect();
        self.colors = vec![vec![0; height]; ncolumns];
    }

    /// Advance the rain one frame.
    pub fn tick(&mut self) {
        let mut rng = rand::thread_rng();
        for col in self.colors.iter_mut() {
            // everything slides one row down
            for row in (1..col.len()).rev() {
                col[row] = col[row - 1];
            }

            // the head fades, and sometimes relights
            if let Some(head) = col.first_mut() {
                *head = head.saturating_sub(1);
                if *head == 0 && rng.gen_range(0..100) <= SEED_CHANCE {
                    *head = PALETTE.len() - 1;
                }
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.width * self.height * 8);
        for row in 0..self.height {
            for col in 0..self.colors.len() {
                let color_idx = self.colors[col][row];
                let code = PALETTE[color_idx];
                let bold = if color_idx != 0 { "1;" } else { "" };
                out.push_str(&format!(
                    "\x1b[{bold}38;5;{code}m{} \x1b[0m",
                    self.symbols[col][row]
                ));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_colors_cascade_down() {
        let mut m = Matrix::new(8, 4);
        m.colors[0][0] = 9;

        m.tick();
        // the old head slid into row 1, the head itself faded
        assert_eq!(m.colors[0][1], 9);
        assert!(m.colors[0][0] == 8 || m.colors[0][0] == PALETTE.len() - 1);

        m.tick();
        assert_eq!(m.colors[0][2], 9);
    }

    #[test]
    fn test_dormant_head_never_goes_negative() {
        let mut m = Matrix::new(8, 4);
        for _ in 0..50 {
            m.tick();
        }
        for col in m.colors.iter() {
            for &idx in col.iter() {
                assert!(idx < PALETTE.len());
            }
        }
    }

    #[test]
    fn test_render_shape() {
        let m = Matrix::new(10, 3);
        let frame = m.render();
        assert_eq!(frame.matches('\n').count(), 3);
    }

    #[test]
    fn test_resize_rebuilds_grid() {
        let mut m = Matrix::new(10, 3);
        m.resize(20, 6);
        assert_eq!(m.colors.len(), 10);
        assert_eq!(m.colors[0].len(), 6);
    }
}
