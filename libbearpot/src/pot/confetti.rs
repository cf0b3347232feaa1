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

//! Confetti for the `celebrate` command: a burst of particles thrown
//! from the top of the screen under a toy gravity, advanced at about
//! thirty frames a second until the session times the party out.

use rand::Rng;

const FRAMES_PER_SECOND: f64 = 30.0;
const NUM_PARTICLES: usize = 75;
const GRAVITY: f64 = 30.0; // cells per second per second, feels right

// 256-color palette equivalents for broad terminal support.
const COLORS: [u8; 5] = [141, 81, 119, 211, 228];
const CHARACTERS: [char; 6] = ['█', '▓', '▒', '░', '▄', '▀'];

struct Particle {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    glyph: char,
    color: u8,
}

pub struct Confetti {
    width: usize,
    height: usize,
    particles: Vec<Particle>,
}

impl Confetti {
    /// A fresh system with one initial burst already in flight.
    pub fn new(width: usize, height: usize) -> Confetti {
        let mut c = Confetti { width, height, particles: vec![] };
        c.burst();
        c
    }

    pub fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
    }

    /// Throw another handful of particles from the top center.
    pub fn burst(&mut self) {
        let mut rng = rand::thread_rng();
        let center = self.width as f64 / 2.0;
        let spread = self.width as f64 / 4.0;
        for _ in 0..NUM_PARTICLES {
            self.particles.push(Particle {
                x: center + spread * (rng.r#gen::<f64>() - 0.5),
                y: 0.0,
                vx: (rng.r#gen::<f64>() - 0.5) * 100.0,
                vy: rng.r#gen::<f64>() * 50.0,
                glyph: CHARACTERS[rng.gen_range(0..CHARACTERS.len())],
                color: COLORS[rng.gen_range(0..COLORS.len())],
            });
        }
    }

    /// Advance the physics one frame and drop whatever fell off the
    /// bottom of the screen.
    pub fn tick(&mut self) {
        let height = self.height as f64;
        for p in self.particles.iter_mut() {
            p.x += p.vx / FRAMES_PER_SECOND;
            p.y += p.vy / FRAMES_PER_SECOND;
            p.vy += GRAVITY / FRAMES_PER_SECOND;
        }
        self.particles.retain(|p| p.y <= height);
    }

    pub fn is_spent(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn render(&self) -> String {
        let mut grid = vec![vec![(' ', 0u8); self.width]; self.height];
        for p in self.particles.iter() {
            let x = p.x.round();
            let y = p.y.round();
            if x >= 0.0 && (x as usize) < self.width && y >= 0.0 && (y as usize) < self.height {
                grid[y as usize][x as usize] = (p.glyph, p.color);
            }
        }

        let mut out = String::with_capacity(self.width * self.height * 4);
        for row in grid.into_iter() {
            for (glyph, color) in row.into_iter() {
                if glyph == ' ' {
                    out.push(' ');
                } else {
                    out.push_str(&format!("\x1b[38;5;{color}m{glyph}\x1b[0m"));
                }
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
    fn test_burst_spawns_particles() {
        let c = Confetti::new(80, 24);
        assert_eq!(c.particles.len(), NUM_PARTICLES);

        let mut c = c;
        c.burst();
        assert_eq!(c.particles.len(), NUM_PARTICLES * 2);
    }

    #[test]
    fn test_gravity_pulls_down() {
        let mut c = Confetti::new(80, 24);
        let before: f64 = c.particles.iter().map(|p| p.vy).sum();
        c.tick();
        let after: f64 = c.particles.iter().map(|p| p.vy).sum();
        assert!(after > before);
    }

    #[test]
    fn test_particles_eventually_fall_out() {
        let mut c = Confetti::new(80, 24);
        for _ in 0..(30 * 60) {
            c.tick();
        }
        assert!(c.is_spent());
    }

    #[test]
    fn test_render_shape() {
        let c = Confetti::new(40, 10);
        let frame = c.render();
        assert_eq!(frame.matches('\n').count(), 10);
    }
}
