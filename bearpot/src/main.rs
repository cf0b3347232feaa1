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

/// bearpot is an interactive ssh honeypot: it accepts every login,
/// presents a convincing fake shell, and records everything. See
/// [the README](https://github.com/shell-pool/bearpot) for more info.
use clap::Parser;

fn main() -> anyhow::Result<()> {
    let args = libbearpot::Args::parse();
    libbearpot::run(args, None)
}
