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

//! The synthetic filesystem every session wanders around in.
//!
//! The tree is a plain in-memory structure that simulates just enough
//! of a posix directory hierarchy to keep a visitor busy: names,
//! owners, permission bits, file contents, and executables that map
//! to builtin command handlers. Nothing here ever touches the real
//! filesystem of the host.
//!
//! A template tree is assembled once at startup, extra nodes from the
//! config file are merged in, and the result is frozen behind `Arc`s.
//! Sessions only ever read it, so there is no locking.

use std::sync::Arc;

use anyhow::{Context, anyhow};

use crate::config;

mod node;

pub use node::{Builtin, Node, NodeKind, basename, dirname};

/// The filesystem shared by all sessions: the root of the tree plus
/// the prefixes searched when a bare command name is typed.
#[derive(Debug)]
pub struct Vfs {
    pub root: Arc<Node>,
    /// Prefixes probed, in order, when resolving a bare name typed at
    /// the prompt, mirroring a shell $PATH.
    pub search_path: Vec<String>,
    /// Where `cd` with no argument lands.
    pub home: String,
}

impl Vfs {
    /// Build the standard template tree and merge in any nodes the
    /// config file wants to add on top.
    pub fn build(extra: &[config::NodeSpec]) -> anyhow::Result<Vfs> {
        let mut root = template();
        for spec in extra {
            insert(&mut root, spec)
                .with_context(|| format!("adding config node {}", spec.path))?;
        }

        Ok(Vfs {
            root,
            search_path: vec![String::from("/usr/bin/")],
            home: String::from("/home/you"),
        })
    }

    /// Resolve a raw path against a base node.
    ///
    /// Handles `.`, `..`, absolute paths, explicit `./` prefixes, and
    /// plain relative paths. A bare name (no `/` at the top level of
    /// the walk) is additionally looked up through `search_path`, so
    /// typing `ls` finds `/usr/bin/ls` from anywhere. Children are
    /// matched in insertion order.
    pub fn resolve(&self, base: &Arc<Node>, raw: &str) -> anyhow::Result<Arc<Node>> {
        self.resolve_at(base, raw, 0)
    }

    fn resolve_at(&self, base: &Arc<Node>, raw: &str, depth: u32) -> anyhow::Result<Arc<Node>> {
        if raw.is_empty() || raw == "." {
            return Ok(Arc::clone(base));
        }

        if let Some(rest) = raw.strip_prefix("..") {
            let parent = self.parent_of(base);
            // "../x" keeps walking from the parent, a bare ".." stops
            // there. Anything else ("..x") falls out as not found.
            return match rest.strip_prefix('/') {
                Some(rest) => self.resolve_at(&parent, rest, depth + 1),
                None if rest.is_empty() => Ok(parent),
                None => Err(anyhow!("not found")),
            };
        }

        if let Some(rest) = raw.strip_prefix('/') {
            return self.resolve_at(&Arc::clone(&self.root), rest, depth + 1);
        }

        if let Some(rest) = raw.strip_prefix("./") {
            return self.resolve_at(base, rest, depth + 1);
        }

        if !raw.contains('/') && depth == 0 {
            if let Some(found) = base.child(raw) {
                return Ok(Arc::clone(found));
            }

            // Not in the current directory, probe the search path as
            // if the name had been typed with each prefix.
            for prefix in self.search_path.iter() {
                if let Ok(found) = self.resolve_at(base, &format!("{prefix}{raw}"), depth + 1) {
                    return Ok(found);
                }
            }

            return Err(anyhow!("not found"));
        }

        let (first, rest) = match raw.split_once('/') {
            Some((first, rest)) => (first, rest),
            None => (raw, ""),
        };
        let found = base.child(first).ok_or(anyhow!("not found"))?;
        if rest.is_empty() {
            Ok(Arc::clone(found))
        } else {
            self.resolve_at(&Arc::clone(found), rest, depth + 1)
        }
    }

    /// The parent of a node, computed from its canonical path. The
    /// root is its own parent.
    pub fn parent_of(&self, n: &Arc<Node>) -> Arc<Node> {
        if n.path == "/" {
            return Arc::clone(&self.root);
        }

        let parent_path = dirname(&n.path);
        self.resolve_at(&Arc::clone(&self.root), parent_path.trim_start_matches('/'), 1)
            .unwrap_or_else(|_| Arc::clone(&self.root))
    }
}

fn dir(path: &str, children: Vec<Arc<Node>>) -> Arc<Node> {
    Arc::new(Node {
        name: String::from(basename(path)),
        path: String::from(path),
        owner: String::from("root"),
        group: String::from("root"),
        mode: 0o755,
        help: None,
        kind: NodeKind::Dir { children },
    })
}

fn owned_dir(path: &str, owner: &str, group: &str, children: Vec<Arc<Node>>) -> Arc<Node> {
    Arc::new(Node {
        name: String::from(basename(path)),
        path: String::from(path),
        owner: String::from(owner),
        group: String::from(group),
        mode: 0o755,
        help: None,
        kind: NodeKind::Dir { children },
    })
}

fn file(path: &str, owner: &str, group: &str, mode: u32, contents: &str) -> Arc<Node> {
    Arc::new(Node {
        name: String::from(basename(path)),
        path: String::from(path),
        owner: String::from(owner),
        group: String::from(group),
        mode,
        help: None,
        kind: NodeKind::StaticFile { contents: String::from(contents) },
    })
}

fn bin(name: &str, id: Builtin, help: &str) -> Arc<Node> {
    Arc::new(Node {
        name: String::from(name),
        path: format!("/usr/bin/{name}"),
        owner: String::from("root"),
        group: String::from("root"),
        mode: 0o755,
        help: Some(String::from(help)),
        kind: NodeKind::Builtin { id },
    })
}

/// The static template tree. Kept deliberately boring: a handful of
/// standard top level directories, a home directory with some bait,
/// and the command binaries under /usr/bin.
fn template() -> Arc<Node> {
    let usr_bin = dir(
        "/usr/bin",
        vec![
            bin("ls", Builtin::Ls, "Usage: ls [-l] [-a] [path]\nList directory contents."),
            bin("cd", Builtin::Cd, "Usage: cd [path]\nChange the working directory."),
            bin("pwd", Builtin::Pwd, "Usage: pwd\nPrint the working directory."),
            bin("cat", Builtin::Cat, "Usage: cat [file]\nPrint a file."),
            bin("less", Builtin::Cat, "Usage: less [file]\nView a file."),
            bin("more", Builtin::Cat, "Usage: more [file]\nView a file."),
            bin("clear", Builtin::Clear, "Usage: clear\nClear the screen."),
            bin("echo", Builtin::Echo, "Usage: echo [text]...\nRepeat some text."),
            bin("history", Builtin::History, "Usage: history\nShow recent commands."),
            bin("help", Builtin::Help, "Usage: help\nWhat you'd expect."),
            bin("man", Builtin::Man, "Usage: man [command]\nRead the manual."),
            bin("ping", Builtin::Ping, "Usage: ping [host]\nCheck if anyone is home."),
            bin("whoami", Builtin::Whoami, "Usage: whoami\nPrint the current user."),
            bin("w", Builtin::W, "Usage: w\nShow who is logged in."),
            bin("uname", Builtin::Uname, "Usage: uname [-asnrvmopi]\nPrint system information."),
            bin(
                "lsb_release",
                Builtin::LsbRelease,
                "Usage: lsb_release [-adrcisv]\nPrint distribution information.",
            ),
            bin("bearsay", Builtin::Bearsay, "Usage: bearsay [text]...\nA bear says it."),
            bin("cowsay", Builtin::Bearsay, "Usage: cowsay [text]...\nClose enough."),
            bin("celebrate", Builtin::Celebrate, "Usage: celebrate\nYou earned it."),
            bin("matrix", Builtin::Matrix, "Usage: matrix\nFollow the white rabbit."),
            bin("ctf", Builtin::Ctf, "Usage: ctf\nPlay capture the flag."),
        ],
    );

    let home_you = owned_dir(
        "/home/you",
        "you",
        "default",
        vec![
            file("/home/you/notes.txt", "you", "default", 0o644, "This is a note."),
            Arc::new(Node {
                name: String::from("readme.txt"),
                path: String::from("/home/you/readme.txt"),
                owner: String::from("you"),
                group: String::from("default"),
                mode: 0o644,
                help: None,
                kind: NodeKind::LazyFile { asset: String::from("readme.txt") },
            }),
            file(
                "/home/you/.secrets",
                "root",
                "root",
                0o600,
                "If you can read this, something went very wrong.",
            ),
        ],
    );

    dir(
        "/",
        vec![
            dir("/opt", vec![]),
            dir("/root", vec![]),
            dir(
                "/etc",
                vec![file(
                    "/etc/passwd",
                    "root",
                    "root",
                    0o644,
                    "root:x:0:0:root:/root:/bin/bash\n\
                     daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
                     you:x:1000:1000:you:/home/you:/bin/bash\n",
                )],
            ),
            dir("/usr", vec![usr_bin, dir("/usr/local", vec![])]),
            dir("/var", vec![dir("/var/log", vec![])]),
            dir("/home", vec![home_you]),
            dir("/tmp", vec![]),
        ],
    )
}

/// Insert one config-declared node under its parent. Parents must
/// already exist. Missing fields get the usual defaults: root:root,
/// 0755 for directories, 0644 for files.
fn insert(root: &mut Arc<Node>, spec: &config::NodeSpec) -> anyhow::Result<()> {
    if spec.path.is_empty() || !spec.path.starts_with('/') {
        return Err(anyhow!("node path must be absolute"));
    }

    let directory = spec.directory.unwrap_or(false);
    let mode = match &spec.mode {
        Some(m) => u32::from_str_radix(m, 8).with_context(|| format!("bad mode {m:?}"))?,
        None if directory => 0o755,
        None => 0o644,
    };

    let kind = if directory {
        NodeKind::Dir { children: vec![] }
    } else if let Some(asset) = &spec.asset_name {
        NodeKind::LazyFile { asset: asset.clone() }
    } else {
        NodeKind::StaticFile { contents: spec.content_text.clone().unwrap_or_default() }
    };

    let node = Node {
        name: spec.name.clone().unwrap_or_else(|| String::from(basename(&spec.path))),
        path: spec.path.clone(),
        owner: spec.owner.clone().unwrap_or_else(|| String::from("root")),
        group: spec.group.clone().unwrap_or_else(|| String::from("root")),
        mode,
        help: spec.help_text.clone(),
        kind,
    };

    // Walk down to the parent directory. Arc::make_mut is fine here,
    // nothing else holds a reference until the tree is frozen.
    let mut cur = root;
    let parent_path = dirname(&spec.path);
    for seg in parent_path.split('/').filter(|s| !s.is_empty()) {
        let cur_node = Arc::make_mut(cur);
        let NodeKind::Dir { children } = &mut cur_node.kind else {
            return Err(anyhow!("parent {} is not a directory", parent_path));
        };
        let idx = children
            .iter()
            .position(|c| c.name == seg)
            .ok_or(anyhow!("parent {} not found", parent_path))?;
        cur = &mut children[idx];
    }

    let cur_node = Arc::make_mut(cur);
    match &mut cur_node.kind {
        NodeKind::Dir { children } => {
            children.push(Arc::new(node));
            Ok(())
        }
        _ => Err(anyhow!("parent {} is not a directory", parent_path)),
    }
}
