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

use std::sync::Arc;

use anyhow::anyhow;

use crate::assets;

/// The fixed command handlers that can be attached to a file node.
/// The command engine dispatches on this id, which keeps the tree
/// itself free of closures and lets config files refer to behavior
/// by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Ls,
    Cd,
    Pwd,
    Cat,
    Clear,
    Echo,
    History,
    Help,
    Man,
    Ping,
    Whoami,
    W,
    Uname,
    LsbRelease,
    Bearsay,
    Celebrate,
    Matrix,
    Ctf,
}

/// What a node actually is. Directories carry children, files carry
/// one of three payloads: bytes known at tree build time, bytes
/// looked up from the embedded asset table on open, or a builtin
/// command id.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Dir { children: Vec<Arc<Node>> },
    StaticFile { contents: String },
    LazyFile { asset: String },
    Builtin { id: Builtin },
}

/// One entry in the synthetic filesystem. The tree is assembled once
/// at startup and never mutated afterwards, so sessions share it
/// through plain `Arc`s without any locking.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// Absolute, `/`-separated, canonical. `name` is always the
    /// basename of `path`.
    pub path: String,
    pub owner: String,
    pub group: String,
    /// Three-octal-digit posix permission bits.
    pub mode: u32,
    pub help: Option<String>,
    pub kind: NodeKind,
}

impl Node {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir { .. })
    }

    pub fn is_file(&self) -> bool {
        !self.is_dir()
    }

    /// The children of a directory, in insertion order. Files have
    /// no children.
    pub fn children(&self) -> &[Arc<Node>] {
        match &self.kind {
            NodeKind::Dir { children } => children,
            _ => &[],
        }
    }

    /// Look up an immediate child by name. First match in insertion
    /// order wins.
    pub fn child(&self, name: &str) -> Option<&Arc<Node>> {
        self.children().iter().find(|c| c.name == name)
    }

    /// A node can only be executed if it is a file, actually has a
    /// command handler attached, and the mode bits grant execute to
    /// the asking identity.
    pub fn is_executable(&self, user: &str, group: &str) -> bool {
        if !matches!(self.kind, NodeKind::Builtin { .. }) {
            return false;
        }

        self.mode_grants(user, group, 0o100, 0o010, 0o001)
    }

    pub fn is_readable(&self, user: &str, group: &str) -> bool {
        self.mode_grants(user, group, 0o400, 0o040, 0o004)
    }

    fn mode_grants(&self, user: &str, group: &str, ubit: u32, gbit: u32, obit: u32) -> bool {
        if user == self.owner && self.mode & ubit != 0 {
            return true;
        }

        if group == self.group && self.mode & gbit != 0 {
            return true;
        }

        self.mode & obit != 0
    }

    /// Produce the contents of a file node. Directories and command
    /// binaries have no bytes to give out.
    pub fn open(&self) -> anyhow::Result<String> {
        match &self.kind {
            NodeKind::StaticFile { contents } => Ok(contents.clone()),
            NodeKind::LazyFile { asset } => assets::lookup(asset)
                .map(String::from)
                .ok_or(anyhow!("missing asset: {}", asset)),
            _ => Err(anyhow!("not a file")),
        }
    }
}

/// basename of an absolute slash separated path. The root maps to "".
pub fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

/// dirname of an absolute slash separated path. The parent of the
/// root is the root.
pub fn dirname(path: &str) -> &str {
    match path.rfind('/') {
        None | Some(0) => "/",
        Some(idx) => &path[..idx],
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn file(owner: &str, group: &str, mode: u32) -> Node {
        Node {
            name: String::from("f"),
            path: String::from("/f"),
            owner: String::from(owner),
            group: String::from(group),
            mode,
            help: None,
            kind: NodeKind::StaticFile { contents: String::from("data") },
        }
    }

    #[test]
    fn test_readable() {
        // (owner, group, mode, asking user, asking group, want)
        let cases = vec![
            ("alice", "staff", 0o700, "alice", "staff", true),
            ("alice", "staff", 0o700, "bob", "staff", false),
            ("alice", "staff", 0o700, "bob", "other", false),
            ("alice", "staff", 0o040, "bob", "staff", true),
            ("alice", "staff", 0o040, "bob", "other", false),
            ("alice", "staff", 0o004, "bob", "other", true),
            ("alice", "staff", 0o000, "alice", "staff", false),
        ];

        for (owner, group, mode, user, ugroup, want) in cases.into_iter() {
            let n = file(owner, group, mode);
            assert_eq!(n.is_readable(user, ugroup), want, "mode {mode:o} as {user}:{ugroup}");
        }
    }

    #[test]
    fn test_executable_requires_handler() {
        // mode bits alone are not enough, the node needs a builtin
        let plain = file("root", "root", 0o777);
        assert!(!plain.is_executable("root", "root"));

        let mut exe = file("root", "root", 0o755);
        exe.kind = NodeKind::Builtin { id: Builtin::Ping };
        assert!(exe.is_executable("root", "root"));
        assert!(exe.is_executable("nobody", "nobody"));

        exe.mode = 0o700;
        assert!(exe.is_executable("root", "root"));
        assert!(!exe.is_executable("nobody", "nobody"));
    }

    #[test]
    fn test_directories_never_execute() {
        let dir = Node {
            name: String::from("d"),
            path: String::from("/d"),
            owner: String::from("root"),
            group: String::from("root"),
            mode: 0o777,
            help: None,
            kind: NodeKind::Dir { children: vec![] },
        };
        assert!(!dir.is_executable("root", "root"));
        assert!(dir.open().is_err());
    }

    #[test]
    fn test_path_helpers() {
        let cases = vec![
            ("/", "/", ""),
            ("/usr", "/", "usr"),
            ("/usr/bin", "/usr", "bin"),
            ("/usr/bin/ls", "/usr/bin", "ls"),
        ];
        for (path, dir, base) in cases.into_iter() {
            assert_eq!(dirname(path), dir);
            assert_eq!(basename(path), base);
        }
    }
}
