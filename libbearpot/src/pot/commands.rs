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

//! The command engine: takes one typed line, resolves the first token
//! against the filesystem, enforces the permission bits, and runs the
//! matching builtin. The result is an ordered list of messages that
//! the session consumes; the engine itself never touches the screen
//! and never kills a session, errors come back as shell style
//! diagnostics in the message stream.

use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::{
    assets,
    vfs::{Builtin, Node, NodeKind, Vfs},
};

/// Sub-programs a command can hand the session over to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sub {
    Pager,
    Confetti,
    Matrix,
    Ctf,
}

/// One element of a command's output stream, consumed strictly in
/// order by the session.
#[derive(Debug, Clone)]
pub enum Msg {
    /// A chunk of text for the scrollback.
    Output(String),
    /// A document for the pager viewport.
    FileContents(String),
    /// Wipe the scrollback.
    ClearOutput,
    /// The working directory changed. `path` is what the user typed,
    /// `node` is where it landed.
    ChangeDir { path: String, node: Arc<Node> },
    /// Hand input and rendering over to a sub-program.
    SetRunningSub(Sub),
    /// The session should print its own history.
    HistoryList,
    /// The session should print the active user table.
    ListActiveUsers,
    /// Terminate the session.
    Quit,
}

/// Run one line. `user`/`group` is the identity used for permission
/// checks; `sudo` rewrites it to root for a single invocation.
pub fn run_line(vfs: &Vfs, cwd: &Arc<Node>, user: &str, group: &str, line: &str) -> Vec<Msg> {
    let parts = match shell_words::split(line) {
        Ok(parts) => parts,
        Err(err) => return vec![Msg::Output(format!("Error parsing command: {err}"))],
    };
    if parts.is_empty() {
        return vec![];
    }

    match parts[0].as_str() {
        "exit" => vec![Msg::Quit],
        // sudo with no argument has nothing to elevate
        "sudo" if parts.len() == 1 => vec![],
        "sudo" => exec(vfs, cwd, "root", "root", &parts[1], &parts[2..]),
        name => exec(vfs, cwd, user, group, name, &parts[1..]),
    }
}

fn exec(
    vfs: &Vfs,
    cwd: &Arc<Node>,
    user: &str,
    group: &str,
    name: &str,
    args: &[String],
) -> Vec<Msg> {
    let node = match vfs.resolve(cwd, name) {
        Ok(node) => node,
        Err(_) => return vec![Msg::Output(format!("{name}: command not found"))],
    };

    if !node.is_executable(user, group) {
        return vec![Msg::Output(String::from("not executable"))];
    }

    // every binary answers to -h/--help before doing anything real
    if args.iter().any(|a| a == "-h" || a == "--help") {
        if let Some(help) = &node.help {
            return vec![Msg::Output(help.clone())];
        }
    }

    match &node.kind {
        NodeKind::Builtin { id } => run_builtin(*id, vfs, cwd, user, group, args),
        // is_executable already requires a builtin, but don't panic
        // if the tree ever disagrees
        _ => vec![Msg::Output(String::from("not executable"))],
    }
}

fn run_builtin(
    id: Builtin,
    vfs: &Vfs,
    cwd: &Arc<Node>,
    user: &str,
    group: &str,
    args: &[String],
) -> Vec<Msg> {
    match id {
        Builtin::Ls => ls(vfs, cwd, args),
        Builtin::Cd => cd(vfs, cwd, args),
        Builtin::Pwd => vec![Msg::Output(cwd.path.clone())],
        Builtin::Cat => cat(vfs, cwd, user, group, args),
        Builtin::Clear => vec![Msg::ClearOutput],
        Builtin::Echo => vec![Msg::Output(args.join(" "))],
        Builtin::History => vec![Msg::HistoryList],
        Builtin::Help => {
            vec![Msg::SetRunningSub(Sub::Pager), Msg::FileContents(String::from(assets::HELP_TEXT))]
        }
        Builtin::Man => vec![Msg::Output(String::from(
            "No manual entry here. Most commands answer to -h or --help.",
        ))],
        Builtin::Ping => vec![Msg::Output(String::from("Pong!"))],
        Builtin::Whoami => vec![Msg::Output(String::from(user))],
        Builtin::W => vec![Msg::ListActiveUsers],
        Builtin::Uname => uname(args),
        Builtin::LsbRelease => lsb_release(args),
        Builtin::Bearsay => bearsay(args),
        Builtin::Celebrate => vec![Msg::SetRunningSub(Sub::Confetti)],
        Builtin::Matrix => vec![Msg::SetRunningSub(Sub::Matrix)],
        Builtin::Ctf => vec![Msg::SetRunningSub(Sub::Ctf)],
    }
}

fn ls(vfs: &Vfs, cwd: &Arc<Node>, args: &[String]) -> Vec<Msg> {
    let mut separator = "\t";
    let mut show_hidden = false;
    let mut target = ".";
    for arg in args {
        match arg.as_str() {
            "-l" => separator = "\n",
            "-a" => show_hidden = true,
            "-la" | "-al" => {
                separator = "\n";
                show_hidden = true;
            }
            other => target = other,
        }
    }

    let node = match vfs.resolve(cwd, target) {
        Ok(node) => node,
        Err(_) => {
            return vec![Msg::Output(format!(
                "ls: cannot access '{target}': No such file or directory"
            ))];
        }
    };

    if node.is_file() {
        return vec![Msg::Output(node.name.clone())];
    }

    let names: Vec<&str> = node
        .children()
        .iter()
        .filter(|c| show_hidden || !c.name.starts_with('.'))
        .map(|c| c.name.as_str())
        .collect();
    vec![Msg::Output(names.join(separator))]
}

fn cd(vfs: &Vfs, cwd: &Arc<Node>, args: &[String]) -> Vec<Msg> {
    let target = args.first().map(String::as_str).unwrap_or(&vfs.home);
    match vfs.resolve(cwd, target) {
        // cd into a file is deliberately allowed, the cwd just
        // becomes the file node. Plenty of visitors try it and the
        // confusion is half the fun.
        Ok(node) => vec![Msg::ChangeDir { path: String::from(target), node }],
        Err(err) => vec![Msg::Output(format!("{err}"))],
    }
}

fn cat(vfs: &Vfs, cwd: &Arc<Node>, user: &str, group: &str, args: &[String]) -> Vec<Msg> {
    let Some(target) = args.first() else {
        return vec![Msg::Output(String::from("cat: missing file operand"))];
    };

    let node = match vfs.resolve(cwd, target) {
        Ok(node) => node,
        Err(_) => {
            return vec![Msg::Output(format!("cat: {target}: No such file or directory"))];
        }
    };

    if node.is_dir() {
        return vec![Msg::Output(format!("cat: {target}: Is a directory"))];
    }

    if !node.is_readable(user, group) {
        return vec![Msg::Output(format!("cat: {target}: Permission denied"))];
    }

    match node.open() {
        Ok(contents) => vec![Msg::SetRunningSub(Sub::Pager), Msg::FileContents(contents)],
        Err(err) => vec![Msg::Output(format!("cat: {target}: {err}"))],
    }
}

const UNAME_KERNEL: &str = "Linux";
const UNAME_NODE: &str = "honeybear";
const UNAME_RELEASE: &str = "5.15.0-86-generic";
const UNAME_VERSION: &str = "#96-Ubuntu SMP Tue Sep 12 14:05:57 UTC 2023";
const UNAME_MACHINE: &str = "x86_64";
const UNAME_OS: &str = "GNU/Linux";

fn uname(args: &[String]) -> Vec<Msg> {
    if args.is_empty() {
        return vec![Msg::Output(String::from(UNAME_KERNEL))];
    }

    // fields print in canonical order no matter how the flags arrive
    let mut kernel = false;
    let mut node = false;
    let mut release = false;
    let mut version = false;
    let mut machine = false;
    let mut processor = false;
    let mut platform = false;
    let mut os = false;
    for arg in args {
        match arg.as_str() {
            "-a" => {
                kernel = true;
                node = true;
                release = true;
                version = true;
                machine = true;
                os = true;
            }
            "-s" => kernel = true,
            "-n" => node = true,
            "-r" => release = true,
            "-v" => version = true,
            "-m" => machine = true,
            "-p" => processor = true,
            "-i" => platform = true,
            "-o" => os = true,
            other => {
                return vec![Msg::Output(format!(
                    "uname: invalid option -- '{}'\nTry 'uname --help' for more information.",
                    other.trim_start_matches('-')
                ))];
            }
        }
    }

    let mut fields = vec![];
    if kernel {
        fields.push(UNAME_KERNEL);
    }
    if node {
        fields.push(UNAME_NODE);
    }
    if release {
        fields.push(UNAME_RELEASE);
    }
    if version {
        fields.push(UNAME_VERSION);
    }
    if machine {
        fields.push(UNAME_MACHINE);
    }
    if processor {
        fields.push(UNAME_MACHINE);
    }
    if platform {
        fields.push(UNAME_MACHINE);
    }
    if os {
        fields.push(UNAME_OS);
    }
    vec![Msg::Output(fields.join(" "))]
}

const LSB_ID: &str = "Ubuntu";
const LSB_DESCRIPTION: &str = "Ubuntu 22.04.3 LTS";
const LSB_RELEASE: &str = "22.04";
const LSB_CODENAME: &str = "jammy";
const LSB_MODULES: &str = "No LSB modules are available.";

fn lsb_release(args: &[String]) -> Vec<Msg> {
    let mut short = false;
    let mut id = false;
    let mut description = false;
    let mut release = false;
    let mut codename = false;
    let mut modules = args.is_empty();
    for arg in args {
        match arg.as_str() {
            "-a" => {
                id = true;
                description = true;
                release = true;
                codename = true;
                modules = true;
            }
            "-i" => id = true,
            "-d" => description = true,
            "-r" => release = true,
            "-c" => codename = true,
            "-s" => short = true,
            "-v" => modules = true,
            other => {
                return vec![Msg::Output(format!(
                    "lsb_release: unsupported option '{other}'"
                ))];
            }
        }
    }

    let mut lines = vec![];
    if modules {
        lines.push(String::from(LSB_MODULES));
    }
    if id {
        lines.push(if short { String::from(LSB_ID) } else { format!("Distributor ID:\t{LSB_ID}") });
    }
    if description {
        lines.push(if short {
            format!("\"{LSB_DESCRIPTION}\"")
        } else {
            format!("Description:\t{LSB_DESCRIPTION}")
        });
    }
    if release {
        lines
            .push(if short { String::from(LSB_RELEASE) } else { format!("Release:\t{LSB_RELEASE}") });
    }
    if codename {
        lines.push(if short {
            String::from(LSB_CODENAME)
        } else {
            format!("Codename:\t{LSB_CODENAME}")
        });
    }
    vec![Msg::Output(lines.join("\n"))]
}

const BEAR_FIGURE: &str = r#"
  __         __
 /  \.-"""-./  \
\    -   -    /
 |   o   o   |
 \  .-'''-.  /
  '-\__Y__/-'
     '---'
      (\__/)
      (='.'=)
      (")_(")
"#;

const BEAR_TAGLINES: [&str; 6] = [
    "Hello, world!",
    "You're in!",
    "I don't play well with others",
    "Hack the planet!",
    "Its in the place that I put that thing that time.",
    "Stay curious!",
];

fn bearsay(args: &[String]) -> Vec<Msg> {
    let line = if args.is_empty() {
        String::from(*BEAR_TAGLINES.choose(&mut rand::thread_rng()).unwrap_or(&BEAR_TAGLINES[0]))
    } else {
        args.join(" ")
    };

    vec![Msg::Output(format!("{BEAR_FIGURE}\n{line}\n"))]
}

/// Flatten a message stream into plain text. This is what a raw
/// `ssh host cmd` exec request gets back: no pager, no animations,
/// just the words.
pub fn render_plain(msgs: &[Msg]) -> String {
    let mut out = String::new();
    for msg in msgs {
        match msg {
            Msg::Output(text) | Msg::FileContents(text) => {
                out.push_str(text);
                if !text.ends_with('\n') {
                    out.push('\n');
                }
            }
            Msg::ChangeDir { path, .. } => {
                out.push_str(&format!("cd {path}\n"));
            }
            Msg::ClearOutput
            | Msg::SetRunningSub(_)
            | Msg::HistoryList
            | Msg::ListActiveUsers
            | Msg::Quit => {}
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    fn vfs() -> Vfs {
        Vfs::build(&[]).expect("template vfs")
    }

    fn run(fs: &Vfs, line: &str) -> Vec<Msg> {
        let root = Arc::clone(&fs.root);
        run_line(fs, &root, "alice", "alice", line)
    }

    fn only_output(msgs: &[Msg]) -> String {
        assert_eq!(msgs.len(), 1, "want exactly one message, got {msgs:?}");
        match &msgs[0] {
            Msg::Output(text) => text.clone(),
            other => panic!("want Output, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_and_whitespace_lines_are_noops() {
        let fs = vfs();
        assert!(run(&fs, "").is_empty());
        assert!(run(&fs, "   ").is_empty());
    }

    #[test]
    fn test_parse_error_surfaces() {
        let fs = vfs();
        let out = only_output(&run(&fs, "echo \"unterminated"));
        assert!(out.contains("Error parsing command"), "got: {out}");
    }

    #[test]
    fn test_exit_quits() {
        let fs = vfs();
        assert!(matches!(run(&fs, "exit")[..], [Msg::Quit]));
    }

    #[test]
    fn test_unknown_command() {
        let fs = vfs();
        assert_eq!(only_output(&run(&fs, "nmap -p- 10.0.0.1")), "nmap: command not found");
    }

    #[test]
    fn test_whoami_and_sudo_identity() {
        let fs = vfs();
        assert_eq!(only_output(&run(&fs, "whoami")), "alice");
        // sudo rewrites the identity for a single invocation
        assert_eq!(only_output(&run(&fs, "sudo whoami")), "root");
        // bare sudo is a no-op
        assert!(run(&fs, "sudo").is_empty());
    }

    #[test]
    fn test_help_short_circuit() {
        let fs = vfs();
        let out = only_output(&run(&fs, "ls --help"));
        assert!(out.contains("List directory contents"), "got: {out}");
        // no listing was produced
        assert!(!out.contains("notes.txt"));
    }

    #[test]
    fn test_ls_variants() {
        let fs = vfs();
        let home = fs.resolve(&fs.root, "/home/you").expect("home");

        let out = only_output(&run_line(&fs, &home, "alice", "alice", "ls"));
        assert_eq!(out, "notes.txt\treadme.txt");

        let out = only_output(&run_line(&fs, &home, "alice", "alice", "ls -a"));
        assert_eq!(out, "notes.txt\treadme.txt\t.secrets");

        let out = only_output(&run_line(&fs, &home, "alice", "alice", "ls -l -a"));
        assert_eq!(out, "notes.txt\nreadme.txt\n.secrets");

        let out = only_output(&run_line(&fs, &home, "alice", "alice", "ls /usr"));
        assert_eq!(out, "bin\tlocal");

        let out = only_output(&run_line(&fs, &home, "alice", "alice", "ls /nope"));
        assert_eq!(out, "ls: cannot access '/nope': No such file or directory");
    }

    #[test]
    fn test_cd_and_pwd() {
        let fs = vfs();
        let home = fs.resolve(&fs.root, "/home/you").expect("home");

        let msgs = run_line(&fs, &home, "alice", "alice", "cd ../../usr/bin/ls");
        let Msg::ChangeDir { path, node } = &msgs[0] else {
            panic!("want ChangeDir, got {msgs:?}");
        };
        assert_eq!(path, "../../usr/bin/ls");
        assert_eq!(node.path, "/usr/bin/ls");

        // pwd reports the canonical path of wherever we landed
        let out = only_output(&run_line(&fs, node, "alice", "alice", "pwd"));
        assert_eq!(out, "/usr/bin/ls");

        // cd with no argument goes home
        let msgs = run_line(&fs, &fs.root, "alice", "alice", "cd");
        let Msg::ChangeDir { node, .. } = &msgs[0] else {
            panic!("want ChangeDir, got {msgs:?}");
        };
        assert_eq!(node.path, "/home/you");

        let out = only_output(&run_line(&fs, &home, "alice", "alice", "cd /no/such"));
        assert_eq!(out, "not found");
    }

    #[test]
    fn test_cat_enters_pager() {
        let fs = vfs();
        let home = fs.resolve(&fs.root, "/home/you").expect("home");

        let msgs = run_line(&fs, &home, "alice", "alice", "cat notes.txt");
        assert!(matches!(msgs[0], Msg::SetRunningSub(Sub::Pager)), "got {msgs:?}");
        let Msg::FileContents(contents) = &msgs[1] else {
            panic!("want FileContents, got {msgs:?}");
        };
        assert_eq!(contents, "This is a note.");
    }

    #[test]
    fn test_cat_diagnostics() {
        let fs = vfs();
        let home = fs.resolve(&fs.root, "/home/you").expect("home");

        let cases = vec![
            ("cat", "cat: missing file operand"),
            ("cat ghost.txt", "cat: ghost.txt: No such file or directory"),
            ("cat /tmp", "cat: /tmp: Is a directory"),
            ("cat .secrets", "cat: .secrets: Permission denied"),
        ];
        for (line, want) in cases.into_iter() {
            let out = only_output(&run_line(&fs, &home, "alice", "alice", line));
            assert_eq!(out, want);
        }

        // sudo gets past the permission check
        let msgs = run_line(&fs, &home, "alice", "alice", "sudo cat .secrets");
        assert!(matches!(msgs[0], Msg::SetRunningSub(Sub::Pager)), "got {msgs:?}");
    }

    #[test]
    fn test_not_executable() {
        let fs = vfs();
        let home = fs.resolve(&fs.root, "/home/you").expect("home");
        // notes.txt is a plain file with no handler
        let out = only_output(&run_line(&fs, &home, "alice", "alice", "notes.txt"));
        assert_eq!(out, "not executable");
    }

    #[test]
    fn test_echo() {
        let fs = vfs();
        assert_eq!(only_output(&run(&fs, "echo hello   world")), "hello world");
        assert_eq!(only_output(&run(&fs, "echo 'hello   world'")), "hello   world");
    }

    #[test]
    fn test_uname() {
        let fs = vfs();
        assert_eq!(only_output(&run(&fs, "uname")), "Linux");
        assert_eq!(only_output(&run(&fs, "uname -s")), "Linux");
        assert_eq!(only_output(&run(&fs, "uname -n")), "honeybear");
        assert_eq!(only_output(&run(&fs, "uname -r -s")), "Linux 5.15.0-86-generic");
        let all = only_output(&run(&fs, "uname -a"));
        assert!(all.starts_with("Linux honeybear"));
        assert!(all.ends_with("GNU/Linux"));
        let bad = only_output(&run(&fs, "uname -z"));
        assert!(bad.contains("invalid option"), "got: {bad}");
    }

    #[test]
    fn test_lsb_release() {
        let fs = vfs();
        assert_eq!(only_output(&run(&fs, "lsb_release")), "No LSB modules are available.");
        assert_eq!(only_output(&run(&fs, "lsb_release -c")), "Codename:\tjammy");
        assert_eq!(only_output(&run(&fs, "lsb_release -c -s")), "jammy");
        let all = only_output(&run(&fs, "lsb_release -a"));
        assert!(all.contains("Distributor ID:\tUbuntu"));
        assert!(all.contains("Release:\t22.04"));
    }

    #[test]
    fn test_bearsay() {
        let fs = vfs();
        let out = only_output(&run(&fs, "bearsay hack the planet"));
        assert!(out.contains("(\\__/)"));
        assert!(out.contains("hack the planet"));

        // no args picks one of the stock taglines
        let out = only_output(&run(&fs, "cowsay"));
        assert!(BEAR_TAGLINES.iter().any(|t| out.contains(t)), "got: {out}");
    }

    #[test]
    fn test_sub_mode_entries() {
        let fs = vfs();
        assert!(matches!(run(&fs, "celebrate")[..], [Msg::SetRunningSub(Sub::Confetti)]));
        assert!(matches!(run(&fs, "matrix")[..], [Msg::SetRunningSub(Sub::Matrix)]));
        assert!(matches!(run(&fs, "ctf")[..], [Msg::SetRunningSub(Sub::Ctf)]));
        assert!(matches!(run(&fs, "clear")[..], [Msg::ClearOutput]));
        assert!(matches!(run(&fs, "history")[..], [Msg::HistoryList]));
        assert!(matches!(run(&fs, "w")[..], [Msg::ListActiveUsers]));
    }

    #[test]
    fn test_render_plain() {
        let fs = vfs();
        let out = render_plain(&run(&fs, "whoami"));
        assert_eq!(out, "alice\n");

        // pager transitions render as just the file body
        let home = fs.resolve(&fs.root, "/home/you").expect("home");
        let out = render_plain(&run_line(&fs, &home, "alice", "alice", "cat notes.txt"));
        assert_eq!(out, "This is a note.\n");
    }
}
