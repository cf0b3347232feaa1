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

//! Embedded file contents that lazy file nodes can point at by name.
//! Config files reference these through the `asset_name` field so
//! operators can sprinkle bait files around the tree without pasting
//! their contents into the config.

/// The document behind the `help` command, shown in the pager.
pub const HELP_TEXT: &str = "\
BEARPOT SHELL

Some things you can try:

  ls [-l] [-a] [path]   list a directory
  cd [path]             move around
  pwd                   where am I?
  cat <file>            read a file (ctrl+c to leave the pager)
  history               what you've typed so far
  whoami                who you claimed to be
  w                     who else is here
  uname -a              system information
  bearsay [words]       wisdom, from a bear
  celebrate             confetti
  matrix                there is no spoon
  ctf                   play capture the flag
  exit                  leave

Everything you type is, of course, completely private.
";

const README: &str = "\
Welcome to the staging box.

Do NOT deploy from here without telling Marcus first. The cron job
that syncs /opt is flaky; if it wedges, just wait, it sorts itself
out. Database credentials moved to the usual place after the audit.
";

const TODO: &str = "\
- rotate the deploy key (overdue)
- ask IT why port 2222 is open to the world
- backups?? check with Marcus
";

/// Look up an embedded asset by name. Names are flat, there is no
/// directory structure here.
pub fn lookup(name: &str) -> Option<&'static str> {
    match name {
        "help.txt" => Some(HELP_TEXT),
        "readme.txt" => Some(README),
        "todo.txt" => Some(TODO),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lookup() {
        assert!(lookup("help.txt").is_some());
        assert!(lookup("readme.txt").is_some());
        assert!(lookup("nope.txt").is_none());
    }
}
