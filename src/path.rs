//! Cloud path strings
//!
//! `~/docs/a.txt` resolves from the session user's home, `~alice/docs`
//! from alice's home, and `#<32 hex chars>/sub` from an explicit node.
//! Any other leading character is a format error. Resolution walks one
//! `/`-separated segment at a time through directory listings; empty
//! segments (repeated slashes) are skipped. Nothing is cached.

use crate::client::CloudClient;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::protocol::{PATH_HOME, PATH_NODE, PATH_SEP};

enum Start {
    Home(String),
    Explicit(Node),
}

fn parse_start(path: &str) -> Result<(Start, &str)> {
    let mut chars = path.chars();
    let (head, rest) = match chars.next() {
        Some(c) if c == PATH_HOME => {
            let rest = &path[PATH_HOME.len_utf8()..];
            let (user, remainder) = match rest.split_once(PATH_SEP) {
                Some((user, remainder)) => (user, remainder),
                None => (rest, ""),
            };
            (Start::Home(user.to_string()), remainder)
        }
        Some(c) if c == PATH_NODE => {
            let rest = &path[PATH_NODE.len_utf8()..];
            let (id, remainder) = match rest.split_once(PATH_SEP) {
                Some((id, remainder)) => (id, remainder),
                None => (rest, ""),
            };
            let node = Node::parse(id)
                .map_err(|_| Error::PathFormat(format!("bad node id in path: {id:?}")))?;
            (Start::Explicit(node), remainder)
        }
        _ => {
            return Err(Error::PathFormat(format!(
                "path must start with '{PATH_HOME}' or '{PATH_NODE}': {path:?}"
            )))
        }
    };
    Ok((head, rest))
}

/// Resolve a full path string to a node.
pub fn resolve(client: &CloudClient, path: &str) -> Result<Node> {
    let (start, rest) = parse_start(path)?;
    let start = match start {
        Start::Home(user) => client.get_home(&user)?,
        Start::Explicit(node) => node,
    };
    walk(client, start, rest)
}

/// Descend from `start` through each segment of `rest`. An unmatched
/// segment fails with the offending name.
pub fn walk(client: &CloudClient, start: Node, rest: &str) -> Result<Node> {
    let mut cur = start;
    for segment in rest.split(PATH_SEP) {
        if segment.is_empty() {
            continue;
        }
        let mut next = None;
        client.list_directory(cur, |node, name| {
            if name == segment {
                next = Some(node);
            }
        })?;
        cur = next.ok_or_else(|| Error::PathNotFound(segment.to_string()))?;
    }
    Ok(cur)
}

/// Split a path into (parent path, leaf name), for operations that need a
/// directory plus a new entry name. Fails if the path has no leaf.
pub fn split_leaf(path: &str) -> Result<(&str, &str)> {
    let trimmed = path.trim_end_matches(PATH_SEP);
    match trimmed.rsplit_once(PATH_SEP) {
        Some((parent, leaf)) if !leaf.is_empty() => Ok((parent, leaf)),
        _ => Err(Error::PathFormat(format!("path has no parent/name split: {path:?}"))),
    }
}
