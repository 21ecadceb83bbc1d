// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Client name resolution into canonical volume paths.
//!
//! Canonical paths are absolute, `/`-separated, with no trailing slash; the
//! root is `/`. Client names follow the native rules: anything up to the last
//! `:` names a device or volume and makes the name root-relative, an empty
//! component steps to the parent, and a trailing empty component is ignored.

use pktfs_proto::ErrorCode;

/// Resolve `name` relative to the canonical directory `base`
pub fn resolve(base: &str, name: &str, max_len: usize) -> Result<String, ErrorCode> {
    let (mut parts, rest): (Vec<&str>, &str) = match name.rfind(':') {
        Some(idx) => (Vec::new(), &name[idx + 1..]),
        None => (components(base).collect(), name),
    };

    if !rest.is_empty() {
        let segments: Vec<&str> = rest.split('/').collect();
        let last = segments.len() - 1;
        for (i, segment) in segments.into_iter().enumerate() {
            match segment {
                "" if i == last => {}
                "" => {
                    if parts.pop().is_none() {
                        return Err(ErrorCode::ObjectNotFound);
                    }
                }
                "." | ".." => return Err(ErrorCode::InvalidComponentName),
                component => parts.push(component),
            }
        }
    }

    let path = if parts.is_empty() {
        "/".to_string()
    } else {
        let mut path = String::new();
        for part in parts {
            path.push('/');
            path.push_str(part);
        }
        path
    };
    if path.len() > max_len {
        return Err(ErrorCode::LineTooLong);
    }
    Ok(path)
}

pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

pub fn is_root(path: &str) -> bool {
    path == "/"
}

/// Parent of a canonical path, `None` for the root
pub fn parent(path: &str) -> Option<&str> {
    if is_root(path) {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// Last component, empty for the root
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

pub fn join(dir: &str, name: &str) -> String {
    if is_root(dir) {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// `path` followed by each ancestor up to and including the root
pub fn self_and_ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(path), |p| parent(*p))
}

/// Case folding of one code point: the full uppercase expansion on
/// case-insensitive volumes, the code point itself otherwise. Hashing and
/// comparison both go through here so equal paths always hash alike.
pub fn fold(c: char, case_sensitive: bool) -> impl Iterator<Item = char> {
    let upper = (!case_sensitive).then(|| c.to_uppercase());
    upper.into_iter().flatten().chain(case_sensitive.then_some(c))
}

pub fn folded(s: &str, case_sensitive: bool) -> impl Iterator<Item = char> + '_ {
    s.chars().flat_map(move |c| fold(c, case_sensitive))
}

/// Compare two paths under the volume's case rule
pub fn paths_equal(a: &str, b: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        a == b
    } else {
        folded(a, false).eq(folded(b, false))
    }
}

/// Byte length of the head of `path` that equals `prefix` under the case
/// rule. Always a char boundary of `path`.
fn matched_prefix(path: &str, prefix: &str, case_sensitive: bool) -> Option<usize> {
    let mut want = folded(prefix, case_sensitive).peekable();
    if want.peek().is_none() {
        return Some(0);
    }
    for (idx, c) in path.char_indices() {
        for got in fold(c, case_sensitive) {
            if want.next() != Some(got) {
                return None;
            }
        }
        if want.peek().is_none() {
            return Some(idx + c.len_utf8());
        }
    }
    None
}

/// True when `path` lies strictly below `ancestor`
pub fn is_descendant(path: &str, ancestor: &str, case_sensitive: bool) -> bool {
    if is_root(ancestor) {
        return !is_root(path);
    }
    match matched_prefix(path, ancestor, case_sensitive) {
        Some(len) => path[len..].starts_with('/'),
        None => false,
    }
}

/// Rewrite `path`, which lies at or under `from`, to lie under `to`. Paths
/// outside `from` are returned unchanged.
pub fn rebase(path: &str, from: &str, to: &str, case_sensitive: bool) -> String {
    let Some(len) = matched_prefix(path, from, case_sensitive) else {
        return path.to_string();
    };
    let tail = &path[len..];
    if is_root(to) {
        tail.to_string()
    } else {
        format!("{}{}", to, tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative_and_absolute() {
        assert_eq!(resolve("/a", "b/c", 1024), Ok("/a/b/c".to_string()));
        assert_eq!(resolve("/a/b", "Work:x", 1024), Ok("/x".to_string()));
        assert_eq!(resolve("/a/b", ":", 1024), Ok("/".to_string()));
        assert_eq!(resolve("/a", "", 1024), Ok("/a".to_string()));
    }

    #[test]
    fn test_resolve_parent_components() {
        assert_eq!(resolve("/a/b", "/c", 1024), Ok("/a/c".to_string()));
        assert_eq!(resolve("/a/b", "x//y", 1024), Ok("/a/b/y".to_string()));
        assert_eq!(resolve("/a/b", "//", 1024), Ok("/".to_string()));
        assert_eq!(resolve("/a", "//", 1024), Err(ErrorCode::ObjectNotFound));
        assert_eq!(resolve("/a", "x/", 1024), Ok("/a/x".to_string()));
        assert_eq!(resolve("/", "/x", 1024), Err(ErrorCode::ObjectNotFound));
    }

    #[test]
    fn test_resolve_rejects_dot_components() {
        assert_eq!(resolve("/", "a/../b", 1024), Err(ErrorCode::InvalidComponentName));
        assert_eq!(resolve("/", ".", 1024), Err(ErrorCode::InvalidComponentName));
    }

    #[test]
    fn test_resolve_length_bound() {
        assert_eq!(resolve("/", "abcdef", 4), Err(ErrorCode::LineTooLong));
        assert_eq!(resolve("/", "abc", 4), Ok("/abc".to_string()));
    }

    #[test]
    fn test_parent_and_ancestors() {
        assert_eq!(parent("/a/b"), Some("/a"));
        assert_eq!(parent("/a"), Some("/"));
        assert_eq!(parent("/"), None);
        let chain: Vec<&str> = self_and_ancestors("/a/b").collect();
        assert_eq!(chain, vec!["/a/b", "/a", "/"]);
    }

    #[test]
    fn test_descendant_rules() {
        assert!(is_descendant("/a/b", "/a", true));
        assert!(!is_descendant("/ab", "/a", true));
        assert!(!is_descendant("/a", "/a", true));
        assert!(is_descendant("/A/b", "/a", false));
        assert!(!is_descendant("/A/b", "/a", true));
        assert!(is_descendant("/x", "/", true));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(rebase("/a/b/c", "/a", "/z", true), "/z/b/c");
        assert_eq!(rebase("/a/b", "/a", "/", true), "/b");
        assert_eq!(rebase("/A/b", "/a", "/z", false), "/z/b");
        assert_eq!(rebase("/q/b", "/a", "/z", false), "/q/b");
    }

    #[test]
    fn test_width_changing_case_fold() {
        // U+0131 is two bytes and uppercases to the one-byte 'I'
        assert!(is_descendant("/\u{131}/x", "/I", false));
        assert!(is_descendant("/I/x", "/\u{131}", false));
        assert_eq!(rebase("/\u{131}/x", "/I", "/z", false), "/z/x");
        assert_eq!(rebase("/I/x", "/\u{131}", "/z", false), "/z/x");
        // Folding that expands to two code points
        assert!(paths_equal("/stra\u{df}e", "/STRASSE", false));
        assert!(is_descendant("/STRASSE/x", "/stra\u{df}e", false));
        assert!(!is_descendant("/\u{df}/x", "/S", false));
        assert!(!is_descendant("/\u{131}/x", "/I", true));
    }
}
