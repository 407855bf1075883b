//! Lexical path confinement.
//!
//! Every path handed to the filesystem is first checked against the root it
//! is allowed to live under. The checks here never touch the disk: paths are
//! normalized component by component and compared segment-wise, so
//! `/public2` is never mistaken for a child of `/public` and `..` segments
//! cannot climb out of the root once normalized.

use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path.
///
/// Drops `.` segments, folds `name/..` pairs, discards `..` directly under a
/// root and keeps the leading `..` segments of a relative path. An empty
/// result is returned as `.`.
pub fn normalize(path: &Path) -> PathBuf {
    let normalized = lexical(path);
    if normalized.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        normalized
    }
}

/// Join `relative` onto `base` and normalize the result.
///
/// A leading root or drive prefix in `relative` is ignored, so `/etc` joined
/// onto `photos` yields `photos/etc` rather than replacing the base.
pub fn join(base: &Path, relative: &Path) -> PathBuf {
    let mut joined = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            other => joined.push(other),
        }
    }
    normalize(&joined)
}

/// Check whether `candidate` lies within `root` (or is `root` itself).
pub fn is_inclusive(root: &Path, candidate: &Path) -> bool {
    remainder(root, candidate).is_some()
}

/// Check whether `candidate` lies strictly below `root`.
///
/// Used for deletions, which must never remove the root itself.
pub fn is_inclusive_strict(root: &Path, candidate: &Path) -> bool {
    remainder(root, candidate).is_some_and(|rest| !rest.as_os_str().is_empty())
}

/// Path of `candidate` relative to `root`, if it is confined to it.
fn remainder(root: &Path, candidate: &Path) -> Option<PathBuf> {
    let root = lexical(root);
    let candidate = lexical(candidate);
    let rest = candidate.strip_prefix(&root).ok()?;
    if rest.components().any(|c| c == Component::ParentDir) {
        return None;
    }
    Some(rest.to_path_buf())
}

fn lexical(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}
