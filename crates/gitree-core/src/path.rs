//! Request path decomposition.
//!
//! Every path served by gitree has the shape
//! `/<repository>/<commitish>/<subpath...>`. Shorter paths select coarser
//! views: `/` is the root, `/<repository>` is one repository.

use std::path::{Component, Path};

use crate::error::{Error, Result};

/// `(repository, commitish, subpath)` triple extracted from a request path.
///
/// Empty strings mark absent components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathComponents {
    pub repository: String,
    pub commitish: String,
    /// Remainder below the commitish, joined with `/`; empty for the tree root.
    pub sub_path: String,
}

impl PathComponents {
    /// Break a path into its components.
    ///
    /// Leading `/` and `.` components are ignored. `..` is rejected rather
    /// than resolved: callers address nodes by absolute position only.
    pub fn parse(path: &Path) -> Result<Self> {
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::Normal(part) => {
                    let part = part
                        .to_str()
                        .ok_or_else(|| Error::not_found(path.display()))?;
                    parts.push(part);
                }
                Component::ParentDir | Component::Prefix(_) => {
                    return Err(Error::not_found(path.display()));
                }
            }
        }
        Ok(Self::from_parts(&parts))
    }

    /// Build components from already split path segments.
    pub fn from_parts<S: AsRef<str>>(parts: &[S]) -> Self {
        let mut components = Self::default();
        if let Some(repository) = parts.first() {
            components.repository = repository.as_ref().to_string();
        }
        if let Some(commitish) = parts.get(1) {
            components.commitish = commitish.as_ref().to_string();
        }
        if parts.len() > 2 {
            components.sub_path = parts[2..]
                .iter()
                .map(|p| p.as_ref())
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
                .join("/");
        }
        components
    }

    pub fn has_repository(&self) -> bool {
        !self.repository.is_empty()
    }

    pub fn has_commitish(&self) -> bool {
        !self.commitish.is_empty()
    }
}

/// Split `a/b/c` into (`a/b`, `c`); a single segment has an empty parent.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Join a parent path and a child name without producing a leading `/`.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Last segment of a path, or the empty string for the root.
pub fn base_name(path: &str) -> &str {
    split_parent(path).1
}
