//! Include/exclude filtering and source-root remapping for repository paths.

use serde::{Deserialize, Serialize};

/// Selects repository paths below `base_path` and rewrites them relative to it.
///
/// Patterns are matched against the path relative to `base_path`. `*` and `?`
/// stay within one path segment, `**` crosses segments, and a pattern that
/// matches a directory also matches everything below it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathFilter {
    base_path: String,
    include_paths: Vec<String>,
    exclude_paths: Vec<String>,
}

impl PathFilter {
    pub fn new(base_path: &str, include_paths: &[String], exclude_paths: &[String]) -> Self {
        Self {
            base_path: normalize(base_path),
            include_paths: include_paths.iter().map(|p| normalize(p)).collect(),
            exclude_paths: exclude_paths.iter().map(|p| normalize(p)).collect(),
        }
    }

    /// Repository-relative base path without leading or trailing slashes.
    /// Empty means the repository root.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Path relative to the base, or `None` when `path` lies outside it.
    /// Paths are raw bytes as git reports them.
    ///
    /// When the base names a single file, that file maps to its own name.
    pub fn relative<'p>(&self, path: &'p [u8]) -> Option<&'p [u8]> {
        let base = self.base_path.as_bytes();
        if base.is_empty() {
            return Some(path);
        }
        if path == base {
            return path.rsplit(|b| *b == b'/').next();
        }
        path.strip_prefix(base).and_then(|rest| rest.strip_prefix(b"/"))
    }

    /// True if `path` is below the base and passes include/exclude.
    ///
    /// Globs are matched against a lossy decoding of the path; only the
    /// decision depends on it, never the path that is emitted.
    pub fn is_path_valid(&self, path: impl AsRef<[u8]>) -> bool {
        let Some(rel) = self.relative(path.as_ref()) else {
            return false;
        };
        let rel = String::from_utf8_lossy(rel);
        if !self.include_paths.is_empty() && !matches_any(&self.include_paths, &rel) {
            return false;
        }
        !matches_any(&self.exclude_paths, &rel)
    }

    /// True if `path` is valid and also matches one of `watched` patterns.
    pub fn is_path_watched(&self, path: impl AsRef<[u8]>, watched: &[String]) -> bool {
        let path = path.as_ref();
        if !self.is_path_valid(path) {
            return false;
        }
        let Some(rel) = self.relative(path) else {
            return false;
        };
        let watched: Vec<String> = watched.iter().map(|p| normalize(p)).collect();
        matches_any(&watched, &String::from_utf8_lossy(rel))
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

/// True if any pattern matches `rel` or one of its ancestor directories.
pub fn matches_any(patterns: &[String], rel: &str) -> bool {
    patterns.iter().any(|pattern| {
        if pattern.is_empty() {
            return true;
        }
        let p: Vec<char> = pattern.chars().collect();
        let mut prefix_end = 0usize;
        for segment in rel.split('/') {
            prefix_end += segment.len();
            let candidate: Vec<char> = rel[..prefix_end].chars().collect();
            if glob_match(&p, &candidate) {
                return true;
            }
            prefix_end += 1;
        }
        false
    })
}

/// Glob matcher: `*`/`?` never cross `/`, `**` matches any number of segments.
fn glob_match(p: &[char], v: &[char]) -> bool {
    match p.first() {
        None => v.is_empty(),
        Some('*') if p.get(1) == Some(&'*') => {
            let rest = &p[2..];
            // `**/` may also match zero directories.
            if rest.first() == Some(&'/') && glob_match(&rest[1..], v) {
                return true;
            }
            (0..=v.len()).any(|i| glob_match(rest, &v[i..]))
        }
        Some('*') => {
            for i in 0..=v.len() {
                if glob_match(&p[1..], &v[i..]) {
                    return true;
                }
                if i < v.len() && v[i] == '/' {
                    break;
                }
            }
            false
        }
        Some('?') => !v.is_empty() && v[0] != '/' && glob_match(&p[1..], &v[1..]),
        Some(c) => v.first() == Some(c) && glob_match(&p[1..], &v[1..]),
    }
}
