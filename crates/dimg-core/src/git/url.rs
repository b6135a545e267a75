//! Remote URL scheme detection and filesystem-safe names.

use std::sync::OnceLock;

use regex::Regex;

use crate::digest::sha256_hash;
use crate::error::{DimgError, Result};

/// SSH user prefixes accepted in scp-like `user@host:path` URLs.
const SSH_LIKE_PREFIXES: &[&str] = &["git", "ssh"];

/// Scheme of a remote repository URL.
///
/// Follows generic URL syntax (`scheme:` prefix, or none for plain paths).
/// scp-like addresses such as `git@github.com:org/repo.git` are rejected by
/// that syntax because their first path segment contains a colon; they are
/// recognised by their user prefix and reported as `ssh`.
pub fn url_scheme(url: &str) -> Result<String> {
    if let Some(scheme) = parse_scheme(url)? {
        return Ok(scheme.to_lowercase());
    }

    let first_segment = url.split('/').next().unwrap_or_default();
    if first_segment.contains(':') {
        for protocol in SSH_LIKE_PREFIXES {
            if url.starts_with(&format!("{protocol}@")) {
                return Ok("ssh".to_string());
            }
        }
        return Err(DimgError::InvalidRemoteUrl {
            url: url.to_string(),
            reason: "first path segment in URL cannot contain colon".to_string(),
        });
    }

    Ok(String::new())
}

/// `Some(scheme)` when `url` starts with a syntactically valid scheme.
fn parse_scheme(url: &str) -> Result<Option<&str>> {
    for (i, c) in url.char_indices() {
        match c {
            'a'..='z' | 'A'..='Z' => {}
            '0'..='9' | '+' | '-' | '.' if i > 0 => {}
            ':' if i == 0 => {
                return Err(DimgError::InvalidRemoteUrl {
                    url: url.to_string(),
                    reason: "missing protocol scheme".to_string(),
                })
            }
            ':' => return Ok(Some(&url[..i])),
            _ => return Ok(None),
        }
    }
    Ok(None)
}

fn slug_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static slug regex"))
}

/// Lowercase `[a-z0-9-]` form of `name`. Names that had to be altered get a
/// short digest suffix so distinct inputs never collide.
pub fn slug(name: &str) -> String {
    let lowered = name.to_lowercase();
    let replaced = slug_regex().replace_all(&lowered, "-");
    let trimmed = replaced.trim_matches('-');
    if trimmed == name {
        return name.to_string();
    }
    let digest = sha256_hash(&[name]);
    if trimmed.is_empty() {
        return digest[..8].to_string();
    }
    format!("{}-{}", trimmed, &digest[..8])
}
