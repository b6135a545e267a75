//! Filtering rewriter for `git diff --binary --full-index --no-renames` output.
//!
//! The parser walks the diff line by line. File sections whose path fails the
//! [`PathFilter`] are dropped whole; retained sections are re-emitted byte for
//! byte except that paths in their headers are rewritten relative to the
//! filter's base path. Any line that has no transition from the current state
//! aborts parsing.

use std::fmt;
use std::io::Write;

use crate::error::{DimgError, Result};
use crate::git::path_filter::PathFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Unrecognized,
    DiffBegin,
    DiffBody,
    NewFileDiff,
    DeleteFileDiff,
    ModifyFileDiff,
    ModifyFileModeDiff,
    IgnoreDiff,
}

impl fmt::Display for ParserState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParserState::Unrecognized => "unrecognized",
            ParserState::DiffBegin => "diffBegin",
            ParserState::DiffBody => "diffBody",
            ParserState::NewFileDiff => "newFileDiff",
            ParserState::DeleteFileDiff => "deleteFileDiff",
            ParserState::ModifyFileDiff => "modifyFileDiff",
            ParserState::ModifyFileModeDiff => "modifyFileModeDiff",
            ParserState::IgnoreDiff => "ignoreDiff",
        };
        f.write_str(name)
    }
}

/// How a retained file section changes its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
    /// Only the file mode changed; the section has no content hunk.
    ModeOnly,
}

/// One retained file section of the output diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPath {
    /// Path relative to the filter's base path, as raw bytes.
    pub path: Vec<u8>,
    pub kind: ChangeKind,
    pub binary: bool,
}

/// What a parse pass produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub paths: Vec<PatchPath>,
    pub bytes_written: u64,
}

/// One side of a header path as git wrote it, and the same side with the
/// base path spliced out.
#[derive(Debug, Clone)]
struct HeaderToken {
    raw: Vec<u8>,
    rebased: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Section {
    rel: Vec<u8>,
    old: HeaderToken,
    new: HeaderToken,
    kind: ChangeKind,
    binary: bool,
}

/// Paths of a `diff --git` line before rebasing.
struct Header<'l> {
    path: Vec<u8>,
    old: &'l [u8],
    new: &'l [u8],
    quoted: bool,
}

pub struct DiffParser<'a> {
    filter: &'a PathFilter,
    artifact: &'a str,
    state: ParserState,
    section: Option<Section>,
    summary: DiffSummary,
}

impl<'a> DiffParser<'a> {
    /// `artifact` names the git artifact in parse errors.
    pub fn new(filter: &'a PathFilter, artifact: &'a str) -> Self {
        Self {
            filter,
            artifact,
            state: ParserState::Unrecognized,
            section: None,
            summary: DiffSummary::default(),
        }
    }

    /// Parse a complete diff and write the filtered diff to `out`.
    pub fn parse<W: Write>(mut self, input: &[u8], out: &mut W) -> Result<DiffSummary> {
        for line in input.split_inclusive(|b| *b == b'\n') {
            self.handle_line(line, out)?;
        }
        self.finish_section();
        Ok(self.summary)
    }

    fn handle_line<W: Write>(&mut self, line: &[u8], out: &mut W) -> Result<()> {
        if line.starts_with(b"diff --git ") {
            return match self.state {
                ParserState::ModifyFileModeDiff => Err(self.unexpected(line)),
                _ => self.handle_diff_begin(line, out),
            };
        }

        match self.state {
            ParserState::IgnoreDiff => Ok(()),
            ParserState::DiffBody => self.write_out(line, out),
            ParserState::Unrecognized => {
                // A mode change may be followed by a content change.
                if line.starts_with(b"index ") && self.section.is_some() {
                    self.set_kind(ChangeKind::Modified);
                    self.state = ParserState::ModifyFileDiff;
                    return self.write_out(line, out);
                }
                Err(self.unexpected(line))
            }
            ParserState::DiffBegin => {
                if line.starts_with(b"deleted file mode ") {
                    self.set_kind(ChangeKind::Deleted);
                    self.state = ParserState::DeleteFileDiff;
                    return self.write_out(line, out);
                }
                if line.starts_with(b"new file mode ") {
                    self.set_kind(ChangeKind::Added);
                    self.state = ParserState::NewFileDiff;
                    return self.write_out(line, out);
                }
                if line.starts_with(b"old mode ") {
                    self.set_kind(ChangeKind::ModeOnly);
                    self.state = ParserState::ModifyFileModeDiff;
                    return self.write_out(line, out);
                }
                if line.starts_with(b"index ") {
                    self.set_kind(ChangeKind::Modified);
                    self.state = ParserState::ModifyFileDiff;
                    return self.write_out(line, out);
                }
                Err(self.unexpected(line))
            }
            ParserState::ModifyFileModeDiff => {
                if line.starts_with(b"new mode ") {
                    self.state = ParserState::Unrecognized;
                    return self.write_out(line, out);
                }
                Err(self.unexpected(line))
            }
            ParserState::NewFileDiff | ParserState::DeleteFileDiff | ParserState::ModifyFileDiff => {
                self.handle_file_header(line, out)
            }
        }
    }

    fn handle_diff_begin<W: Write>(&mut self, line: &[u8], out: &mut W) -> Result<()> {
        self.finish_section();

        let (body, eol) = split_eol(&line[b"diff --git ".len()..]);
        let header = parse_header(body).ok_or_else(|| self.unexpected(line))?;

        if !self.filter.is_path_valid(&header.path) {
            self.state = ParserState::IgnoreDiff;
            return Ok(());
        }

        let rel = self
            .filter
            .relative(&header.path)
            .ok_or_else(|| self.unexpected(line))?
            .to_vec();
        let removed = &header.path[..header.path.len() - rel.len()];
        let old = rebase_token(header.old, b"a/", removed, header.quoted)
            .ok_or_else(|| self.unexpected(line))?;
        let new = rebase_token(header.new, b"b/", removed, header.quoted)
            .ok_or_else(|| self.unexpected(line))?;

        let rewritten = [
            b"diff --git ".as_slice(),
            old.rebased.as_slice(),
            b" ".as_slice(),
            new.rebased.as_slice(),
            eol,
        ]
        .concat();

        self.section = Some(Section {
            rel,
            old,
            new,
            kind: ChangeKind::Modified,
            binary: false,
        });
        self.state = ParserState::DiffBegin;
        self.write_out(&rewritten, out)
    }

    fn handle_file_header<W: Write>(&mut self, line: &[u8], out: &mut W) -> Result<()> {
        if line.starts_with(b"index ") {
            return self.write_out(line, out);
        }
        if line.starts_with(b"--- ") || line.starts_with(b"+++ ") {
            let rewritten = self.rewrite_file_line(line)?;
            return self.write_out(&rewritten, out);
        }
        if line.starts_with(b"@@") {
            self.state = ParserState::DiffBody;
            return self.write_out(line, out);
        }
        if line.starts_with(b"GIT binary patch") {
            self.mark_binary();
            self.state = ParserState::DiffBody;
            return self.write_out(line, out);
        }
        if line.starts_with(b"Binary files ") {
            self.mark_binary();
            let rewritten = self.rewrite_binary_line(line);
            self.state = ParserState::DiffBody;
            return self.write_out(&rewritten, out);
        }
        Err(self.unexpected(line))
    }

    /// Rewrite a `--- a/<path>` / `+++ b/<path>` line, keeping any suffix.
    fn rewrite_file_line(&self, line: &[u8]) -> Result<Vec<u8>> {
        let section = self.section.as_ref().ok_or_else(|| self.unexpected(line))?;
        let (marker, content) = line.split_at(4);
        if split_eol(content).0 == b"/dev/null" {
            return Ok(line.to_vec());
        }
        let token = if marker == b"--- " { &section.old } else { &section.new };
        let suffix = content
            .strip_prefix(token.raw.as_slice())
            .ok_or_else(|| self.unexpected(line))?;
        Ok([marker, token.rebased.as_slice(), suffix].concat())
    }

    fn rewrite_binary_line(&self, line: &[u8]) -> Vec<u8> {
        match &self.section {
            Some(section) => {
                let line = replace_first(line, &section.old.raw, &section.old.rebased);
                replace_first(&line, &section.new.raw, &section.new.rebased)
            }
            None => line.to_vec(),
        }
    }

    fn set_kind(&mut self, kind: ChangeKind) {
        if let Some(section) = self.section.as_mut() {
            section.kind = kind;
        }
    }

    fn mark_binary(&mut self) {
        if let Some(section) = self.section.as_mut() {
            section.binary = true;
        }
    }

    fn finish_section(&mut self) {
        if let Some(section) = self.section.take() {
            self.summary.paths.push(PatchPath {
                path: section.rel,
                kind: section.kind,
                binary: section.binary,
            });
        }
    }

    fn write_out<W: Write>(&mut self, line: &[u8], out: &mut W) -> Result<()> {
        out.write_all(line)?;
        self.summary.bytes_written += line.len() as u64;
        Ok(())
    }

    fn unexpected(&self, line: &[u8]) -> DimgError {
        DimgError::DiffParse {
            artifact: self.artifact.to_string(),
            state: self.state.to_string(),
            line: String::from_utf8_lossy(split_eol(line).0).into_owned(),
        }
    }
}

fn split_eol(line: &[u8]) -> (&[u8], &[u8]) {
    match line.strip_suffix(b"\n") {
        Some(body) => (body, b"\n".as_slice()),
        None => (line, b"".as_slice()),
    }
}

/// Split `a/<path> b/<path>` into its two tokens. Renames are disabled, so
/// both sides name the same file.
fn parse_header(body: &[u8]) -> Option<Header<'_>> {
    if body.first() == Some(&b'"') {
        let (a, a_len) = unquote(body)?;
        let (old, rest) = body.split_at(a_len);
        let new = rest.strip_prefix(b" ")?;
        let (b, b_len) = unquote(new)?;
        if b_len != new.len() {
            return None;
        }
        let path = a.strip_prefix(b"a/")?;
        return (Some(path) == b.strip_prefix(b"b/")).then(|| Header {
            path: path.to_vec(),
            old,
            new,
            quoted: true,
        });
    }

    if body.len() < 5 || (body.len() - 5) % 2 != 0 {
        return None;
    }
    let len = (body.len() - 5) / 2;
    let (old, rest) = body.split_at(2 + len);
    let new = rest.strip_prefix(b" ")?;
    let path = old.strip_prefix(b"a/")?;
    (Some(path) == new.strip_prefix(b"b/")).then(|| Header {
        path: path.to_vec(),
        old,
        new,
        quoted: false,
    })
}

/// Decode one C-style quoted string at the start of `input`. Returns the
/// value and the number of bytes consumed, quotes included.
fn unquote(input: &[u8]) -> Option<(Vec<u8>, usize)> {
    if input.first() != Some(&b'"') {
        return None;
    }
    let mut value = Vec::new();
    let mut i = 1;
    while let Some(&byte) = input.get(i) {
        match byte {
            b'"' => return Some((value, i + 1)),
            b'\\' => {
                let esc = *input.get(i + 1)?;
                let decoded = match esc {
                    b'a' => 0x07,
                    b'b' => 0x08,
                    b't' => b'\t',
                    b'n' => b'\n',
                    b'v' => 0x0b,
                    b'f' => 0x0c,
                    b'r' => b'\r',
                    b'"' => b'"',
                    b'\\' => b'\\',
                    b'0'..=b'3' => {
                        let digits = input.get(i + 1..i + 4)?;
                        i += 2;
                        digits.iter().try_fold(0u8, |acc, &d| match d {
                            b'0'..=b'7' => Some(acc * 8 + (d - b'0')),
                            _ => None,
                        })?
                    }
                    _ => return None,
                };
                value.push(decoded);
                i += 2;
            }
            other => {
                value.push(other);
                i += 1;
            }
        }
    }
    None
}

/// Quote `bytes` the way git does inside a quoted path. With
/// `quote_high`, bytes >= 0x80 become octal escapes (`core.quotePath`).
fn c_quote(bytes: &[u8], quote_high: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        let short = match b {
            0x07 => Some(b'a'),
            0x08 => Some(b'b'),
            b'\t' => Some(b't'),
            b'\n' => Some(b'n'),
            0x0b => Some(b'v'),
            0x0c => Some(b'f'),
            b'\r' => Some(b'r'),
            b'"' => Some(b'"'),
            b'\\' => Some(b'\\'),
            _ => None,
        };
        match short {
            Some(c) => out.extend_from_slice(&[b'\\', c]),
            None if b < 0x20 || b == 0x7f || (quote_high && b >= 0x80) => {
                out.extend_from_slice(format!("\\{b:03o}").as_bytes())
            }
            None => out.push(b),
        }
    }
    out
}

/// Remove the encoded `removed` prefix from `raw`, leaving every other byte
/// of the token as git wrote it.
fn rebase_token(raw: &[u8], side: &[u8], removed: &[u8], quoted: bool) -> Option<HeaderToken> {
    let open: &[u8] = if quoted { b"\"" } else { b"" };
    let encodings = if quoted {
        vec![c_quote(removed, true), c_quote(removed, false)]
    } else {
        vec![removed.to_vec()]
    };
    encodings.iter().find_map(|prefix| {
        let head = [open, side, prefix.as_slice()].concat();
        let tail = raw.strip_prefix(head.as_slice())?;
        Some(HeaderToken {
            raw: raw.to_vec(),
            rebased: [open, side, tail].concat(),
        })
    })
}

fn replace_first(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    match haystack.windows(from.len()).position(|w| w == from) {
        Some(at) => [&haystack[..at], to, &haystack[at + from.len()..]].concat(),
        None => haystack.to_vec(),
    }
}
