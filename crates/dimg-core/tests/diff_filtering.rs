//! Diff filtering against real `git diff` output.

mod common;

use common::{commit_file, make_git_repo, run_git};
use dimg_core::git::{ChangeKind, DiffParser, GitRepo, LocalGitRepo, PathFilter};

fn sections(diff: &str) -> Vec<String> {
    diff.split("diff --git ")
        .filter(|s| !s.is_empty())
        .map(|s| format!("diff --git {s}"))
        .collect()
}

#[test]
fn excluded_sections_are_dropped_and_the_rest_kept_verbatim() {
    let repo = make_git_repo();
    let base = run_git(repo.path(), &["rev-parse", "HEAD"]);
    for dir in ["api", "web", "docs", "tools"] {
        commit_file(repo.path(), &format!("{dir}/main.txt"), &format!("{dir}\n"), dir);
    }
    let head = run_git(repo.path(), &["rev-parse", "HEAD"]);

    let local = LocalGitRepo::open(repo.path()).unwrap();
    let raw = local.diff(&base, &head, "").unwrap();
    let raw = String::from_utf8(raw).unwrap();
    let input = sections(&raw);
    assert_eq!(input.len(), 4);

    let filter = PathFilter::new("/", &[], &["docs".to_string(), "tools".to_string()]);
    let mut out = Vec::new();
    let summary = DiffParser::new(&filter, "own")
        .parse(raw.as_bytes(), &mut out)
        .unwrap();
    let output = sections(&String::from_utf8(out).unwrap());

    assert_eq!(output.len(), 2);
    assert_eq!(summary.paths.len(), 2);
    for section in &output {
        assert!(input.contains(section));
    }
    assert!(summary.paths.iter().all(|p| p.kind == ChangeKind::Added));
}

#[test]
fn base_path_is_stripped_from_headers() {
    let repo = make_git_repo();
    let base = run_git(repo.path(), &["rev-parse", "HEAD"]);
    let head = commit_file(repo.path(), "app/src/lib.txt", "one\n", "c1");

    let local = LocalGitRepo::open(repo.path()).unwrap();
    let raw = local.diff(&base, &head, "app").unwrap();
    let filter = PathFilter::new("/app", &[], &[]);
    let mut out = Vec::new();
    let summary = DiffParser::new(&filter, "own").parse(&raw, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.starts_with("diff --git a/src/lib.txt b/src/lib.txt\n"));
    assert!(text.contains("+++ b/src/lib.txt\n"));
    assert!(!text.contains("app/"));
    assert_eq!(summary.paths[0].path, b"src/lib.txt");
}

#[test]
fn mode_only_change_is_kept_as_its_own_section() {
    let repo = make_git_repo();
    let before = commit_file(repo.path(), "bin/run.sh", "#!/bin/sh\necho hi\n", "add");
    run_git(repo.path(), &["update-index", "--chmod=+x", "bin/run.sh"]);
    run_git(repo.path(), &["commit", "-m", "chmod"]);
    let after = run_git(repo.path(), &["rev-parse", "HEAD"]);

    let local = LocalGitRepo::open(repo.path()).unwrap();
    let raw = local.diff(&before, &after, "").unwrap();
    let filter = PathFilter::new("/", &[], &[]);
    let mut out = Vec::new();
    let summary = DiffParser::new(&filter, "own").parse(&raw, &mut out).unwrap();

    assert_eq!(out, raw);
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("old mode 100644\nnew mode 100755\n"));
    assert!(!text.contains("@@"));
    assert_eq!(summary.paths.len(), 1);
    assert_eq!(summary.paths[0].kind, ChangeKind::ModeOnly);
}

#[test]
fn mode_and_content_change_is_a_modification() {
    let repo = make_git_repo();
    let before = commit_file(repo.path(), "bin/run.sh", "#!/bin/sh\necho hi\n", "add");
    std::fs::write(repo.path().join("bin/run.sh"), "#!/bin/sh\necho bye\n").unwrap();
    run_git(repo.path(), &["add", "bin/run.sh"]);
    run_git(repo.path(), &["update-index", "--chmod=+x", "bin/run.sh"]);
    run_git(repo.path(), &["commit", "-m", "edit"]);
    let after = run_git(repo.path(), &["rev-parse", "HEAD"]);

    let local = LocalGitRepo::open(repo.path()).unwrap();
    let raw = local.diff(&before, &after, "").unwrap();
    let filter = PathFilter::new("/", &[], &[]);
    let mut out = Vec::new();
    let summary = DiffParser::new(&filter, "own").parse(&raw, &mut out).unwrap();

    assert_eq!(out, raw);
    assert_eq!(summary.paths[0].kind, ChangeKind::Modified);
}

#[test]
fn malformed_mode_pair_is_a_parse_error() {
    let diff = b"diff --git a/x b/x\nold mode 100644\nindex 1111111..2222222\n";
    let filter = PathFilter::new("/", &[], &[]);
    let err = DiffParser::new(&filter, "own")
        .parse(diff, &mut Vec::new())
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("modifyFileModeDiff"));
    assert!(msg.contains("index 1111111..2222222"));
    assert!(!err.is_internal());
}
