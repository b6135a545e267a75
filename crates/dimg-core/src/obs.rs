//! Structured events for the build lifecycle.
//!
//! Spans carry the run id and image name; the `emit_*` helpers log one
//! `event = "..."` line per lifecycle step at `info!` level.

use tracing::{info, info_span, Span};

use crate::stage::StageName;

/// Span covering one conveyor run.
pub fn build_span(run_id: &str) -> Span {
    info_span!("dimg.build", run_id = %run_id)
}

/// Span covering the stage walk of one image.
pub fn dimg_span(name: &str, is_artifact: bool) -> Span {
    info_span!("dimg.image", dimg = %name, artifact = is_artifact)
}

pub fn emit_build_started(run_id: &str, images: usize) {
    info!(event = "build.started", run_id = %run_id, images = images);
}

pub fn emit_build_finished(run_id: &str, duration_ms: u64, built: usize, cached: usize) {
    info!(
        event = "build.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        built = built,
        cached = cached,
    );
}

pub fn emit_git_commit_resolved(dimg: &str, artifact: &str, repo: &str, commit: &str) {
    info!(
        event = "git.commit_resolved",
        dimg = %dimg,
        artifact = %artifact,
        repo = %repo,
        commit = %commit,
    );
}

pub fn emit_stage_cached(dimg: &str, stage: StageName, signature: &str) {
    info!(event = "stage.cached", dimg = %dimg, stage = %stage, signature = %signature);
}

pub fn emit_stage_built(dimg: &str, stage: StageName, signature: &str, duration_ms: u64) {
    info!(
        event = "stage.built",
        dimg = %dimg,
        stage = %stage,
        signature = %signature,
        duration_ms = duration_ms,
    );
}

pub fn emit_stage_skipped(dimg: &str, stage: StageName) {
    info!(event = "stage.skipped", dimg = %dimg, stage = %stage);
}
