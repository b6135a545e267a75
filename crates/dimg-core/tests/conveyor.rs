//! Signature chaining and incremental git patching through the conveyor,
//! against the in-memory image store.

mod common;

use std::sync::Arc;

use common::{app_dappfile, commit_file, text_of_size, Project};
use dimg_core::{MemoryBackend, StageName, StageStatus, SIGNATURE_LABEL};

const CACHED_PREFIX: [StageName; 4] = [
    StageName::From,
    StageName::GitArchive,
    StageName::Install,
    StageName::Setup,
];

#[tokio::test]
async fn first_build_archives_then_rebuild_is_fully_cached() {
    let project = Project::new();
    commit_file(project.repo.path(), "app/x.txt", "0123456789", "c1");
    let backend = Arc::new(MemoryBackend::new("scenario"));
    let conveyor = project.conveyor(app_dappfile(""), &backend);

    let first = conveyor.build().await.unwrap();
    let x = first.dimg("x").unwrap();
    assert_eq!(x.stage(StageName::GitArchive).unwrap().status, StageStatus::Built);
    assert_eq!(x.stage(StageName::GitPostSetupPatch).unwrap().status, StageStatus::Skipped);
    assert_eq!(x.stage(StageName::GitLatestPatch).unwrap().status, StageStatus::Skipped);
    let layers = backend.commits().len();
    assert_eq!(layers, first.count(StageStatus::Built));

    let archive = &backend.commits()[1];
    assert!(archive
        .spec
        .run_commands
        .iter()
        .any(|c| c.contains("tar -xf")));

    let second = conveyor.build().await.unwrap();
    assert_eq!(backend.commits().len(), layers);
    assert_eq!(second.count(StageStatus::Built), 0);
    let y = second.dimg("x").unwrap();
    for stage in StageName::ALL {
        assert_eq!(x.signature_of(stage), y.signature_of(stage), "{stage}");
    }
    assert_eq!(x.image, y.image);
}

#[tokio::test]
async fn large_change_moves_only_post_setup_patch_and_later() {
    let project = Project::new();
    commit_file(project.repo.path(), "app/x.txt", "0123456789", "c1");
    let backend = Arc::new(MemoryBackend::new("scenario"));
    let conveyor = project.conveyor(app_dappfile(""), &backend);
    let before = conveyor.build().await.unwrap();

    commit_file(
        project.repo.path(),
        "app/x.txt",
        &text_of_size(2 * 1024 * 1024),
        "c2",
    );
    let after = conveyor.build().await.unwrap();

    let b = before.dimg("x").unwrap();
    let a = after.dimg("x").unwrap();
    for stage in CACHED_PREFIX {
        assert_eq!(b.signature_of(stage), a.signature_of(stage), "{stage}");
        assert_eq!(a.stage(stage).unwrap().status, StageStatus::Cached);
    }

    let patch = a.stage(StageName::GitPostSetupPatch).unwrap();
    assert_eq!(patch.status, StageStatus::Built);
    assert!(patch.signature.is_some());
    assert_eq!(a.stage(StageName::GitLatestPatch).unwrap().status, StageStatus::Skipped);
    assert_ne!(
        b.signature_of(StageName::DockerInstructions),
        a.signature_of(StageName::DockerInstructions)
    );

    let record = backend
        .commits()
        .into_iter()
        .find(|c| Some(c.signature.as_str()) == patch.signature.as_deref())
        .unwrap();
    assert!(record.spec.run_commands.iter().any(|c| c.contains("git -C / apply")));
    assert_eq!(
        record.spec.labels.get(SIGNATURE_LABEL).map(String::as_str),
        patch.signature.as_deref()
    );
}

#[tokio::test]
async fn small_change_lands_in_latest_patch() {
    let project = Project::new();
    commit_file(project.repo.path(), "app/x.txt", "0123456789", "c1");
    let backend = Arc::new(MemoryBackend::new("scenario"));
    let conveyor = project.conveyor(app_dappfile(""), &backend);
    let before = conveyor.build().await.unwrap();

    commit_file(project.repo.path(), "app/x.txt", "9876543210", "c2");
    let after = conveyor.build().await.unwrap();

    let b = before.dimg("x").unwrap();
    let a = after.dimg("x").unwrap();
    assert_eq!(
        b.signature_of(StageName::Setup),
        a.signature_of(StageName::Setup)
    );
    // Under one bucket the post-setup patch still hashes bucket zero.
    assert_eq!(a.stage(StageName::GitPostSetupPatch).unwrap().status, StageStatus::Built);
    assert_eq!(a.stage(StageName::GitLatestPatch).unwrap().status, StageStatus::Skipped);
}

#[tokio::test]
async fn change_outside_filters_keeps_every_signature() {
    let project = Project::new();
    commit_file(project.repo.path(), "app/x.txt", "0123456789", "c1");
    let backend = Arc::new(MemoryBackend::new("scenario"));
    let conveyor = project.conveyor(app_dappfile(""), &backend);
    let before = conveyor.build().await.unwrap();
    let layers = backend.commits().len();

    commit_file(project.repo.path(), "docs/readme.md", &text_of_size(4096), "docs");
    let after = conveyor.build().await.unwrap();

    assert_eq!(backend.commits().len(), layers);
    let b = before.dimg("x").unwrap();
    let a = after.dimg("x").unwrap();
    for stage in StageName::ALL {
        assert_eq!(b.signature_of(stage), a.signature_of(stage), "{stage}");
    }
}

#[tokio::test]
async fn plan_is_deterministic_and_commits_nothing() {
    let project = Project::new();
    commit_file(project.repo.path(), "app/x.txt", "0123456789", "c1");
    let backend = Arc::new(MemoryBackend::new("scenario"));
    let conveyor = project.conveyor(app_dappfile(""), &backend);

    let one = conveyor.plan().await.unwrap();
    let two = conveyor.plan().await.unwrap();
    assert_eq!(backend.commits().len(), 0);
    assert_eq!(one.count(StageStatus::Pending), two.count(StageStatus::Pending));
    let (a, b) = (one.dimg("x").unwrap(), two.dimg("x").unwrap());
    for stage in StageName::ALL {
        assert_eq!(a.signature_of(stage), b.signature_of(stage), "{stage}");
    }
    assert_ne!(one.run_id, two.run_id);

    let built = conveyor.build().await.unwrap();
    let c = built.dimg("x").unwrap();
    for stage in StageName::ALL {
        assert_eq!(a.signature_of(stage), c.signature_of(stage), "{stage}");
    }
}

#[tokio::test]
async fn cache_version_bump_changes_only_its_stage_and_later() {
    let project = Project::new();
    commit_file(project.repo.path(), "app/x.txt", "0123456789", "c1");
    let backend = Arc::new(MemoryBackend::new("scenario"));

    let v1 = project.conveyor(app_dappfile(""), &backend).plan().await.unwrap();
    let v2 = project.conveyor(app_dappfile("2"), &backend).plan().await.unwrap();
    let (a, b) = (v1.dimg("x").unwrap(), v2.dimg("x").unwrap());

    for stage in [StageName::From, StageName::GitArchive] {
        assert_eq!(a.signature_of(stage), b.signature_of(stage), "{stage}");
    }
    for stage in [StageName::Install, StageName::Setup, StageName::DockerInstructions] {
        assert!(a.signature_of(stage).is_some());
        assert_ne!(a.signature_of(stage), b.signature_of(stage), "{stage}");
    }
}

#[tokio::test]
async fn zero_patch_step_is_rejected() {
    let project = Project::new();
    let backend = Arc::new(MemoryBackend::new("scenario"));
    let mut options = project.options();
    options.patch_size_step = 0;
    let conveyor = dimg_core::Conveyor::new(app_dappfile(""), options, backend);
    let err = conveyor.build().await.unwrap_err();
    assert!(err.is_configuration());
}
