//! dimg core library
//!
//! Builds container images as chains of cached stages. Each stage's
//! signature hashes its own dependency material together with the previous
//! stage's signature, so a layer is rebuilt only when something it depends
//! on changed. Git content enters an image once as an archive and is then
//! brought up to date with filtered patches.

pub mod backend;
pub mod builder;
pub mod config;
pub mod conveyor;
pub mod digest;
pub mod error;
pub mod git;
pub mod git_artifact;
pub mod image;
pub mod initialization;
pub mod lock;
pub mod obs;
pub mod stage;
pub mod telemetry;

pub use backend::{DockerBackend, ImageBackend, MemoryBackend};
pub use builder::{Ansible, Builder, Shell};
pub use config::{
    AnsibleConfig, ArtifactImport, BaseImage, BuilderConfig, Dappfile, Dimg, DimgArtifact,
    DimgBase, DockerInstructions, GitConfig, GitExport, GitLocal, GitRemote, ImportPoint, Mount,
    MountSource, ShellConfig, StageDependencies,
};
pub use conveyor::{
    BuildReport, Conveyor, ConveyorOptions, DimgReport, StageReport, StageStatus,
    DEFAULT_PATCH_SIZE_STEP,
};
pub use error::{DimgError, Result};
pub use git::{DiffParser, DiffSummary, GitReference, GitRepo, LocalGitRepo, PathFilter, RemoteGitRepo};
pub use git_artifact::GitArtifact;
pub use image::{BuiltImage, ImageSpec, SIGNATURE_LABEL};
pub use initialization::{DimgPlan, InitializationPhase};
pub use lock::BuildLock;
pub use stage::{Stage, StageName, UserStageName};
pub use telemetry::init_tracing;
