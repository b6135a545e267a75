//! In-memory image store for tests and dry runs.
//!
//! Nothing is executed: committing records the image spec and derives the new
//! layer's labels from the parent and the image spec.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{stage_repository, ImageBackend};
use crate::error::Result;
use crate::image::{BuiltImage, ImageSpec};

/// One recorded commit.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub parent: String,
    pub signature: String,
    pub spec: ImageSpec,
}

#[derive(Debug)]
pub struct MemoryBackend {
    repository: String,
    images: Mutex<HashMap<String, BuiltImage>>,
    commits: Mutex<Vec<CommitRecord>>,
}

impl MemoryBackend {
    pub fn new(project: &str) -> Self {
        Self {
            repository: stage_repository(project),
            images: Mutex::new(HashMap::new()),
            commits: Mutex::new(Vec::new()),
        }
    }

    /// Every commit so far, oldest first.
    pub fn commits(&self) -> Vec<CommitRecord> {
        self.commits.lock().unwrap().clone()
    }

    pub fn image_count(&self) -> usize {
        self.images.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageBackend for MemoryBackend {
    fn image_name(&self, signature: &str) -> String {
        format!("{}:{}", self.repository, signature)
    }

    async fn lookup(&self, signature: &str) -> Result<Option<BuiltImage>> {
        let images = self.images.lock().unwrap();
        Ok(images.get(&self.image_name(signature)).cloned())
    }

    async fn commit(&self, parent: &BuiltImage, spec: &ImageSpec, signature: &str) -> Result<BuiltImage> {
        let image = parent.child(self.image_name(signature), spec);
        self.images
            .lock()
            .unwrap()
            .insert(image.name.clone(), image.clone());
        self.commits.lock().unwrap().push(CommitRecord {
            parent: parent.name.clone(),
            signature: signature.to_string(),
            spec: spec.clone(),
        });
        Ok(image)
    }
}
