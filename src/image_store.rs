//! Filesystem [`ImageStore`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use slabvault_core::capability::ImageStore;

/// Extensions this store writes; one card keeps at most one of them.
const EXTENSIONS: [&str; 5] = ["jpg", "png", "webp", "pdf", "bin"];

/// Writes `{image_dir}/{stem}.{ext}`.
///
/// `save` stages the bytes next to the final file as `{stem}.{ext}.partial`;
/// `commit` renames it into place and removes the card's files under other
/// extensions. Until then a previously stored image is left untouched.
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

/// Identifier encoded as a path-safe file stem.
///
/// ASCII alphanumerics and `-` pass through; every other byte, `_`
/// included, becomes `_XX` (uppercase hex). Distinct identifiers therefore
/// never share a file.
pub fn file_stem(identifier: &str) -> String {
    if identifier.is_empty() {
        return "_".to_string();
    }
    let mut stem = String::with_capacity(identifier.len());
    for b in identifier.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            stem.push(b as char);
        } else {
            stem.push_str(&format!("_{:02X}", b));
        }
    }
    stem
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_owned();
    staged.push(".partial");
    PathBuf::from(staged)
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, identifier: &str, image: &[u8], content_type: &str) -> Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create image directory {}", self.root.display()))?;

        let path = self.root.join(format!(
            "{}.{}",
            file_stem(identifier),
            extension_for(content_type)
        ));
        let staged = staging_path(&path);
        tokio::fs::write(&staged, image)
            .await
            .with_context(|| format!("Failed to write {}", staged.display()))?;

        debug!(path = %staged.display(), bytes = image.len(), "staged card image");
        Ok(path.display().to_string())
    }

    async fn commit(&self, path: &str) -> Result<()> {
        let path = PathBuf::from(path);
        let staged = staging_path(&path);
        tokio::fs::rename(&staged, &path)
            .await
            .with_context(|| format!("Failed to move {} into place", staged.display()))?;

        // A re-processed card may have arrived with a different content type.
        let current = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        for ext in EXTENSIONS.iter().filter(|ext| **ext != current) {
            let sibling = path.with_extension(ext);
            match tokio::fs::remove_file(&sibling).await {
                Ok(()) => debug!(path = %sibling.display(), "removed superseded image"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %sibling.display(), error = %e, "could not remove superseded image"),
            }
        }

        debug!(path = %path.display(), "saved card image");
        Ok(())
    }

    async fn abort(&self, path: &str) -> Result<()> {
        let staged = staging_path(Path::new(path));
        match tokio::fs::remove_file(&staged).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", staged.display())),
        }
    }
}
