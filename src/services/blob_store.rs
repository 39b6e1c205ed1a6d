//! Content-addressed blob storage for uploads.
//!
//! Blobs are stored using a content-hash-based path structure:
//! `{root}/{first_hex}/{second_hex}/{sha256}.{ext}`
//!
//! Identical uploads land on the same path and are written once.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::{ALLOWED_UPLOAD_TYPES, MAX_UPLOAD_SIZE};
use crate::{Error, Result};

/// A stored blob, addressed relative to the store root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBlob {
    pub pathname: String,
    pub content_type: String,
    pub size: usize,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist bytes and return where they ended up.
    async fn put(&self, data: &[u8], content_type: &str) -> Result<StoredBlob>;
}

/// Blob store on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, data: &[u8], content_type: &str) -> Result<StoredBlob> {
        let hash = calculate_checksum(data);
        let pathname = hash_storage_path(&hash, extension_for(content_type));
        let full_path = self.root.join(&pathname);

        if tokio::fs::try_exists(&full_path).await? {
            debug!(%pathname, "Blob already stored");
        } else {
            if let Some(parent) = full_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&full_path, data).await?;
            debug!(%pathname, size = data.len(), "Blob stored");
        }

        Ok(StoredBlob {
            pathname,
            content_type: content_type.to_string(),
            size: data.len(),
        })
    }
}

/// Reject uploads that are too big or of a type we don't take.
pub fn validate_upload(content_type: &str, size: usize) -> Result<()> {
    if size > MAX_UPLOAD_SIZE {
        return Err(Error::FileTooLarge {
            max_size: MAX_UPLOAD_SIZE,
        });
    }
    if !ALLOWED_UPLOAD_TYPES.contains(&content_type) {
        return Err(Error::InvalidFileType(content_type.to_string()));
    }
    Ok(())
}

/// Content type declared by the client, or guessed from the file name.
pub fn resolve_content_type(declared: Option<&str>, filename: &str) -> String {
    match declared {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
        _ => mime_guess::from_path(filename)
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
    }
}

fn extension_for(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/jpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "application/pdf" => Some("pdf"),
        other => mime_guess::get_mime_extensions_str(other).and_then(|exts| exts.first().copied()),
    }
}

/// Calculate SHA-256 checksum of data.
fn calculate_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Relative hash-based storage path: `{first_hex}/{second_hex}/{hash}.{ext}`
fn hash_storage_path(hash: &str, extension: Option<&str>) -> String {
    let first_char = hash.chars().next().unwrap_or('0');
    let second_char = hash.chars().nth(1).unwrap_or('0');

    let filename = match extension {
        Some(ext) if !ext.is_empty() => format!("{}.{}", hash, ext),
        _ => hash.to_string(),
    };

    format!("{}/{}/{}", first_char, second_char, filename)
}
