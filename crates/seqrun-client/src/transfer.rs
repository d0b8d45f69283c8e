// crates/seqrun-client/src/transfer.rs
// ============================================================================
// Module: seqrun File Transfer
// Description: Moves input and output bytes between disk and the service.
// Purpose: Upload to service-issued locations and download job outputs.
// Dependencies: seqrun-config, crate::{api, blob}
// ============================================================================

//! ## Overview
//! Uploads go to the location returned by input registration. Downloads use a
//! pre-signed URL when the service issues one, otherwise the object is read
//! from the bucket with the short-lived credentials in the download target.

use std::path::Path;

use seqrun_config::StorageConfig;

use crate::api::DownloadTarget;
use crate::blob::BlobRouter;
use crate::blob::BlobStore;
use crate::blob::S3BlobStore;
use crate::error::TransportError;

/// Byte movement for one job.
pub trait FileTransfer: Send + Sync {
    /// Sends the bytes of `source` to `upload_location`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport or filesystem failure.
    fn upload(&self, upload_location: &str, source: &Path) -> Result<(), TransportError>;

    /// Writes the object described by `target` to `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport or filesystem failure.
    fn download(&self, target: &DownloadTarget, dest: &Path) -> Result<u64, TransportError>;
}

/// [`FileTransfer`] backed by a [`BlobRouter`] plus delegated S3 access.
#[derive(Clone)]
pub struct BlobTransfer {
    /// Scheme router for uploads and signed downloads.
    router: BlobRouter,
    /// Storage settings for delegated-credential downloads.
    storage: StorageConfig,
}

impl BlobTransfer {
    /// Creates a transfer over `router`.
    #[must_use]
    pub const fn new(router: BlobRouter, storage: StorageConfig) -> Self {
        Self {
            router,
            storage,
        }
    }
}

impl FileTransfer for BlobTransfer {
    fn upload(&self, upload_location: &str, source: &Path) -> Result<(), TransportError> {
        self.router.put_from_file(upload_location, source)
    }

    fn download(&self, target: &DownloadTarget, dest: &Path) -> Result<u64, TransportError> {
        if let Some(url) = &target.signed_url {
            return self.router.get_to_file(url, dest);
        }
        let (Some(bucket), Some(object), Some(access_key), Some(secret_key)) = (
            &target.bucket,
            &target.object_name,
            &target.access_key_id,
            &target.secret_access_key,
        ) else {
            return Err(TransportError::Decode(
                "download target has neither a signed url nor delegated credentials".to_string(),
            ));
        };
        let uri = url::Url::parse(&format!("s3://{bucket}/{object}"))
            .map_err(|err| TransportError::InvalidUri(err.to_string()))?;
        let store = S3BlobStore::with_delegated(
            &self.storage,
            access_key,
            secret_key,
            target.session_token.as_deref(),
        )?;
        store.get_to_file(&uri, dest)
    }
}
