// crates/seqrun-client/src/blob.rs
// ============================================================================
// Module: seqrun Blob Stores
// Description: Size/get/put operations against remote object URIs.
// Purpose: Probe remote inputs and move bytes for uploads and downloads.
// Dependencies: aws-config, aws-sdk-s3, reqwest, tokio, url
// ============================================================================

//! ## Overview
//! A [`BlobStore`] handles one family of URI schemes. [`BlobRouter`] selects a
//! store by scheme and fails closed on schemes nobody registered. The router
//! doubles as the [`RemoteProbe`] used by input resolution.
//!
//! [`S3BlobStore`] drives the async AWS SDK from blocking code through an
//! owned multi-threaded runtime.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aws_config::BehaviorVersion;
use aws_config::Region;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::config::Credentials;
use reqwest::blocking::Body;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_LENGTH;
use seqrun_config::StorageConfig;
use seqrun_core::JobError;
use seqrun_core::RemoteProbe;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;
use url::Url;

use crate::api::check_response;
use crate::error::TransportError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Size of each read when streaming a download to disk.
pub const DOWNLOAD_CHUNK_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Object storage operations for one URI scheme family.
pub trait BlobStore: Send + Sync {
    /// Returns the object size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the object is unreachable.
    fn size(&self, uri: &Url) -> Result<u64, TransportError>;

    /// Streams the object into `dest` and returns the bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport or filesystem failure.
    fn get_to_file(&self, uri: &Url, dest: &Path) -> Result<u64, TransportError>;

    /// Uploads `source` to the object.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport or filesystem failure.
    fn put_from_file(&self, uri: &Url, source: &Path) -> Result<(), TransportError>;
}

// ============================================================================
// SECTION: HTTP
// ============================================================================

/// Blob store for plain or pre-signed HTTP(S) URLs.
#[derive(Debug, Clone)]
pub struct HttpBlobStore {
    /// HTTP client.
    client: Client,
}

impl HttpBlobStore {
    /// Builds a store with the given request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] when the client cannot be constructed.
    pub fn new(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|err| TransportError::Http(err.to_string()))?;
        Ok(Self {
            client,
        })
    }
}

impl BlobStore for HttpBlobStore {
    fn size(&self, uri: &Url) -> Result<u64, TransportError> {
        let response = self
            .client
            .head(uri.as_str())
            .send()
            .map_err(|err| TransportError::Http(err.to_string()))?;
        let response = check_response(response)?;
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok())
            .unwrap_or(0))
    }

    fn get_to_file(&self, uri: &Url, dest: &Path) -> Result<u64, TransportError> {
        let response = self
            .client
            .get(uri.as_str())
            .send()
            .map_err(|err| TransportError::Http(err.to_string()))?;
        let mut response = check_response(response)?;
        let file = File::create(dest).map_err(|err| TransportError::Io(err.to_string()))?;
        let mut writer = BufWriter::new(file);
        let mut buffer = vec![0_u8; DOWNLOAD_CHUNK_BYTES];
        let mut written: u64 = 0;
        loop {
            let read =
                response.read(&mut buffer).map_err(|err| TransportError::Http(err.to_string()))?;
            if read == 0 {
                break;
            }
            writer.write_all(&buffer[.. read]).map_err(|err| TransportError::Io(err.to_string()))?;
            written = written.saturating_add(read as u64);
        }
        writer.flush().map_err(|err| TransportError::Io(err.to_string()))?;
        Ok(written)
    }

    fn put_from_file(&self, uri: &Url, source: &Path) -> Result<(), TransportError> {
        let file = File::open(source).map_err(|err| TransportError::Io(err.to_string()))?;
        let response = self
            .client
            .put(uri.as_str())
            .body(Body::from(file))
            .send()
            .map_err(|err| TransportError::Http(err.to_string()))?;
        check_response(response).map(drop)
    }
}

// ============================================================================
// SECTION: S3
// ============================================================================

/// Blob store for `s3://bucket/key` URIs.
pub struct S3BlobStore {
    /// S3 client handle.
    client: S3Client,
    /// Tokio runtime for blocking S3 calls.
    runtime: Option<Arc<Runtime>>,
}

impl Drop for S3BlobStore {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            let _ = std::thread::spawn(move || drop(runtime));
        }
    }
}

impl S3BlobStore {
    /// Creates a store using ambient AWS credentials.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Storage`] when the runtime cannot start.
    pub fn new(config: &StorageConfig) -> Result<Self, TransportError> {
        Self::build(config, None)
    }

    /// Creates a store using short-lived delegated credentials.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Storage`] when the runtime cannot start.
    pub fn with_delegated(
        config: &StorageConfig,
        access_key_id: &str,
        secret_access_key: &str,
        session_token: Option<&str>,
    ) -> Result<Self, TransportError> {
        let credentials = Credentials::new(
            access_key_id,
            secret_access_key,
            session_token.map(str::to_string),
            None,
            "seqrun-delegated",
        );
        Self::build(config, Some(credentials))
    }

    /// Loads shared AWS configuration and builds the client.
    fn build(
        config: &StorageConfig,
        credentials: Option<Credentials>,
    ) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|err| TransportError::Storage(err.to_string()))?;
        let shared_config = runtime.block_on(async {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = &config.region {
                loader = loader.region(Region::new(region.clone()));
            }
            if let Some(endpoint) = &config.endpoint {
                loader = loader.endpoint_url(endpoint);
            }
            if let Some(credentials) = credentials {
                loader = loader.credentials_provider(credentials);
            }
            loader.load().await
        });
        let mut s3_builder = aws_sdk_s3::config::Builder::from(&shared_config);
        if config.force_path_style {
            s3_builder = s3_builder.force_path_style(true);
        }
        Ok(Self {
            client: S3Client::from_conf(s3_builder.build()),
            runtime: Some(Arc::new(runtime)),
        })
    }

    /// Returns the runtime or an error after shutdown.
    fn runtime(&self) -> Result<&Runtime, TransportError> {
        self.runtime
            .as_deref()
            .ok_or_else(|| TransportError::Storage("blob store closed".to_string()))
    }
}

/// Splits `s3://bucket/key` into its parts.
fn bucket_and_key(uri: &Url) -> Result<(String, String), TransportError> {
    let bucket = uri
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| TransportError::InvalidUri(format!("missing bucket: {uri}")))?;
    let key = uri.path().trim_start_matches('/');
    if key.is_empty() {
        return Err(TransportError::InvalidUri(format!("missing object key: {uri}")));
    }
    Ok((bucket.to_string(), key.to_string()))
}

impl BlobStore for S3BlobStore {
    fn size(&self, uri: &Url) -> Result<u64, TransportError> {
        let (bucket, key) = bucket_and_key(uri)?;
        let client = self.client.clone();
        let length = self.runtime()?.block_on(async {
            client
                .head_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map(|output| output.content_length())
                .map_err(|err| TransportError::Storage(err.to_string()))
        })?;
        Ok(length.and_then(|value| u64::try_from(value).ok()).unwrap_or(0))
    }

    fn get_to_file(&self, uri: &Url, dest: &Path) -> Result<u64, TransportError> {
        let (bucket, key) = bucket_and_key(uri)?;
        let client = self.client.clone();
        let std_file = File::create(dest).map_err(|err| TransportError::Io(err.to_string()))?;
        self.runtime()?.block_on(async {
            let output = client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|err| TransportError::Storage(err.to_string()))?;
            let mut file = tokio::fs::File::from_std(std_file);
            let mut body = output.body.into_async_read();
            let written = tokio::io::copy(&mut body, &mut file)
                .await
                .map_err(|err| TransportError::Io(err.to_string()))?;
            file.flush().await.map_err(|err| TransportError::Io(err.to_string()))?;
            Ok::<_, TransportError>(written)
        })
    }

    fn put_from_file(&self, uri: &Url, source: &Path) -> Result<(), TransportError> {
        let (bucket, key) = bucket_and_key(uri)?;
        let client = self.client.clone();
        let source = source.to_path_buf();
        self.runtime()?.block_on(async {
            let body = aws_sdk_s3::primitives::ByteStream::from_path(&source)
                .await
                .map_err(|err| TransportError::Io(err.to_string()))?;
            client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(body)
                .send()
                .await
                .map_err(|err| TransportError::Storage(err.to_string()))?;
            Ok(())
        })
    }
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builder for [`BlobRouter`].
///
/// # Invariants
/// - Stores are keyed by scheme; later registrations overwrite earlier ones.
#[derive(Default)]
pub struct BlobRouterBuilder {
    /// Store registry keyed by URI scheme.
    stores: BTreeMap<String, Arc<dyn BlobStore>>,
}

impl BlobRouterBuilder {
    /// Registers a store for the provided URI scheme.
    #[must_use]
    pub fn store(mut self, scheme: impl Into<String>, store: Arc<dyn BlobStore>) -> Self {
        self.stores.insert(scheme.into(), store);
        self
    }

    /// Builds the router.
    #[must_use]
    pub fn build(self) -> BlobRouter {
        BlobRouter {
            stores: self.stores,
        }
    }
}

/// Scheme-dispatching blob store.
#[derive(Clone, Default)]
pub struct BlobRouter {
    /// Store registry keyed by URI scheme.
    stores: BTreeMap<String, Arc<dyn BlobStore>>,
}

impl BlobRouter {
    /// Returns a new router builder.
    #[must_use]
    pub fn builder() -> BlobRouterBuilder {
        BlobRouterBuilder::default()
    }

    /// Builds a router serving `http` and `https` only.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] when the client cannot be constructed.
    pub fn http(timeout: Option<Duration>) -> Result<Self, TransportError> {
        let store: Arc<dyn BlobStore> = Arc::new(HttpBlobStore::new(timeout)?);
        Ok(Self::builder().store("http", Arc::clone(&store)).store("https", store).build())
    }

    /// Resolves the store for `uri`.
    fn route(&self, uri: &str) -> Result<(Url, &dyn BlobStore), TransportError> {
        let url = Url::parse(uri).map_err(|err| TransportError::InvalidUri(err.to_string()))?;
        let store = self
            .stores
            .get(url.scheme())
            .ok_or_else(|| TransportError::UnsupportedScheme(url.scheme().to_string()))?;
        Ok((url, store.as_ref()))
    }

    /// Returns the size of the object at `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the object is unreachable.
    pub fn size(&self, uri: &str) -> Result<u64, TransportError> {
        let (url, store) = self.route(uri)?;
        store.size(&url)
    }

    /// Streams the object at `uri` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport or filesystem failure.
    pub fn get_to_file(&self, uri: &str, dest: &Path) -> Result<u64, TransportError> {
        let (url, store) = self.route(uri)?;
        store.get_to_file(&url, dest)
    }

    /// Uploads `source` to `uri`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on transport or filesystem failure.
    pub fn put_from_file(&self, uri: &str, source: &Path) -> Result<(), TransportError> {
        let (url, store) = self.route(uri)?;
        store.put_from_file(&url, source)
    }
}

impl RemoteProbe for BlobRouter {
    fn probe(&self, uri: &str) -> Result<u64, JobError> {
        self.size(uri).map_err(|err| JobError::RemoteAccess(format!("{uri}: {err}")))
    }
}
