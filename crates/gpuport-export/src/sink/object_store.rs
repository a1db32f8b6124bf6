//! Object storage sink.
//!
//! The storage backend sits behind [`ObjectStoreClient`] so deliveries can
//! be exercised without network access. Credentials are resolved from the
//! configured environment variable names at delivery time and are never
//! accepted inline in configuration.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::sink::{gzip, Payload, SinkError};
use crate::template::render_pattern;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreSinkConfig {
    pub bucket: String,
    /// Key prefix, joined to the rendered filename with '/'.
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_pattern")]
    pub filename_pattern: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable NAMES, not values.
    #[serde(default = "default_access_key_env")]
    pub access_key_env: String,
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,
    #[serde(default)]
    pub session_token_env: Option<String>,
    #[serde(default)]
    pub storage_class: Option<String>,
    #[serde(default)]
    pub server_side_encryption: Option<String>,
    #[serde(default)]
    pub acl: Option<String>,
    /// Custom object metadata, passed through unmodified.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub compress: bool,
}

fn default_pattern() -> String {
    String::from("{pipeline}_{timestamp}.{format}")
}

fn default_access_key_env() -> String {
    String::from("AWS_ACCESS_KEY_ID")
}

fn default_secret_key_env() -> String {
    String::from("AWS_SECRET_ACCESS_KEY")
}

/// Credentials resolved from the environment for one delivery.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for StoredCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never reveal secret material through Debug.
        f.debug_struct("StoredCredentials")
            .field("access_key", &"***")
            .field("secret_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// One fully-resolved upload.
#[derive(Debug, Clone)]
pub struct PutObjectRequest {
    pub bucket: String,
    pub key: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub credentials: StoredCredentials,
    pub storage_class: Option<String>,
    pub server_side_encryption: Option<String>,
    pub acl: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Storage backend contract.
pub trait ObjectStoreClient: Send + Sync {
    fn put_object<'a>(
        &'a self,
        request: PutObjectRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>>;
}

/// In-memory backend recording every upload. Used by tests and as the
/// default wiring point until a real backend is injected.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<Vec<PutObjectRequest>>,
}

impl InMemoryObjectStore {
    pub fn objects(&self) -> Vec<PutObjectRequest> {
        self.objects.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

impl ObjectStoreClient for InMemoryObjectStore {
    fn put_object<'a>(
        &'a self,
        request: PutObjectRequest,
    ) -> Pin<Box<dyn Future<Output = Result<(), SinkError>> + Send + 'a>> {
        Box::pin(async move {
            if let Ok(mut objects) = self.objects.lock() {
                objects.push(request);
            }
            Ok(())
        })
    }
}

/// Upload the payload under the rendered key. Returns "bucket/key".
pub(crate) async fn deliver(
    config: &ObjectStoreSinkConfig,
    payload: &Payload,
    client: &dyn ObjectStoreClient,
) -> Result<String, SinkError> {
    let credentials = resolve_credentials(config)?;

    let mut filename = render_pattern(&config.filename_pattern, &payload.template_context());
    if config.compress {
        filename.push_str(".gz");
    }
    let key = if config.prefix.is_empty() {
        filename
    } else {
        format!("{}/{}", config.prefix.trim_end_matches('/'), filename)
    };

    let body = if config.compress {
        gzip(payload.body.as_bytes())?
    } else {
        payload.body.clone().into_bytes()
    };
    let content_type = if config.compress {
        String::from("application/gzip")
    } else {
        payload.content_type.to_owned()
    };

    let byte_count = body.len();
    client
        .put_object(PutObjectRequest {
            bucket: config.bucket.clone(),
            key: key.clone(),
            body,
            content_type,
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            credentials,
            storage_class: config.storage_class.clone(),
            server_side_encryption: config.server_side_encryption.clone(),
            acl: config.acl.clone(),
            metadata: config.metadata.clone(),
        })
        .await?;

    tracing::info!(
        bucket = %config.bucket,
        key = %key,
        bytes = byte_count,
        "uploaded export object"
    );
    Ok(format!("{}/{}", config.bucket, key))
}

fn resolve_credentials(config: &ObjectStoreSinkConfig) -> Result<StoredCredentials, SinkError> {
    let read = |name: &str| -> Result<String, SinkError> {
        std::env::var(name)
            .map_err(|_| SinkError::Auth(format!("environment variable '{name}' is not set")))
    };

    let session_token = match &config.session_token_env {
        Some(name) => Some(read(name)?),
        None => None,
    };

    Ok(StoredCredentials {
        access_key: read(&config.access_key_env)?,
        secret_key: read(&config.secret_key_env)?,
        session_token,
    })
}
