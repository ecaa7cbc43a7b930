//! Sink for thumbnail uploads.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use satcat_vendors::Vendor;
use tokio::sync::Mutex;

use crate::config::ObjectStoreSettings;
use crate::error::{CatalogError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Clone, Default)]
pub struct ObjectStore {
    inner: ObjectStoreKind,
}

#[derive(Clone, Default)]
enum ObjectStoreKind {
    #[default]
    Noop,
    Memory(Arc<Mutex<HashMap<String, StoredObject>>>),
    #[cfg(feature = "runtime")]
    S3(s3::S3Sink),
}

impl ObjectStore {
    pub fn noop() -> Self {
        ObjectStore {
            inner: ObjectStoreKind::Noop,
        }
    }

    pub fn memory() -> Self {
        ObjectStore {
            inner: ObjectStoreKind::Memory(Arc::new(Mutex::new(HashMap::new()))),
        }
    }

    /// S3 when a bucket is configured and the `runtime` feature is on,
    /// otherwise a no-op sink.
    pub async fn from_settings(settings: &ObjectStoreSettings) -> Result<Self> {
        match &settings.bucket {
            None => Ok(Self::noop()),
            #[cfg(feature = "runtime")]
            Some(_) => Ok(ObjectStore {
                inner: ObjectStoreKind::S3(s3::S3Sink::new(settings).await?),
            }),
            #[cfg(not(feature = "runtime"))]
            Some(bucket) => {
                tracing::warn!(bucket = %bucket, "built without the runtime feature; thumbnails will not be uploaded");
                Ok(Self::noop())
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match &self.inner {
            ObjectStoreKind::Noop => "noop",
            ObjectStoreKind::Memory(_) => "memory",
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3(_) => "s3",
        }
    }

    /// Stores `bytes` under `key` and returns the URL it can be read from.
    pub async fn put(&self, bytes: Bytes, key: &str, content_type: &str) -> Result<String> {
        if key.is_empty() {
            return Err(CatalogError::ObjectStore("object key cannot be empty".into()));
        }
        match &self.inner {
            ObjectStoreKind::Noop => {
                let _ = (bytes, content_type);
                Ok(format!("memory://{key}"))
            }
            ObjectStoreKind::Memory(objects) => {
                objects.lock().await.insert(
                    key.to_string(),
                    StoredObject {
                        bytes,
                        content_type: content_type.to_string(),
                    },
                );
                Ok(format!("memory://{key}"))
            }
            #[cfg(feature = "runtime")]
            ObjectStoreKind::S3(sink) => sink.put(bytes, key, content_type).await,
        }
    }

    /// Only the in-memory backend keeps objects readable.
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        match &self.inner {
            ObjectStoreKind::Memory(objects) => objects.lock().await.get(key).cloned(),
            _ => None,
        }
    }

    pub fn thumbnail_key(vendor: Vendor, vendor_id: &str) -> String {
        let safe: String = vendor_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '_' })
            .collect();
        format!("thumbnails/{}/{safe}.png", vendor.as_str())
    }
}

#[cfg(feature = "runtime")]
mod s3 {
    use aws_config::BehaviorVersion;
    use aws_credential_types::provider::SharedCredentialsProvider;
    use aws_credential_types::Credentials;
    use aws_sdk_s3::config::Region;
    use aws_sdk_s3::primitives::ByteStream;
    use aws_sdk_s3::Client;
    use bytes::Bytes;

    use crate::config::ObjectStoreSettings;
    use crate::error::{CatalogError, Result};

    #[derive(Clone)]
    pub(super) struct S3Sink {
        client: Client,
        bucket: String,
        public_base_url: String,
    }

    impl S3Sink {
        pub(super) async fn new(settings: &ObjectStoreSettings) -> Result<Self> {
            let bucket = settings
                .bucket
                .clone()
                .filter(|bucket| !bucket.is_empty())
                .ok_or_else(|| CatalogError::Config("S3 bucket name cannot be empty".into()))?;
            let region = settings.region.clone().unwrap_or_else(|| "us-east-1".to_string());

            let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));
            if let (Some(access_key), Some(secret_key)) = (&settings.access_key_id, &settings.secret_access_key) {
                let credentials = Credentials::new(access_key, secret_key, None, None, "static");
                loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
            }
            let shared_config = loader.load().await;
            let mut builder = aws_sdk_s3::config::Builder::from(&shared_config);
            if let Some(endpoint) = &settings.endpoint_url {
                builder = builder.endpoint_url(endpoint).force_path_style(true);
            }

            let public_base_url = settings
                .public_base_url
                .clone()
                .unwrap_or_else(|| format!("https://{bucket}.s3.{region}.amazonaws.com"));
            Ok(Self {
                client: Client::from_conf(builder.build()),
                bucket,
                public_base_url: public_base_url.trim_end_matches('/').to_string(),
            })
        }

        pub(super) async fn put(&self, bytes: Bytes, key: &str, content_type: &str) -> Result<String> {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(bytes))
                .content_type(content_type)
                .send()
                .await
                .map_err(|err| CatalogError::ObjectStore(err.to_string()))?;
            Ok(format!("{}/{key}", self.public_base_url))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_keeps_objects() {
        let store = ObjectStore::memory();
        let key = ObjectStore::thumbnail_key(Vendor::Planet, "20240601_101010_00_24a3");
        assert_eq!(key, "thumbnails/planet/20240601_101010_00_24a3.png");

        let url = store.put(Bytes::from_static(b"png"), &key, "image/png").await.unwrap();
        assert_eq!(url, format!("memory://{key}"));
        let stored = store.get(&key).await.unwrap();
        assert_eq!(stored.bytes, Bytes::from_static(b"png"));
        assert_eq!(stored.content_type, "image/png");
    }

    #[tokio::test]
    async fn noop_sink_returns_url_without_storing() {
        let store = ObjectStore::noop();
        let url = store.put(Bytes::new(), "thumbnails/maxar/x.png", "image/png").await.unwrap();
        assert_eq!(url, "memory://thumbnails/maxar/x.png");
        assert!(store.get("thumbnails/maxar/x.png").await.is_none());
    }

    #[test]
    fn thumbnail_keys_are_path_safe() {
        assert_eq!(
            ObjectStore::thumbnail_key(Vendor::Airbus, "a/b c"),
            "thumbnails/airbus/a_b_c.png"
        );
    }
}
