//! Bucketed blob storage.
//!
//! Bytes live on the filesystem under `root/<bucket>/<name>`; the metadata
//! row in `_ayb_storage_objects` is the source of truth. Uploads stream to a
//! temp file and rename into place so a failed upload never leaves a partial
//! object visible. Signed URLs are an HMAC over the canonical
//! `bucket\nname\nexpires` triple.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use sqlx::PgPool;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

use crate::crypto;
use crate::db::errors::DbError;
use crate::db::handlers::StorageObjects;
use crate::db::models::storage::{StorageObject, StorageObjectCreateDBRequest};
use crate::errors::{Error, Result};

/// Longest accepted object name.
const MAX_NAME_LEN: usize = 255;

/// A signed download grant for one object.
#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: i64,
    pub signature: String,
}

#[derive(Clone)]
pub struct StorageService {
    pool: PgPool,
    root: PathBuf,
    base_url: String,
    signing_secret: Option<String>,
    signed_url_ttl: std::time::Duration,
}

impl StorageService {
    pub fn new(pool: PgPool, config: &crate::config::Config) -> Self {
        Self {
            pool,
            root: config.storage.root.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            signing_secret: config.signing_secret(),
            signed_url_ttl: config.storage.signed_url_ttl,
        }
    }

    fn object_path(&self, bucket: &str, name: &str) -> PathBuf {
        self.root.join(bucket).join(name)
    }

    /// Stream an upload into the bucket and record its metadata row.
    #[instrument(skip(self, stream), err)]
    pub async fn store<S, E>(&self, bucket: &str, name: &str, content_type: Option<&str>, stream: S) -> Result<StorageObject>
    where
        S: Stream<Item = std::result::Result<Bytes, E>>,
        E: std::fmt::Display,
    {
        validate_bucket(bucket)?;
        validate_object_name(name)?;

        let bucket_dir = self.root.join(bucket);
        fs::create_dir_all(&bucket_dir).await.map_err(io_error)?;

        let tmp_path = bucket_dir.join(format!(".upload-{}", Uuid::new_v4()));
        // Any early return below must not leave the partial upload behind.
        let tmp_guard = scopeguard::guard(tmp_path.clone(), |path| {
            let _ = std::fs::remove_file(path);
        });
        let mut file = fs::File::create(&tmp_path).await.map_err(io_error)?;

        let mut stream = std::pin::pin!(stream);
        let mut size: i64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::bad_request(format!("upload stream failed: {e}")))?;
            size += chunk.len() as i64;
            file.write_all(&chunk).await.map_err(io_error)?;
        }
        file.sync_all().await.map_err(io_error)?;
        drop(file);

        let final_path = self.object_path(bucket, name);
        fs::rename(&tmp_path, &final_path).await.map_err(io_error)?;
        let _ = scopeguard::ScopeGuard::into_inner(tmp_guard);

        let content_type = content_type
            .map(str::to_string)
            .unwrap_or_else(|| mime_guess::from_path(name).first_or_octet_stream().to_string());

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let object = StorageObjects::new(&mut conn)
            .upsert(&StorageObjectCreateDBRequest {
                bucket: bucket.to_string(),
                name: name.to_string(),
                size,
                content_type,
            })
            .await?;

        metrics::counter!("ayb_storage_uploads_total").increment(1);
        Ok(object)
    }

    /// Open an object for streaming download.
    #[instrument(skip(self), err)]
    pub async fn open(&self, bucket: &str, name: &str) -> Result<(StorageObject, fs::File)> {
        validate_bucket(bucket)?;
        validate_object_name(name)?;

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let object = StorageObjects::new(&mut conn)
            .get(bucket, name)
            .await?
            .ok_or_else(|| Error::not_found("object", format!("{bucket}/{name}")))?;
        drop(conn);

        let file = fs::File::open(self.object_path(bucket, name))
            .await
            .map_err(|e| match e.kind() {
                // Metadata without bytes: the row is the source of truth, so
                // report the inconsistency instead of a plain 404.
                std::io::ErrorKind::NotFound => Error::Internal {
                    operation: format!("open blob for {bucket}/{name}: bytes missing"),
                },
                _ => io_error(e),
            })?;
        Ok((object, file))
    }

    /// Delete blob and metadata. Missing bytes are not an error; the
    /// metadata row decides existence.
    #[instrument(skip(self), err)]
    pub async fn delete(&self, bucket: &str, name: &str) -> Result<()> {
        validate_bucket(bucket)?;
        validate_object_name(name)?;

        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let existed = StorageObjects::new(&mut conn).delete(bucket, name).await?;
        drop(conn);
        if !existed {
            return Err(Error::not_found("object", format!("{bucket}/{name}")));
        }

        match fs::remove_file(self.object_path(bucket, name)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error(e)),
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn list(&self, bucket: &str, limit: i64, offset: i64) -> Result<Vec<StorageObject>> {
        validate_bucket(bucket)?;
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        let objects = StorageObjects::new(&mut conn).list(bucket, limit, offset).await?;
        Ok(objects)
    }

    /// Produce a short-lived signed URL for one object.
    #[instrument(skip(self), err)]
    pub async fn sign(&self, bucket: &str, name: &str) -> Result<SignedUrl> {
        validate_bucket(bucket)?;
        validate_object_name(name)?;
        let secret = self
            .signing_secret
            .as_ref()
            .ok_or_else(|| Error::precondition("SigningNotConfigured", "no signing secret configured"))?;

        // Only existing objects are signable.
        let mut conn = self.pool.acquire().await.map_err(DbError::from)?;
        StorageObjects::new(&mut conn)
            .get(bucket, name)
            .await?
            .ok_or_else(|| Error::not_found("object", format!("{bucket}/{name}")))?;

        let expires_at = Utc::now().timestamp() + self.signed_url_ttl.as_secs() as i64;
        let signature = sign_triple(secret, bucket, name, expires_at);
        Ok(SignedUrl {
            url: format!(
                "{}/api/storage/{bucket}/{name}?expires={expires_at}&sig={signature}",
                self.base_url
            ),
            expires_at,
            signature,
        })
    }

    /// Verify a signed-URL token: HMAC over the canonical triple, plus expiry.
    pub fn verify(&self, bucket: &str, name: &str, expires_at: i64, signature: &str) -> bool {
        let Some(secret) = self.signing_secret.as_ref() else {
            return false;
        };
        if expires_at < Utc::now().timestamp() {
            return false;
        }
        crypto::hmac_verify(secret.as_bytes(), canonical_triple(bucket, name, expires_at).as_bytes(), signature)
    }
}

fn canonical_triple(bucket: &str, name: &str, expires_at: i64) -> String {
    format!("{bucket}\n{name}\n{expires_at}")
}

fn sign_triple(secret: &str, bucket: &str, name: &str, expires_at: i64) -> String {
    crypto::hmac_hex(secret.as_bytes(), canonical_triple(bucket, name, expires_at).as_bytes())
}

fn validate_bucket(bucket: &str) -> Result<()> {
    let ok = !bucket.is_empty()
        && bucket.len() <= MAX_NAME_LEN
        && bucket.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if ok {
        Ok(())
    } else {
        Err(Error::bad_field(format!("invalid bucket name {bucket}"), "bucket"))
    }
}

fn validate_object_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_NAME_LEN
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0');
    if ok {
        Ok(())
    } else {
        Err(Error::bad_field(format!("invalid object name {name}"), "name"))
    }
}

fn io_error(e: std::io::Error) -> Error {
    Error::Internal {
        operation: format!("storage io: {e}"),
    }
}

/// Path helper for tests and maintenance tooling.
pub fn blob_path(root: &Path, bucket: &str, name: &str) -> PathBuf {
    root.join(bucket).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_names_are_restricted() {
        assert!(validate_bucket("avatars").is_ok());
        assert!(validate_bucket("user-uploads_2").is_ok());
        assert!(validate_bucket("").is_err());
        assert!(validate_bucket("a/b").is_err());
        assert!(validate_bucket("..").is_err());
        assert!(validate_bucket("has space").is_err());
    }

    #[test]
    fn object_names_cannot_traverse() {
        assert!(validate_object_name("photo.png").is_ok());
        assert!(validate_object_name("report (final).pdf").is_ok());
        assert!(validate_object_name("..").is_err());
        assert!(validate_object_name(".").is_err());
        assert!(validate_object_name("a/b.png").is_err());
        assert!(validate_object_name("a\\b.png").is_err());
        assert!(validate_object_name("").is_err());
        assert!(validate_object_name(&"x".repeat(300)).is_err());
    }

    #[test]
    fn signatures_bind_the_whole_triple() {
        let sig = sign_triple("secret", "avatars", "a.png", 1_900_000_000);
        assert_eq!(sig, sign_triple("secret", "avatars", "a.png", 1_900_000_000));
        assert_ne!(sig, sign_triple("secret", "avatars", "b.png", 1_900_000_000));
        assert_ne!(sig, sign_triple("secret", "other", "a.png", 1_900_000_000));
        assert_ne!(sig, sign_triple("secret", "avatars", "a.png", 1_900_000_001));
    }

    #[test]
    fn canonical_triple_is_newline_separated() {
        assert_eq!(canonical_triple("b", "n", 7), "b\nn\n7");
    }
}
