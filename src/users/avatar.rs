use anyhow::Context;
use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::storage::ObjectStore;

pub const AVATAR_MAX_BYTES: usize = 5 * 1024 * 1024;

pub struct AvatarUpload {
    pub body: Bytes,
    pub content_type: String,
}

pub fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}

/// Object key behind one of our own avatar URLs.
fn stored_key(storage: &dyn ObjectStore, url: &str) -> Option<String> {
    let base = storage.public_url("");
    let path = url.split('?').next()?;
    path.strip_prefix(&base)
        .filter(|key| key.starts_with("avatars/"))
        .map(str::to_string)
}

pub struct StoredAvatar {
    pub url: String,
    /// Previous object under another key; removed once the new URL is saved.
    pub stale_key: Option<String>,
}

/// Uploads the avatar under the user's key.
pub async fn store_avatar(
    storage: &dyn ObjectStore,
    user_id: Uuid,
    previous: Option<&str>,
    upload: AvatarUpload,
) -> anyhow::Result<StoredAvatar> {
    let ext = ext_from_mime(&upload.content_type)
        .with_context(|| format!("unsupported avatar type {}", upload.content_type))?;
    let key = format!("avatars/{user_id}.{ext}");

    storage
        .put_object(&key, upload.body, &upload.content_type)
        .await
        .with_context(|| format!("upload avatar {key}"))?;
    debug!(%user_id, key, "avatar uploaded");

    let stale_key = previous
        .and_then(|url| stored_key(storage, url))
        .filter(|old| *old != key);
    let version = OffsetDateTime::now_utc().unix_timestamp();
    Ok(StoredAvatar {
        url: format!("{}?v={version}", storage.public_url(&key)),
        stale_key,
    })
}

/// Best-effort removal of a replaced avatar.
pub async fn remove_stale(storage: &dyn ObjectStore, key: &str) {
    if let Err(e) = storage.delete_object(key).await {
        warn!(error = ?e, key, "failed to delete previous avatar");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use axum::async_trait;
    use bytes::Bytes;

    use crate::storage::{join_url, ObjectStore};

    /// In-memory store recording every call.
    #[derive(Default)]
    pub struct FakeStore {
        pub puts: Mutex<Vec<(String, String)>>,
        pub deletes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn put_object(&self, key: &str, _body: Bytes, content_type: &str) -> anyhow::Result<()> {
            self.puts.lock().unwrap().push((key.to_string(), content_type.to_string()));
            Ok(())
        }
        async fn delete_object(&self, key: &str) -> anyhow::Result<()> {
            self.deletes.lock().unwrap().push(key.to_string());
            Ok(())
        }
        fn public_url(&self, key: &str) -> String {
            join_url("https://fake.local/bucket", key)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeStore;
    use super::*;

    fn upload(ct: &str) -> AvatarUpload {
        AvatarUpload {
            body: Bytes::from_static(b"\x89PNG"),
            content_type: ct.to_string(),
        }
    }

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("image/gif"), Some("gif"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
        assert_eq!(ext_from_mime("text/html"), None);
    }

    #[test]
    fn stored_key_only_matches_own_avatars() {
        let store = FakeStore::default();
        assert_eq!(
            stored_key(&store, "https://fake.local/bucket/avatars/u.png?v=1"),
            Some("avatars/u.png".to_string())
        );
        assert_eq!(stored_key(&store, "https://www.gravatar.com/avatar/abc?d=identicon"), None);
        assert_eq!(stored_key(&store, "https://fake.local/bucket/other/u.png"), None);
    }

    #[tokio::test]
    async fn first_upload_uses_user_key() {
        let store = FakeStore::default();
        let user_id = Uuid::new_v4();
        let stored = store_avatar(&store, user_id, Some("https://www.gravatar.com/avatar/x"), upload("image/png"))
            .await
            .unwrap();
        let url = stored.url;

        let expected = format!("https://fake.local/bucket/avatars/{user_id}.png?v=");
        assert!(url.starts_with(&expected), "{url}");
        assert_eq!(
            *store.puts.lock().unwrap(),
            vec![(format!("avatars/{user_id}.png"), "image/png".to_string())]
        );
        assert_eq!(stored.stale_key, None);
        assert!(store.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn changing_format_reports_old_object_without_deleting_it() {
        let store = FakeStore::default();
        let user_id = Uuid::new_v4();
        let previous = format!("https://fake.local/bucket/avatars/{user_id}.png?v=10");
        let stored = store_avatar(&store, user_id, Some(&previous), upload("image/jpeg"))
            .await
            .unwrap();
        let old = format!("avatars/{user_id}.png");
        assert_eq!(stored.stale_key.as_deref(), Some(old.as_str()));
        assert!(store.deletes.lock().unwrap().is_empty());

        remove_stale(&store, &old).await;
        assert_eq!(*store.deletes.lock().unwrap(), vec![old]);
    }

    #[tokio::test]
    async fn same_format_overwrites_in_place() {
        let store = FakeStore::default();
        let user_id = Uuid::new_v4();
        let previous = format!("https://fake.local/bucket/avatars/{user_id}.png?v=10");
        let stored = store_avatar(&store, user_id, Some(&previous), upload("image/png"))
            .await
            .unwrap();
        assert_eq!(stored.stale_key, None);
    }

    #[tokio::test]
    async fn rejects_non_images() {
        let store = FakeStore::default();
        assert!(store_avatar(&store, Uuid::new_v4(), None, upload("text/plain")).await.is_err());
        assert!(store.puts.lock().unwrap().is_empty());
    }
}
