use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::crypto::random::random_string;
use crate::error::{AppError, Result};
use crate::models::session::Session;
use crate::models::share::Link;
use crate::services::keys::KeyRing;
use crate::store::kv::FsStore;
use crate::store::path;

const SHARE_ID_LENGTH: usize = 6;

/// Where a download request points: the namespace whose key decrypts the
/// object, and the object's key relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub namespace: String,
    pub key: String,
}

impl DownloadTarget {
    /// Full blob key.
    pub fn object_key(&self) -> String {
        path::join(&[&self.namespace, &self.key])
    }
}

/// Issues, lists and revokes share links. Links are stored per owner as
/// `<owner>/<id>`.
#[derive(Clone)]
pub struct ShareService {
    shares: Arc<FsStore<Link>>,
    keys: KeyRing,
    link_duration: Duration,
    external_url: String,
}

impl ShareService {
    /// `external_url` must end with `/`.
    pub fn new(shares: Arc<FsStore<Link>>, keys: KeyRing, link_duration: Duration, external_url: String) -> Self {
        Self {
            shares,
            keys,
            link_duration,
            external_url,
        }
    }

    /// Creates and records a link to `owner`'s object at `relative_key`.
    ///
    /// # Returns
    ///
    /// The link with its `id`, `signature` and download `url` filled in, or
    /// `InvalidKey` if the key leaves the owner's namespace.
    pub fn signed_link(&self, owner: &str, relative_key: &str) -> Result<Link> {
        let key = path::join(&[owner, relative_key]);
        if !key.starts_with(&format!("{}/", owner)) {
            return Err(AppError::InvalidKey);
        }

        let expires_at = Utc::now().timestamp() + self.link_duration.as_secs() as i64;
        let expiration = DateTime::from_timestamp(expires_at, 0);
        let id = random_string(SHARE_ID_LENGTH);
        self.shares
            .put(&path::join(&[owner, &id]), Link::new(&key, expiration))?;

        let secret = self.keys.share_link_secret()?;
        let mut link = Link::signed(&key, expiration, secret.as_bytes());
        link.url = format!("{}download?{}", self.external_url, link.query_string());
        link.id = id;

        tracing::info!("🔗 Shared {} as {}", key, link.id);
        Ok(link)
    }

    /// The owner's links, with the owner prefix stripped from ids and keys.
    pub fn list(&self, owner: &str) -> Result<Vec<Link>> {
        let prefix = format!("{}/", owner);
        let ids = self.shares.list_keys_with_prefix(&prefix)?;

        let mut links = Vec::with_capacity(ids.len());
        for id in ids {
            let stored = match self.shares.get(&id) {
                Ok(l) => l,
                Err(AppError::NotFound) => continue,
                Err(e) => return Err(e),
            };
            links.push(Link {
                id: id.strip_prefix(&prefix).unwrap_or(&id).to_string(),
                key: stored.key.strip_prefix(&prefix).unwrap_or(&stored.key).to_string(),
                expiration: stored.expiration,
                ..Default::default()
            });
        }
        Ok(links)
    }

    /// Forgets a recorded link. The signature stays valid until it expires.
    pub fn delete(&self, owner: &str, id: &str) -> Result<bool> {
        self.shares.delete(&path::join(&[owner, id]))
    }

    /// Decides what a `/download` query refers to.
    ///
    /// An unsigned link names one of the caller's own objects. A signed link
    /// is trusted to name its namespace in the key's first segment.
    pub fn resolve_download(&self, query: &str, session: Option<&Session>) -> Result<DownloadTarget> {
        let link = Link::parse_query(query);
        let secret = self.keys.share_link_secret()?;

        match link.verify(secret.as_bytes()) {
            Ok(()) => {
                let (namespace, rest) = link.key.split_once('/').unwrap_or((link.key.as_str(), ""));
                Ok(DownloadTarget {
                    namespace: namespace.to_string(),
                    key: path::join(&[rest]),
                })
            }
            Err(AppError::NoSignature) => {
                let Some(session) = session else {
                    return Err(AppError::NoSignature);
                };
                let own = path::join(&[&session.username, &link.key]);
                if !own.starts_with(&format!("{}/", session.username)) {
                    tracing::warn!("{} asked for {:?} outside their namespace", session.username, link.key);
                    return Err(AppError::Unauthorized);
                }
                Ok(DownloadTarget {
                    namespace: session.username.clone(),
                    key: link.key,
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::query::Values;

    fn service() -> ShareService {
        ShareService::new(
            Arc::new(FsStore::in_memory()),
            KeyRing::new(Arc::new(FsStore::in_memory())),
            Duration::from_secs(15 * 24 * 3600),
            "http://files.example/".to_string(),
        )
    }

    fn session(username: &str) -> Session {
        Session {
            username: username.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn signed_link_is_recorded_and_verifiable() {
        let svc = service();
        let link = svc.signed_link("alice", "docs/report.pdf").unwrap();

        assert_eq!(link.id.len(), SHARE_ID_LENGTH);
        assert_eq!(link.key, "alice/docs/report.pdf");
        assert!(link.url.starts_with("http://files.example/download?exp="));

        let query = link.url.split_once('?').unwrap().1;
        let parsed = Link::parse_query(query);
        let secret = svc.keys.share_link_secret().unwrap();
        parsed.verify(secret.as_bytes()).unwrap();
        assert_eq!(parsed.signature, link.signature);

        let listed = svc.list("alice").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, link.id);
        assert_eq!(listed[0].key, "docs/report.pdf");
        assert_eq!(listed[0].expiration, link.expiration);
        assert!(svc.list("bob").unwrap().is_empty());
    }

    #[test]
    fn keys_outside_namespace_are_rejected() {
        let svc = service();
        for key in ["../bob/secret.txt", "", ".", "x/../.."] {
            assert!(
                matches!(svc.signed_link("alice", key), Err(AppError::InvalidKey)),
                "{}",
                key
            );
        }
    }

    #[test]
    fn delete_forgets_link() {
        let svc = service();
        let link = svc.signed_link("alice", "a.txt").unwrap();
        assert!(svc.delete("alice", &link.id).unwrap());
        assert!(!svc.delete("alice", &link.id).unwrap());
        assert!(svc.list("alice").unwrap().is_empty());
    }

    #[test]
    fn signed_links_name_their_namespace() {
        let svc = service();
        let link = svc.signed_link("alice", "dir/a.txt").unwrap();
        let query = link.url.split_once('?').unwrap().1;

        let target = svc.resolve_download(query, None).unwrap();
        assert_eq!(target.namespace, "alice");
        assert_eq!(target.key, "dir/a.txt");
        assert_eq!(target.object_key(), "alice/dir/a.txt");

        // anyone holding the link gets it, signed in or not
        assert_eq!(svc.resolve_download(query, Some(&session("mallory"))).unwrap(), target);
    }

    #[test]
    fn unsigned_links_are_own_files() {
        let svc = service();
        let mut v = Values::new();
        v.set("key", "notes.txt");
        let query = v.encode();

        let target = svc.resolve_download(&query, Some(&session("bob"))).unwrap();
        assert_eq!(target.object_key(), "bob/notes.txt");

        assert!(matches!(svc.resolve_download(&query, None), Err(AppError::NoSignature)));

        v.set("key", "../alice/notes.txt");
        assert!(matches!(
            svc.resolve_download(&v.encode(), Some(&session("bob"))),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn forged_and_expired_links_are_refused() {
        let svc = service();
        let secret = svc.keys.share_link_secret().unwrap();

        let forged = Link::signed("alice/a.txt", None, b"not the secret");
        assert!(matches!(
            svc.resolve_download(&forged.query_string(), None),
            Err(AppError::InvalidSignature)
        ));

        let expired = Link::signed("alice/a.txt", DateTime::from_timestamp(1_000, 0), secret.as_bytes());
        assert!(matches!(
            svc.resolve_download(&expired.query_string(), Some(&session("alice"))),
            Err(AppError::Expired)
        ));
    }
}
