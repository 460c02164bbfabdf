use std::fs;
use std::sync::Arc;

use crate::config::Config;
use crate::crypto::random::InsecureRandom;
use crate::error::Result;
use crate::models::key::KeyMaterial;
use crate::models::share::Link;
use crate::models::user::User;
use crate::services::auth::AuthService;
use crate::services::cookie::SessionCodec;
use crate::services::keys::KeyRing;
use crate::services::revocation::RevocationRegistry;
use crate::services::shares::ShareService;
use crate::services::token::TokenService;
use crate::store::blob::FsBlobStore;
use crate::store::encrypted::EncryptedStore;
use crate::store::kv::FsStore;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// Named secrets: cookie key, share secret, JWT keys.
    pub keys: KeyRing,
    /// Encrypted per-user files.
    pub files: EncryptedStore,
    pub auth: AuthService,
    pub shares: ShareService,
    /// Logged-out cookies and tokens.
    pub revocations: Arc<RevocationRegistry>,
    /// The weak PRNG behind reset nonces.
    pub random: Arc<InsecureRandom>,
}

impl AppState {
    /// Opens every store under `config.storage_root_dir` and wires the
    /// services on top of them.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub fn new(config: &Config) -> Result<Self> {
        fs::create_dir_all(&config.storage_root_dir)?;

        let key_store: Arc<FsStore<KeyMaterial>> = Arc::new(FsStore::open(config.keys_path())?);
        let users: Arc<FsStore<User>> = Arc::new(FsStore::open(config.users_path())?);
        let links: Arc<FsStore<Link>> = Arc::new(FsStore::open(config.shares_path())?);
        let blobs = Arc::new(FsBlobStore::open(config.blobs_dir())?);
        tracing::info!("✅ Stores opened under {}", config.storage_root_dir.display());

        let keys = KeyRing::new(Arc::clone(&key_store));
        let revocations = Arc::new(RevocationRegistry::new(config.session_duration));
        let random = Arc::new(InsecureRandom::new(config.weak_prng));
        tracing::info!("✅ Weak PRNG: {}", config.weak_prng);

        let files = EncryptedStore::new(blobs, key_store, config.file_encryption_mode);
        tracing::info!("✅ File encryption mode: {}", config.file_encryption_mode);

        let cookies = SessionCodec::new(keys.clone(), Arc::clone(&revocations), config.session_duration);
        let tokens = TokenService::new(
            keys.clone(),
            Arc::clone(&revocations),
            config.session_duration,
            config.jwks_fetch_timeout,
        )?;
        let auth = AuthService::new(users, cookies, tokens, Arc::clone(&revocations));
        let shares = ShareService::new(
            links,
            keys.clone(),
            config.share_link_duration,
            config.external_url.clone(),
        );

        Ok(AppState {
            config: config.clone(),
            keys,
            files,
            auth,
            shares,
            revocations,
            random,
        })
    }
}
