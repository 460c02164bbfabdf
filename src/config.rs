use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::crypto::aes::CipherMode;
use crate::crypto::weakprng::Algorithm;

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_STORAGE_ROOT: &str = "data";
const DEFAULT_FILE_SIZE_LIMIT: usize = 100 * 1024 * 1024;
const DEFAULT_SESSION_SECS: u64 = 6 * 60 * 60;
const DEFAULT_SHARE_LINK_SECS: u64 = 15 * 24 * 60 * 60;
const DEFAULT_JWKS_TIMEOUT_SECS: u64 = 5;

/// The application's configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address the HTTP server binds.
    pub listen_addr: SocketAddr,
    /// Public base URL, always ending in `/`. Share links are built on it.
    pub external_url: String,
    /// Directory holding the key-value snapshots and the blob tree.
    pub storage_root_dir: PathBuf,
    /// Largest accepted upload in bytes.
    pub file_size_limit: usize,
    pub file_encryption_mode: CipherMode,
    pub weak_prng: Algorithm,
    pub session_duration: Duration,
    pub share_link_duration: Duration,
    /// Bound on a remote JWKS fetch during token verification.
    pub jwks_fetch_timeout: Duration,
    /// Mounts `/vulns/leak/`, serving stored ciphertexts to anyone.
    pub leak_encrypted_files: bool,
    /// Mounts `/vulns/tweak/`, writing request bodies straight into the blob store.
    pub tweak_encrypted_files: bool,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(v) => v.parse().with_context(|| format!("Invalid {}", name)),
        Err(_) => Ok(default),
    }
}

/// `true`/`yes`/`1` or `false`/`no`/`0`, any case. Anything else keeps `default`.
fn parse_flag(value: Option<&str>, default: bool) -> bool {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "yes" | "1") => true,
        Some("false" | "no" | "0") => false,
        _ => default,
    }
}

fn with_trailing_slash(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

impl Config {
    /// Creates a new `Config` from environment variables.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `Config`.
    pub fn from_env() -> Result<Self> {
        let listen_addr: SocketAddr = env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .context("LISTEN_ADDR must be host:port")?;

        let external_url = env::var("EXTERNAL_URL").unwrap_or_else(|_| format!("http://{}/", listen_addr));

        let file_encryption_mode = env::var("FILE_ENCRYPTION_MODE")
            .ok()
            .and_then(|m| CipherMode::from_name(&m))
            .unwrap_or_default();

        let weak_prng = env::var("WEAK_PRNG")
            .map(|name| Algorithm::from_name(&name))
            .unwrap_or(Algorithm::XorShift128p);

        Ok(Self {
            listen_addr,
            external_url: with_trailing_slash(external_url),
            storage_root_dir: env::var("STORAGE_ROOT_DIR")
                .unwrap_or_else(|_| DEFAULT_STORAGE_ROOT.to_string())
                .into(),
            file_size_limit: parse_var("FILE_SIZE_LIMIT", DEFAULT_FILE_SIZE_LIMIT)?,
            file_encryption_mode,
            weak_prng,
            session_duration: Duration::from_secs(parse_var("SESSION_DURATION_SECS", DEFAULT_SESSION_SECS)?),
            share_link_duration: Duration::from_secs(parse_var(
                "SHARE_LINK_DURATION_SECS",
                DEFAULT_SHARE_LINK_SECS,
            )?),
            jwks_fetch_timeout: Duration::from_secs(parse_var(
                "JWKS_FETCH_TIMEOUT_SECS",
                DEFAULT_JWKS_TIMEOUT_SECS,
            )?),
            leak_encrypted_files: parse_flag(env::var("LEAK_ENCRYPTED_FILES").ok().as_deref(), true),
            tweak_encrypted_files: parse_flag(env::var("TWEAK_ENCRYPTED_FILES").ok().as_deref(), true),
        })
    }

    /// Defaults rooted at `root`, with a deterministic weak PRNG and a short
    /// JWKS timeout.
    pub fn for_testing(root: impl AsRef<Path>) -> Self {
        let listen_addr = SocketAddr::from(([127, 0, 0, 1], 8080));
        Self {
            listen_addr,
            external_url: format!("http://{}/", listen_addr),
            storage_root_dir: root.as_ref().to_path_buf(),
            file_size_limit: DEFAULT_FILE_SIZE_LIMIT,
            file_encryption_mode: CipherMode::default(),
            weak_prng: Algorithm::Deterministic,
            session_duration: Duration::from_secs(DEFAULT_SESSION_SECS),
            share_link_duration: Duration::from_secs(DEFAULT_SHARE_LINK_SECS),
            jwks_fetch_timeout: Duration::from_secs(1),
            leak_encrypted_files: true,
            tweak_encrypted_files: true,
        }
    }

    pub fn keys_path(&self) -> PathBuf {
        self.storage_root_dir.join("keys.json")
    }

    pub fn users_path(&self) -> PathBuf {
        self.storage_root_dir.join("users.json")
    }

    pub fn shares_path(&self) -> PathBuf {
        self.storage_root_dir.join("shares.json")
    }

    pub fn blobs_dir(&self) -> PathBuf {
        self.storage_root_dir.join("files")
    }
}
