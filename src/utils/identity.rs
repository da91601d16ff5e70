//! Persistent node identity.
//!
//! A node is identified by an Ed25519 key pair stored as two raw files,
//! `private` (32-byte secret seed) and `public` (32-byte verifying key),
//! inside a key directory. The peer ID is the lowercase hex encoding of
//! the public key.

use ed25519_dalek::{SigningKey, VerifyingKey};
use log::{debug, info};
use rand::rngs::OsRng;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::utils::{P2PError, Result};

pub const PRIVATE_KEY_FILE: &str = "private";
pub const PUBLIC_KEY_FILE: &str = "public";

const KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct NodeIdentity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    peer_id: String,
}

impl NodeIdentity {
    /// Generate a fresh key pair from the OS entropy source.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let peer_id = peer_id_from_public(&verifying_key);
        Self {
            signing_key,
            verifying_key,
            peer_id,
        }
    }

    /// Load the key pair from `dir`, creating the directory and a fresh key
    /// pair if it does not exist yet.
    pub fn load_or_create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        info!("Key directory: {}", dir.display());

        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| {
                P2PError::IoError(format!("Failed to create {}: {}", dir.display(), e))
            })?;

            let identity = Self::generate();
            identity.persist(dir)?;
            info!("Generated new identity {}", identity.peer_id);
            return Ok(identity);
        }

        let identity = Self::load(dir)?;
        debug!("Loaded identity {}", identity.peer_id);
        Ok(identity)
    }

    /// Read both key files from `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let private = read_key_file(&dir.join(PRIVATE_KEY_FILE))?;
        let public = read_key_file(&dir.join(PUBLIC_KEY_FILE))?;

        let signing_key = SigningKey::from_bytes(&private);
        let verifying_key = VerifyingKey::from_bytes(&public)
            .map_err(|e| P2PError::DecodeError(format!("Invalid public key: {}", e)))?;

        if signing_key.verifying_key() != verifying_key {
            return Err(P2PError::DecodeError(
                "Public key does not match private key".to_string(),
            ));
        }

        Ok(Self::from_signing_key(signing_key))
    }

    /// Write both key files into `dir`, which must already exist.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        let private_path = dir.join(PRIVATE_KEY_FILE);
        write_private_key_file(&private_path, &self.signing_key.to_bytes())?;
        write_key_file(&dir.join(PUBLIC_KEY_FILE), self.verifying_key.as_bytes())?;
        Ok(())
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }
}

impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

pub fn peer_id_from_public(key: &VerifyingKey) -> String {
    hex::encode(key.as_bytes())
}

fn read_key_file(path: &Path) -> Result<[u8; KEY_LEN]> {
    let bytes = fs::read(path)
        .map_err(|e| P2PError::IoError(format!("Failed to read {}: {}", path.display(), e)))?;

    bytes.as_slice().try_into().map_err(|_| {
        P2PError::DecodeError(format!(
            "{}: expected {} key bytes, found {}",
            path.display(),
            KEY_LEN,
            bytes.len()
        ))
    })
}

fn write_key_file(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes)
        .map_err(|e| P2PError::IoError(format!("Failed to write {}: {}", path.display(), e)))
}

/// Write the secret key. On unix the file is created with mode 0600, and a
/// file that already existed is narrowed to 0600 before it is rewritten.
fn write_private_key_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let io_err =
        |e: std::io::Error| P2PError::IoError(format!("Failed to write {}: {}", path.display(), e));

    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(io_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(io_err)?;
    }

    file.write_all(bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)
}
