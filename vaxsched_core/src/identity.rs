//! Account credentials and the identity store.
//!
//! Passwords are never stored. Each account keeps a random salt and an
//! iterated SHA-256 digest of `salt || password`. The digest is persisted in
//! a fixed-width, zero-padded column alongside its true length, so
//! verification always compares exactly the digest bytes and never the
//! padding.

use crate::config::SecurityConfig;
use crate::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Length of the per-account random salt
pub const SALT_LEN: usize = 16;

/// Width of the persisted hash column
pub const HASH_COLUMN_WIDTH: usize = 64;

/// Length of a SHA-256 digest
pub const DIGEST_LEN: usize = 32;

/// Account role
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    Caregiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Patient => write!(f, "patient"),
            Role::Caregiver => write!(f, "caregiver"),
        }
    }
}

// ============================================================================
// Padded hash column
// ============================================================================

/// A digest stored in a fixed-width column together with its real length
#[derive(Clone, PartialEq, Eq)]
pub struct PaddedHash {
    column: [u8; HASH_COLUMN_WIDTH],
    len: usize,
}

impl PaddedHash {
    /// Place a freshly derived digest into a zero-padded column
    pub fn from_digest(digest: &[u8]) -> Result<Self> {
        if digest.is_empty() || digest.len() > HASH_COLUMN_WIDTH {
            return Err(Error::InvalidInput(format!(
                "digest length {} does not fit a {}-byte column",
                digest.len(),
                HASH_COLUMN_WIDTH
            )));
        }
        let mut column = [0u8; HASH_COLUMN_WIDTH];
        column[..digest.len()].copy_from_slice(digest);
        Ok(Self {
            column,
            len: digest.len(),
        })
    }

    /// Rebuild from a stored column.
    ///
    /// Without a recorded length the digest is assumed to span the
    /// algorithm's full output. Zero bytes inside the digest are data.
    pub fn from_column(bytes: &[u8], len: Option<usize>) -> Result<Self> {
        if bytes.len() > HASH_COLUMN_WIDTH {
            return Err(Error::InvalidInput(format!(
                "hash column is {} bytes, expected at most {}",
                bytes.len(),
                HASH_COLUMN_WIDTH
            )));
        }
        let len = match len {
            Some(len) => len,
            None => DIGEST_LEN,
        };
        if len == 0 || len > bytes.len() {
            return Err(Error::InvalidInput(format!(
                "hash length {} invalid for a {}-byte column",
                len,
                bytes.len()
            )));
        }
        let mut column = [0u8; HASH_COLUMN_WIDTH];
        column[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { column, len })
    }

    /// The digest without padding
    pub fn digest(&self) -> &[u8] {
        &self.column[..self.len]
    }

    /// The full padded column as persisted
    pub fn column(&self) -> &[u8] {
        &self.column
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Derive the salted, iterated digest of a password
pub fn derive_hash(password: &str, salt: &[u8], iterations: u32) -> [u8; DIGEST_LEN] {
    let mut digest: [u8; DIGEST_LEN] = Sha256::new()
        .chain_update(salt)
        .chain_update(password.as_bytes())
        .finalize()
        .into();
    for _ in 1..iterations {
        digest = Sha256::new()
            .chain_update(salt)
            .chain_update(digest)
            .finalize()
            .into();
    }
    digest
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ============================================================================
// Credential
// ============================================================================

/// Persisted shape of a credential
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredCredential {
    username: String,
    role: Role,
    salt: String,
    hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    hash_len: Option<usize>,
    iterations: u32,
}

/// An account's verified identity. Immutable once constructed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredCredential", into = "StoredCredential")]
pub struct Credential {
    username: String,
    role: Role,
    salt: [u8; SALT_LEN],
    hash: PaddedHash,
    iterations: u32,
}

impl Credential {
    /// Build a credential for a new account with a fresh random salt
    pub fn register(
        role: Role,
        username: impl Into<String>,
        password: &str,
        security: &SecurityConfig,
    ) -> Result<Self> {
        let username = username.into();
        if username.trim().is_empty() {
            return Err(Error::InvalidInput("username must not be empty".into()));
        }
        if password.chars().count() < security.min_password_length {
            return Err(Error::WeakPassword(format!(
                "must be at least {} characters",
                security.min_password_length
            )));
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let iterations = security.hash_iterations.max(1);
        let hash = PaddedHash::from_digest(&derive_hash(password, &salt, iterations))?;

        Ok(Self {
            username,
            role,
            salt,
            hash,
            iterations,
        })
    }

    /// Rebuild a credential from its stored parts
    pub fn from_stored(
        username: impl Into<String>,
        role: Role,
        salt: &[u8],
        hash_column: &[u8],
        hash_len: Option<usize>,
        iterations: u32,
    ) -> Result<Self> {
        let salt: [u8; SALT_LEN] = salt.try_into().map_err(|_| {
            Error::InvalidInput(format!("salt must be {} bytes, got {}", SALT_LEN, salt.len()))
        })?;
        Ok(Self {
            username: username.into(),
            role,
            salt,
            hash: PaddedHash::from_column(hash_column, hash_len)?,
            iterations: iterations.max(1),
        })
    }

    /// Recompute the digest from `password` and compare it with the stored one
    pub fn verify(&self, password: &str) -> bool {
        let candidate = derive_hash(password, &self.salt, self.iterations);
        constant_time_eq(&candidate, self.hash.digest())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn hash(&self) -> &PaddedHash {
        &self.hash
    }

    /// Fail unless this account has the given role
    pub fn require(&self, role: Role) -> Result<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(Error::RoleRequired(role))
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

impl TryFrom<StoredCredential> for Credential {
    type Error = Error;

    fn try_from(stored: StoredCredential) -> Result<Self> {
        let salt = hex::decode(&stored.salt)
            .map_err(|e| Error::InvalidInput(format!("salt for {}: {}", stored.username, e)))?;
        let column = hex::decode(&stored.hash)
            .map_err(|e| Error::InvalidInput(format!("hash for {}: {}", stored.username, e)))?;
        Credential::from_stored(
            stored.username,
            stored.role,
            &salt,
            &column,
            stored.hash_len,
            stored.iterations,
        )
    }
}

impl From<Credential> for StoredCredential {
    fn from(credential: Credential) -> Self {
        StoredCredential {
            hash: hex::encode(credential.hash.column()),
            hash_len: Some(credential.hash.len()),
            salt: hex::encode(credential.salt),
            username: credential.username,
            role: credential.role,
            iterations: credential.iterations,
        }
    }
}

// ============================================================================
// Identity store
// ============================================================================

/// All registered accounts, keyed by username
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Accounts {
    credentials: BTreeMap<String, Credential>,
}

impl Accounts {
    /// Register a new account. Usernames are unique across roles.
    pub fn register(
        &mut self,
        role: Role,
        username: &str,
        password: &str,
        security: &SecurityConfig,
    ) -> Result<Credential> {
        if self.credentials.contains_key(username) {
            return Err(Error::DuplicateUsername(username.to_string()));
        }
        let credential = Credential::register(role, username, password, security)?;
        self.credentials
            .insert(credential.username().to_string(), credential.clone());
        tracing::info!("Registered {} account {}", role, username);
        Ok(credential)
    }

    /// Verify a username/password pair.
    ///
    /// Unknown usernames and wrong passwords are indistinguishable to the
    /// caller, including in the work performed before failing.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<Credential> {
        match self.credentials.get(username) {
            Some(credential) if credential.verify(password) => {
                tracing::debug!("Authenticated {}", username);
                Ok(credential.clone())
            }
            Some(_) => {
                tracing::debug!("Authentication failed");
                Err(Error::InvalidCredentials)
            }
            None => {
                let _ = derive_hash(password, &[0u8; SALT_LEN], self.typical_iterations());
                tracing::debug!("Authentication failed");
                Err(Error::InvalidCredentials)
            }
        }
    }

    pub fn get(&self, username: &str) -> Option<&Credential> {
        self.credentials.get(username)
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    fn typical_iterations(&self) -> u32 {
        self.credentials
            .values()
            .next()
            .map_or(1, |c| c.iterations)
    }
}
