use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{self, SaltString},
};
use rand_core::OsRng;

use crate::{DbError, Result};

/// Argon2id work factor. `cost` is the iteration count; memory and
/// parallelism stay at argon2's defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordConfig {
    pub cost: u32,
}

impl PasswordConfig {
    pub const DEFAULT_COST: u32 = Params::DEFAULT_T_COST;

    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    /// Fails when argon2 rejects the parameters, e.g. a zero cost.
    pub fn validate(&self) -> Result<()> {
        self.hasher().map(|_| ())
    }

    fn hasher(&self) -> Result<Argon2<'static>> {
        let params = Params::new(Params::DEFAULT_M_COST, self.cost, Params::DEFAULT_P_COST, None)
            .map_err(|e| DbError::Hash(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_COST)
    }
}

/// Hash a plaintext password into a PHC-format digest with a fresh salt.
pub fn hash_password(plaintext: &str, config: &PasswordConfig) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let digest = config
        .hasher()?
        .hash_password(plaintext.as_bytes(), &salt)
        .map_err(|e| DbError::Hash(e.to_string()))?
        .to_string();
    Ok(digest)
}

/// Constant-time check of `plaintext` against a stored digest. The digest
/// carries its own parameters, so a cost change never invalidates old hashes.
pub fn verify_password(plaintext: &str, digest: &str) -> Result<bool> {
    let parsed = PasswordHash::new(digest).map_err(|e| DbError::Hash(e.to_string()))?;

    match Argon2::default().verify_password(plaintext.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(DbError::Hash(e.to_string())),
    }
}
