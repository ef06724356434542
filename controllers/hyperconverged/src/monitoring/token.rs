//! Bearer token of the metrics endpoint
//!
//! The token is an HS256 JWT without claims. It is signed with the service
//! account token of the pod, so it changes whenever that token is rotated.
//! Outside a pod a random key is generated once and kept in memory.

use crate::error::ControllerError;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
#[cfg(test)]
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct NoClaims {}

#[derive(Debug)]
pub struct BearerToken {
    key_path: PathBuf,
    in_memory_key: OnceLock<Vec<u8>>,
}

impl BearerToken {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            in_memory_key: OnceLock::new(),
        }
    }

    fn signing_key(&self) -> Vec<u8> {
        if let Some(key) = self.in_memory_key.get() {
            return key.clone();
        }
        match std::fs::read(&self.key_path) {
            Ok(key) => key,
            Err(e) => {
                debug!("Can't read {}: {}; using an in-memory key", self.key_path.display(), e);
                self.in_memory_key
                    .get_or_init(|| rand::random::<[u8; 32]>().to_vec())
                    .clone()
            }
        }
    }

    /// Sign a fresh token
    pub fn create(&self) -> Result<String, ControllerError> {
        let key = EncodingKey::from_secret(&self.signing_key());
        Ok(encode(&Header::new(Algorithm::HS256), &NoClaims {}, &key)?)
    }

    /// Whether `token` was signed with the current key
    #[cfg(test)]
    pub fn validate(&self, token: &str) -> bool {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        decode::<NoClaims>(token, &DecodingKey::from_secret(&self.signing_key()), &validation).is_ok()
    }
}
