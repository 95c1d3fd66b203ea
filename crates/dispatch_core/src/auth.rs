//! Authentication seam: opaque bearer tokens resolved to subjects.
//!
//! Token issuance and JWT verification live outside this crate; the engine
//! only sees `authenticate(token) → subject`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Rider,
    Driver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub role: Role,
}

impl Subject {
    pub fn rider(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Rider,
        }
    }

    pub fn driver(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: Role::Driver,
        }
    }
}

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Subject>;
}

/// Token→subject registry. Used by tests and single-process deployments;
/// production wires a verifier for its own token format here.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, Subject>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: impl Into<String>, subject: Subject) {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.insert(token.into(), subject);
    }

    pub fn revoke(&self, token: &str) {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        tokens.remove(token);
    }
}

impl Authenticator for TokenRegistry {
    fn authenticate(&self, token: &str) -> Result<Subject> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        tokens
            .get(token)
            .cloned()
            .ok_or_else(|| DispatchError::Unauthorized("invalid or expired token".into()))
    }
}
