//! Runtime configuration for the Clavum core.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClavumError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage backend connection string. The core is agnostic to what
    /// lives behind it (spec.md §6's "Persisted state layout"); this is
    /// only ever read by whatever binds the storage traits to a real
    /// backend.
    pub storage_url: String,

    /// Storage backend / database name.
    pub storage_name: String,

    pub auth_gate: AuthGateConfig,
    pub approval: ApprovalConfig,
    pub nonce: NonceConfig,
    pub tenant_cache: TenantCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthGateConfig {
    /// Request signature freshness window (spec.md §4.3's `max_age_ms`).
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Default approval timeout when a retrieval request omits one
    /// (spec.md §4.5).
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceConfig {
    /// Multiplier applied to `auth_gate.max_age` to get a nonce record's
    /// `expires_at`. Spec.md §9 leaves the exact factor as "a policy
    /// knob, not a correctness requirement"; see DESIGN.md.
    pub ttl_factor: i64,

    /// Reclaim expired nonce rows on every Nth insert (spec.md §5's
    /// "Nonce GC"; 50 is the spec's suggested default).
    pub gc_stride: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantCacheConfig {
    /// Bounded TTL for the per-tenant private-key cache (spec.md §5's
    /// "Shared resources": read-many, write-never post-provisioning,
    /// SHOULD be cached with zeroization on eviction).
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_url: "memory://".to_string(),
            storage_name: "clavum".to_string(),
            auth_gate: AuthGateConfig::default(),
            approval: ApprovalConfig::default(),
            nonce: NonceConfig::default(),
            tenant_cache: TenantCacheConfig::default(),
        }
    }
}

impl Default for AuthGateConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_millis(60_000),
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(300_000),
        }
    }
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            ttl_factor: 2,
            gc_stride: 50,
        }
    }
}

impl Default for TenantCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            storage_url: std::env::var("CLAVUM_STORAGE_URL")
                .unwrap_or_else(|_| "memory://".to_string()),
            storage_name: std::env::var("CLAVUM_STORAGE_NAME")
                .unwrap_or_else(|_| "clavum".to_string()),
            ..Default::default()
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth_gate.max_age.is_zero() {
            return Err(ClavumError::BadRequest(
                "auth_gate.max_age must be positive".to_string(),
            ));
        }

        if self.nonce.ttl_factor < 1 {
            return Err(ClavumError::BadRequest(
                "nonce.ttl_factor must be at least 1".to_string(),
            ));
        }

        if self.nonce.gc_stride == 0 {
            return Err(ClavumError::BadRequest(
                "nonce.gc_stride must be positive".to_string(),
            ));
        }

        if self.approval.default_timeout.is_zero() {
            return Err(ClavumError::BadRequest(
                "approval.default_timeout must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
