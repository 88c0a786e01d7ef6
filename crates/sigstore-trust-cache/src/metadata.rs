//! Role documents as they are stored in the cache's `metadata/` directory
//!
//! Only the fields the cache needs are modelled. Signatures are ignored here:
//! documents reach the cache only after the metadata client verified them.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pattern::PathPattern;
use crate::{Error, Result};

/// The `{"signed": ..., "signatures": [...]}` envelope of a role document
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Signed<T> {
    /// The signed role body
    pub signed: T,
}

/// Timestamp role body
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimestampRole {
    /// Role version
    pub version: u64,
    /// Instant after which the timestamp is stale
    pub expires: DateTime<Utc>,
}

impl TimestampRole {
    /// Whether the timestamp has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

/// Targets role body (top-level or delegated)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetsRole {
    /// Role version
    pub version: u64,
    /// Expiry of this role document
    pub expires: DateTime<Utc>,
    /// Target listing keyed by target identifier
    #[serde(default)]
    pub targets: BTreeMap<String, TargetDescription>,
    /// Delegations to further targets roles
    #[serde(default)]
    pub delegations: Option<Delegations>,
}

impl TargetsRole {
    /// Delegated roles in declaration order
    pub fn delegated_roles(&self) -> &[DelegatedRole] {
        self.delegations
            .as_ref()
            .map(|d| d.roles.as_slice())
            .unwrap_or(&[])
    }
}

/// A single entry of a targets listing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetDescription {
    /// Content length in bytes
    pub length: u64,
    /// Content digests
    pub hashes: Hashes,
    /// Application-specific metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<serde_json::Value>,
}

/// Content digests of a target
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Hashes {
    /// Hex-encoded SHA-256 digest
    pub sha256: String,
}

/// Delegation block of a targets role
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Delegations {
    /// Delegated roles, in precedence order
    #[serde(default)]
    pub roles: Vec<DelegatedRole>,
}

/// A delegation entry naming a further targets role
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DelegatedRole {
    /// Name of the delegated role (its document is `<name>.json`)
    pub name: String,
    /// Path patterns the delegated role is trusted for
    #[serde(default)]
    pub paths: Vec<PathPattern>,
    /// Whether lookup stops at this delegation
    #[serde(default)]
    pub terminating: bool,
}

/// Usage category of a target, carried in its custom metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Usage {
    /// Certificate authority issuing signing certificates (Fulcio)
    SigningCa,
    /// Transparency log key (Rekor)
    TransparencyLog,
    /// Certificate transparency log key (CTFE)
    CtLog,
    /// Operator-supplied key material
    CustomKeyMaterial,
    /// Anything the cache does not recognise
    Unknown(String),
}

impl Usage {
    /// All recognised usage categories
    pub const RECOGNIZED: [Usage; 4] = [
        Usage::SigningCa,
        Usage::TransparencyLog,
        Usage::CtLog,
        Usage::CustomKeyMaterial,
    ];

    /// Parse a usage string, accepting the canonical names and the names used
    /// in deployed Sigstore metadata (`Fulcio`, `Rekor`, `CTFE`)
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "signing-ca" | "fulcio" => Usage::SigningCa,
            "transparency-log" | "rekor" => Usage::TransparencyLog,
            "ct-log" | "ct_log" | "ctfe" => Usage::CtLog,
            "custom-key-material" | "custom_key_material" => Usage::CustomKeyMaterial,
            _ => Usage::Unknown(raw.to_string()),
        }
    }

    /// Canonical name, also the first segment of the usage's delegation path
    pub fn as_str(&self) -> &str {
        match self {
            Usage::SigningCa => "signing-ca",
            Usage::TransparencyLog => "transparency-log",
            Usage::CtLog => "ct-log",
            Usage::CustomKeyMaterial => "custom-key-material",
            Usage::Unknown(raw) => raw,
        }
    }

    /// Whether this is one of [`Usage::RECOGNIZED`]
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Usage::Unknown(_))
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatus {
    /// In use
    Active,
    /// Expired, revoked or otherwise not to be used for new operations
    Inactive,
}

impl TargetStatus {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("active") {
            TargetStatus::Active
        } else {
            TargetStatus::Inactive
        }
    }
}

/// Typed view of a target's `custom.sigstore` metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageMetadata {
    /// Usage category
    pub usage: Usage,
    /// Lifecycle status
    pub status: TargetStatus,
    /// Service URI the material belongs to
    pub uri: Option<String>,
    /// Numeric identifier (e.g. a log ID), kept as text
    pub id: Option<String>,
}

#[derive(Deserialize)]
struct RawUsageMetadata {
    usage: Option<String>,
    status: Option<String>,
    uri: Option<String>,
    id: Option<serde_json::Value>,
}

impl UsageMetadata {
    /// Extract usage metadata from a target's `custom` value
    ///
    /// Returns `None` when the value is absent or malformed; such targets are
    /// excluded from every usage.
    pub fn from_custom(custom: Option<&serde_json::Value>) -> Option<Self> {
        let sigstore = custom?.get("sigstore")?;
        let raw: RawUsageMetadata = serde_json::from_value(sigstore.clone()).ok()?;
        let id = match raw.id {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            Some(_) => return None,
            None => None,
        };
        Some(Self {
            usage: raw
                .usage
                .as_deref()
                .map(Usage::parse)
                .unwrap_or_else(|| Usage::Unknown(String::new())),
            status: raw
                .status
                .as_deref()
                .map(TargetStatus::parse)
                .unwrap_or(TargetStatus::Inactive),
            uri: raw.uri,
            id,
        })
    }
}

/// A verified target: identifier, expected content and usage metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    /// Path-like target identifier
    pub name: String,
    /// Expected content length
    pub length: u64,
    /// Expected lowercase hex SHA-256 digest
    pub sha256: String,
    /// Usage metadata, if present and well-formed
    pub usage: Option<UsageMetadata>,
}

impl TargetRecord {
    /// Build a record from a listing entry of `role`
    pub fn from_description(role: &str, name: &str, desc: &TargetDescription) -> Result<Self> {
        let digest = hex::decode(&desc.hashes.sha256).map_err(|e| Error::UntrustedMetadata {
            role: role.to_string(),
            reason: format!("target '{}' has malformed sha256: {}", name, e),
        })?;
        if digest.len() != 32 {
            return Err(Error::UntrustedMetadata {
                role: role.to_string(),
                reason: format!(
                    "target '{}' sha256 has {} bytes, expected 32",
                    name,
                    digest.len()
                ),
            });
        }
        Ok(Self {
            name: name.to_string(),
            length: desc.length,
            sha256: hex::encode(digest),
            usage: UsageMetadata::from_custom(desc.custom.as_ref()),
        })
    }

    /// Whether this target is active material for `usage`
    pub fn is_active_for(&self, usage: &Usage) -> bool {
        usage.is_recognized()
            && self
                .usage
                .as_ref()
                .is_some_and(|m| &m.usage == usage && m.status == TargetStatus::Active)
    }
}
