//! Core types for the inventory pipeline

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Accounts
// ============================================================================

/// Access key for a storage account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKey {
    pub name: String,
    pub value: String,
}

/// A storage account produced by the account source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account name (unique within the crawl)
    pub name: String,
    /// Full resource id, e.g.
    /// `/subscriptions/{sub}/resourceGroups/{rg}/providers/Microsoft.Storage/storageAccounts/{name}`
    pub id: String,
    /// Access keys; empty until resolved
    #[serde(default)]
    pub keys: Vec<AccountKey>,
}

impl Account {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
            keys: Vec::new(),
        }
    }

    /// Resource group segment embedded in the resource id, if present.
    pub fn resource_group(&self) -> Option<&str> {
        let mut segments = self.id.split('/');
        while let Some(segment) = segments.next() {
            if segment.eq_ignore_ascii_case("resourceGroups") {
                return segments.next().filter(|rg| !rg.is_empty());
            }
        }
        None
    }

    /// First usable key. The crawl always authenticates with it.
    pub fn primary_key(&self) -> Option<&AccountKey> {
        self.keys.first()
    }
}

// ============================================================================
// Containers and objects
// ============================================================================

/// A container within an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    /// Name of the owning account
    pub account: String,
}

impl Container {
    pub fn new(account: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            account: account.into(),
        }
    }

    /// Progress key for this container: `{account}/{container}`
    pub fn unit_key(&self) -> String {
        format!("{}/{}", self.account, self.name)
    }
}

/// Object metadata as reported by a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub name: String,
    pub resource_type: Option<String>,
    pub created_on: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub content_length: u64,
    /// Raw MD5 digest bytes
    pub content_md5: Option<Vec<u8>>,
    pub access_tier: Option<String>,
}

/// One manifest row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub name: String,
    pub account: String,
    pub container: String,
    pub resource_type: Option<String>,
    pub created_on: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub content_length: u64,
    /// Base64 of the MD5 digest
    pub content_md5: Option<String>,
    pub access_tier: Option<String>,
}

impl ObjectRecord {
    pub fn from_raw(container: &Container, raw: RawObject) -> Self {
        Self {
            name: raw.name,
            account: container.account.clone(),
            container: container.name.clone(),
            resource_type: raw.resource_type,
            created_on: raw.created_on,
            last_modified: raw.last_modified,
            content_length: raw.content_length,
            content_md5: raw.content_md5.map(|digest| BASE64.encode(digest)),
            access_tier: raw.access_tier,
        }
    }

    /// Fields in manifest column order. Nulls become empty fields.
    pub fn to_row(&self) -> [String; 9] {
        [
            self.name.clone(),
            self.account.clone(),
            self.container.clone(),
            self.resource_type.clone().unwrap_or_default(),
            format_timestamp(&self.created_on),
            format_timestamp(&self.last_modified),
            self.content_length.to_string(),
            self.content_md5.clone().unwrap_or_default(),
            self.access_tier.clone().unwrap_or_default(),
        ]
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-01-02T03:04:05.000Z`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================================================
// Paging
// ============================================================================

/// One page of a listing.
///
/// `continuation` is `None` on the last page; that is the only end-of-listing
/// signal. Errors are reported separately and never look like an empty page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continuation: Option<String>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            continuation: None,
        }
    }

    pub fn is_last(&self) -> bool {
        self.continuation.is_none()
    }
}
