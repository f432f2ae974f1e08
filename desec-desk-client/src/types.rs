//! Wire types for the deSEC REST API.
//!
//! Field names follow the JSON the service produces; every struct tolerates
//! missing optional fields so older cache files keep deserializing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A delegated DNS zone as returned by `GET /domains/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Fully-qualified domain name; unique per account.
    pub name: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    /// Timestamp of the last publication; `None` until first published.
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub touched: Option<DateTime<Utc>>,
    #[serde(default)]
    pub minimum_ttl: Option<u32>,
    /// DNSSEC key material; only present on `GET /domains/{name}/`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<DnssecKey>,
}

/// One DNSSEC key of a zone, with its delegation records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DnssecKey {
    /// DNSKEY presentation format: `flags protocol algorithm public-key`.
    pub dnskey: String,
    /// DS records, one per digest type.
    #[serde(default)]
    pub ds: Vec<String>,
    #[serde(default)]
    pub flags: u16,
    #[serde(default)]
    pub keytype: String,
    #[serde(default)]
    pub managed: bool,
}

/// A resource record set: the unit of record create/update/delete.
///
/// Natural key within a zone is `(subname, type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rrset {
    /// Left-hand label relative to the zone apex; empty string for the apex.
    #[serde(default)]
    pub subname: String,
    #[serde(rename = "type")]
    pub rtype: String,
    pub ttl: u32,
    /// Raw record values, one formatted string each.
    pub records: Vec<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub touched: Option<DateTime<Utc>>,
}

impl Rrset {
    /// The `(subname, type)` key this RRset occupies within its zone.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.subname.clone(), self.rtype.clone())
    }
}

/// Partial RRset update for `PATCH`; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RrsetPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<String>>,
}

/// One entry of a bulk `PUT /domains/{name}/rrsets/` payload.
///
/// An entry with empty `records` deletes the RRset at that key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkRrset {
    #[serde(default)]
    pub subname: String,
    #[serde(rename = "type")]
    pub rtype: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    pub records: Vec<String>,
}

/// Account quota information from `GET /auth/account/`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub email: Option<String>,
    /// Maximum number of zones the account may hold; `None` means unlimited.
    #[serde(default)]
    pub limit_domains: Option<u32>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
}

/// A long-lived API token.
///
/// `token` holds the secret and is populated by the server exactly once, in
/// the `POST /auth/tokens/` response. It must never be persisted or logged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_valid: Option<bool>,
    #[serde(default)]
    pub perm_create_domain: bool,
    #[serde(default)]
    pub perm_delete_domain: bool,
    #[serde(default)]
    pub perm_manage_tokens: bool,
    #[serde(default)]
    pub auto_policy: bool,
    /// Maximum token age as a duration string (e.g. `"30 00:00:00"`).
    #[serde(default)]
    pub max_age: Option<String>,
    #[serde(default)]
    pub max_unused_period: Option<String>,
    /// CIDRs the token may be used from.
    #[serde(default)]
    pub allowed_subnets: Vec<String>,
    /// The one-time secret; only present in the creation response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Attributes for `POST /auth/tokens/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenCreate {
    pub name: String,
    #[serde(default)]
    pub perm_create_domain: bool,
    #[serde(default)]
    pub perm_delete_domain: bool,
    #[serde(default)]
    pub perm_manage_tokens: bool,
    #[serde(default)]
    pub auto_policy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_unused_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_subnets: Option<Vec<String>>,
}

/// Partial token update for `PATCH /auth/tokens/{id}/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perm_create_domain: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perm_delete_domain: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perm_manage_tokens: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_policy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_unused_period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_subnets: Option<Vec<String>>,
}

/// Fine-grained RRset ACL row scoping a token's write access.
///
/// `domain`, `subname` and `rtype` are wildcards when `None`; the all-`None`
/// row is the token's catch-all policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPolicy {
    pub id: String,
    pub domain: Option<String>,
    pub subname: Option<String>,
    #[serde(rename = "type")]
    pub rtype: Option<String>,
    #[serde(default)]
    pub perm_write: bool,
}

/// Attributes for creating a token policy.
///
/// The wildcard fields are serialized explicitly as `null`; the server
/// distinguishes "null" (wildcard) from "absent".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenPolicyWrite {
    pub domain: Option<String>,
    pub subname: Option<String>,
    #[serde(rename = "type")]
    pub rtype: Option<String>,
    pub perm_write: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_deserializes_minimal_payload() {
        let zone: Zone = serde_json::from_str(r#"{"name": "example.com"}"#).unwrap();
        assert_eq!(zone.name, "example.com");
        assert!(zone.keys.is_empty());
        assert!(zone.published.is_none());
    }

    #[test]
    fn rrset_apex_defaults_to_empty_subname() {
        let rrset: Rrset =
            serde_json::from_str(r#"{"type": "A", "ttl": 3600, "records": ["1.2.3.4"]}"#).unwrap();
        assert_eq!(rrset.subname, "");
        assert_eq!(rrset.key(), (String::new(), "A".to_string()));
    }

    #[test]
    fn rrset_type_field_renamed() {
        let rrset = Rrset {
            subname: "www".into(),
            rtype: "A".into(),
            ttl: 3600,
            records: vec!["1.2.3.4".into()],
            created: None,
            touched: None,
        };
        let json = serde_json::to_value(&rrset).unwrap();
        assert_eq!(json["type"], "A");
        assert!(json.get("rtype").is_none());
    }

    #[test]
    fn token_patch_skips_absent_fields() {
        let patch = TokenPatch {
            name: Some("ci".into()),
            ..TokenPatch::default()
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"name":"ci"}"#);
    }

    #[test]
    fn policy_write_serializes_explicit_nulls() {
        let policy = TokenPolicyWrite {
            domain: None,
            subname: None,
            rtype: None,
            perm_write: true,
        };
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(
            json,
            r#"{"domain":null,"subname":null,"type":null,"perm_write":true}"#
        );
    }

    #[test]
    fn token_secret_not_serialized_when_absent() {
        let token: Token = serde_json::from_str(r#"{"id": "t1"}"#).unwrap();
        let json = serde_json::to_string(&token).unwrap();
        assert!(!json.contains("\"token\""));
    }
}
