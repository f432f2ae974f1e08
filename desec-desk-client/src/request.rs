//! Request and outcome model.
//!
//! A queue item carries an [`ApiRequest`]: plain data, not a closure, so
//! pending work and history are both inspectable and serializable. The
//! constructors below are the single source of endpoint paths.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ApiError, RateLimit};
use crate::types::{BulkRrset, RrsetPatch, TokenCreate, TokenPatch, TokenPolicyWrite};

/// HTTP method of an [`ApiRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One REST call: method, path relative to the API base URL, optional body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Builds the path segment for an RRset, encoding the apex as `@`.
fn rrset_path(zone: &str, subname: &str, rtype: &str) -> String {
    let sub = if subname.is_empty() || subname == "@" {
        "@"
    } else {
        subname
    };
    format!("/domains/{zone}/rrsets/{sub}/{rtype}/")
}

impl ApiRequest {
    fn new(method: HttpMethod, path: String, body: Option<Value>) -> Self {
        Self { method, path, body }
    }

    // ===== Zones =====

    #[must_use]
    pub fn list_zones() -> Self {
        Self::new(HttpMethod::Get, "/domains/".to_string(), None)
    }

    #[must_use]
    pub fn create_zone(name: &str) -> Self {
        Self::new(
            HttpMethod::Post,
            "/domains/".to_string(),
            Some(json!({ "name": name })),
        )
    }

    /// Fetches a single zone including its DNSSEC key material.
    #[must_use]
    pub fn get_zone(name: &str) -> Self {
        Self::new(HttpMethod::Get, format!("/domains/{name}/"), None)
    }

    #[must_use]
    pub fn delete_zone(name: &str) -> Self {
        Self::new(HttpMethod::Delete, format!("/domains/{name}/"), None)
    }

    // ===== RRsets =====

    #[must_use]
    pub fn list_rrsets(zone: &str) -> Self {
        Self::new(HttpMethod::Get, format!("/domains/{zone}/rrsets/"), None)
    }

    #[must_use]
    pub fn create_rrset(zone: &str, subname: &str, rtype: &str, ttl: u32, records: &[String]) -> Self {
        Self::new(
            HttpMethod::Post,
            format!("/domains/{zone}/rrsets/"),
            Some(json!({
                "subname": subname,
                "type": rtype,
                "ttl": ttl,
                "records": records,
            })),
        )
    }

    #[must_use]
    pub fn update_rrset(zone: &str, subname: &str, rtype: &str, patch: &RrsetPatch) -> Self {
        let mut body = serde_json::Map::new();
        if let Some(ttl) = patch.ttl {
            body.insert("ttl".to_string(), json!(ttl));
        }
        if let Some(records) = &patch.records {
            body.insert("records".to_string(), json!(records));
        }
        Self::new(
            HttpMethod::Patch,
            rrset_path(zone, subname, rtype),
            Some(Value::Object(body)),
        )
    }

    #[must_use]
    pub fn delete_rrset(zone: &str, subname: &str, rtype: &str) -> Self {
        Self::new(HttpMethod::Delete, rrset_path(zone, subname, rtype), None)
    }

    /// Bulk replace: entries with empty `records` delete the RRset at that
    /// key, so one request can rewrite a whole zone.
    #[must_use]
    pub fn bulk_put_rrsets(zone: &str, rrsets: &[BulkRrset]) -> Self {
        let body = Value::Array(
            rrsets
                .iter()
                .map(|r| {
                    let mut entry = serde_json::Map::new();
                    entry.insert("subname".to_string(), json!(r.subname));
                    entry.insert("type".to_string(), json!(r.rtype));
                    if let Some(ttl) = r.ttl {
                        entry.insert("ttl".to_string(), json!(ttl));
                    }
                    entry.insert("records".to_string(), json!(r.records));
                    Value::Object(entry)
                })
                .collect(),
        );
        Self::new(
            HttpMethod::Put,
            format!("/domains/{zone}/rrsets/"),
            Some(body),
        )
    }

    // ===== Account =====

    #[must_use]
    pub fn get_account() -> Self {
        Self::new(HttpMethod::Get, "/auth/account/".to_string(), None)
    }

    // ===== Tokens =====

    #[must_use]
    pub fn list_tokens() -> Self {
        Self::new(HttpMethod::Get, "/auth/tokens/".to_string(), None)
    }

    /// Creates a token. The response carries the secret exactly once.
    #[must_use]
    pub fn create_token(attrs: &TokenCreate) -> Self {
        Self::new(
            HttpMethod::Post,
            "/auth/tokens/".to_string(),
            Some(serde_json::to_value(attrs).unwrap_or(Value::Null)),
        )
    }

    #[must_use]
    pub fn get_token(id: &str) -> Self {
        Self::new(HttpMethod::Get, format!("/auth/tokens/{id}/"), None)
    }

    #[must_use]
    pub fn update_token(id: &str, patch: &TokenPatch) -> Self {
        Self::new(
            HttpMethod::Patch,
            format!("/auth/tokens/{id}/"),
            Some(serde_json::to_value(patch).unwrap_or(Value::Null)),
        )
    }

    #[must_use]
    pub fn delete_token(id: &str) -> Self {
        Self::new(HttpMethod::Delete, format!("/auth/tokens/{id}/"), None)
    }

    // ===== Token policies =====

    #[must_use]
    pub fn list_policies(token_id: &str) -> Self {
        Self::new(
            HttpMethod::Get,
            format!("/auth/tokens/{token_id}/policies/rrsets/"),
            None,
        )
    }

    #[must_use]
    pub fn create_policy(token_id: &str, attrs: &TokenPolicyWrite) -> Self {
        Self::new(
            HttpMethod::Post,
            format!("/auth/tokens/{token_id}/policies/rrsets/"),
            Some(serde_json::to_value(attrs).unwrap_or(Value::Null)),
        )
    }

    #[must_use]
    pub fn update_policy(token_id: &str, policy_id: &str, perm_write: bool) -> Self {
        Self::new(
            HttpMethod::Patch,
            format!("/auth/tokens/{token_id}/policies/rrsets/{policy_id}/"),
            Some(json!({ "perm_write": perm_write })),
        )
    }

    #[must_use]
    pub fn delete_policy(token_id: &str, policy_id: &str) -> Self {
        Self::new(
            HttpMethod::Delete,
            format!("/auth/tokens/{token_id}/policies/rrsets/{policy_id}/"),
            None,
        )
    }

    // ===== Connectivity =====

    /// Lightweight request used as a connectivity and token-validity probe.
    #[must_use]
    pub fn connectivity_check() -> Self {
        Self::list_zones()
    }
}

impl std::fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Classified result of executing an [`ApiRequest`].
///
/// `RateLimited` is a first-class outcome rather than an error: the queue
/// uses it to drive retry and cooldown, and it is never surfaced as a
/// failure by itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiOutcome {
    /// 2xx response with the parsed body, if any.
    Success { status: u16, body: Option<Value> },
    /// 429 response.
    RateLimited(RateLimit),
    /// Everything else.
    Failed(ApiError),
}

impl ApiOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Decodes the success body into `T`.
    ///
    /// # Errors
    /// `ParseError` when the body is absent or does not match `T`; the
    /// original `ApiError` when the outcome failed; a synthetic
    /// `ClientError` for a rate-limited outcome (callers are expected to
    /// have handled that case already).
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, ApiError> {
        match self {
            Self::Success { body: Some(body), .. } => {
                serde_json::from_value(body.clone()).map_err(|e| ApiError::ParseError {
                    detail: e.to_string(),
                })
            }
            Self::Success { body: None, .. } => Err(ApiError::ParseError {
                detail: "empty response body".to_string(),
            }),
            Self::RateLimited(rl) => Err(ApiError::ClientError {
                status: 429,
                message: rl.message.clone(),
                raw: rl.raw.clone(),
            }),
            Self::Failed(e) => Err(e.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rrset_path_encodes_apex() {
        assert_eq!(
            rrset_path("example.com", "", "A"),
            "/domains/example.com/rrsets/@/A/"
        );
        assert_eq!(
            rrset_path("example.com", "@", "MX"),
            "/domains/example.com/rrsets/@/MX/"
        );
        assert_eq!(
            rrset_path("example.com", "www", "A"),
            "/domains/example.com/rrsets/www/A/"
        );
    }

    #[test]
    fn create_rrset_body() {
        let req = ApiRequest::create_rrset(
            "example.com",
            "www",
            "A",
            3600,
            &["1.2.3.4".to_string()],
        );
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.path, "/domains/example.com/rrsets/");
        let body = req.body.unwrap();
        assert_eq!(body["subname"], "www");
        assert_eq!(body["type"], "A");
        assert_eq!(body["ttl"], 3600);
        assert_eq!(body["records"][0], "1.2.3.4");
    }

    #[test]
    fn update_rrset_patch_only_includes_set_fields() {
        let patch = RrsetPatch {
            ttl: Some(7200),
            records: None,
        };
        let req = ApiRequest::update_rrset("example.com", "www", "A", &patch);
        assert_eq!(req.method, HttpMethod::Patch);
        let body = req.body.unwrap();
        assert_eq!(body["ttl"], 7200);
        assert!(body.get("records").is_none());
    }

    #[test]
    fn bulk_put_includes_tombstones() {
        let rrsets = vec![
            BulkRrset {
                subname: "www".into(),
                rtype: "A".into(),
                ttl: Some(3600),
                records: vec!["1.2.3.4".into()],
            },
            BulkRrset {
                subname: "old".into(),
                rtype: "TXT".into(),
                ttl: None,
                records: vec![],
            },
        ];
        let req = ApiRequest::bulk_put_rrsets("example.com", &rrsets);
        assert_eq!(req.method, HttpMethod::Put);
        let body = req.body.unwrap();
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["records"].as_array().unwrap().len(), 0);
        assert!(entries[1].get("ttl").is_none());
    }

    #[test]
    fn token_policy_paths() {
        let req = ApiRequest::list_policies("tok-1");
        assert_eq!(req.path, "/auth/tokens/tok-1/policies/rrsets/");
        let req = ApiRequest::delete_policy("tok-1", "pol-2");
        assert_eq!(req.path, "/auth/tokens/tok-1/policies/rrsets/pol-2/");
        assert_eq!(req.method, HttpMethod::Delete);
    }

    #[test]
    fn decode_success_body() {
        let outcome = ApiOutcome::Success {
            status: 200,
            body: Some(serde_json::json!([{"name": "example.com"}])),
        };
        let zones: Vec<crate::types::Zone> = outcome.decode().unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].name, "example.com");
    }

    #[test]
    fn decode_failed_outcome_returns_original_error() {
        let outcome = ApiOutcome::Failed(ApiError::Unauthenticated);
        let err = outcome.decode::<Vec<crate::types::Zone>>().unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated));
    }
}
