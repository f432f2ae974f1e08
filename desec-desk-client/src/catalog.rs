//! Record-type catalogue and local validator.
//!
//! Metadata-driven: each supported type carries a format hint, a canonical
//! example, a tooltip, an optional authoritative regex, and a policy tag.
//! Validation runs before anything is enqueued, so malformed input never
//! reaches the network.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Lowest TTL accepted for standard accounts.
pub const TTL_MIN: u32 = 3600;
/// Highest TTL accepted for standard accounts.
pub const TTL_MAX: u32 = 86400;

/// All record types the catalogue knows about.
///
/// `CDS` appears here so the UI can explain why it is rejected; everything
/// else is writable. `RRSIG` and `NSEC3PARAM` are maintained by the server
/// and are not listed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Afsdb,
    Apl,
    Caa,
    Cdnskey,
    Cds,
    Cert,
    Cname,
    Dhcid,
    Dname,
    Dnskey,
    Dlv,
    Ds,
    Eui48,
    Eui64,
    Hinfo,
    Https,
    Kx,
    L32,
    L64,
    Loc,
    Lp,
    Mx,
    Naptr,
    Nid,
    Ns,
    Openpgpkey,
    Ptr,
    Rp,
    Smimea,
    Spf,
    Srv,
    Sshfp,
    Svcb,
    Tlsa,
    Txt,
    Uri,
}

/// Every catalogue entry, in canonical (alphabetical) order.
pub const ALL_TYPES: [RecordType; 38] = [
    RecordType::A,
    RecordType::Aaaa,
    RecordType::Afsdb,
    RecordType::Apl,
    RecordType::Caa,
    RecordType::Cdnskey,
    RecordType::Cds,
    RecordType::Cert,
    RecordType::Cname,
    RecordType::Dhcid,
    RecordType::Dname,
    RecordType::Dnskey,
    RecordType::Dlv,
    RecordType::Ds,
    RecordType::Eui48,
    RecordType::Eui64,
    RecordType::Hinfo,
    RecordType::Https,
    RecordType::Kx,
    RecordType::L32,
    RecordType::L64,
    RecordType::Loc,
    RecordType::Lp,
    RecordType::Mx,
    RecordType::Naptr,
    RecordType::Nid,
    RecordType::Ns,
    RecordType::Openpgpkey,
    RecordType::Ptr,
    RecordType::Rp,
    RecordType::Smimea,
    RecordType::Spf,
    RecordType::Srv,
    RecordType::Sshfp,
    RecordType::Svcb,
    RecordType::Tlsa,
    RecordType::Txt,
    RecordType::Uri,
];

impl RecordType {
    /// Canonical uppercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Afsdb => "AFSDB",
            Self::Apl => "APL",
            Self::Caa => "CAA",
            Self::Cdnskey => "CDNSKEY",
            Self::Cds => "CDS",
            Self::Cert => "CERT",
            Self::Cname => "CNAME",
            Self::Dhcid => "DHCID",
            Self::Dname => "DNAME",
            Self::Dnskey => "DNSKEY",
            Self::Dlv => "DLV",
            Self::Ds => "DS",
            Self::Eui48 => "EUI48",
            Self::Eui64 => "EUI64",
            Self::Hinfo => "HINFO",
            Self::Https => "HTTPS",
            Self::Kx => "KX",
            Self::L32 => "L32",
            Self::L64 => "L64",
            Self::Loc => "LOC",
            Self::Lp => "LP",
            Self::Mx => "MX",
            Self::Naptr => "NAPTR",
            Self::Nid => "NID",
            Self::Ns => "NS",
            Self::Openpgpkey => "OPENPGPKEY",
            Self::Ptr => "PTR",
            Self::Rp => "RP",
            Self::Smimea => "SMIMEA",
            Self::Spf => "SPF",
            Self::Srv => "SRV",
            Self::Sshfp => "SSHFP",
            Self::Svcb => "SVCB",
            Self::Tlsa => "TLSA",
            Self::Txt => "TXT",
            Self::Uri => "URI",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordType {
    type Err = UnknownRecordType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_TYPES
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| UnknownRecordType(s.to_string()))
    }
}

/// Error returned when parsing an unsupported record type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRecordType(pub String);

impl std::fmt::Display for UnknownRecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unsupported record type: {}", self.0)
    }
}

impl std::error::Error for UnknownRecordType {}

/// Policy tag attached to a catalogue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Freely writable.
    Ordinary,
    /// Maintained entirely by the server; the catalogue never lists these.
    DnssecManaged,
    /// Writable, but editing interferes with managed DNSSEC; warn first.
    DnssecWarn,
    /// Rejected locally; the server would answer 403.
    Forbidden,
}

/// Static metadata for one record type.
#[derive(Debug, Clone, Copy)]
pub struct RecordTypeInfo {
    /// Format hint shown next to the input field.
    pub format: &'static str,
    /// Canonical example value.
    pub example: &'static str,
    /// Longer guidance text.
    pub tooltip: &'static str,
    /// Authoritative validation regex, when one exists.
    pub pattern: Option<&'static str>,
    /// Whether the last whitespace-separated token is a hostname that must
    /// be fully qualified.
    pub hostname: bool,
    pub policy: RecordPolicy,
}

/// Returns the catalogue entry for `rtype`.
#[must_use]
pub fn info(rtype: RecordType) -> &'static RecordTypeInfo {
    match rtype {
        RecordType::A => &RecordTypeInfo {
            format: "IPv4 address",
            example: "192.0.2.1",
            tooltip: "Enter an IPv4 address (e.g., 192.0.2.1)",
            pattern: Some(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$"),
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Aaaa => &RecordTypeInfo {
            format: "IPv6 address",
            example: "2001:db8::1",
            tooltip: "Enter an IPv6 address (e.g., 2001:db8::1)",
            pattern: Some(r"^[0-9a-fA-F:]+$"),
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Afsdb => &RecordTypeInfo {
            format: "subtype hostname",
            example: "1 afsdb.example.com.",
            tooltip: "Enter subtype (1 or 2) and hostname with trailing dot",
            pattern: None,
            hostname: true,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Apl => &RecordTypeInfo {
            format: "address prefix list",
            example: "1:192.0.2.0/24",
            tooltip: "IPv4 prefixes start with 1:, IPv6 with 2:, ! negates",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Caa => &RecordTypeInfo {
            format: "flags tag \"value\"",
            example: "0 issue \"ca.example.com\"",
            tooltip: "Flags (0-255), tag (issue, issuewild, iodef), value in quotes",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Cdnskey => &RecordTypeInfo {
            format: "flags protocol algorithm key",
            example: "257 3 13 mdsswUyr3DPW132mOi8V9xESWE8jTo0dxCjjnopKl+GqJxpVXckHAeF+KkxLbxILfDLUT0rAK9iUzy1L53eKGQ==",
            tooltip: "Enter flags, protocol, algorithm, and base64 key data",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::DnssecWarn,
        },
        RecordType::Cds => &RecordTypeInfo {
            format: "key-tag algorithm digest-type digest",
            example: "12345 13 2 123456789abcdef67890123456789abcdef67890123456789abcdef123456789",
            tooltip: "CDS RRsets are derived from the zone's keys by the server",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Forbidden,
        },
        RecordType::Cert => &RecordTypeInfo {
            format: "type key-tag algorithm cert-data",
            example: "1 12345 1 MIICW...base64data...Q==",
            tooltip: "Enter type, key-tag, algorithm, and certificate data",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Cname => &RecordTypeInfo {
            format: "domain name with trailing dot",
            example: "example.com.",
            tooltip: "Enter canonical name (FQDN with trailing dot). Only one CNAME record allowed per name.",
            pattern: Some(r"^.+\.$"),
            hostname: true,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Dhcid => &RecordTypeInfo {
            format: "base64 encoded identifier",
            example: "AAIBY2/AuCccgoJbsaxcQc9TUapptP69lOjxfNuVAA2kjEA=",
            tooltip: "Enter base64 encoded DHCP client identifier",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Dname => &RecordTypeInfo {
            format: "domain name with trailing dot",
            example: "example.com.",
            tooltip: "Enter delegation name (FQDN with trailing dot)",
            pattern: Some(r"^.+\.$"),
            hostname: true,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Dnskey => &RecordTypeInfo {
            format: "flags protocol algorithm key-data",
            example: "257 3 13 mdsswUyr3DPW132mOi8V9xESWE8jTo0dxCjjnopKl+GqJxpVXckHAeF+KkxLbxILfDLUT0rAK9iUzy1L53eKGQ==",
            tooltip: "Enter flags, protocol, algorithm, and base64 key data",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::DnssecWarn,
        },
        RecordType::Dlv => &RecordTypeInfo {
            format: "key-tag algorithm digest-type digest",
            example: "12345 13 2 123456789abcdef67890123456789abcdef67890123456789abcdef123456789",
            tooltip: "Enter key-tag, algorithm, digest-type, and digest value (DLV is deprecated)",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Ds => &RecordTypeInfo {
            format: "key-tag algorithm digest-type digest",
            example: "12345 13 2 123456789abcdef67890123456789abcdef67890123456789abcdef123456789",
            tooltip: "Enter key-tag, algorithm, digest-type, and digest value",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::DnssecWarn,
        },
        RecordType::Eui48 => &RecordTypeInfo {
            format: "EUI-48 address with hyphens",
            example: "ab-cd-ef-01-23-45",
            tooltip: "Enter EUI-48/MAC address with hyphens (ab-cd-ef-01-23-45)",
            pattern: Some(r"^[0-9a-fA-F]{2}(-[0-9a-fA-F]{2}){5}$"),
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Eui64 => &RecordTypeInfo {
            format: "EUI-64 address with hyphens",
            example: "ab-cd-ef-01-23-45-67-89",
            tooltip: "Enter EUI-64 address with hyphens (ab-cd-ef-01-23-45-67-89)",
            pattern: Some(r"^[0-9a-fA-F]{2}(-[0-9a-fA-F]{2}){7}$"),
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Hinfo => &RecordTypeInfo {
            format: "\"cpu\" \"os\"",
            example: "\"Intel\" \"Windows\"",
            tooltip: "Enter CPU type and OS in quotes, separated by space",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Https => &RecordTypeInfo {
            format: "priority target [params]",
            example: "1 . alpn=\"h2,h3\"",
            tooltip: "Enter priority, target (. for origin), and optional params like alpn=\"h2,h3\"",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Kx => &RecordTypeInfo {
            format: "priority target",
            example: "10 kx.example.com.",
            tooltip: "Enter priority and key exchanger host with trailing dot",
            pattern: None,
            hostname: true,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::L32 => &RecordTypeInfo {
            format: "preference locator",
            example: "10 10.1.2.3",
            tooltip: "Enter preference (0-65535) and IPv4 address as locator",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::L64 => &RecordTypeInfo {
            format: "preference locator",
            example: "10 2001:db8:1:2",
            tooltip: "Enter preference (0-65535) and IPv6 address as locator",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Loc => &RecordTypeInfo {
            format: "coordinates",
            example: "51 30 12.748 N 0 7 39.611 W 0.00m 0.00m 0.00m 0.00m",
            tooltip: "Enter lat lon altitude and optional precision parameters",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Lp => &RecordTypeInfo {
            format: "preference FQDN",
            example: "10 example.com.",
            tooltip: "Enter preference and FQDN with trailing dot",
            pattern: None,
            hostname: true,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Mx => &RecordTypeInfo {
            format: "priority mail server with trailing dot",
            example: "10 mail.example.com.",
            tooltip: "Enter priority (0-65535) followed by mail server FQDN with trailing dot",
            pattern: None,
            hostname: true,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Naptr => &RecordTypeInfo {
            format: "order preference flags service regexp replacement",
            example: "100 10 \"u\" \"sip+E2U\" \"!^.*$!sip:info@example.com!\" .",
            tooltip: "Enter order, preference, flags, service, regexp, and replacement (quoted as needed)",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Nid => &RecordTypeInfo {
            format: "preference value",
            example: "10 0014:4fff:ff20:ee64",
            tooltip: "Enter preference and 64-bit node identifier value",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Ns => &RecordTypeInfo {
            format: "nameserver with trailing dot",
            example: "ns1.example.com.",
            tooltip: "Enter nameserver FQDN with trailing dot",
            pattern: Some(r"^.+\.$"),
            hostname: true,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Openpgpkey => &RecordTypeInfo {
            format: "base64 encoded key data",
            example: "mQENBFVHm5sBCAD...base64data....",
            tooltip: "Enter OpenPGP public key data in base64 format",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Ptr => &RecordTypeInfo {
            format: "target domain with trailing dot",
            example: "example.com.",
            tooltip: "Enter target domain name with trailing dot",
            pattern: Some(r"^.+\.$"),
            hostname: true,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Rp => &RecordTypeInfo {
            format: "mbox-dname txt-dname",
            example: "admin.example.com. text.example.com.",
            tooltip: "Enter mailbox domain name and text domain name, both with trailing dots",
            pattern: None,
            hostname: true,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Smimea => &RecordTypeInfo {
            format: "usage selector type certificate",
            example: "3 0 0 MIIC...base64data...Q==",
            tooltip: "Enter usage, selector, type, and certificate data",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Spf => &RecordTypeInfo {
            format: "SPF record in quotes",
            example: "\"v=spf1 mx a ip4:192.0.2.0/24 -all\"",
            tooltip: "Enter SPF policy in quotes (same format as TXT record)",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Srv => &RecordTypeInfo {
            format: "priority weight port target",
            example: "0 5 443 example.com.",
            tooltip: "Enter priority, weight, port, and target hostname with trailing dot",
            pattern: None,
            hostname: true,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Sshfp => &RecordTypeInfo {
            format: "algorithm type fingerprint",
            example: "2 1 123456789abcdef67890123456789abcdef67890",
            tooltip: "Enter algorithm (1=RSA, 2=DSA, 3=ECDSA, 4=ED25519), type (1=SHA-1, 2=SHA-256), and fingerprint",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Svcb => &RecordTypeInfo {
            format: "priority target [params]",
            example: "1 web.example.com. alpn=\"h2,h3\" port=443",
            tooltip: "Enter priority, target hostname, and optional service parameters",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Tlsa => &RecordTypeInfo {
            format: "usage selector type certificate",
            example: "3 0 1 123456789abcdef67890123456789abcdef67890123456789abcdef123456789",
            tooltip: "Enter usage (0-3), selector (0-1), type (0-2), and certificate data",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Txt => &RecordTypeInfo {
            format: "text in quotes",
            example: "\"This is a text record\"",
            tooltip: "Enter text record content in quotes (\"example\")",
            pattern: Some(r#"^".*"$"#),
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
        RecordType::Uri => &RecordTypeInfo {
            format: "priority weight target",
            example: "10 1 \"https://example.com/\"",
            tooltip: "Enter priority, weight, and URI target in quotes",
            pattern: None,
            hostname: false,
            policy: RecordPolicy::Ordinary,
        },
    }
}

/// Iterator over the writable types (everything except `Forbidden`).
pub fn writable_types() -> impl Iterator<Item = RecordType> {
    ALL_TYPES
        .into_iter()
        .filter(|t| info(*t).policy != RecordPolicy::Forbidden)
}

/// Compiled validation regexes, one per type that declares a pattern.
fn compiled_patterns() -> &'static HashMap<RecordType, Regex> {
    static PATTERNS: OnceLock<HashMap<RecordType, Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        ALL_TYPES
            .into_iter()
            .filter_map(|t| {
                info(t).pattern.map(|p| {
                    // Catalogue patterns are static and covered by tests.
                    #[allow(clippy::expect_used)]
                    let re = Regex::new(p).expect("static catalogue regex is valid");
                    (t, re)
                })
            })
            .collect()
    })
}

/// A locally rejected record value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordValidationError {
    /// Index of the offending value within the submitted list.
    pub index: usize,
    pub reason: String,
}

impl std::fmt::Display for RecordValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "record {}: {}", self.index, self.reason)
    }
}

impl std::error::Error for RecordValidationError {}

/// Checks the TTL bounds alone (used for partial updates).
///
/// # Errors
/// `RecordValidationError { index: 0, reason: "ttl<3600" | "ttl>86400" }`.
pub fn validate_ttl(ttl: u32) -> Result<(), RecordValidationError> {
    if ttl < TTL_MIN {
        return Err(RecordValidationError {
            index: 0,
            reason: format!("ttl<{TTL_MIN}"),
        });
    }
    if ttl > TTL_MAX {
        return Err(RecordValidationError {
            index: 0,
            reason: format!("ttl>{TTL_MAX}"),
        });
    }
    Ok(())
}

/// Validates an RRset's TTL and record values against the catalogue.
///
/// Values are trimmed; each line is validated independently. When the entry
/// declares a regex it is authoritative; otherwise only non-emptiness (plus
/// the trailing-dot rule for hostname-bearing types) is enforced.
///
/// # Errors
/// The first offending value, as `RecordValidationError { index, reason }`.
pub fn validate(
    rtype: RecordType,
    ttl: u32,
    records: &[String],
) -> Result<(), RecordValidationError> {
    let entry = info(rtype);
    if entry.policy == RecordPolicy::Forbidden {
        return Err(RecordValidationError {
            index: 0,
            reason: format!("{rtype} RRsets are managed by the server and cannot be written"),
        });
    }
    validate_ttl(ttl)?;
    if records.is_empty() {
        return Err(RecordValidationError {
            index: 0,
            reason: "no record values given".to_string(),
        });
    }

    for (index, raw) in records.iter().enumerate() {
        let value = raw.trim();
        if value.is_empty() {
            return Err(RecordValidationError {
                index,
                reason: "empty record value".to_string(),
            });
        }
        if let Some(re) = compiled_patterns().get(&rtype) {
            if !re.is_match(value) {
                return Err(RecordValidationError {
                    index,
                    reason: format!("expected format: {}", entry.format),
                });
            }
        }
        if entry.hostname {
            let last = value.split_whitespace().last().unwrap_or(value);
            if !last.ends_with('.') {
                return Err(RecordValidationError {
                    index,
                    reason: "hostname must be fully qualified (end with '.')".to_string(),
                });
            }
        }
    }
    Ok(())
}
