//! TLS security profile resolution
//!
//! The profile handed to the operands is, in order of precedence: the one in
//! the HyperConverged spec, the one on the cluster `APIServer` resource
//! (OpenShift only), or Intermediate.

use crds::{CustomTlsProfile, TlsProfileType, TlsSecurityProfile};
use serde_json::Value;
use tracing::warn;

const MODERN_CIPHERS: &[&str] = &["TLS_AES_128_GCM_SHA256", "TLS_AES_256_GCM_SHA384", "TLS_CHACHA20_POLY1305_SHA256"];

const INTERMEDIATE_CIPHERS: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
    "ECDHE-ECDSA-CHACHA20-POLY1305",
    "ECDHE-RSA-CHACHA20-POLY1305",
    "DHE-RSA-AES128-GCM-SHA256",
    "DHE-RSA-AES256-GCM-SHA384",
];

const OLD_EXTRA_CIPHERS: &[&str] = &[
    "DHE-RSA-CHACHA20-POLY1305",
    "ECDHE-ECDSA-AES128-SHA256",
    "ECDHE-RSA-AES128-SHA256",
    "ECDHE-ECDSA-AES128-SHA",
    "ECDHE-RSA-AES128-SHA",
    "ECDHE-ECDSA-AES256-SHA384",
    "ECDHE-RSA-AES256-SHA384",
    "ECDHE-ECDSA-AES256-SHA",
    "ECDHE-RSA-AES256-SHA",
    "DHE-RSA-AES128-SHA256",
    "DHE-RSA-AES256-SHA256",
    "AES128-GCM-SHA256",
    "AES256-GCM-SHA384",
    "AES128-SHA256",
    "AES256-SHA256",
    "AES128-SHA",
    "AES256-SHA",
    "DES-CBC3-SHA",
];

/// Cipher suites and minimal protocol version of a resolved profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub ciphers: Vec<String>,
    pub min_tls_version: String,
}

fn predefined(profile_type: TlsProfileType) -> TlsSettings {
    let (ciphers, min): (Vec<&str>, &str) = match profile_type {
        TlsProfileType::Old => (
            INTERMEDIATE_CIPHERS.iter().chain(OLD_EXTRA_CIPHERS).copied().collect(),
            "VersionTLS10",
        ),
        TlsProfileType::Modern => (MODERN_CIPHERS.to_vec(), "VersionTLS13"),
        TlsProfileType::Intermediate | TlsProfileType::Custom => (INTERMEDIATE_CIPHERS.to_vec(), "VersionTLS12"),
    };
    TlsSettings {
        ciphers: ciphers.into_iter().map(str::to_string).collect(),
        min_tls_version: min.to_string(),
    }
}

fn is_valid_cipher(name: &str) -> bool {
    INTERMEDIATE_CIPHERS.contains(&name) || OLD_EXTRA_CIPHERS.contains(&name)
}

fn intermediate_custom() -> CustomTlsProfile {
    let settings = predefined(TlsProfileType::Intermediate);
    CustomTlsProfile {
        ciphers: settings.ciphers,
        min_tls_version: Some(settings.min_tls_version),
    }
}

/// Read and sanitize the profile of an `APIServer` resource.
///
/// Unknown cipher names in a Custom profile are dropped; a Custom profile
/// without its `custom` block falls back to the Intermediate values.
pub fn from_api_server(api_server: &Value) -> Option<TlsSecurityProfile> {
    let raw = api_server.pointer("/spec/tlsSecurityProfile")?;
    let profile: TlsSecurityProfile = match serde_json::from_value(raw.clone()) {
        Ok(profile) => profile,
        Err(e) => {
            warn!("Ignoring unparsable TLS security profile on the APIServer resource: {}", e);
            return None;
        }
    };
    if profile.profile_type != TlsProfileType::Custom {
        return Some(profile);
    }
    let custom = match profile.custom {
        None => {
            warn!("Custom TLS security profile on the APIServer resource has no custom block, using Intermediate values");
            intermediate_custom()
        }
        Some(custom) => {
            let ciphers = custom
                .ciphers
                .into_iter()
                .filter(|c| {
                    let valid = is_valid_cipher(c);
                    if !valid {
                        warn!("Ignoring invalid cipher {} on the APIServer resource", c);
                    }
                    valid
                })
                .collect();
            CustomTlsProfile {
                ciphers,
                min_tls_version: custom.min_tls_version,
            }
        }
    };
    Some(TlsSecurityProfile {
        profile_type: TlsProfileType::Custom,
        custom: Some(custom),
    })
}

/// Effective profile for the operands
pub fn effective(from_hc: Option<&TlsSecurityProfile>, from_api_server: Option<&TlsSecurityProfile>) -> TlsSecurityProfile {
    let mut profile = from_hc
        .or(from_api_server)
        .cloned()
        .unwrap_or(TlsSecurityProfile {
            profile_type: TlsProfileType::Intermediate,
            custom: None,
        });
    if profile.profile_type == TlsProfileType::Custom && profile.custom.is_none() {
        warn!("TLS security profile of type Custom has no custom block, using Intermediate values");
        profile.custom = Some(intermediate_custom());
    }
    profile
}

/// Ciphers and minimal version of the effective profile
pub fn settings(profile: &TlsSecurityProfile) -> TlsSettings {
    match (&profile.profile_type, &profile.custom) {
        (TlsProfileType::Custom, Some(custom)) => TlsSettings {
            ciphers: custom.ciphers.clone(),
            min_tls_version: custom
                .min_tls_version
                .clone()
                .unwrap_or_else(|| predefined(TlsProfileType::Intermediate).min_tls_version),
        },
        (profile_type, _) => predefined(*profile_type),
    }
}

/// Wire form of a profile, as the operand CRs embed it
pub fn to_wire(profile: &TlsSecurityProfile) -> Value {
    let type_name = match profile.profile_type {
        TlsProfileType::Old => "Old",
        TlsProfileType::Intermediate => "Intermediate",
        TlsProfileType::Modern => "Modern",
        TlsProfileType::Custom => "Custom",
    };
    let mut wire = serde_json::Map::new();
    wire.insert("type".to_string(), Value::String(type_name.to_string()));
    match (profile.profile_type, &profile.custom) {
        (TlsProfileType::Custom, Some(custom)) => {
            wire.insert(
                "custom".to_string(),
                serde_json::json!({
                    "ciphers": custom.ciphers,
                    "minTLSVersion": custom.min_tls_version,
                }),
            );
        }
        _ => {
            wire.insert(type_name.to_lowercase(), Value::Object(serde_json::Map::new()));
        }
    }
    Value::Object(wire)
}
