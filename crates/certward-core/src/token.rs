//! One-time tokens
//!
//! A one-time token (OTT) is a compact JWS. Authorization reads it twice:
//!
//! 1. [`UnverifiedToken::parse`] and [`UnverifiedToken::insecure_claims`] read
//!    the header and claims **without** checking the signature. The result is
//!    only good for routing the token to the provisioner that can verify it.
//! 2. The provisioner then verifies the original encoded token with its own
//!    key material.
//!
//! Nothing read in step 1 may be used to make an authorization decision.

use jsonwebtoken::{decode, decode_header, DecodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::{CoreError, Result};
use crate::ssh::SshOptions;

/// Claims carried by a one-time token
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iss: String,

    /// Subject
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sub: String,

    /// Audience, a single string or a list on the wire
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub aud: Vec<String>,

    /// Expiration (unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Not before (unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Issued at (unix seconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Unique token id
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jti: String,

    /// Subject alternative names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sans: Vec<String>,

    /// Email address
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,

    /// Nonce
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub nonce: String,

    /// OIDC authorized party
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azp: String,

    /// Authority specific claims
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<StepClaims>,
}

/// Authority specific claims embedded by the token issuer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepClaims {
    /// SSH certificate options the token was minted for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<SshOptions>,
}

impl Claims {
    /// SSH options embedded in the token, if this is an SSH provisioning token
    pub fn ssh_options(&self) -> Option<&SshOptions> {
        self.step.as_ref().and_then(|step| step.ssh.as_ref())
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) if s.is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// A structurally valid token whose signature has not been checked
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    raw: String,
    header: Header,
}

impl UnverifiedToken {
    /// Parse the compact serialization and its protected header.
    pub fn parse(token: &str) -> Result<Self> {
        let header = decode_header(token).map_err(|e| CoreError::MalformedToken(e.to_string()))?;
        Ok(Self {
            raw: token.to_string(),
            header,
        })
    }

    /// The protected header
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Key id from the protected header
    pub fn kid(&self) -> Option<&str> {
        self.header.kid.as_deref()
    }

    /// The original encoded token
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Read the claims without verifying the signature or any time bounds.
    ///
    /// Only use the result to decide which provisioner verifies the token.
    pub fn insecure_claims(&self) -> Result<Claims> {
        let mut validation = Validation::new(self.header.alg);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<Claims>(&self.raw, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|e| CoreError::InvalidClaims(e.to_string()))
    }
}

/// Returns true if the two audience sets share at least one element.
///
/// Entries are compared verbatim and, failing that, with any URL port removed,
/// so `https://ca.example:443/sign` matches `https://ca.example/sign`.
pub fn matches_audience(ours: &[String], theirs: &[String]) -> bool {
    if ours.is_empty() || theirs.is_empty() {
        return false;
    }

    theirs.iter().any(|b| {
        ours.iter()
            .any(|a| a == b || strip_port(a) == strip_port(b))
    })
}

/// Remove the port from a URL. Values that are not absolute URLs are returned
/// unchanged.
pub fn strip_port(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.set_port(None).is_err() {
                return raw.to_string();
            }
            url.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    fn build_unsigned_token(claims: &serde_json::Value) -> String {
        let header = serde_json::json!({"alg": "EdDSA", "typ": "JWT", "kid": "key-1"});
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(claims.to_string()),
            URL_SAFE_NO_PAD.encode(b"not-a-signature"),
        )
    }

    #[test]
    fn test_parse_reads_header() {
        let token = build_unsigned_token(&serde_json::json!({"iss": "admin"}));
        let parsed = UnverifiedToken::parse(&token).unwrap();
        assert_eq!(parsed.kid(), Some("key-1"));
        assert_eq!(parsed.as_str(), token);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(UnverifiedToken::parse("not-a-token").is_err());
        assert!(UnverifiedToken::parse("a.b").is_err());
        assert!(UnverifiedToken::parse("").is_err());
    }

    #[test]
    fn test_insecure_claims_ignores_signature_and_expiry() {
        let token = build_unsigned_token(&serde_json::json!({
            "iss": "admin",
            "sub": "alice",
            "aud": "https://ca.example/ssh/sign",
            "exp": 1,
            "iat": 0,
            "jti": "abc",
            "step": {"ssh": {"certType": "user", "principals": ["alice"]}}
        }));

        let claims = UnverifiedToken::parse(&token).unwrap().insecure_claims().unwrap();
        assert_eq!(claims.iss, "admin");
        assert_eq!(claims.aud, vec!["https://ca.example/ssh/sign"]);
        assert_eq!(claims.jti, "abc");
        let ssh = claims.ssh_options().unwrap();
        assert_eq!(ssh.principals, vec!["alice"]);
    }

    #[test]
    fn test_insecure_claims_rejects_non_json_payload() {
        let token = format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"EdDSA"}"#),
            URL_SAFE_NO_PAD.encode("not json"),
            URL_SAFE_NO_PAD.encode("sig"),
        );
        let parsed = UnverifiedToken::parse(&token).unwrap();
        assert!(parsed.insecure_claims().is_err());
    }

    #[test]
    fn test_audience_list_form() {
        let claims: Claims =
            serde_json::from_value(serde_json::json!({"aud": ["a", "b"]})).unwrap();
        assert_eq!(claims.aud, vec!["a", "b"]);
    }

    #[test]
    fn test_matches_audience_ignores_port() {
        let ours = vec!["https://ca.example/sign".to_string()];
        assert!(matches_audience(&ours, &["https://ca.example:8443/sign".to_string()]));
        assert!(matches_audience(&["https://ca.example:443/sign".to_string()], &ours));
        assert!(!matches_audience(&ours, &["https://other.example/sign".to_string()]));
    }

    #[test]
    fn test_matches_audience_plain_strings() {
        let ours = vec!["client-id".to_string()];
        assert!(matches_audience(&ours, &["client-id".to_string()]));
        assert!(!matches_audience(&ours, &["other".to_string()]));
        assert!(!matches_audience(&ours, &[]));
        assert!(!matches_audience(&[], &ours));
    }
}
