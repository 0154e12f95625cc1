//! Property-Based Tests for audience matching, durations and signing constraints
//!
//! 1. AUDIENCE: matching ignores URL ports and is symmetric
//! 2. DURATION: formatted durations parse back to the same value
//! 3. CONSTRAINTS: an authorized principal list is never widened by a request
//! 4. CODEC: signed certificates survive the wire encoding unchanged

use std::collections::BTreeMap;

use certward_core::codec::{decode_certificate, encode_certificate};
use certward_core::duration::{format_duration, parse_duration};
use certward_core::{
    matches_audience, CertType, CertificateTemplate, SignOption, SshCaKey, SshOptions,
};
use chrono::{Duration, Utc};
use proptest::prelude::*;

// =============================================================================
// AUDIENCE
// =============================================================================

proptest! {
    /// Any explicit port on either side is ignored
    #[test]
    fn prop_audience_ignores_port(
        host in "[a-z]{1,12}(\\.[a-z]{2,6}){1,2}",
        path in "(/[a-z0-9]{1,8}){0,3}",
        port_a in proptest::option::of(1u16..65535),
        port_b in proptest::option::of(1u16..65535),
    ) {
        let url = |port: Option<u16>| match port {
            Some(p) => format!("https://{}:{}{}", host, p, path),
            None => format!("https://{}{}", host, path),
        };
        let a = vec![url(port_a)];
        let b = vec![url(port_b)];

        prop_assert!(matches_audience(&a, &b));
        prop_assert!(matches_audience(&b, &a));
    }

    /// Matching is symmetric for arbitrary strings
    #[test]
    fn prop_audience_symmetric(
        a in proptest::collection::vec("[a-z:/.0-9]{0,20}", 0..4),
        b in proptest::collection::vec("[a-z:/.0-9]{0,20}", 0..4),
    ) {
        prop_assert_eq!(matches_audience(&a, &b), matches_audience(&b, &a));
    }

    /// Different hosts never match
    #[test]
    fn prop_audience_distinct_hosts(
        host_a in "[a-m]{3,10}\\.example",
        host_b in "[n-z]{3,10}\\.example",
    ) {
        let a = vec![format!("https://{}/ssh/sign", host_a)];
        let b = vec![format!("https://{}:443/ssh/sign", host_b)];
        prop_assert!(!matches_audience(&a, &b));
    }
}

// =============================================================================
// DURATION
// =============================================================================

proptest! {
    #[test]
    fn prop_duration_format_parse(seconds in -10_000_000i64..10_000_000, millis in 0i64..1000) {
        let d = Duration::seconds(seconds) + Duration::milliseconds(millis);
        let formatted = format_duration(d);
        prop_assert_eq!(parse_duration(&formatted).unwrap(), d);
    }
}

// =============================================================================
// CONSTRAINTS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A request may narrow the authorized principals but never add to them
    #[test]
    fn prop_requested_principals_subset(
        authorized in proptest::collection::btree_set("[a-z]{1,6}", 1..5),
        extra in "[0-9]{1,4}",
    ) {
        let authorized: Vec<String> = authorized.into_iter().collect();
        let validator = SignOption::OptionsValidator(SshOptions {
            principals: authorized.clone(),
            ..Default::default()
        });

        let key = SshCaKey::generate().unwrap();
        let mut tpl = CertificateTemplate::for_key(key.public_key().clone());

        let narrowed = SshOptions {
            principals: authorized[..1].to_vec(),
            ..Default::default()
        };
        prop_assert!(validator.apply(&narrowed, &mut tpl, Utc::now()).is_ok());

        let mut widened = authorized.clone();
        widened.push(extra);
        let widened = SshOptions {
            principals: widened,
            ..Default::default()
        };
        prop_assert!(validator.apply(&widened, &mut tpl, Utc::now()).is_err());
    }
}

// =============================================================================
// CODEC
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_certificate_codec_roundtrip(
        principals in proptest::collection::vec("[a-z0-9][a-z0-9._-]{0,15}", 1..5),
        key_id in "[A-Za-z0-9@._-]{0,24}",
        valid_after in 0u64..4_000_000_000,
        lifetime in 1u64..400 * 24 * 3600,
        extensions in proptest::collection::btree_set(
            "permit-(pty|agent-forwarding|port-forwarding|X11-forwarding|user-rc)",
            0..4,
        ),
        host in any::<bool>(),
    ) {
        let ca = SshCaKey::generate().unwrap();
        let subject = SshCaKey::generate().unwrap();
        let cert = ca
            .sign(&CertificateTemplate {
                key: subject.public_key().clone(),
                cert_type: Some(if host { CertType::Host } else { CertType::User }),
                key_id,
                principals,
                valid_after,
                valid_before: valid_after + lifetime,
                critical_options: BTreeMap::new(),
                extensions: extensions.into_iter().map(|e| (e, String::new())).collect(),
            })
            .unwrap();

        let encoded = encode_certificate(&cert).unwrap();
        prop_assert_eq!(decode_certificate(&encoded).unwrap(), Some(cert));
    }
}
