use crate::auth::{api_key_valid, client_ip, ip_allowed, username};
use axum::http::HeaderMap;
use std::net::SocketAddr;

fn peer() -> SocketAddr {
    "198.51.100.9:41234".parse().unwrap()
}

fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in pairs {
        map.insert(
            axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
            value.parse().unwrap(),
        );
    }
    map
}

#[test]
fn client_ip_prefers_first_forwarded_entry() {
    let h = headers(&[("x-forwarded-for", "203.0.113.5, 10.0.0.1")]);
    assert_eq!(client_ip(&h, peer()), "203.0.113.5");
}

#[test]
fn client_ip_falls_back_through_headers() {
    let h = headers(&[("x-real-ip", "203.0.113.7")]);
    assert_eq!(client_ip(&h, peer()), "203.0.113.7");

    let h = headers(&[("cf-connecting-ip", "203.0.113.8")]);
    assert_eq!(client_ip(&h, peer()), "203.0.113.8");

    // No proxy headers: peer address, host part only.
    assert_eq!(client_ip(&HeaderMap::new(), peer()), "198.51.100.9");
}

#[test]
fn empty_allowlist_admits_everyone() {
    assert!(ip_allowed(&[], "203.0.113.5"));
}

#[test]
fn allowlist_matches_literals_and_cidrs() {
    let allowed = vec!["203.0.113.5".to_string(), "192.168.1.0/24".to_string()];

    assert!(ip_allowed(&allowed, "203.0.113.5"));
    assert!(ip_allowed(&allowed, "192.168.1.42"));
    assert!(!ip_allowed(&allowed, "192.168.2.42"));
    assert!(!ip_allowed(&allowed, "198.51.100.9"));
    assert!(!ip_allowed(&allowed, "not-an-ip"));
}

#[test]
fn allowlist_matches_ipv6_cidrs() {
    let allowed = vec!["2001:db8::/32".to_string()];
    assert!(ip_allowed(&allowed, "2001:db8::1"));
    assert!(!ip_allowed(&allowed, "2001:db9::1"));
}

#[test]
fn loopback_needs_explicit_entry() {
    let allowed = vec!["203.0.113.5".to_string()];
    assert!(!ip_allowed(&allowed, "127.0.0.1"));

    let allowed = vec!["127.0.0.1".to_string()];
    assert!(ip_allowed(&allowed, "127.0.0.1"));
    assert!(ip_allowed(&allowed, "::1"));
}

#[test]
fn api_key_skipped_when_disabled() {
    assert!(api_key_valid(false, &[], &HeaderMap::new()));
}

#[test]
fn api_key_accepted_from_header_or_bearer() {
    let valid = vec!["KEY1".to_string(), "KEY2".to_string()];

    let h = headers(&[("x-api-key", "KEY2")]);
    assert!(api_key_valid(true, &valid, &h));

    let h = headers(&[("authorization", "Bearer KEY1")]);
    assert!(api_key_valid(true, &valid, &h));

    let h = headers(&[("x-api-key", "WRONG")]);
    assert!(!api_key_valid(true, &valid, &h));

    let h = headers(&[("authorization", "Basic KEY1")]);
    assert!(!api_key_valid(true, &valid, &h));

    assert!(!api_key_valid(true, &valid, &HeaderMap::new()));
}

#[test]
fn username_must_be_non_empty() {
    let h = headers(&[("x-username", "alice")]);
    assert_eq!(username(&h), Some("alice".to_string()));

    let h = headers(&[("x-username", "")]);
    assert_eq!(username(&h), None);

    assert_eq!(username(&HeaderMap::new()), None);
}
