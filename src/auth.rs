use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::api::AppState;

#[cfg(test)]
#[path = "./auth_tests.rs"]
mod tests;

// --- CORS ---

/// CORS is permissive because the IP whitelist provides the primary security.
pub fn set_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(
            "Content-Type, Authorization, X-Requested-With, X-API-Key, X-Username, X-Assignment-ID",
        ),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static("Content-Length, Content-Type"),
    );
}

// --- CLIENT IDENTITY ---

/// Extract the client IP, preferring proxy headers over the peer address:
/// first X-Forwarded-For entry, then X-Real-IP, then CF-Connecting-IP, then
/// the transport peer (host part only).
pub fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(xff) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        return real_ip.to_string();
    }

    if let Some(cf_ip) = header_str(headers, "cf-connecting-ip") {
        return cf_ip.to_string();
    }

    peer.ip().to_string()
}

pub fn username(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-username")
        .filter(|u| !u.is_empty())
        .map(str::to_string)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

// --- IP ALLOWLIST ---

/// Check a client IP against the allowlist. An empty allowlist admits
/// everyone. Entries may be literal IPs or CIDR blocks. Loopback addresses
/// are admitted only when explicitly listed.
pub(crate) fn ip_allowed(allowed: &[String], client_ip: &str) -> bool {
    if allowed.is_empty() {
        return true;
    }

    if client_ip == "127.0.0.1" || client_ip == "::1" || client_ip == "localhost" {
        if allowed
            .iter()
            .any(|a| a == "127.0.0.1" || a == "::1" || a == "localhost")
        {
            return true;
        }
    }

    let parsed: Option<IpAddr> = client_ip.parse().ok();
    for entry in allowed {
        if entry == client_ip {
            return true;
        }

        if let Some((net, prefix)) = entry.split_once('/') {
            if let (Some(ip), Ok(net_ip), Ok(bits)) =
                (parsed, net.parse::<IpAddr>(), prefix.parse::<u8>())
            {
                if cidr_contains(net_ip, bits, ip) {
                    return true;
                }
            }
        }
    }

    false
}

fn cidr_contains(net: IpAddr, prefix: u8, ip: IpAddr) -> bool {
    match (net, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            if prefix > 32 {
                return false;
            }
            let mask = if prefix == 0 {
                0
            } else {
                u32::MAX << (32 - u32::from(prefix))
            };
            (u32::from(net) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            if prefix > 128 {
                return false;
            }
            let mask = if prefix == 0 {
                0
            } else {
                u128::MAX << (128 - u32::from(prefix))
            };
            (u128::from(net) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}

// --- API KEY ---

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = header_str(headers, "x-api-key") {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }

    header_str(headers, "authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Validate the API key if authentication is required. Every configured key
/// is compared in constant time to avoid leaking match positions.
pub(crate) fn api_key_valid(require: bool, valid_keys: &[String], headers: &HeaderMap) -> bool {
    if !require {
        return true;
    }

    let Some(key) = extract_api_key(headers) else {
        return false;
    };

    let mut matched = false;
    for valid in valid_keys {
        matched |= bool::from(key.as_bytes().ct_eq(valid.as_bytes()));
    }
    matched
}

// --- MIDDLEWARE ---

fn reject(status: StatusCode, message: &str) -> Response {
    let mut response = (status, Json(json!({ "error": message }))).into_response();
    set_cors_headers(response.headers_mut());
    response
}

/// Admission pipeline for protected endpoints: CORS, OPTIONS pre-flight,
/// IP allowlist, API key, username, rate limit.
pub async fn protect(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let ip = client_ip(request.headers(), peer);

    if method == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        set_cors_headers(response.headers_mut());
        return response;
    }

    if !ip_allowed(&state.config.allowed_ips, &ip) {
        warn!("❌ IP validation failed for {} {} from {}", method, path, ip);
        return reject(StatusCode::FORBIDDEN, "IP address not allowed");
    }

    if !api_key_valid(
        state.config.require_api_key,
        &state.config.valid_api_keys,
        request.headers(),
    ) {
        warn!("❌ Authentication failed for {} {} from {}", method, path, ip);
        return reject(StatusCode::UNAUTHORIZED, "Invalid or missing API key");
    }

    let Some(user) = username(request.headers()) else {
        warn!("❌ Username validation failed for {} {} from {}", method, path, ip);
        return reject(StatusCode::BAD_REQUEST, "Username required (X-Username header)");
    };

    if !state.rate_limits.allow(&format!("{}:{}", ip, user)).await {
        warn!("❌ Rate limit exceeded for {} (user: {})", ip, user);
        return reject_rate_limited(&state);
    }

    info!(
        "✅ All security checks passed for {} {} from {} (user: {})",
        method, path, ip, user
    );

    let mut response = next.run(request).await;
    set_cors_headers(response.headers_mut());
    response
}

/// Admission pipeline for admin endpoints: API key and IP checks, but no
/// username requirement and no rate limiting.
pub async fn protect_admin(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let ip = client_ip(request.headers(), peer);

    if method == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        set_cors_headers(response.headers_mut());
        return response;
    }

    if !ip_allowed(&state.config.allowed_ips, &ip) {
        warn!(
            "❌ IP validation failed for admin endpoint {} {} from {}",
            method, path, ip
        );
        return reject(StatusCode::FORBIDDEN, "IP address not allowed");
    }

    if !api_key_valid(
        state.config.require_api_key,
        &state.config.valid_api_keys,
        request.headers(),
    ) {
        warn!("❌ Authentication failed for admin endpoint {} {}", method, path);
        return reject(StatusCode::UNAUTHORIZED, "Invalid or missing API key");
    }

    info!("✅ Admin security checks passed for {} {} from {}", method, path, ip);

    let mut response = next.run(request).await;
    set_cors_headers(response.headers_mut());
    response
}

fn reject_rate_limited(state: &AppState) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": format!(
                "Rate limit exceeded. Maximum {} requests per {}m allowed.",
                state.config.rate_limit_requests,
                state.config.rate_limit_window_min()
            )
        })),
    )
        .into_response();
    set_cors_headers(response.headers_mut());
    response
}
