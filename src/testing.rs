//! Shared fixtures for unit tests.

use jsonwebtoken::{encode, EncodingKey, Header};

use crate::core::transport::HttpResponse;

/// Mint an HS256 JWT carrying arbitrary claims.
pub fn jwt_with_claims(claims: serde_json::Value) -> String {
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(b"fixture-signing-key"),
    )
    .unwrap()
}

/// Mint a JWT expiring at the given unix timestamp.
pub fn jwt_with_exp(exp: i64) -> String {
    jwt_with_claims(serde_json::json!({"sub": "annotator", "exp": exp}))
}

/// Mint a JWT expiring `secs` from now, with a unique `jti` so tokens differ.
pub fn jwt_expiring_in(secs: i64, jti: &str) -> String {
    jwt_with_claims(serde_json::json!({
        "sub": "annotator",
        "exp": chrono::Utc::now().timestamp() + secs,
        "jti": jti,
    }))
}

/// Session endpoint response body.
pub fn session_response(access: &str, refresh: &str) -> HttpResponse {
    json_response(
        200,
        serde_json::json!({
            "access_secret": access,
            "refresh_secret": refresh,
            "token_type": "Bearer"
        }),
    )
}

/// JSON response with the given status.
pub fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status,
        status_text: String::new(),
        headers: [("content-type".to_string(), "application/json".to_string())]
            .into_iter()
            .collect(),
        body: body.to_string(),
    }
}
