//! Token Management
//!
//! Credential lifecycle: storage, expiry detection and single-flight
//! login/refresh.

pub mod expiry;
pub mod manager;
pub mod store;

pub use expiry::{decode_claims, is_expiration_message, DecodedClaims, EXPIRATION_PHRASES};
pub use manager::{
    create_credential_provider, CredentialProvider, SessionTokenManager, StaticTokenProvider,
    TokenManagerConfig, LOGIN_PATH, REFRESH_PATH,
};
pub use store::CredentialStore;
