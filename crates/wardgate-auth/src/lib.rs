//! Credential checks for the control plane
//!
//! Gateways and administrators authenticate with argon2-hashed passwords;
//! devices present an identity token issued by the identity provider.

pub mod jwt;
pub mod password;

pub use jwt::{Identity, IdentityClaims, JwtError, JwtTokenValidator, TokenValidator};
pub use password::{hash_password, verify_password, PasswordError};
