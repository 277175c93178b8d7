//! Bearer-token authentication: typed claims, signing keys, and the request
//! extractor, plus argon2 password hashing.

pub mod jwt;
pub mod password;

pub use jwt::{AuthUser, Claims, JwtKeys};
pub use password::{hash_password, verify_password};
