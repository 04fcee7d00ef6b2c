//! `scf-auth`: pure authentication/authorization boundary.
//!
//! This crate is decoupled from HTTP and storage: it verifies tokens, turns
//! them into principals and answers coarse role → permission questions.
//! Ownership checks (is this the invoice's buyer?) belong to the workflow.

pub mod authorize;
pub mod claims;
pub mod jwt;
pub mod permissions;

pub use authorize::{AuthzError, Principal, authorize, permissions_for};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtValidator};
pub use permissions::Permission;
