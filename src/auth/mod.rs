/// Authentication module
///
/// Access token claims, the identity derived from them, and the decoder
/// that turns one into the other.

mod claims;
mod jwt;

pub use claims::{AccessClaims, Identity, IdentityUpdate, Role};
pub use jwt::{decode_claims, decode_identity};
