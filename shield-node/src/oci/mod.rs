//! Oracle Cloud collaborators: API-key credential staging, request signing
//! and the network-security-group ingress rewrite.

pub mod auth;
pub mod nsg;
pub mod signer;

pub use auth::{load_profile, stage_credentials, OciProfile};
pub use nsg::{NsgFirewall, NsgParameters, OciNsgApi};
pub use signer::ApiSigner;
