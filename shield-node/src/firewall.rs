//! Ingress policy boundary.
//!
//! Implementations own the "list current rules, add the replacement set,
//! then remove the superseded rules" sequencing, so there is never a window
//! with zero ingress rules. Both operations converge when repeated with the
//! same input.

use crate::error::Result;
use async_trait::async_trait;

/// Control plane for the game server's inbound firewall policy.
#[async_trait]
pub trait IngressPolicy: Send + Sync {
    /// Allow inbound traffic only from the given source addresses.
    ///
    /// Bare IPs are treated as single-host networks; entries that already
    /// carry a prefix length pass through untouched.
    async fn restrict_ingress_to(&self, ips: &[String]) -> Result<()>;

    /// Reopen the default public ingress window.
    async fn restore_default_ingress(&self) -> Result<()>;
}
