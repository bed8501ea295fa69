//! Mitigation controller.
//!
//! Owns the single "shield active" flag. A detection event raises the
//! shield: announce over RCON, collect player addresses, restrict ingress
//! to them, then arm a one-shot rollback timer. The timer task is the only
//! thing that lowers the shield again.

use crate::error::{Result, ShieldError};
use crate::firewall::IngressPolicy;
use crate::players;
use crate::radar::AttackHandler;
use crate::rcon::{RconConnector, RconSession};
use async_trait::async_trait;
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// DDoS mitigation controller with at most one active episode at a time.
#[derive(Clone)]
pub struct Shield {
    duration: Duration,
    rcon: Arc<dyn RconConnector>,
    firewall: Arc<dyn IngressPolicy>,
    active: Arc<AtomicBool>,
}

impl Shield {
    pub fn new(
        duration: Duration,
        rcon: Arc<dyn RconConnector>,
        firewall: Arc<dyn IngressPolicy>,
    ) -> Self {
        Self {
            duration,
            rcon,
            firewall,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Raise the shield: announce, collect protected addresses, restrict
    /// ingress. The caller has already claimed the active flag; any error
    /// here means the episode is abandoned and the flag must be released.
    async fn raise(&self, iface: &str, rx_delta: u64) -> Result<()> {
        let mut session = self.rcon.dial().await?;
        self.raise_over_session(session.as_mut(), iface, rx_delta)
            .await
        // Session closes when it drops, on every exit path.
    }

    async fn raise_over_session(
        &self,
        session: &mut dyn RconSession,
        iface: &str,
        rx_delta: u64,
    ) -> Result<()> {
        let label = window_label(self.duration);

        session
            .execute(&format!(
                "say 'Server is being attacked. Activating DDoS shield for {label}'"
            ))
            .await?;

        let ips = players::player_ips(session).await?;
        if ips.is_empty() {
            return Err(ShieldError::InvalidState(
                "no player addresses to protect".to_string(),
            ));
        }
        info!(iface, rx_delta, protected = ips.len(), "Restricting ingress to connected players");

        self.firewall.restrict_ingress_to(&ips).await?;

        // The restriction is already in place; a failed announcement must
        // not roll it back.
        if let Err(e) = session
            .execute(&format!("say 'DDoS shield activated for {label}.'"))
            .await
        {
            warn!(error = %e, "Shield activated but activation notice failed");
        }

        Ok(())
    }

    /// Lower the shield after the episode expires. If the firewall restore
    /// fails the flag stays set and an operator has to intervene; a failed
    /// chat notice is only logged.
    async fn lower(&self) {
        if let Err(e) = self.firewall.restore_default_ingress().await {
            counter!("shield_rollback_failures", 1);
            error!(
                error = %e,
                "Failed to restore default ingress; shield remains raised, operator intervention required"
            );
            return;
        }

        match self.rcon.dial().await {
            Ok(mut session) => {
                if let Err(e) = session.execute("say 'DDoS shield deactivated.'").await {
                    warn!(error = %e, "Shield lowered but deactivation notice failed");
                }
            }
            Err(e) => warn!(error = %e, "Shield lowered but RCON dial failed"),
        }

        self.active.store(false, Ordering::Release);
        counter!("shield_deactivations", 1);
        gauge!("shield_active", 0.0);
        info!("Shield lowered, default ingress restored");
    }

    fn arm_rollback_timer(&self) {
        let shield = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(shield.duration).await;
            shield.lower().await;
        });
    }
}

#[async_trait]
impl AttackHandler for Shield {
    async fn on_attack_detected(&self, iface: &str, rx_delta: u64) {
        // Claim the episode atomically; a second detection while one is
        // active (or still activating) is a no-op.
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(iface, rx_delta, "Shield already active; ignoring detection");
            counter!("shield_detections_suppressed", 1);
            return;
        }

        warn!(iface, rx_delta, "Attack detected; raising shield");
        counter!("shield_activation_attempts", 1);

        match self.raise(iface, rx_delta).await {
            Ok(()) => {
                counter!("shield_activations", 1);
                gauge!("shield_active", 1.0);
                info!(
                    duration_secs = self.duration.as_secs(),
                    "Shield raised; rollback timer armed"
                );
                self.arm_rollback_timer();
            }
            Err(e) => {
                counter!("shield_activation_failures", 1);
                error!(error = %e, "Shield activation aborted");
                self.active.store(false, Ordering::Release);
            }
        }
    }
}

/// Human-readable episode length for chat announcements.
fn window_label(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        let minutes = secs / 60;
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        }
    } else {
        format!("{secs} seconds")
    }
}
