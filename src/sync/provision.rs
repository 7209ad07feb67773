use tracing::{info, warn};

use super::requests;
use super::{Interrupt, ResetScope, Step, SyncEngine};
use crate::status::StatusPolicy;
use crate::types::SyncStatus;

impl SyncEngine {
    /// Policy download and acknowledgement, when required and no key is held
    pub(super) async fn provision(&mut self) -> Step {
        if !self.conn.provisioning || self.conn.policy_key.is_some() {
            return Ok(());
        }
        let version = self.version()?;

        for attempt in 1..=self.config.provision_attempts {
            info!(
                "Provisioning {} (attempt {}/{})",
                self.conn.account_id, attempt, self.config.provision_attempts
            );
            self.conn.policy_key = None;

            let response = self.exchange(&requests::provision_request(version)).await?;
            self.check_status(StatusPolicy::evaluate(&response, "Provision.Status", false))?;
            if response.has("Provision.RemoteWipe") {
                warn!("Server requested a remote wipe of {}", self.conn.account_id);
                return Err(Interrupt::Terminal(SyncStatus::new(
                    "remotewipe",
                    Some("server requested a remote wipe".to_string()),
                )));
            }

            let policy_status = response
                .text_at("Provision.Policies.Policy.Status")
                .unwrap_or_default();
            match policy_status.trim() {
                "1" => {}
                "2" => {
                    info!(
                        "No policy for device of {}, disabling provisioning",
                        self.conn.account_id
                    );
                    self.conn.provisioning = false;
                    self.state.persist_account(&self.conn)?;
                    return Err(Interrupt::Reset(ResetScope::Connection));
                }
                other => {
                    warn!("Policy download returned status {:?}", other);
                    continue;
                }
            }

            let Some(temporary) = response.text_at("Provision.Policies.Policy.PolicyKey") else {
                warn!("Policy download carried no key");
                continue;
            };

            self.conn.policy_key = Some(temporary.clone());
            let ack = self
                .exchange(&requests::provision_ack(version, &temporary))
                .await?;
            self.check_status(StatusPolicy::evaluate(&ack, "Provision.Status", false))?;

            let ack_status = ack.text_at("Provision.Policies.Policy.Status");
            match (
                ack_status.as_deref().map(str::trim),
                ack.text_at("Provision.Policies.Policy.PolicyKey"),
            ) {
                (Some("1"), Some(key)) => {
                    info!("Provisioned {}", self.conn.account_id);
                    self.conn.policy_key = Some(key);
                    self.state.persist_account(&self.conn)?;
                    return Ok(());
                }
                (status, _) => {
                    warn!("Policy acknowledgement rejected with {:?}", status);
                    self.conn.policy_key = None;
                }
            }
        }

        Err(Interrupt::Terminal(SyncStatus::new(
            "provisionfailed",
            Some(format!(
                "no policy key after {} attempts",
                self.config.provision_attempts
            )),
        )))
    }
}
