use chrono::{Duration, Utc};
use tracing::{debug, info};

use super::{Interrupt, Step, SyncEngine};
use crate::config::VersionSelection;
use crate::types::{ProtocolVersion, SyncStatus};

impl SyncEngine {
    /// OPTIONS round trip unless the cached answer is recent
    pub(super) async fn check_options(&mut self) -> Step {
        let fresh = self.conn.options_checked_at.is_some_and(|checked| {
            Utc::now() - checked < Duration::seconds(self.config.options_cache_secs)
        });
        if fresh && !self.conn.server_versions.is_empty() {
            debug!("Using cached server options for {}", self.conn.account_id);
            return Ok(());
        }

        self.check_cancel()?;
        let options = self.transport.options(&mut self.conn).await;
        self.transcript.extend(self.transport.take_transcript());
        let options = options?;
        self.conn.server_versions = options.versions;
        self.conn.server_commands = options.commands;
        self.conn.options_checked_at = Some(Utc::now());
        self.state.persist_account(&self.conn)?;
        Ok(())
    }

    pub(super) fn negotiate_version(&mut self) -> Step {
        let version = match self.account.version {
            VersionSelection::Fixed(version) => version,
            VersionSelection::Auto => {
                select_version(&self.config.preferred_versions, &self.conn.server_versions)
                    .map_err(Interrupt::Terminal)?
            }
        };

        if self.conn.version != Some(version) {
            info!("Using protocol {} for {}", version, self.conn.account_id);
            self.conn.version = Some(version);
        }
        Ok(())
    }
}

/// First preferred version the server advertises
pub fn select_version(
    preferred: &[ProtocolVersion],
    advertised: &[String],
) -> Result<ProtocolVersion, SyncStatus> {
    if advertised.is_empty() {
        return Err(SyncStatus::new(
            "noversion",
            Some("server advertised no protocol versions".to_string()),
        ));
    }

    preferred
        .iter()
        .copied()
        .find(|version| advertised.iter().any(|v| v.trim() == version.as_str()))
        .ok_or_else(|| {
            SyncStatus::new(
                "noversionmatch",
                Some(format!("server offers {}", advertised.join(","))),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn advertised(list: &[&str]) -> Vec<String> {
        list.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_select_highest_preferred() {
        let preferred = EngineConfig::default().preferred_versions;
        let version =
            select_version(&preferred, &advertised(&["2.5", "12.0", "14.0", "14.1"])).unwrap();
        assert_eq!(version, ProtocolVersion::V14_0);

        let version = select_version(&preferred, &advertised(&["2.5", "16.1"])).unwrap();
        assert_eq!(version, ProtocolVersion::V16_1);
    }

    #[test]
    fn test_no_usable_version() {
        let preferred = vec![ProtocolVersion::V16_1];
        let err = select_version(&preferred, &advertised(&["12.0"])).unwrap_err();
        assert_eq!(err.code, "noversionmatch");

        let err = select_version(&preferred, &[]).unwrap_err();
        assert_eq!(err.code, "noversion");
    }
}
