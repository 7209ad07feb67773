use chrono::{Duration, Utc};
use flume::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{Interrupt, ResetScope, Step, SyncEvent, SyncOutcome, SyncPhase, SyncTrigger};
use crate::autodiscovery::Autodiscover;
use crate::config::{AccountConfig, AuthConfig, EngineConfig};
use crate::credentials::CredentialStore;
use crate::oauth::OAuthClient;
use crate::status::{AccountEffect, Classification, StatusAction};
use crate::store::{FlatMapper, ItemMapper, StateStore, TargetProvider};
use crate::transport::{
    Authenticator, HttpClient, ReqwestClient, RequestOptions, Transport,
};
use crate::types::error::{EasError, Result};
use crate::types::{
    AccountConnection, Folder, ProtocolVersion, RequestRecord, SyncStatus, INITIAL_SYNC_KEY,
};
use crate::wbxml::Element;

/// Protocol engine for one account
pub struct SyncEngine {
    pub(super) config: EngineConfig,
    pub(super) account: AccountConfig,
    pub(super) conn: AccountConnection,
    pub(super) transport: Transport,
    pub(super) state: Arc<dyn StateStore>,
    pub(super) targets: Arc<dyn TargetProvider>,
    pub(super) mapper: Arc<dyn ItemMapper>,
    events: Option<Sender<SyncEvent>>,
    cancel: Arc<AtomicBool>,
    /// Exchanges of the running attempt
    pub(super) transcript: Vec<RequestRecord>,
}

impl SyncEngine {
    /// Engine over an existing transport; account state is loaded from `state`
    pub fn new(
        config: EngineConfig,
        account: AccountConfig,
        transport: Transport,
        state: Arc<dyn StateStore>,
        targets: Arc<dyn TargetProvider>,
    ) -> Result<Self> {
        let conn = match state.load_account(&account.id)? {
            Some(conn) => {
                debug!("Loaded stored state for account {}", account.id);
                conn
            }
            None => {
                info!("No stored state for account {}, starting fresh", account.id);
                AccountConnection::from_config(&account, &config.device_type)
            }
        };

        Ok(Self {
            config,
            account,
            conn,
            transport,
            state,
            targets,
            mapper: Arc::new(FlatMapper::new()),
            events: None,
            cancel: Arc::new(AtomicBool::new(false)),
            transcript: Vec::new(),
        })
    }

    /// Engine talking HTTPS through reqwest, with autodiscover and OAuth2
    /// refresh wired according to the account configuration
    pub fn connect(
        config: EngineConfig,
        account: AccountConfig,
        credentials: Arc<dyn CredentialStore>,
        state: Arc<dyn StateStore>,
        targets: Arc<dyn TargetProvider>,
    ) -> Result<Self> {
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(&config.user_agent)?);
        let mode = AccountConnection::from_config(&account, &config.device_type).auth_mode;

        let mut auth =
            Authenticator::new(&account.id, mode, credentials, config.token_grace_secs);
        if let AuthConfig::OAuth2 {
            token_url,
            client_id,
            client_secret,
        } = &account.auth
        {
            auth = auth.with_refresher(Arc::new(OAuthClient::new(
                token_url,
                client_id,
                client_secret.as_deref(),
            )));
        }

        let transport = Transport::new(http.clone(), auth, &config)
            .with_discovery(Arc::new(Autodiscover::new(http, &config)));
        Self::new(config, account, transport, state, targets)
    }

    pub fn with_mapper(mut self, mapper: Arc<dyn ItemMapper>) -> Self {
        self.mapper = mapper;
        self
    }

    pub fn with_events(mut self, events: Sender<SyncEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Replace the event channel with a fresh unbounded one
    pub fn subscribe(&mut self) -> Receiver<SyncEvent> {
        let (tx, rx) = flume::unbounded();
        self.events = Some(tx);
        rx
    }

    /// Set to abort the running attempt at its next suspension point.
    /// Cleared when the attempt ends.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn connection(&self) -> &AccountConnection {
        &self.conn
    }

    /// Run one sync attempt for the account
    pub async fn sync_account(&mut self, trigger: SyncTrigger) -> SyncStatus {
        info!(
            "Starting {:?} sync for account {}",
            trigger, self.conn.account_id
        );

        if trigger == SyncTrigger::Automatic {
            if let Some(until) = self.conn.no_autosync_until.filter(|until| *until > Utc::now()) {
                info!(
                    "Automatic sync of {} suppressed until {}",
                    self.conn.account_id, until
                );
                let status = SyncStatus::new(
                    "throttled",
                    Some(format!("automatic sync suppressed until {}", until)),
                );
                return self.finish(status);
            }
        }

        let mut resets = 0;
        let status = loop {
            let result = self.run_cycle().await;
            match self.settle(result) {
                SyncOutcome::Continue => break SyncStatus::ok(),
                SyncOutcome::Terminal(status) => break status,
                SyncOutcome::Reset(scope) => {
                    resets += 1;
                    if resets > self.config.account_resync_limit {
                        break SyncStatus::new(
                            "resynclimit",
                            Some(format!("account reset {} times", resets - 1)),
                        );
                    }
                    warn!(
                        "Restarting sync of {} ({:?} reset {}/{})",
                        self.conn.account_id, scope, resets, self.config.account_resync_limit
                    );
                    if scope == ResetScope::Account {
                        if let Err(e) = self.reset_account() {
                            break SyncStatus::from_error(&e);
                        }
                    }
                }
            }
        };

        self.finish(status)
    }

    async fn run_cycle(&mut self) -> Step {
        self.set_phase(SyncPhase::CheckOptions);
        self.check_options().await?;

        self.set_phase(SyncPhase::NegotiateVersion);
        self.negotiate_version()?;

        self.set_phase(SyncPhase::Provision);
        self.provision().await?;

        self.set_phase(SyncPhase::FolderHierarchy);
        self.sync_hierarchy().await?;

        self.set_phase(SyncPhase::FolderSync);
        let folders = self.state.load_folders(&self.conn.account_id)?;
        for folder in folders
            .into_iter()
            .filter(|folder| folder.selected && folder.folder_type.is_syncable())
        {
            self.check_cancel()?;
            self.sync_folder(folder).await?;
        }

        Ok(())
    }

    fn finish(&mut self, mut status: SyncStatus) -> SyncStatus {
        if let Err(e) = self.state.persist_account(&self.conn) {
            error!("Failed to persist account {}: {}", self.conn.account_id, e);
            if status.is_ok() {
                status = SyncStatus::from_error(&e);
            }
        }
        self.cancel.store(false, Ordering::SeqCst);
        status.transcript = std::mem::take(&mut self.transcript);

        if status.is_ok() {
            info!("Sync of {} complete", self.conn.account_id);
        } else {
            warn!(
                "Sync of {} ended with {}: {}",
                self.conn.account_id,
                status.code,
                status.detail.as_deref().unwrap_or("")
            );
        }

        self.set_phase(SyncPhase::Done);
        self.emit(SyncEvent::Finished(status.clone()));
        status
    }

    /// Drop every folder binding and start over from an empty hierarchy
    fn reset_account(&mut self) -> Result<()> {
        let account_id = self.conn.account_id.clone();
        for folder in self.state.load_folders(&account_id)? {
            self.state.cache_folder(&account_id, &folder)?;
            self.targets.discard_target(&folder)?;
            self.state.remove_folder(&account_id, &folder.server_id)?;
        }

        self.conn.folder_sync_key = INITIAL_SYNC_KEY.to_string();
        self.conn.policy_key = None;
        self.conn.provisioning = self.account.provision;
        self.state.persist_account(&self.conn)
    }

    /// Turn a cycle result into the account loop's next move
    fn settle(&mut self, result: Step) -> SyncOutcome {
        match result {
            Ok(()) => SyncOutcome::Continue,
            Err(Interrupt::Reset(scope)) => SyncOutcome::Reset(scope),
            Err(Interrupt::Terminal(status)) => SyncOutcome::Terminal(status),
            Err(Interrupt::Error(EasError::ProvisionRequired)) => {
                info!("Server requires provisioning for {}", self.conn.account_id);
                self.conn.provisioning = true;
                self.conn.policy_key = None;
                SyncOutcome::Reset(ResetScope::Connection)
            }
            Err(Interrupt::Error(EasError::Redirect(host))) => {
                info!("Account {} moved to {}", self.conn.account_id, host);
                self.conn.host = host;
                SyncOutcome::Reset(ResetScope::Connection)
            }
            Err(Interrupt::Error(e)) => {
                error!("Sync of {} failed: {}", self.conn.account_id, e);
                SyncOutcome::Terminal(SyncStatus::from_error(&e))
            }
        }
    }

    /// Apply a classified status to account state; non-continuing actions
    /// become interruptions
    pub(super) fn check_status(&mut self, classification: Classification) -> Step<StatusAction> {
        let Classification {
            action,
            key,
            effect,
        } = classification;

        match effect {
            Some(AccountEffect::Reprovision) => {
                self.conn.provisioning = true;
                self.conn.policy_key = None;
            }
            Some(AccountEffect::Cooldown) => {
                let until = Utc::now() + Duration::seconds(self.config.throttle_cooldown_secs);
                warn!(
                    "Server throttled {}, no automatic sync until {}",
                    self.conn.account_id, until
                );
                self.conn.no_autosync_until = Some(until);
            }
            None => {}
        }

        match action {
            StatusAction::Continue | StatusAction::SoftFail => Ok(action),
            StatusAction::ResyncFolder => {
                debug!("{} requires a folder resync", key);
                Err(Interrupt::Reset(ResetScope::Folder))
            }
            StatusAction::ResyncAccount if effect == Some(AccountEffect::Reprovision) => {
                Err(Interrupt::Reset(ResetScope::Connection))
            }
            StatusAction::ResyncAccount => {
                debug!("{} requires an account resync", key);
                Err(Interrupt::Reset(ResetScope::Account))
            }
            StatusAction::Abort(code) => Err(Interrupt::Terminal(SyncStatus::new(code, Some(key)))),
        }
    }

    pub(super) fn check_cancel(&self) -> Step {
        if self.cancel.load(Ordering::SeqCst) {
            info!("Sync of {} cancelled", self.conn.account_id);
            return Err(EasError::Cancelled.into());
        }
        Ok(())
    }

    /// One request/response exchange
    pub(super) async fn send(
        &mut self,
        request: &Element,
        options: RequestOptions,
    ) -> Step<Option<Element>> {
        self.check_cancel()?;
        let (response, record) = self.transport.exchange(&mut self.conn, request, options).await;
        self.transcript.push(record);
        Ok(response?)
    }

    /// Exchange whose response must carry a body
    pub(super) async fn exchange(&mut self, request: &Element) -> Step<Element> {
        match self.send(request, RequestOptions::default()).await? {
            Some(response) => Ok(response),
            None => {
                Err(EasError::MalformedPayload(format!("empty {} response", request.name)).into())
            }
        }
    }

    pub(super) fn version(&self) -> Result<ProtocolVersion> {
        self.conn
            .version
            .ok_or_else(|| EasError::Config("protocol version not negotiated".to_string()))
    }

    pub(super) fn persist_folder(&self, folder: &Folder) -> Result<()> {
        self.state.persist_folder(&self.conn.account_id, folder)
    }

    fn set_phase(&self, phase: SyncPhase) {
        debug!("Account {} entering {:?}", self.conn.account_id, phase);
        self.emit(SyncEvent::PhaseChanged {
            account_id: self.conn.account_id.clone(),
            phase,
        });
    }

    pub(super) fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.send(event) {
                warn!("Failed to emit sync event: {}", e);
            }
        }
    }
}
