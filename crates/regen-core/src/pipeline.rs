//! Wiring: one project root, one set of components.
//!
//! `Pipeline::open` builds the production graph (filesystem stores, redb
//! approvals, HTTP upstream). `Pipeline::from_parts` takes the external
//! collaborators explicitly so tests and embedders can substitute them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::aggregator::ContextAggregator;
use crate::approval::ApprovalGate;
use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::external::{HealthProbe, LogNotifier, Notifier, Regenerator, UpstreamProvider};
use crate::ledger::Ledger;
use crate::paths;
use crate::store::{FsBlobStore, FsContentStore};
use crate::trigger::{ProcessEventResult, TriggerDeps, TriggerEvent, TriggerManager, TriggerState};
use crate::upstream::HttpUpstream;

/// External collaborators a pipeline is built around.
pub struct Collaborators {
    pub upstream: Arc<dyn UpstreamProvider>,
    pub regenerator: Arc<dyn Regenerator>,
    pub health: Arc<dyn HealthProbe>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

pub struct Pipeline {
    root: PathBuf,
    config: PipelineConfig,
    aggregator: Arc<ContextAggregator>,
    approvals: Arc<ApprovalGate>,
    ledger: Arc<Ledger>,
    triggers: TriggerManager,
}

impl Pipeline {
    pub fn open(root: &Path, config: PipelineConfig) -> Result<Self> {
        let http = Arc::new(HttpUpstream::new(&config.upstream)?);
        let parts = Collaborators {
            upstream: http.clone(),
            regenerator: http.clone(),
            health: http,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
        };
        Self::from_parts(root, config, parts)
    }

    pub fn from_parts(root: &Path, config: PipelineConfig, parts: Collaborators) -> Result<Self> {
        let ledger = Arc::new(Ledger::new(
            Arc::new(FsBlobStore::new(paths::ledger_dir(root))),
            Arc::new(FsContentStore::new(paths::content_dir(root))),
            config.retention,
            parts.clock.clone(),
        ));
        let approvals = Arc::new(ApprovalGate::open(
            &paths::approvals_db_path(root),
            config.approval.clone(),
            parts.notifier.clone(),
            parts.clock.clone(),
        )?);
        let aggregator = Arc::new(ContextAggregator::new(
            &config.aggregator,
            parts.upstream,
            parts.clock.clone(),
        ));

        let deps = TriggerDeps {
            aggregator: aggregator.clone(),
            approvals: approvals.clone(),
            ledger: ledger.clone(),
            regenerator: parts.regenerator,
            notifier: parts.notifier,
            health: parts.health,
            clock: parts.clock,
        };
        let triggers =
            TriggerManager::new(config.rules.clone(), deps).with_state(load_trigger_state(root)?);

        Ok(Self {
            root: root.to_path_buf(),
            config,
            aggregator,
            approvals,
            ledger,
            triggers,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn aggregator(&self) -> &ContextAggregator {
        &self.aggregator
    }

    pub fn approvals(&self) -> &ApprovalGate {
        &self.approvals
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn triggers(&self) -> &TriggerManager {
        &self.triggers
    }

    /// Run one event through the trigger rules and persist the updated
    /// cooldown state.
    pub async fn process_event(&self, event: &TriggerEvent) -> Result<ProcessEventResult> {
        let result = self.triggers.process_event(event).await;
        self.save_trigger_state()?;
        Ok(result)
    }

    pub fn save_trigger_state(&self) -> Result<()> {
        let data = serde_json::to_vec_pretty(&self.triggers.state())?;
        crate::io::atomic_write(&paths::trigger_state_path(&self.root), &data)
    }
}

/// Load persisted trigger state. A missing file is a fresh start; an
/// unreadable one is discarded with a warning.
pub fn load_trigger_state(root: &Path) -> Result<TriggerState> {
    let path = paths::trigger_state_path(root);
    if !path.exists() {
        return Ok(TriggerState::default());
    }
    let data = std::fs::read(&path)?;
    match serde_json::from_slice(&data) {
        Ok(state) => Ok(state),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "discarding unreadable trigger state");
            Ok(TriggerState::default())
        }
    }
}
