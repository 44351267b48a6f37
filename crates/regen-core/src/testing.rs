//! Scripted collaborators for unit tests.

use crate::error::{RegenError, Result};
use crate::external::{
    FetchContext, Notification, Notifier, RegenerationParams, Regenerator, RunResult,
    TenantInstructions, TriggerMetadata, UpstreamProvider,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ScriptedUpstream
// ---------------------------------------------------------------------------

/// Upstream that answers from a fixed table; unscripted ids fail.
pub struct ScriptedUpstream {
    instructions: Option<TenantInstructions>,
    agents: HashMap<String, serde_json::Value>,
    tools: HashMap<String, serde_json::Value>,
    delays: HashMap<String, Duration>,
    calls: Mutex<HashMap<String, usize>>,
}

impl Default for ScriptedUpstream {
    fn default() -> Self {
        Self {
            instructions: Some(TenantInstructions {
                tone_rules: vec!["plain language".to_string()],
                ..Default::default()
            }),
            agents: HashMap::new(),
            tools: HashMap::new(),
            delays: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl ScriptedUpstream {
    pub fn failing() -> Self {
        Self {
            instructions: None,
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, id: &str, output: serde_json::Value) -> Self {
        self.agents.insert(id.to_string(), output);
        self
    }

    pub fn with_tool(mut self, id: &str, data: serde_json::Value) -> Self {
        self.tools.insert(id.to_string(), data);
        self
    }

    pub fn with_delay(mut self, id: &str, delay: Duration) -> Self {
        self.delays.insert(id.to_string(), delay);
        self
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or_default()
    }

    async fn record(&self, id: &str) {
        *self.calls.lock().unwrap().entry(id.to_string()).or_default() += 1;
        if let Some(delay) = self.delays.get(id) {
            tokio::time::sleep(*delay).await;
        }
    }
}

#[async_trait]
impl UpstreamProvider for ScriptedUpstream {
    async fn fetch_instructions(&self) -> Result<TenantInstructions> {
        self.record("instructions").await;
        self.instructions
            .clone()
            .ok_or_else(|| RegenError::Upstream("instructions unavailable".into()))
    }

    async fn fetch_agent_output(
        &self,
        agent_id: &str,
        _ctx: &FetchContext,
    ) -> Result<serde_json::Value> {
        self.record(agent_id).await;
        self.agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RegenError::Upstream(format!("agent {agent_id} unavailable")))
    }

    async fn fetch_tool_data(
        &self,
        tool_id: &str,
        _ctx: &FetchContext,
    ) -> Result<serde_json::Value> {
        self.record(tool_id).await;
        self.tools
            .get(tool_id)
            .cloned()
            .ok_or_else(|| RegenError::Upstream(format!("tool {tool_id} unavailable")))
    }
}

// ---------------------------------------------------------------------------
// ScriptedRegenerator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RegenerationCall {
    pub workflow_id: String,
    pub page_id: String,
    pub trigger: TriggerMetadata,
}

/// Returns queued results in order, then a default success for `body`.
pub struct ScriptedRegenerator {
    body: serde_json::Value,
    confidence: f64,
    queued: Mutex<VecDeque<Result<RunResult>>>,
    calls: Mutex<Vec<RegenerationCall>>,
}

impl ScriptedRegenerator {
    pub fn succeeding(body: serde_json::Value, confidence: f64) -> Self {
        Self {
            body,
            confidence,
            queued: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, result: Result<RunResult>) {
        self.queued.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<RegenerationCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Regenerator for ScriptedRegenerator {
    async fn run_regeneration(
        &self,
        workflow_id: &str,
        params: &RegenerationParams,
        trigger: &TriggerMetadata,
    ) -> Result<RunResult> {
        self.calls.lock().unwrap().push(RegenerationCall {
            workflow_id: workflow_id.to_string(),
            page_id: params.page_id.clone(),
            trigger: trigger.clone(),
        });
        if let Some(next) = self.queued.lock().unwrap().pop_front() {
            return next;
        }
        Ok(RunResult {
            success: true,
            run_id: Some(format!("run-{}", self.calls.lock().unwrap().len())),
            content: Some(self.body.clone()),
            confidence: Some(self.confidence),
            warnings: Vec::new(),
            error: None,
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        if self.fail {
            return Err(RegenError::Upstream("notification channel down".into()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
