//! Context Aggregator.
//!
//! Builds the [`ContentGenerationContext`] for one page by fanning out to the
//! upstream provider for tenant instructions, every relevant agent output and
//! every relevant tool snapshot, all concurrently. A failed or timed-out fetch
//! leaves its slot absent; it never fails the context as a whole.

pub mod cache;
pub mod mapping;

use crate::clock::Clock;
use crate::config::AggregatorConfig;
use crate::error::Result;
use crate::external::{FetchContext, TenantInstructions, UpstreamProvider};
use crate::types::{Mode, Tier};
use cache::TtlCache;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use mapping::PageSourceMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

pub use mapping::PageSources;

const INSTRUCTIONS_KEY: &str = "tenant";

// ---------------------------------------------------------------------------
// ContentGenerationContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentGenerationContext {
    pub page_id: String,
    pub tier: Tier,
    pub mode: Mode,
    pub instructions: TenantInstructions,
    /// True when the upstream instructions were unavailable and the
    /// configured defaults were substituted.
    pub default_instructions: bool,
    pub agent_outputs: BTreeMap<String, serde_json::Value>,
    pub tool_data: BTreeMap<String, serde_json::Value>,
    pub missing_agents: Vec<String>,
    pub missing_tools: Vec<String>,
    pub required_tools: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl ContentGenerationContext {
    /// Number of agent and tool sources that were queried.
    pub fn queried_slots(&self) -> usize {
        self.agent_outputs.len()
            + self.tool_data.len()
            + self.missing_agents.len()
            + self.missing_tools.len()
    }

    pub fn populated_slots(&self) -> usize {
        self.agent_outputs.len() + self.tool_data.len()
    }

    pub fn missing_required_tools(&self) -> Vec<&str> {
        self.required_tools
            .iter()
            .filter(|t| !self.tool_data.contains_key(t.as_str()))
            .map(String::as_str)
            .collect()
    }

    /// A context missing a required tool is lower-confidence, not an error.
    pub fn is_complete(&self) -> bool {
        self.missing_required_tools().is_empty()
    }

    pub fn is_degraded(&self) -> bool {
        self.default_instructions || !self.missing_agents.is_empty() || !self.missing_tools.is_empty()
    }

    /// Human-readable caveats for the audit trail.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.default_instructions {
            warnings.push("tenant instructions unavailable; defaults used".to_string());
        }
        if !self.missing_agents.is_empty() {
            warnings.push(format!(
                "agent outputs unavailable: {}",
                self.missing_agents.join(", ")
            ));
        }
        if !self.missing_tools.is_empty() {
            warnings.push(format!(
                "tool data unavailable: {}",
                self.missing_tools.join(", ")
            ));
        }
        let required = self.missing_required_tools();
        if !required.is_empty() {
            warnings.push(format!(
                "context incomplete; required tools missing: {}",
                required.join(", ")
            ));
        }
        warnings
    }
}

// ---------------------------------------------------------------------------
// ContextAggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Instructions,
    Agent,
    Tool,
}

impl SlotKind {
    fn as_str(self) -> &'static str {
        match self {
            SlotKind::Instructions => "instructions",
            SlotKind::Agent => "agent",
            SlotKind::Tool => "tool",
        }
    }
}

pub struct ContextAggregator {
    upstream: Arc<dyn UpstreamProvider>,
    clock: Arc<dyn Clock>,
    sources: PageSourceMap,
    default_instructions: TenantInstructions,
    timeout: std::time::Duration,
    instructions_cache: TtlCache<TenantInstructions>,
    agent_cache: TtlCache<serde_json::Value>,
    tool_cache: TtlCache<serde_json::Value>,
}

impl ContextAggregator {
    pub fn new(
        config: &AggregatorConfig,
        upstream: Arc<dyn UpstreamProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            upstream,
            clock,
            sources: config.sources.clone(),
            default_instructions: config.default_instructions.clone(),
            timeout: std::time::Duration::from_millis(config.fetch_timeout_ms),
            instructions_cache: TtlCache::new(Duration::seconds(config.instructions_ttl_secs as i64)),
            agent_cache: TtlCache::new(Duration::seconds(config.agent_ttl_secs as i64)),
            tool_cache: TtlCache::new(Duration::seconds(config.tool_ttl_secs as i64)),
        }
    }

    /// Gather everything needed to regenerate `page_id`. Never fails.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_page_generation_context(
        &self,
        page_id: &str,
        tier: Tier,
        mode: Mode,
    ) -> ContentGenerationContext {
        let sources = self.sources.resolve(page_id).clone();
        let fetch_ctx = FetchContext {
            page_id: page_id.to_string(),
            tier,
            mode,
        };
        let agents = dedup(&sources.agents);
        let tools = dedup(&sources.tools);

        let instructions_fut = self.cached_fetch(
            &self.instructions_cache,
            SlotKind::Instructions,
            INSTRUCTIONS_KEY,
            self.upstream.fetch_instructions(),
        );
        let agent_futs = agents.iter().map(|id| {
            self.cached_fetch(
                &self.agent_cache,
                SlotKind::Agent,
                id,
                self.upstream.fetch_agent_output(id, &fetch_ctx),
            )
        });
        let tool_futs = tools.iter().map(|id| {
            self.cached_fetch(
                &self.tool_cache,
                SlotKind::Tool,
                id,
                self.upstream.fetch_tool_data(id, &fetch_ctx),
            )
        });

        let (instructions, agent_results, tool_results) =
            tokio::join!(instructions_fut, join_all(agent_futs), join_all(tool_futs));

        let (agent_outputs, missing_agents) = split_slots(&agents, agent_results);
        let (tool_data, missing_tools) = split_slots(&tools, tool_results);

        let default_instructions = instructions.is_none();
        let ctx = ContentGenerationContext {
            page_id: page_id.to_string(),
            tier,
            mode,
            instructions: instructions.unwrap_or_else(|| self.default_instructions.clone()),
            default_instructions,
            agent_outputs,
            tool_data,
            missing_agents,
            missing_tools,
            required_tools: sources.required_tools,
            generated_at: self.clock.now(),
        };
        if ctx.is_degraded() {
            tracing::warn!(
                page_id,
                populated = ctx.populated_slots(),
                queried = ctx.queried_slots(),
                "generation context degraded"
            );
        }
        ctx
    }

    /// Drop one cached slot so the next context refetches it.
    pub fn invalidate(&self, kind: SlotKind, id: &str) -> bool {
        match kind {
            SlotKind::Instructions => self.instructions_cache.invalidate(INSTRUCTIONS_KEY),
            SlotKind::Agent => self.agent_cache.invalidate(id),
            SlotKind::Tool => self.tool_cache.invalidate(id),
        }
    }

    pub fn clear_cache(&self) {
        self.instructions_cache.clear();
        self.agent_cache.clear();
        self.tool_cache.clear();
    }

    async fn cached_fetch<T, F>(
        &self,
        cache: &TtlCache<T>,
        kind: SlotKind,
        id: &str,
        fetch: F,
    ) -> Option<T>
    where
        T: Clone,
        F: Future<Output = Result<T>>,
    {
        if let Some(hit) = cache.get(id, self.clock.now()) {
            return Some(hit);
        }
        match tokio::time::timeout(self.timeout, fetch).await {
            Ok(Ok(value)) => {
                cache.insert(id, value.clone(), self.clock.now());
                Some(value)
            }
            Ok(Err(e)) => {
                tracing::warn!(kind = kind.as_str(), id, error = %e, "upstream fetch failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    kind = kind.as_str(),
                    id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "upstream fetch timed out"
                );
                None
            }
        }
    }
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        if !out.contains(id) {
            out.push(id.clone());
        }
    }
    out
}

fn split_slots(
    ids: &[String],
    results: Vec<Option<serde_json::Value>>,
) -> (BTreeMap<String, serde_json::Value>, Vec<String>) {
    let mut present = BTreeMap::new();
    let mut missing = Vec::new();
    for (id, result) in ids.iter().zip(results) {
        match result {
            Some(v) => {
                present.insert(id.clone(), v);
            }
            None => missing.push(id.clone()),
        }
    }
    (present, missing)
}
