//! Static page → {agents, tools} relevance table.
//!
//! Resolution order for a page id such as `strategy-plans/quick-wins`:
//! 1. an exact entry in `pages`;
//! 2. the deepest path segment with an entry in `segments`
//!    (`quick-wins` beats `strategy-plans`);
//! 3. `default`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageSources {
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    /// Tools whose absence marks a context as incomplete.
    #[serde(default)]
    pub required_tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PageSourceMap {
    #[serde(default)]
    pub pages: BTreeMap<String, PageSources>,
    #[serde(default)]
    pub segments: BTreeMap<String, PageSources>,
    #[serde(default)]
    pub default: PageSources,
}

impl PageSourceMap {
    pub fn resolve(&self, page_id: &str) -> &PageSources {
        if let Some(exact) = self.pages.get(page_id) {
            return exact;
        }
        page_id
            .rsplit('/')
            .find_map(|segment| self.segments.get(segment))
            .unwrap_or(&self.default)
    }
}

/// Mapping shipped in a fresh config.
pub fn default_page_sources() -> PageSourceMap {
    let mut segments = BTreeMap::new();
    segments.insert(
        "strategy-plans".to_string(),
        PageSources {
            agents: vec!["strategy_workflow".to_string()],
            tools: vec!["analytics".to_string(), "content_inventory".to_string()],
            required_tools: vec!["analytics".to_string()],
        },
    );
    segments.insert(
        "quick-wins".to_string(),
        PageSources {
            agents: vec![
                "strategy_workflow".to_string(),
                "quick_wins_agent".to_string(),
            ],
            tools: vec!["analytics".to_string()],
            required_tools: vec!["analytics".to_string()],
        },
    );
    segments.insert(
        "maturity".to_string(),
        PageSources {
            agents: vec!["maturity_assessment".to_string()],
            tools: vec!["benchmarks".to_string()],
            required_tools: Vec::new(),
        },
    );
    PageSourceMap {
        pages: BTreeMap::new(),
        segments,
        default: PageSources {
            agents: vec!["strategy_workflow".to_string()],
            tools: Vec::new(),
            required_tools: Vec::new(),
        },
    }
}
