//! Cost tracking and budget management.
//!
//! The ledger converts (model, input tokens, output tokens) triples into a
//! monetary amount using a per-model rate table, accumulates entries, and
//! fires threshold alerts at fixed fractions of the configured budget. Each
//! threshold fires at most once per ledger lifetime. Entries and the
//! triggered-threshold set can optionally be persisted to disk and reloaded
//! on construction.

use crate::error::Result;
use crate::{sflog, sflog_warn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;

/// Per-1K-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRate {
    /// USD per 1K input tokens.
    pub input_per_1k: f64,
    /// USD per 1K output tokens.
    pub output_per_1k: f64,
}

/// Rate applied when the model is not in the pricing table.
pub const DEFAULT_RATE: ModelRate = ModelRate {
    input_per_1k: 0.003,
    output_per_1k: 0.015,
};

/// Built-in pricing table, USD per 1K tokens.
const PRICING: &[(&str, ModelRate)] = &[
    ("claude-opus-4", ModelRate { input_per_1k: 0.015, output_per_1k: 0.075 }),
    ("claude-sonnet-4", ModelRate { input_per_1k: 0.003, output_per_1k: 0.015 }),
    ("claude-haiku-3.5", ModelRate { input_per_1k: 0.0008, output_per_1k: 0.004 }),
    ("gpt-4o", ModelRate { input_per_1k: 0.005, output_per_1k: 0.015 }),
    ("gpt-4o-mini", ModelRate { input_per_1k: 0.00015, output_per_1k: 0.0006 }),
    ("gemini-2.0-flash", ModelRate { input_per_1k: 0.0001, output_per_1k: 0.0004 }),
    ("gemini-2.0-pro", ModelRate { input_per_1k: 0.00125, output_per_1k: 0.005 }),
];

/// Look up the rate for a model, falling back to the default rate.
pub fn rate_for(model: &str) -> ModelRate {
    PRICING
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, rate)| *rate)
        .unwrap_or(DEFAULT_RATE)
}

/// A single priced usage event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    /// When the usage was recorded.
    pub timestamp: DateTime<Utc>,
    /// Model identifier used for pricing.
    pub model: String,
    /// Input token count.
    pub input_tokens: u64,
    /// Output token count.
    pub output_tokens: u64,
    /// Priced amount in USD.
    pub cost_usd: f64,
    /// Task runner that incurred the usage.
    pub runner: Option<String>,
    /// Step that incurred the usage.
    pub step_id: Option<String>,
}

/// A budget threshold alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAlert {
    /// Budget fraction that was crossed (e.g. 0.75).
    pub threshold: f64,
    /// Human-readable alert message.
    pub message: String,
    /// When the threshold was crossed.
    pub triggered_at: DateTime<Utc>,
}

/// Breakdown of accumulated spend.
#[derive(Debug, Clone, Serialize)]
pub struct CostSummary {
    pub total_cost_usd: f64,
    pub budget_usd: f64,
    pub remaining_usd: f64,
    pub percent_used: f64,
    pub entry_count: usize,
    pub by_model: HashMap<String, f64>,
    pub by_runner: HashMap<String, f64>,
    pub alerts: Vec<BudgetAlert>,
}

/// Default alert fractions of the budget.
pub const DEFAULT_ALERT_THRESHOLDS: &[f64] = &[0.5, 0.75, 0.9, 1.0];

#[derive(Serialize, Deserialize, Default)]
struct LedgerState {
    entries: Vec<CostEntry>,
    triggered_thresholds: Vec<u32>,
}

/// Tracks priced usage events and enforces a cumulative budget.
pub struct CostLedger {
    budget_usd: f64,
    persist_path: Option<PathBuf>,
    entries: Vec<CostEntry>,
    alerts: Vec<BudgetAlert>,
    thresholds: Vec<f64>,
    // Keyed by percent (threshold * 100) because f64 is not Eq + Hash.
    triggered: HashSet<u32>,
}

impl CostLedger {
    /// Create a ledger with the given budget ceiling and default thresholds.
    pub fn new(budget_usd: f64) -> Self {
        Self {
            budget_usd,
            persist_path: None,
            entries: Vec::new(),
            alerts: Vec::new(),
            thresholds: DEFAULT_ALERT_THRESHOLDS.to_vec(),
            triggered: HashSet::new(),
        }
    }

    /// Override the alert thresholds (fractions of the budget).
    pub fn with_thresholds(mut self, thresholds: Vec<f64>) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Enable persistence at the given path, reloading prior state if present.
    pub fn with_persistence(mut self, path: PathBuf) -> Self {
        self.persist_path = Some(path);
        self.load();
        self
    }

    /// The configured budget ceiling.
    pub fn budget_usd(&self) -> f64 {
        self.budget_usd
    }

    fn load(&mut self) {
        let Some(path) = &self.persist_path else {
            return;
        };
        if !path.exists() {
            return;
        }
        match fs::read_to_string(path)
            .map_err(crate::Error::from)
            .and_then(|text| Ok(serde_json::from_str::<LedgerState>(&text)?))
        {
            Ok(state) => {
                self.entries = state.entries;
                self.triggered = state.triggered_thresholds.into_iter().collect();
            }
            Err(e) => sflog_warn!("Failed to load cost ledger from {}: {}", path.display(), e),
        }
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let state = LedgerState {
            entries: self.entries.clone(),
            triggered_thresholds: self.triggered.iter().copied().collect(),
        };
        fs::write(path, serde_json::to_string_pretty(&state)?)?;
        Ok(())
    }

    /// Price a usage triple without recording it.
    pub fn calculate_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
        let rate = rate_for(model);
        (input_tokens as f64 / 1000.0) * rate.input_per_1k
            + (output_tokens as f64 / 1000.0) * rate.output_per_1k
    }

    /// Record a priced usage event.
    ///
    /// Evaluates threshold alerts and persists the ledger when persistence
    /// is enabled.
    pub fn record(
        &mut self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        runner: Option<&str>,
        step_id: Option<&str>,
    ) -> Result<CostEntry> {
        let cost = self.calculate_cost(model, input_tokens, output_tokens);
        let entry = CostEntry {
            timestamp: Utc::now(),
            model: model.to_string(),
            input_tokens,
            output_tokens,
            cost_usd: cost,
            runner: runner.map(|s| s.to_string()),
            step_id: step_id.map(|s| s.to_string()),
        };
        self.entries.push(entry.clone());
        self.check_alerts();
        self.save()?;
        sflog!(
            "Recorded cost: ${:.4} ({}, {}+{} tokens)",
            cost,
            model,
            input_tokens,
            output_tokens
        );
        Ok(entry)
    }

    fn check_alerts(&mut self) {
        if self.budget_usd <= 0.0 {
            return;
        }
        let fraction_used = self.total_cost() / self.budget_usd;

        for &threshold in &self.thresholds.clone() {
            let key = (threshold * 100.0).round() as u32;
            if !self.triggered.contains(&key) && fraction_used >= threshold {
                self.triggered.insert(key);
                let alert = BudgetAlert {
                    threshold,
                    message: format!(
                        "Budget alert: {:.0}% of ${:.2} used (${:.2})",
                        threshold * 100.0,
                        self.budget_usd,
                        self.total_cost()
                    ),
                    triggered_at: Utc::now(),
                };
                sflog_warn!("{}", alert.message);
                self.alerts.push(alert);
            }
        }
    }

    /// Total spend across all entries.
    pub fn total_cost(&self) -> f64 {
        self.entries.iter().map(|e| e.cost_usd).sum()
    }

    /// Remaining budget, floored at zero.
    pub fn remaining_budget(&self) -> f64 {
        (self.budget_usd - self.total_cost()).max(0.0)
    }

    /// Check if cumulative spend has reached the ceiling.
    pub fn is_over_budget(&self) -> bool {
        self.total_cost() >= self.budget_usd
    }

    /// Alerts triggered so far.
    pub fn alerts(&self) -> &[BudgetAlert] {
        &self.alerts
    }

    /// All recorded entries.
    pub fn entries(&self) -> &[CostEntry] {
        &self.entries
    }

    /// Breakdown of spend by model and by runner.
    pub fn summary(&self) -> CostSummary {
        let total = self.total_cost();
        let mut by_model: HashMap<String, f64> = HashMap::new();
        let mut by_runner: HashMap<String, f64> = HashMap::new();

        for entry in &self.entries {
            *by_model.entry(entry.model.clone()).or_default() += entry.cost_usd;
            if let Some(runner) = &entry.runner {
                *by_runner.entry(runner.clone()).or_default() += entry.cost_usd;
            }
        }

        CostSummary {
            total_cost_usd: total,
            budget_usd: self.budget_usd,
            remaining_usd: self.remaining_budget(),
            percent_used: if self.budget_usd > 0.0 {
                total / self.budget_usd * 100.0
            } else {
                0.0
            },
            entry_count: self.entries.len(),
            by_model,
            by_runner,
            alerts: self.alerts.clone(),
        }
    }

    /// Reset all tracking state.
    pub fn reset(&mut self) -> Result<()> {
        self.entries.clear();
        self.alerts.clear();
        self.triggered.clear();
        self.save()
    }
}

impl std::fmt::Debug for CostLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostLedger")
            .field("budget_usd", &self.budget_usd)
            .field("entries", &self.entries.len())
            .field("total_cost", &self.total_cost())
            .finish()
    }
}
