use std::path::Path;

use anyhow::{Context, bail};

mod env;
mod types;


pub use types::*;

impl Config {
    /// Load configuration from a TOML file with env var overrides, then validate.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or the
    /// resulting configuration is invalid.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let o = &self.orchestrator;
        if o.global_budget_ms == 0 {
            bail!("orchestrator.global_budget_ms must be greater than zero");
        }
        if !(o.per_source_fraction > 0.0 && o.per_source_fraction <= 1.0) {
            bail!(
                "orchestrator.per_source_fraction must be in (0, 1], got {}",
                o.per_source_fraction
            );
        }
        if o.per_source_floor_ms > o.global_budget_ms {
            bail!(
                "orchestrator.per_source_floor_ms ({}) exceeds global_budget_ms ({})",
                o.per_source_floor_ms,
                o.global_budget_ms
            );
        }
        if o.llm_timeout_ms == 0 {
            bail!("orchestrator.llm_timeout_ms must be greater than zero");
        }
        if self.synthesis.top_k == 0 {
            bail!("synthesis.top_k must be greater than zero");
        }
        if self.sources.vector_top_k == 0 {
            bail!("sources.vector_top_k must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.sources.rerank_weight) {
            bail!(
                "sources.rerank_weight must be in [0, 1], got {}",
                self.sources.rerank_weight
            );
        }
        Ok(())
    }
}
