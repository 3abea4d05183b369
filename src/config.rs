//! Simulation configuration and process settings.
//!
//! [`SimulationConfig`] travels with every simulation request; [`Settings`]
//! is read once from the environment at startup and wires the binary.

use crate::error::Result;
use crate::PipelineError;
use serde::{Deserialize, Serialize};

/// How deep the simulated interviews should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Quick,
    #[default]
    Detailed,
    Comprehensive,
}

/// Tone of the simulated interview responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStyle {
    #[default]
    Realistic,
    Optimistic,
    Critical,
    Mixed,
}

impl ResponseStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStyle::Realistic => "realistic",
            ResponseStyle::Optimistic => "optimistic",
            ResponseStyle::Critical => "critical",
            ResponseStyle::Mixed => "mixed",
        }
    }
}

/// Per-request configuration for the simulation stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub depth: Depth,
    #[serde(default)]
    pub response_style: ResponseStyle,
    /// Sampling temperature for interview responses, 0.0-1.0.
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Synthetic interviewees generated per stakeholder, 1-10.
    #[serde(default = "default_people_per_stakeholder")]
    pub people_per_stakeholder: u32,
    /// Whether to aggregate simulation-level insights after the fanout.
    #[serde(default = "default_true")]
    pub include_insights: bool,
    /// Upper bound on interviews suspended on I/O at once, 1-32.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_temperature() -> f64 {
    0.7
}

fn default_people_per_stakeholder() -> u32 {
    5
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    12
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            depth: Depth::default(),
            response_style: ResponseStyle::default(),
            temperature: default_temperature(),
            people_per_stakeholder: default_people_per_stakeholder(),
            include_insights: true,
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl SimulationConfig {
    /// Validate ranges and clamp the concurrency bound.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(PipelineError::InvalidInput(format!(
                "temperature {} outside 0.0-1.0",
                self.temperature
            )));
        }
        if !(1..=10).contains(&self.people_per_stakeholder) {
            return Err(PipelineError::InvalidInput(format!(
                "people_per_stakeholder {} outside 1-10",
                self.people_per_stakeholder
            )));
        }
        Ok(())
    }

    /// The effective interview concurrency bound (clamped to 1-32).
    pub fn concurrency_bound(&self) -> usize {
        self.max_concurrent.clamp(1, 32)
    }

    /// Build a config from the environment, honouring `MAX_PERSONAS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("MAX_PERSONAS") {
            if let Ok(max) = raw.parse::<u32>() {
                config.people_per_stakeholder = config.people_per_stakeholder.min(max).max(1);
            }
        }
        config
    }
}

/// Process-level settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Credentials for the model vendor. Absence is fatal.
    pub api_key: String,
    /// Address the HTTP server binds to.
    pub bind_addr: String,
    /// SQLite database path.
    pub database_path: String,
    /// Whether the authentication middleware is enabled (outside the core).
    pub enable_clerk_validation: bool,
}

impl Settings {
    /// Read settings from the environment.
    ///
    /// `GEMINI_API_KEY` or `GOOGLE_API_KEY` must be set; either works.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .map_err(|_| {
                PipelineError::InvalidInput(
                    "GEMINI_API_KEY or GOOGLE_API_KEY must be set".into(),
                )
            })?;

        Ok(Self {
            api_key,
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into()),
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "persona_pipeline.db".into()),
            enable_clerk_validation: std::env::var("ENABLE_CLERK_VALIDATION")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        })
    }
}
