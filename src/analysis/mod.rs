//! Stage 3: the sequential analysis state machine.
//!
//! Six sub-stages run in fixed order over the stakeholder-aware transcript:
//!
//! ```text
//! theme_extraction -> pattern_detection -> stakeholder_analysis
//!   -> sentiment_analysis -> persona_generation -> insight_synthesis -> done
//! ```
//!
//! Transitions are unconditional; states cannot skip or repeat. A sub-stage
//! that produces malformed or empty output fills its slot with an empty
//! collection and processing continues; only non-malformed gateway errors
//! propagate and fail the stage. Cancellation aborts between sub-stages.

pub mod normalize;
pub mod themes;

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::gateway::{CallOptions, LlmGateway, TaskKind};
use crate::simulation::analysis_transcript;
use crate::store::Repository;
use crate::types::{
    AnalysisRecord, DetailedAnalysis, Insight, Pattern, SentimentDetail, SentimentOverview,
    StakeholderIntelligence,
};
use crate::PipelineError;

/// Shared context accumulated across sub-stages, for introspection.
#[derive(Debug, Clone)]
pub struct AnalysisContext {
    /// Corpus size in characters.
    pub data_size: usize,
    pub current_stage: String,
    pub completed_stages: Vec<String>,
    /// Model exchanges issued so far (streaming windows count individually).
    pub exchange_count: usize,
}

impl AnalysisContext {
    pub fn new(data_size: usize) -> Self {
        Self {
            data_size,
            current_stage: "initializing".into(),
            completed_stages: Vec::new(),
            exchange_count: 0,
        }
    }

    /// Advance to the next stage, recording the previous one as completed.
    pub fn advance(&mut self, next_stage: &str) {
        if !self.completed_stages.contains(&self.current_stage) {
            self.completed_stages.push(self.current_stage.clone());
        }
        self.current_stage = next_stage.to_string();
    }

    pub fn record_exchange(&mut self) {
        self.exchange_count += 1;
    }
}

#[derive(Debug, Default, Deserialize)]
struct PatternsOut {
    #[serde(default)]
    patterns: Vec<Pattern>,
    #[serde(default)]
    enhanced_patterns: Vec<Pattern>,
}

#[derive(Debug, Default, Deserialize)]
struct StakeholderOut {
    #[serde(default)]
    stakeholder_intelligence: Option<StakeholderIntelligence>,
}

#[derive(Debug, Default, Deserialize)]
struct SentimentOut {
    #[serde(default)]
    sentiment_overview: SentimentOverview,
    #[serde(default)]
    sentiment_details: Vec<SentimentDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct PersonasOut {
    #[serde(default)]
    personas: Vec<Value>,
    #[serde(default)]
    enhanced_personas: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct InsightsOut {
    #[serde(default)]
    insights: Vec<Insight>,
    #[serde(default)]
    enhanced_insights: Vec<Insight>,
}

/// Replace malformed sub-stage output with the empty slot; propagate
/// everything else.
fn absorb<T: Default>(sub_stage: &str, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_malformed() => {
            tracing::warn!(
                sub_stage,
                error = %err,
                "sub-stage output malformed, continuing with empty slot"
            );
            Ok(T::default())
        }
        Err(err) => Err(err),
    }
}

/// The six-sub-stage analysis pipeline.
#[derive(Clone)]
pub struct AnalysisPipeline {
    gateway: LlmGateway,
}

impl AnalysisPipeline {
    pub fn new(gateway: LlmGateway) -> Self {
        Self { gateway }
    }

    /// Run all sub-stages over the corpus and return the envelope.
    pub async fn run(&self, corpus: &str) -> Result<DetailedAnalysis> {
        let mut ctx = AnalysisContext::new(corpus.chars().count());
        let mut analysis = DetailedAnalysis::empty(corpus.len());
        let opts = CallOptions::default();

        ctx.advance("theme_extraction");
        self.gateway.check_cancelled()?;
        let themes = absorb(
            "theme_extraction",
            themes::extract(&self.gateway, corpus, &mut ctx).await,
        )?;
        analysis.themes = themes.themes;
        analysis.enhanced_themes = themes.enhanced_themes;

        ctx.advance("pattern_detection");
        self.gateway.check_cancelled()?;
        ctx.record_exchange();
        let patterns: PatternsOut = absorb(
            "pattern_detection",
            self.gateway
                .invoke(TaskKind::PatternDetection, &patterns_prompt(corpus), &opts)
                .await,
        )?;
        analysis.patterns = patterns.patterns;
        analysis.enhanced_patterns = patterns.enhanced_patterns;

        ctx.advance("stakeholder_analysis");
        self.gateway.check_cancelled()?;
        ctx.record_exchange();
        let stakeholders: StakeholderOut = absorb(
            "stakeholder_analysis",
            self.gateway
                .invoke(
                    TaskKind::StakeholderAnalysis,
                    &stakeholder_prompt(corpus),
                    &opts,
                )
                .await,
        )?;
        analysis.stakeholder_intelligence = stakeholders.stakeholder_intelligence.map(|mut si| {
            for detected in &mut si.detected_stakeholders {
                detected.influence_metrics = detected.influence_metrics.clamped();
            }
            si
        });

        ctx.advance("sentiment_analysis");
        self.gateway.check_cancelled()?;
        ctx.record_exchange();
        let sentiment: SentimentOut = absorb(
            "sentiment_analysis",
            self.gateway
                .invoke(TaskKind::SentimentAnalysis, &sentiment_prompt(corpus), &opts)
                .await,
        )?;
        analysis.sentiment_overview = sentiment.sentiment_overview.normalized();
        analysis.sentiment_details = sentiment.sentiment_details;

        ctx.advance("persona_generation");
        self.gateway.check_cancelled()?;
        ctx.record_exchange();
        let personas: PersonasOut = absorb(
            "persona_generation",
            self.gateway
                .invoke(TaskKind::PersonaSynthesis, &personas_prompt(corpus), &opts)
                .await,
        )?;
        analysis.personas = normalize::normalize_personas(&personas.personas);
        analysis.enhanced_personas = normalize::normalize_personas(&personas.enhanced_personas);

        ctx.advance("insight_synthesis");
        self.gateway.check_cancelled()?;
        ctx.record_exchange();
        let insights: InsightsOut = absorb(
            "insight_synthesis",
            self.gateway
                .invoke(
                    TaskKind::InsightSynthesis,
                    &insights_prompt(corpus, &analysis),
                    &opts,
                )
                .await,
        )?;
        analysis.insights = insights.insights;
        analysis.enhanced_insights = insights.enhanced_insights;

        ctx.advance("done");
        tracing::info!(
            themes = analysis.themes.len(),
            patterns = analysis.patterns.len(),
            personas = analysis.personas.len(),
            insights = analysis.insights.len(),
            exchanges = ctx.exchange_count,
            "analysis pipeline finished"
        );

        Ok(analysis)
    }
}

/// Stage 3 worker with persistence: resolves the simulation, runs the
/// pipeline over its transcript, and stores the envelope.
pub struct AnalysisStage {
    pipeline: AnalysisPipeline,
    store: Arc<dyn Repository>,
    llm_provider: String,
    llm_model: String,
}

impl AnalysisStage {
    pub fn new(pipeline: AnalysisPipeline, store: Arc<dyn Repository>) -> Self {
        Self {
            pipeline,
            store,
            llm_provider: "gemini".into(),
            llm_model: "gemini-2.5-flash".into(),
        }
    }

    pub fn with_model(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.llm_provider = provider.into();
        self.llm_model = model.into();
        self
    }

    /// Analyse a completed simulation and persist the envelope.
    pub async fn run_for_simulation(&self, simulation_id: &str) -> Result<AnalysisRecord> {
        let simulation = self
            .store
            .get_simulation(simulation_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("simulation {}", simulation_id)))?;

        if simulation.interviews.is_empty() {
            return Err(PipelineError::InvalidInput(
                "simulation contains no interview content to analyse".into(),
            ));
        }

        let corpus = simulation
            .analysis_ready_text()
            .map(str::to_string)
            .unwrap_or_else(|| {
                analysis_transcript(&simulation.personas, &simulation.interviews)
            });

        let mut analysis = self.pipeline.run(&corpus).await?;

        let analysis_id = self
            .store
            .insert_analysis(
                Some(simulation_id),
                &analysis,
                &self.llm_provider,
                &self.llm_model,
                &analysis.status,
                analysis.error.as_deref(),
            )
            .await?;
        analysis.id = Some(analysis_id.to_string());

        tracing::info!(
            simulation_id,
            analysis_id,
            personas = analysis.personas.len(),
            "analysis persisted"
        );

        Ok(AnalysisRecord {
            analysis_id,
            simulation_id: Some(simulation_id.to_string()),
            status: analysis.status.clone(),
            llm_provider: self.llm_provider.clone(),
            llm_model: self.llm_model.clone(),
            created_at: analysis.created_at,
            error: analysis.error.clone(),
            results: analysis,
        })
    }
}

fn patterns_prompt(corpus: &str) -> String {
    format!(
        r#"Detect cross-stakeholder patterns and relationships in simulation data.

SIMULATION DATA:
{corpus}

PATTERN TYPES TO DETECT:
1. Cross-stakeholder consensus areas
2. Conflict zones between stakeholders
3. Influence networks and decision flows
4. Behavioral patterns and trends

Return JSON: {{"patterns": [{{"type": "...", "description": "...", "evidence": ["..."], "confidence": 0.9, "frequency": 0.8}}], "enhanced_patterns": [ ... same shape ... ]}}"#
    )
}

fn stakeholder_prompt(corpus: &str) -> String {
    format!(
        r#"Analyze stakeholders in simulation data to generate comprehensive stakeholder intelligence.

SIMULATION DATA:
{corpus}

REQUIREMENTS:
1. Detect all stakeholders with demographic profiles
2. Generate individual insights for each stakeholder
3. Calculate influence metrics (decision_power, technical_influence, budget_influence) in [0,1]
4. Extract authentic evidence and quotes
5. Identify consensus areas, conflict zones, and influence networks

Return JSON: {{"stakeholder_intelligence": {{"detected_stakeholders": [{{"stakeholder_id": "...", "stakeholder_type": "...", "confidence_score": 0.9, "demographic_profile": {{}}, "individual_insights": {{}}, "influence_metrics": {{"decision_power": 0.2, "technical_influence": 0.5, "budget_influence": 0.1}}, "authentic_evidence": {{"quotes_evidence": ["..."]}}}}], "cross_stakeholder_patterns": {{"consensus_areas": [], "conflict_zones": [], "influence_networks": []}}, "multi_stakeholder_summary": {{}}, "processing_metadata": {{}}}}}}"#
    )
}

fn sentiment_prompt(corpus: &str) -> String {
    format!(
        r#"Analyze sentiment in simulation data with detailed categorization.

SIMULATION DATA:
{corpus}

REQUIREMENTS:
1. Calculate the overall sentiment distribution (positive, neutral, negative) summing to 1.0
2. Identify sentiment categories with scores in [-1, 1]
3. Extract verbatim supporting statements for each category

Return JSON: {{"sentiment_overview": {{"positive": 0.25, "neutral": 0.35, "negative": 0.40}}, "sentiment_details": [{{"category": "...", "score": -0.4, "statements": ["..."]}}]}}"#
    )
}

fn personas_prompt(corpus: &str) -> String {
    format!(
        r#"Generate detailed personas from simulation data based on stakeholder behavioral patterns.

SIMULATION DATA:
{corpus}

REQUIREMENTS:
1. Create 3-5 primary personas based on stakeholder types
2. Attribute every trait with verbatim evidence quotes (at least one quote of 20+ characters)
3. Generate enhanced personas for strategic insights

Each persona object must use these keys: name, description, archetype, demographics, goals_and_motivations, skills_and_expertise, challenges_and_frustrations, needs_and_desires, technology_and_tools, key_quotes, overall_confidence. Trait values are objects {{"value": "...", "confidence": 0.9, "evidence": ["verbatim quote"]}}.

Return JSON: {{"personas": [ ... ], "enhanced_personas": [ ... ]}}"#
    )
}

fn insights_prompt(corpus: &str, analysis: &DetailedAnalysis) -> String {
    let preview: String = corpus.chars().take(5000).collect();
    format!(
        r#"Synthesize actionable business insights from comprehensive analysis results.

ANALYSIS RESULTS SUMMARY:
- Themes identified: {themes}
- Patterns detected: {patterns}
- Stakeholders analyzed: {stakeholders}

SIMULATION DATA (preview):
{preview}

REQUIREMENTS:
1. Generate 5-8 actionable business insights
2. Create enhanced insights for strategic recommendations
3. Include confidence scores and supporting evidence

Return JSON: {{"insights": [{{"title": "...", "description": "...", "confidence": 0.9, "evidence": ["..."], "business_impact": "..."}}], "enhanced_insights": [ ... same shape ... ]}}"#,
        themes = analysis.themes.len(),
        patterns = analysis.patterns.len(),
        stakeholders = analysis
            .stakeholder_intelligence
            .as_ref()
            .map(|si| si.detected_stakeholders.len())
            .unwrap_or(0),
    )
}
