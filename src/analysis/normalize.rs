//! Persona post-processing: raw model dictionaries to canonical records.
//!
//! The normaliser is deterministic. Every trait is wrapped to
//! `{value, confidence, evidence}`; a trait survives only when its value is
//! substantive, not a generic placeholder, and backed by at least one
//! substantial verbatim quote. Traits that fail are dropped, not defaulted.
//! Personas with nothing left after filtering are skipped entirely.

use serde_json::Value;

use crate::types::{AttributedTrait, PersonaProfile, StructuredDemographics};

/// Minimum characters for a trait value to count as substantive.
const MIN_TRAIT_VALUE_LEN: usize = 10;
/// Minimum characters for an evidence quote to count as substantial.
const MIN_SUBSTANTIAL_EVIDENCE_LEN: usize = 20;
/// Evidence items kept per trait.
const MAX_EVIDENCE_ITEMS: usize = 5;

/// Trait values matching these fragments are template filler, not analysis.
const GENERIC_PLACEHOLDERS: &[&str] = &[
    "domain-specific",
    "professional",
    "technology and tools",
    "work environment",
    "collaboration approach",
    "analysis approach",
    "professional challenges",
    "professional responsibilities",
    "tools and methods",
    "professional role",
    "professional growth",
    "efficiency and professional",
    "values data-driven",
    "open to technological",
];

/// Evidence beginning with these fragments is meta-commentary, not a quote.
const META_EVIDENCE_MARKERS: &[&str] = &[
    "inferred from",
    "based on statements",
    "derived from",
    "extracted from",
    "representative statements",
];

/// Normalise a batch of raw personas, skipping the ones that fail
/// validation. The surviving count is logged.
pub fn normalize_personas(raw: &[Value]) -> Vec<PersonaProfile> {
    let profiles: Vec<PersonaProfile> = raw.iter().filter_map(map_raw_persona).collect();
    tracing::info!(
        survived = profiles.len(),
        total = raw.len(),
        "personas normalised"
    );
    profiles
}

/// Map one raw persona dictionary to the canonical schema.
///
/// Returns `None` when the persona has no name or no surviving traits.
pub fn map_raw_persona(raw: &Value) -> Option<PersonaProfile> {
    let name = raw.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let description = raw
        .get("description")
        .and_then(|d| d.as_str())
        .unwrap_or(name)
        .to_string();
    let archetype = raw
        .get("archetype")
        .and_then(|a| a.as_str())
        .unwrap_or("Professional")
        .to_string();
    let overall_confidence = raw
        .get("overall_confidence")
        .or_else(|| raw.get("confidence"))
        .and_then(|c| c.as_f64())
        .unwrap_or(0.7);

    let demographics = decompose_demographics(raw.get("demographics"));
    let goals_and_motivations = wrap_trait(raw.get("goals_and_motivations"));
    let skills_and_expertise = wrap_trait(raw.get("skills_and_expertise"));
    let challenges_and_frustrations = wrap_trait(raw.get("challenges_and_frustrations"));
    let needs_and_desires = wrap_trait(raw.get("needs_and_desires"));
    let technology_and_tools = wrap_trait(raw.get("technology_and_tools"));
    let key_quotes = wrap_key_quotes(raw.get("key_quotes"));

    let any_trait = demographics.is_some()
        || goals_and_motivations.is_some()
        || skills_and_expertise.is_some()
        || challenges_and_frustrations.is_some()
        || needs_and_desires.is_some()
        || technology_and_tools.is_some()
        || key_quotes.is_some();
    if !any_trait {
        tracing::warn!(persona = %name, "persona dropped: no trait survived validation");
        return None;
    }

    let patterns = raw
        .get("patterns")
        .and_then(|p| p.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    Some(PersonaProfile {
        name: name.to_string(),
        archetype,
        description,
        demographics,
        goals_and_motivations,
        skills_and_expertise,
        challenges_and_frustrations,
        needs_and_desires,
        technology_and_tools,
        key_quotes,
        overall_confidence,
        patterns,
    })
}

/// Wrap a raw trait and apply the acceptance rule.
pub fn wrap_trait(raw: Option<&Value>) -> Option<AttributedTrait> {
    let raw = raw?.as_object()?;
    let value = raw.get("value")?.as_str()?.trim().to_string();
    if value.len() < MIN_TRAIT_VALUE_LEN {
        return None;
    }

    let value_lower = value.to_lowercase();
    if GENERIC_PLACEHOLDERS
        .iter()
        .any(|pattern| value_lower.contains(pattern))
    {
        tracing::warn!(value = %value, "dropping generic placeholder trait");
        return None;
    }

    let evidence = collect_evidence(raw.get("evidence"));
    if evidence.is_empty()
        || !evidence
            .iter()
            .any(|quote| quote.len() >= MIN_SUBSTANTIAL_EVIDENCE_LEN)
    {
        return None;
    }

    let confidence = raw
        .get("confidence")
        .and_then(|c| c.as_f64())
        .unwrap_or(crate::types::default_confidence());

    Some(AttributedTrait {
        value,
        confidence,
        evidence,
    })
}

/// Key quotes arrive either as a trait dict or a bare quote array.
fn wrap_key_quotes(raw: Option<&Value>) -> Option<AttributedTrait> {
    match raw {
        Some(Value::Array(items)) => {
            let evidence: Vec<String> = items
                .iter()
                .filter_map(|i| i.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .take(MAX_EVIDENCE_ITEMS)
                .collect();
            if evidence.is_empty()
                || !evidence
                    .iter()
                    .any(|quote| quote.len() >= MIN_SUBSTANTIAL_EVIDENCE_LEN)
            {
                return None;
            }
            Some(AttributedTrait {
                value: "Representative quotes from the interview".into(),
                confidence: 0.9,
                evidence,
            })
        }
        other => wrap_trait(other),
    }
}

fn collect_evidence(raw: Option<&Value>) -> Vec<String> {
    raw.and_then(|e| e.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.as_str())
                .map(|s| s.trim().to_string())
                .filter(|quote| {
                    let lower = quote.to_lowercase();
                    quote.len() > 5 && !META_EVIDENCE_MARKERS.iter().any(|m| lower.contains(m))
                })
                .take(MAX_EVIDENCE_ITEMS)
                .collect()
        })
        .unwrap_or_default()
}

/// Decompose raw demographics into structured sub-fields by keyword-routing
/// each evidence item. Requires at least two routed fields to survive.
pub fn decompose_demographics(raw: Option<&Value>) -> Option<StructuredDemographics> {
    let raw = raw?.as_object()?;
    let confidence = raw
        .get("confidence")
        .and_then(|c| c.as_f64())
        .unwrap_or(crate::types::default_confidence());
    let value = raw
        .get("value")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();
    let evidence = collect_evidence(raw.get("evidence"));
    if evidence.len() < 2 {
        return None;
    }

    let route = |keywords: &[&str], cap: usize, label: &str| -> Option<AttributedTrait> {
        let matched: Vec<String> = evidence
            .iter()
            .filter(|quote| {
                let lower = quote.to_lowercase();
                keywords.iter().any(|kw| lower.contains(kw))
            })
            .take(cap)
            .cloned()
            .collect();
        if matched.is_empty() {
            None
        } else {
            Some(AttributedTrait {
                value: label.to_string(),
                confidence,
                evidence: matched,
            })
        }
    };

    let experience_level = route(
        &["years", "experience", "working", "been in"],
        2,
        "Experience mentioned in context",
    );
    let industry = route(
        &["company", "industry", "sector", "business", "tech", "technology"],
        2,
        "Industry context from interview",
    );
    let location = route(
        &["based", "located", "city", "area", "live", "office"],
        2,
        "Location mentioned in interview",
    );
    let roles = route(
        &["role", "position", "job", "title", "manager", "developer", "analyst"],
        2,
        "Role context from interview",
    );
    let professional_context = if value.len() > 20 {
        Some(AttributedTrait {
            value,
            confidence,
            evidence: evidence.iter().take(3).cloned().collect(),
        })
    } else {
        None
    };

    let demographics = StructuredDemographics {
        experience_level,
        industry,
        location,
        professional_context,
        roles,
        confidence,
    };
    if demographics.field_count() < 2 {
        tracing::warn!(
            fields = demographics.field_count(),
            "insufficient demographic fields extracted"
        );
        return None;
    }
    Some(demographics)
}
