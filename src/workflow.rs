//! # Workflow Phases
//!
//! Ordered completeness bands that decide what the assistant may do for a
//! creator. Phase resolution is a pure function of the profile: the first
//! phase whose band contains the completeness score and whose required fields
//! are all populated wins, otherwise the earliest phase applies.

use crate::profile::{Profile, ProfileField};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Stable phase identifiers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PhaseId {
    Discovery,
    Foundation,
    Strategy,
    Creation,
    Optimization,
}

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseId::Discovery => write!(f, "discovery"),
            PhaseId::Foundation => write!(f, "foundation"),
            PhaseId::Strategy => write!(f, "strategy"),
            PhaseId::Creation => write!(f, "creation"),
            PhaseId::Optimization => write!(f, "optimization"),
        }
    }
}

impl PhaseId {
    pub fn parse_loose(raw: &str) -> Option<PhaseId> {
        let key = raw.trim().to_lowercase();
        WORKFLOW_PHASES
            .iter()
            .find(|p| key == p.id.to_string() || key == p.number.to_string())
            .map(|p| p.id)
    }
}

/// One completeness band with its capabilities
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorkflowPhase {
    pub id: PhaseId,
    /// 1-based position
    pub number: u8,
    pub min_completeness: u8,
    pub max_completeness: u8,
    /// Must all be populated for the phase to apply
    pub required_fields: &'static [ProfileField],
    /// Gathered while in this phase
    pub collects: &'static [ProfileField],
    pub can_generate_content: bool,
    pub can_generate_ideas: bool,
    pub guidance: &'static str,
}

use ProfileField::*;

/// Immutable phase table, earliest first
pub static WORKFLOW_PHASES: &[WorkflowPhase] = &[
    WorkflowPhase {
        id: PhaseId::Discovery,
        number: 1,
        min_completeness: 0,
        max_completeness: 29,
        required_fields: &[],
        collects: &[Name, Niche, Platform],
        can_generate_content: false,
        can_generate_ideas: false,
        guidance: "Get to know the creator. Ask one or two friendly questions at a time about who they are, what they create and where they publish.",
    },
    WorkflowPhase {
        id: PhaseId::Foundation,
        number: 2,
        min_completeness: 30,
        max_completeness: 49,
        required_fields: &[Name],
        collects: &[Niche, Platform, TargetAudience],
        can_generate_content: false,
        can_generate_ideas: false,
        guidance: "Build the foundation: pin down niche, platforms and the audience they serve.",
    },
    WorkflowPhase {
        id: PhaseId::Strategy,
        number: 3,
        min_completeness: 50,
        max_completeness: 69,
        required_fields: &[Name, Niche, Platform],
        collects: &[TargetAudience, BrandVoice, Goals],
        can_generate_content: false,
        can_generate_ideas: true,
        guidance: "Shape the strategy: clarify audience, voice and goals. Brainstorming ideas is welcome.",
    },
    WorkflowPhase {
        id: PhaseId::Creation,
        number: 4,
        min_completeness: 70,
        max_completeness: 89,
        required_fields: &[Name, Niche, Platform, TargetAudience],
        collects: &[BrandVoice, BusinessType, Goals],
        can_generate_content: true,
        can_generate_ideas: true,
        guidance: "Create: write posts, scripts and captions tailored to the profile.",
    },
    WorkflowPhase {
        id: PhaseId::Optimization,
        number: 5,
        min_completeness: 90,
        max_completeness: 100,
        required_fields: &[Name, Niche, Platform, TargetAudience, BrandVoice],
        collects: &[],
        can_generate_content: true,
        can_generate_ideas: true,
        guidance: "Optimize: refine content using performance data, competitors and trends.",
    },
];

impl WorkflowPhase {
    pub fn contains(&self, score: u8) -> bool {
        (self.min_completeness..=self.max_completeness).contains(&score)
    }

    pub fn requirements_met(&self, populated: &BTreeSet<ProfileField>) -> bool {
        self.required_fields.iter().all(|f| populated.contains(f))
    }

    /// Prompt instructions derived from the capability flags
    pub fn capability_instructions(&self) -> String {
        let mut lines = vec![format!(
            "Current workflow phase: {} ({} of {}). {}",
            self.id,
            self.number,
            WORKFLOW_PHASES.len(),
            self.guidance
        )];
        if self.can_generate_content {
            lines.push("You may write finished content (posts, captions, scripts).".into());
        } else {
            lines.push(
                "Do not write finished content such as full posts, captions or scripts yet. \
                 If asked, explain briefly that you need a bit more context first and ask for it."
                    .into(),
            );
        }
        if self.can_generate_ideas {
            lines.push("You may suggest content ideas and angles.".into());
        } else {
            lines.push("Hold off on content idea lists until the basics are known.".into());
        }
        lines.join("\n")
    }
}

/// The earliest phase
pub fn earliest_phase() -> &'static WorkflowPhase {
    &WORKFLOW_PHASES[0]
}

pub fn phase_by_id(id: PhaseId) -> &'static WorkflowPhase {
    WORKFLOW_PHASES
        .iter()
        .find(|p| p.id == id)
        .unwrap_or_else(earliest_phase)
}

/// Resolve the phase for a score and populated-field set
pub fn resolve_phase(score: u8, populated: &BTreeSet<ProfileField>) -> &'static WorkflowPhase {
    WORKFLOW_PHASES
        .iter()
        .find(|p| p.contains(score) && p.requirements_met(populated))
        .unwrap_or_else(earliest_phase)
}

/// Phase for a profile, using freshly computed completeness
pub fn phase_for_profile(profile: &Profile) -> &'static WorkflowPhase {
    resolve_phase(profile.compute_completeness(), &profile.populated_fields())
}

/// Required and collected fields of `phase` that the profile lacks, in canonical order
pub fn missing_fields_for_phase(phase: &WorkflowPhase, profile: &Profile) -> Vec<ProfileField> {
    ProfileField::ALL
        .iter()
        .copied()
        .filter(|f| phase.required_fields.contains(f) || phase.collects.contains(f))
        .filter(|f| !profile.has(*f))
        .collect()
}

/// User-facing discovery questions for the missing fields
pub fn discovery_prompts(missing: &[ProfileField]) -> Vec<&'static str> {
    missing.iter().map(|f| f.discovery_prompt()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile_with(fields: &[ProfileField]) -> Profile {
        let mut p = Profile::new("u1");
        for f in fields {
            match f {
                Name => p.first_name = Some("Ada".into()),
                Niche => p.niches = vec!["fitness".into()],
                Platform => p.platforms = vec!["instagram".into()],
                TargetAudience => p.extension.target_audience = Some("busy parents".into()),
                BrandVoice => p.extension.brand_voice = Some("warm".into()),
                BusinessType => p.extension.business_type = Some("solo".into()),
                Goals => p.extension.goals = vec!["grow to 10k".into()],
                Instagram => p.instagram_handle = Some("ada".into()),
            }
        }
        p.refresh_completeness();
        p
    }

    #[test]
    fn test_bands_are_contiguous() {
        assert_eq!(WORKFLOW_PHASES[0].min_completeness, 0);
        for pair in WORKFLOW_PHASES.windows(2) {
            assert_eq!(pair[0].max_completeness + 1, pair[1].min_completeness);
        }
        assert_eq!(WORKFLOW_PHASES.last().unwrap().max_completeness, 100);
    }

    #[test]
    fn test_new_user_is_in_discovery_with_content_blocked() {
        let p = Profile::new("u1");
        let phase = phase_for_profile(&p);
        assert_eq!(phase.id, PhaseId::Discovery);
        assert!(!phase.can_generate_content);

        let missing = missing_fields_for_phase(phase, &p);
        assert!(missing.contains(&Name));
        assert!(missing.contains(&Niche));
        assert!(missing.contains(&Platform));
    }

    #[test]
    fn test_score_seventy_with_creation_fields_allows_content() {
        let p = profile_with(&[Name, Niche, Platform, TargetAudience, Instagram]);
        assert_eq!(p.completeness_score, 70);
        let phase = phase_for_profile(&p);
        assert_eq!(phase.id, PhaseId::Creation);
        assert!(phase.can_generate_content);
    }

    #[test]
    fn test_band_without_required_fields_falls_back_to_earliest() {
        // 20 + 15 + 15 + 10 = 60 but no name
        let p = profile_with(&[Niche, Platform, TargetAudience, BrandVoice]);
        assert_eq!(p.completeness_score, 60);
        assert_eq!(phase_for_profile(&p).id, PhaseId::Discovery);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let p = profile_with(&[Name, Niche, Platform]);
        let first = phase_for_profile(&p);
        for _ in 0..5 {
            assert_eq!(phase_for_profile(&p), first);
        }
        assert_eq!(first.id, PhaseId::Strategy);
        assert!(first.can_generate_ideas);
    }

    #[test]
    fn test_full_profile_reaches_optimization() {
        let p = profile_with(ProfileField::ALL);
        assert_eq!(p.completeness_score, 100);
        assert_eq!(phase_for_profile(&p).id, PhaseId::Optimization);
        assert!(missing_fields_for_phase(phase_for_profile(&p), &p).is_empty());
    }

    #[test]
    fn test_parse_loose_accepts_names_and_numbers() {
        assert_eq!(PhaseId::parse_loose("Strategy"), Some(PhaseId::Strategy));
        assert_eq!(PhaseId::parse_loose("4"), Some(PhaseId::Creation));
        assert_eq!(PhaseId::parse_loose("launch"), None);
    }
}
