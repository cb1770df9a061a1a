//! Cast members and the role/impact presence model.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::ids::CastId;

/// Max uploaded reference photos per cast member.
pub const MAX_REFERENCE_IMAGES: usize = 3;

/// Narrative weight of a cast member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Lead,
    Supporting,
    Extra,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Lead => "lead",
            Role::Supporting => "supporting",
            Role::Extra => "extra",
        }
    }

    /// Sort rank: leads first, extras last.
    pub fn rank(&self) -> u8 {
        match self {
            Role::Lead => 0,
            Role::Supporting => 1,
            Role::Extra => 2,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown role: {0}")]
pub struct ParseRoleError(String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "lead" => Ok(Role::Lead),
            "supporting" => Ok(Role::Supporting),
            "extra" => Ok(Role::Extra),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

/// An uploaded reference photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceImage {
    pub url_local: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_external: Option<String>,
    /// What the photo shows ("source", "face", ...).
    #[serde(default)]
    pub role: String,
}

/// Identity / LoRA conditioning settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct CastConditioning {
    #[serde(default)]
    pub identity_strength: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lora_scale: Option<f64>,
}

/// One character identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CastMember {
    pub cast_id: CastId,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    /// Narrative impact in [0, 1]; drives presence across the storyboard.
    #[serde(default = "default_impact")]
    pub impact: f64,
    #[serde(default)]
    pub prompt_extra: String,
    #[serde(default)]
    pub reference_images: Vec<ReferenceImage>,
    #[serde(default)]
    pub conditioning: CastConditioning,
}

fn default_impact() -> f64 {
    0.5
}

impl CastMember {
    pub fn new(cast_id: CastId, name: impl Into<String>, role: Role) -> Self {
        Self {
            cast_id,
            name: name.into(),
            role,
            impact: default_impact(),
            prompt_extra: String::new(),
            reference_images: Vec::new(),
            conditioning: CastConditioning::default(),
        }
    }

    /// First uploaded reference, the identity source for canonical refs.
    pub fn primary_reference(&self) -> Option<&ReferenceImage> {
        self.reference_images.first()
    }
}

/// Presence tier for storyboard prompting, derived from role and impact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastPresence {
    PrimaryProtagonist,
    CoLead,
    SecondaryLead,
    MediumPresence,
    LowPresence,
    NotablePresence,
    MinimalPresence,
}

impl CastPresence {
    /// The usage instruction fed to the storyboard LLM for this tier.
    pub fn usage(&self) -> &'static str {
        match self {
            CastPresence::PrimaryProtagonist => {
                "PRIMARY PROTAGONIST: appears in 80%+ of shots, carries the narrative"
            }
            CastPresence::CoLead => "CO-LEAD: appears in 60%+ of shots, shares the narrative",
            CastPresence::SecondaryLead => {
                "SECONDARY LEAD: recurring presence, supports the protagonist's arc"
            }
            CastPresence::MediumPresence => {
                "MEDIUM PRESENCE: appears in about half the shots, interacts with the lead"
            }
            CastPresence::LowPresence => "LOW PRESENCE: occasional appearances only",
            CastPresence::NotablePresence => {
                "NOTABLE PRESENCE: 5-6 shots, every appearance must have purpose"
            }
            CastPresence::MinimalPresence => {
                "MINIMAL PRESENCE: 1-2 shots, every appearance must have purpose"
            }
        }
    }
}

/// Derive the presence tier for one member.
///
/// `is_primary` marks the lead with the highest impact (ties broken by cast
/// order); exactly one lead should carry it.
pub fn presence_for(member: &CastMember, is_primary: bool) -> CastPresence {
    match member.role {
        Role::Lead if is_primary => CastPresence::PrimaryProtagonist,
        Role::Lead if member.impact >= 0.5 => CastPresence::CoLead,
        Role::Lead => CastPresence::SecondaryLead,
        Role::Supporting if member.impact >= 0.5 => CastPresence::MediumPresence,
        Role::Supporting => CastPresence::LowPresence,
        Role::Extra if member.impact >= 0.5 => CastPresence::NotablePresence,
        Role::Extra => CastPresence::MinimalPresence,
    }
}

/// Sort cast for prompting: leads before supporting before extras, then by
/// descending impact, then original order. Returns `(member, presence)`
/// pairs with the primary lead resolved.
pub fn sort_cast_for_presence(cast: &[CastMember]) -> Vec<(&CastMember, CastPresence)> {
    // First lead with the highest impact wins ties.
    let primary_id = cast
        .iter()
        .filter(|m| m.role == Role::Lead)
        .fold(None::<&CastMember>, |best, m| match best {
            Some(b) if m.impact > b.impact => Some(m),
            Some(b) => Some(b),
            None => Some(m),
        })
        .map(|m| m.cast_id.clone());

    let mut indexed: Vec<(usize, &CastMember)> = cast.iter().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| {
        a.role
            .rank()
            .cmp(&b.role.rank())
            .then(
                b.impact
                    .partial_cmp(&a.impact)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(ia.cmp(ib))
    });

    indexed
        .into_iter()
        .map(|(_, m)| {
            let is_primary = primary_id.as_ref() == Some(&m.cast_id);
            (m, presence_for(m, is_primary))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, role: Role, impact: f64) -> CastMember {
        let mut m = CastMember::new(CastId::new(id), id.to_uppercase(), role);
        m.impact = impact;
        m
    }

    #[test]
    fn test_role_impact_scoring() {
        // lead@0.9, lead@0.6, supporting@0.8, extra@0.3 must sort in that
        // order with the expected presence tiers.
        let cast = vec![
            member("lead_1", Role::Lead, 0.9),
            member("lead_2", Role::Lead, 0.6),
            member("supporting_1", Role::Supporting, 0.8),
            member("extra_1", Role::Extra, 0.3),
        ];

        let sorted = sort_cast_for_presence(&cast);
        let ids: Vec<&str> = sorted.iter().map(|(m, _)| m.cast_id.as_str()).collect();
        assert_eq!(ids, vec!["lead_1", "lead_2", "supporting_1", "extra_1"]);

        assert!(sorted[0].1.usage().starts_with("PRIMARY PROTAGONIST"));
        assert!(sorted[1].1.usage().starts_with("CO-LEAD"));
        assert!(sorted[2].1.usage().starts_with("MEDIUM PRESENCE"));
        assert!(sorted[3].1.usage().starts_with("MINIMAL PRESENCE"));
    }

    #[test]
    fn test_primary_tie_broken_by_cast_order() {
        let cast = vec![
            member("lead_1", Role::Lead, 0.8),
            member("lead_2", Role::Lead, 0.8),
        ];
        let sorted = sort_cast_for_presence(&cast);
        assert_eq!(sorted[0].1, CastPresence::PrimaryProtagonist);
        assert_eq!(sorted[1].1, CastPresence::CoLead);
    }

    #[test]
    fn test_supporting_and_extra_thresholds() {
        let hi = member("supporting_1", Role::Supporting, 0.5);
        let lo = member("supporting_2", Role::Supporting, 0.49);
        assert_eq!(presence_for(&hi, false), CastPresence::MediumPresence);
        assert_eq!(presence_for(&lo, false), CastPresence::LowPresence);

        let busy = member("extra_1", Role::Extra, 0.5);
        let cameo = member("extra_2", Role::Extra, 0.1);
        assert_eq!(presence_for(&busy, false), CastPresence::NotablePresence);
        assert_eq!(presence_for(&cameo, false), CastPresence::MinimalPresence);
    }
}
