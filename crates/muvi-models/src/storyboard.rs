//! Storyboard: sequences and shots over the audio timeline.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::ids::{CastId, SequenceId, ShotId};
use crate::render::ShotRender;

/// Largest tolerated hole between adjacent shots in a sequence.
pub const MAX_SHOT_GAP_SECS: f64 = 0.1;

/// Gaps at or below this are closed by `tighten` by extending the prior shot.
pub const TIGHTEN_GAP_SECS: f64 = 0.06;

/// Song-structure label for a sequence or shot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StructureType {
    Intro,
    #[default]
    Verse,
    Prechorus,
    Chorus,
    Bridge,
    Breakdown,
    Outro,
    Instrumental,
}

impl StructureType {
    pub const ALL: &'static [StructureType] = &[
        StructureType::Intro,
        StructureType::Verse,
        StructureType::Prechorus,
        StructureType::Chorus,
        StructureType::Bridge,
        StructureType::Breakdown,
        StructureType::Outro,
        StructureType::Instrumental,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StructureType::Intro => "intro",
            StructureType::Verse => "verse",
            StructureType::Prechorus => "prechorus",
            StructureType::Chorus => "chorus",
            StructureType::Bridge => "bridge",
            StructureType::Breakdown => "breakdown",
            StructureType::Outro => "outro",
            StructureType::Instrumental => "instrumental",
        }
    }

    /// Normalize a free-form label from an LLM or the understanding
    /// service. Unknown labels become `Verse`.
    pub fn normalize(label: &str) -> Self {
        label.parse().unwrap_or_default()
    }
}

impl fmt::Display for StructureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StructureType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace([' ', '-'], "").as_str() {
            "intro" => Ok(StructureType::Intro),
            "verse" => Ok(StructureType::Verse),
            "prechorus" => Ok(StructureType::Prechorus),
            "chorus" | "hook" => Ok(StructureType::Chorus),
            "bridge" => Ok(StructureType::Bridge),
            "breakdown" | "drop" => Ok(StructureType::Breakdown),
            "outro" => Ok(StructureType::Outro),
            "instrumental" | "solo" => Ok(StructureType::Instrumental),
            _ => Err(()),
        }
    }
}

/// A narrative beat over a time range of the song.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Sequence {
    pub sequence_id: SequenceId,
    pub label: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub structure_type: StructureType,
    #[serde(default)]
    pub energy: f64,
    #[serde(default)]
    pub cast: Vec<CastId>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arc_start: String,
    #[serde(default)]
    pub arc_end: String,
    #[serde(default)]
    pub lyrics_reference: String,
    #[serde(default)]
    pub start_frame_prompt: String,
    #[serde(default)]
    pub end_frame_prompt: String,
}

impl Sequence {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A single rendered image (and optionally one clip) over a sub-range of a
/// sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Shot {
    pub shot_id: ShotId,
    pub sequence_id: SequenceId,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub structure_type: StructureType,
    #[serde(default)]
    pub energy: f64,
    #[serde(default)]
    pub cast: Vec<CastId>,
    /// cast_id -> outfit description for this shot.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub wardrobe: BTreeMap<CastId, String>,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub camera_language: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbolic_elements: Vec<String>,
    #[serde(default)]
    pub prompt_base: String,
    #[serde(default)]
    pub render: ShotRender,
}

impl Shot {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// The full timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
pub struct Storyboard {
    #[serde(default)]
    pub story_summary: String,
    #[serde(default)]
    pub sequences: Vec<Sequence>,
    #[serde(default)]
    pub shots: Vec<Shot>,
}

impl Storyboard {
    pub fn sequence(&self, id: &SequenceId) -> Option<&Sequence> {
        self.sequences.iter().find(|s| &s.sequence_id == id)
    }

    pub fn shot(&self, id: &ShotId) -> Option<&Shot> {
        self.shots.iter().find(|s| &s.shot_id == id)
    }

    pub fn shot_mut(&mut self, id: &ShotId) -> Option<&mut Shot> {
        self.shots.iter_mut().find(|s| &s.shot_id == id)
    }

    /// Shots of one sequence in stored order.
    pub fn shots_of(&self, sequence_id: &SequenceId) -> Vec<&Shot> {
        self.shots
            .iter()
            .filter(|s| &s.sequence_id == sequence_id)
            .collect()
    }

    /// Strip a cast member out of every sequence and shot (on cast delete).
    pub fn strip_cast(&mut self, cast_id: &CastId) {
        for seq in &mut self.sequences {
            seq.cast.retain(|c| c != cast_id);
        }
        for shot in &mut self.shots {
            shot.cast.retain(|c| c != cast_id);
            shot.wardrobe.remove(cast_id);
        }
    }
}

/// Target `(sequence_count, total_shots)` for a track duration.
///
/// Monotonic table; the values are hard caps on what the planner accepts
/// back from the LLM.
pub fn target_counts(duration_sec: f64) -> (usize, usize) {
    if duration_sec < 60.0 {
        (3, 18)
    } else if duration_sec < 120.0 {
        (5, 30)
    } else if duration_sec < 180.0 {
        (7, 42)
    } else if duration_sec < 240.0 {
        (9, 54)
    } else {
        let sequences = ((duration_sec / 20.0).floor() as usize).min(12);
        (sequences, sequences * 6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_counts_table() {
        assert_eq!(target_counts(45.0), (3, 18));
        assert_eq!(target_counts(59.9), (3, 18));
        assert_eq!(target_counts(60.0), (5, 30));
        assert_eq!(target_counts(119.0), (5, 30));
        assert_eq!(target_counts(150.0), (7, 42));
        assert_eq!(target_counts(200.0), (9, 54));
        assert_eq!(target_counts(240.0), (12, 72));
        assert_eq!(target_counts(1000.0), (12, 72));
    }

    #[test]
    fn test_structure_normalize() {
        assert_eq!(StructureType::normalize("Pre-Chorus"), StructureType::Prechorus);
        assert_eq!(StructureType::normalize("HOOK"), StructureType::Chorus);
        assert_eq!(StructureType::normalize("weird label"), StructureType::Verse);
    }

    #[test]
    fn test_strip_cast() {
        let gone = CastId::new("extra_1");
        let kept = CastId::new("lead_1");
        let mut board = Storyboard::default();
        board.sequences.push(Sequence {
            sequence_id: SequenceId::from_index(0),
            label: "Opening".into(),
            start: 0.0,
            end: 10.0,
            structure_type: StructureType::Intro,
            energy: 0.3,
            cast: vec![kept.clone(), gone.clone()],
            description: String::new(),
            arc_start: String::new(),
            arc_end: String::new(),
            lyrics_reference: String::new(),
            start_frame_prompt: String::new(),
            end_frame_prompt: String::new(),
        });
        board.shots.push(Shot {
            shot_id: ShotId::for_sequence(&SequenceId::from_index(0), 0),
            sequence_id: SequenceId::from_index(0),
            start: 0.0,
            end: 3.0,
            structure_type: StructureType::Intro,
            energy: 0.3,
            cast: vec![gone.clone()],
            wardrobe: BTreeMap::from([(gone.clone(), "trench coat".to_string())]),
            intent: String::new(),
            camera_language: String::new(),
            environment: String::new(),
            symbolic_elements: vec![],
            prompt_base: String::new(),
            render: ShotRender::default(),
        });

        board.strip_cast(&gone);
        assert_eq!(board.sequences[0].cast, vec![kept]);
        assert!(board.shots[0].cast.is_empty());
        assert!(board.shots[0].wardrobe.is_empty());
    }
}
