//! Storyboard planning: sequences and shots from audio DNA.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use muvi_models::{
    sort_cast_for_presence, target_counts, CastId, ProjectState, Sequence, SequenceId, Shot,
    ShotId, StructureType, StylePreset, TIGHTEN_GAP_SECS,
};
use muvi_models::utils::round_secs;
use muvi_gen::{retry, RetryPolicy};

use crate::context::EngineContext;
use crate::costs::record_cost;
use crate::debug_log;
use crate::error::{EngineError, EngineResult};

/// Soft ceiling on a single shot's length; overruns are warned, never
/// truncated (truncation would open gaps).
const SHOT_SOFT_MAX_SECS: f64 = 5.0;

/// Outcome of a timeline repair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RepairReport {
    pub sequences_removed: usize,
    pub sequences_capped: usize,
    pub shots_removed: usize,
    pub shots_capped: usize,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        *self != Self::default()
    }
}

/// Maps LLM cast references (names or ids, any casing) back to cast ids.
///
/// Built once per planning call and used for both `cast` arrays and
/// wardrobe keys; unresolved references are dropped.
pub struct CastResolver {
    by_key: HashMap<String, CastId>,
}

impl CastResolver {
    pub fn new(state: &ProjectState) -> Self {
        let mut by_key = HashMap::new();
        for member in &state.cast {
            by_key.insert(member.cast_id.as_str().to_lowercase(), member.cast_id.clone());
            by_key.insert(member.name.to_lowercase(), member.cast_id.clone());
        }
        Self { by_key }
    }

    pub fn resolve(&self, reference: &str) -> Option<CastId> {
        self.by_key.get(&reference.trim().to_lowercase()).cloned()
    }

    /// Resolve a list, dropping unknowns and duplicates.
    pub fn resolve_all(&self, references: &[String]) -> Vec<CastId> {
        let mut out = Vec::new();
        for reference in references {
            match self.resolve(reference) {
                Some(id) if !out.contains(&id) => out.push(id),
                Some(_) => {}
                None => debug!("dropping unresolved cast reference '{}'", reference),
            }
        }
        out
    }
}

/// Plans the storyboard against the analyzed audio.
pub struct StoryboardPlanner<'a> {
    ctx: &'a EngineContext,
}

impl<'a> StoryboardPlanner<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// One LLM call producing the story summary and all sequences.
    pub async fn build_sequences(&self, state: &mut ProjectState) -> EngineResult<()> {
        let dna = state
            .audio_dna
            .as_ref()
            .ok_or_else(|| EngineError::validation("analyze audio before building sequences"))?;
        let duration = dna.meta.duration_sec;
        let (sequence_count, target_shots) = target_counts(duration);

        let preset = StylePreset::resolve(&state.project.style_preset);
        let roster = cast_roster_block(state);
        let lyrics = dna.lyrics_text();
        let sections: Vec<String> = dna
            .sections
            .iter()
            .map(|s| format!("{} {:.1}-{:.1}s", s.kind, s.start, s.end))
            .collect();

        let system = "You are a music video director. You answer with a single JSON object and \
                      nothing else.";
        let prompt = format!(
            "Design the narrative timeline for a music video.\n\
             \n\
             VISUAL STYLE: {style_label} -- {style_notes}\n\
             ASPECT: {aspect}\n\
             AUDIO: {duration:.1} seconds, {bpm:.0} BPM, {bars} bars.\n\
             SONG STRUCTURE: {sections}\n\
             SONG STORY: {story}\n\
             \n\
             CAST (reference by cast_id only):\n{roster}\n\
             \n\
             LYRICS:\n{lyrics}\n\
             \n\
             Produce exactly {sequence_count} sequences that are contiguous and cover \
             0.0 to {duration:.1} seconds with no gaps or overlaps. The whole video will \
             later hold about {target_shots} shots.\n\
             \n\
             Return JSON: {{\"story_summary\": string, \"sequences\": [{{\"label\": string, \
             \"start\": number, \"end\": number, \"structure_type\": one of intro/verse/\
             prechorus/chorus/bridge/breakdown/outro/instrumental, \"energy\": number 0..1, \
             \"cast\": [cast_id], \"description\": string, \"arc_start\": string, \
             \"arc_end\": string, \"lyrics_reference\": string, \
             \"start_frame_prompt\": string, \"end_frame_prompt\": string}}]}}",
            style_label = preset.label,
            style_notes = preset.notes,
            aspect = state.project.aspect.as_str(),
            duration = duration,
            bpm = dna.meta.bpm,
            bars = dna.beat_grid.total_bars,
            sections = if sections.is_empty() { "unknown".to_string() } else { sections.join(", ") },
            story = if dna.story.is_empty() { "unknown" } else { dna.story.as_str() },
            roster = roster,
            lyrics = if lyrics.is_empty() { "(instrumental)" } else { lyrics.as_str() },
            sequence_count = sequence_count,
            target_shots = target_shots,
        );

        let started = Instant::now();
        let policy = RetryPolicy::new("sequence build");
        let llm_pref = state.project.llm_preference.clone();
        let response = retry(&policy, || {
            self.ctx.llm.complete_json(&llm_pref, system, &prompt)
        })
        .await?;

        let cost = self.ctx.pricing.cost_of("fal-ai/any-llm");
        record_cost(&self.ctx.session_costs, state, "fal-ai/any-llm", cost, "sequences_build");
        debug_log::record_call(
            self.ctx.paths(),
            state,
            "sequences_build",
            json!({ "prompt": prompt }),
            &response,
            started.elapsed().as_millis(),
            cost,
        );

        let resolver = CastResolver::new(state);
        let (summary, sequences) =
            clean_sequences(&response, &resolver, duration, sequence_count)?;

        info!(
            "built {} sequences covering {:.1}s",
            sequences.len(),
            sequences.last().map(|s| s.end).unwrap_or(0.0)
        );
        state.storyboard.story_summary = summary;
        state.storyboard.sequences = sequences;
        // A new timeline invalidates old shots and scenes.
        state.storyboard.shots.clear();
        state.cast_matrix.scenes.clear();
        Ok(())
    }

    /// Expand one sequence into shots with one LLM call.
    pub async fn expand_sequence(
        &self,
        state: &mut ProjectState,
        sequence_id: &SequenceId,
    ) -> EngineResult<usize> {
        let sequence = state
            .storyboard
            .sequence(sequence_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found(format!("sequence {}", sequence_id)))?;

        let preset = StylePreset::resolve(&state.project.style_preset);
        let roster = cast_roster_block(state);
        let system = "You are a music video director breaking a sequence into shots. You answer \
                      with a single JSON object and nothing else.";
        let prompt = format!(
            "Break this sequence into shots.\n\
             \n\
             VISUAL STYLE: {style_label} -- {style_notes}\n\
             SEQUENCE: {label} [{start:.2}s..{end:.2}s], {structure}, energy {energy:.2}.\n\
             DESCRIPTION: {description}\n\
             ARC: {arc_start} -> {arc_end}\n\
             CAST AVAILABLE (reference by cast_id only):\n{roster}\n\
             \n\
             Produce 5 to 8 shots, each 2 to 5 seconds, that exactly cover \
             [{start:.2}, {end:.2}] in order with no gaps and no overlaps.\n\
             \n\
             Return JSON: {{\"shots\": [{{\"start\": number, \"end\": number, \
             \"energy\": number 0..1, \"cast\": [cast_id], \
             \"wardrobe\": {{cast_id: outfit description}}, \"intent\": string, \
             \"camera_language\": string, \"environment\": string, \
             \"symbolic_elements\": [string], \"prompt_base\": string}}]}}",
            style_label = preset.label,
            style_notes = preset.notes,
            label = sequence.label,
            start = sequence.start,
            end = sequence.end,
            structure = sequence.structure_type,
            energy = sequence.energy,
            description = sequence.description,
            arc_start = sequence.arc_start,
            arc_end = sequence.arc_end,
            roster = roster,
        );

        let started = Instant::now();
        let policy = RetryPolicy::new("shot expansion");
        let llm_pref = state.project.llm_preference.clone();
        let response = retry(&policy, || {
            self.ctx.llm.complete_json(&llm_pref, system, &prompt)
        })
        .await?;

        let cost = self.ctx.pricing.cost_of("fal-ai/any-llm");
        record_cost(&self.ctx.session_costs, state, "fal-ai/any-llm", cost, "shots_expand");
        debug_log::record_call(
            self.ctx.paths(),
            state,
            "shots_expand",
            json!({ "sequence_id": sequence_id, "prompt": prompt }),
            &response,
            started.elapsed().as_millis(),
            cost,
        );

        let resolver = CastResolver::new(state);
        let shots = clean_shots(&response, &resolver, &sequence)?;
        let count = shots.len();

        // Replace this sequence's shots, keeping overall ordering by
        // sequence then start.
        state
            .storyboard
            .shots
            .retain(|s| &s.sequence_id != sequence_id);
        state.storyboard.shots.extend(shots);
        state.storyboard.shots.sort_by(|a, b| {
            a.sequence_id
                .cmp(&b.sequence_id)
                .then(a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal))
        });

        info!("expanded {} into {} shots", sequence_id, count);
        Ok(count)
    }

    /// Expand every sequence in order.
    pub async fn expand_all(&self, state: &mut ProjectState) -> EngineResult<usize> {
        let sequence_ids: Vec<SequenceId> = state
            .storyboard
            .sequences
            .iter()
            .map(|s| s.sequence_id.clone())
            .collect();
        if sequence_ids.is_empty() {
            return Err(EngineError::validation("build sequences before expanding shots"));
        }

        let mut total = 0;
        for sequence_id in sequence_ids {
            total += self.expand_sequence(state, &sequence_id).await?;
        }
        Ok(total)
    }
}

/// Per-cast roster lines for planning prompts, sorted by presence.
fn cast_roster_block(state: &ProjectState) -> String {
    if state.cast.is_empty() {
        return "(no cast; people-free imagery only)".to_string();
    }
    sort_cast_for_presence(&state.cast)
        .into_iter()
        .map(|(member, presence)| {
            format!(
                "- {} \"{}\" ({}, impact {:.1}): {}",
                member.cast_id,
                member.name,
                member.role,
                member.impact,
                presence.usage()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Coerce the sequence-build response into model sequences.
fn clean_sequences(
    response: &Value,
    resolver: &CastResolver,
    duration: f64,
    sequence_count: usize,
) -> EngineResult<(String, Vec<Sequence>)> {
    let summary = response
        .get("story_summary")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let raw = response
        .get("sequences")
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::validation("LLM response has no sequences array"))?;

    if raw.len() != sequence_count {
        warn!(
            "LLM returned {} sequences, target was {}",
            raw.len(),
            sequence_count
        );
    }

    let mut sequences = Vec::new();
    for (idx, value) in raw.iter().take(sequence_count).enumerate() {
        let start = value.get("start").and_then(Value::as_f64).unwrap_or(0.0);
        let end = value.get("end").and_then(Value::as_f64).unwrap_or(0.0);
        if end <= start {
            warn!("dropping sequence {} with empty range", idx + 1);
            continue;
        }
        let cast_refs: Vec<String> = value
            .get("cast")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        sequences.push(Sequence {
            sequence_id: SequenceId::from_index(idx),
            label: text_field(value, "label"),
            start: round_secs(start),
            end: round_secs(end),
            structure_type: StructureType::normalize(&text_field(value, "structure_type")),
            energy: value
                .get("energy")
                .and_then(Value::as_f64)
                .unwrap_or(0.5)
                .clamp(0.0, 1.0),
            cast: resolver.resolve_all(&cast_refs),
            description: text_field(value, "description"),
            arc_start: text_field(value, "arc_start"),
            arc_end: text_field(value, "arc_end"),
            lyrics_reference: text_field(value, "lyrics_reference"),
            start_frame_prompt: text_field(value, "start_frame_prompt"),
            end_frame_prompt: text_field(value, "end_frame_prompt"),
        });
    }

    if sequences.is_empty() {
        return Err(EngineError::validation("no usable sequences in LLM response"));
    }

    // Cap to the audio: drop sequences past the end, clip the last one.
    sequences.retain(|s| s.start < duration);
    for seq in &mut sequences {
        if seq.end > duration {
            seq.end = duration;
        }
    }
    // Ids must stay dense after any drop.
    for (idx, seq) in sequences.iter_mut().enumerate() {
        seq.sequence_id = SequenceId::from_index(idx);
    }

    Ok((summary, sequences))
}

/// Coerce a shot-expansion response for one sequence.
fn clean_shots(
    response: &Value,
    resolver: &CastResolver,
    sequence: &Sequence,
) -> EngineResult<Vec<Shot>> {
    let raw = response
        .get("shots")
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::validation("LLM response has no shots array"))?;

    let mut shots = Vec::new();
    for value in raw {
        let start = value.get("start").and_then(Value::as_f64).unwrap_or(-1.0);
        let end = value.get("end").and_then(Value::as_f64).unwrap_or(-1.0);
        if start < 0.0 || end <= start {
            warn!("dropping shot with invalid range in {}", sequence.sequence_id);
            continue;
        }
        if end - start > SHOT_SOFT_MAX_SECS + 0.25 {
            warn!(
                "shot in {} runs {:.1}s, past the {}s guideline",
                sequence.sequence_id,
                end - start,
                SHOT_SOFT_MAX_SECS
            );
        }

        let cast_refs: Vec<String> = value
            .get("cast")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut wardrobe = BTreeMap::new();
        if let Some(map) = value.get("wardrobe").and_then(Value::as_object) {
            for (key, outfit) in map {
                let Some(outfit) = outfit.as_str().filter(|o| !o.trim().is_empty()) else {
                    continue;
                };
                match resolver.resolve(key) {
                    Some(cast_id) => {
                        wardrobe.insert(cast_id, outfit.trim().to_string());
                    }
                    None => debug!("dropping wardrobe entry for unresolved '{}'", key),
                }
            }
        }

        let symbolic: Vec<String> = value
            .get("symbolic_elements")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        shots.push(Shot {
            shot_id: ShotId::new("pending"),
            sequence_id: sequence.sequence_id.clone(),
            start: round_secs(start),
            end: round_secs(end),
            structure_type: sequence.structure_type,
            energy: value
                .get("energy")
                .and_then(Value::as_f64)
                .unwrap_or(sequence.energy)
                .clamp(0.0, 1.0),
            cast: resolver.resolve_all(&cast_refs),
            wardrobe,
            intent: text_field(value, "intent"),
            camera_language: text_field(value, "camera_language"),
            environment: text_field(value, "environment"),
            symbolic_elements: symbolic,
            prompt_base: text_field(value, "prompt_base"),
            render: Default::default(),
        });
    }

    if shots.is_empty() {
        return Err(EngineError::validation(format!(
            "no usable shots in LLM response for {}",
            sequence.sequence_id
        )));
    }

    // Deliver in start order with dense ids.
    shots.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
    for (idx, shot) in shots.iter_mut().enumerate() {
        shot.shot_id = ShotId::for_sequence(&sequence.sequence_id, idx);
    }
    Ok(shots)
}

fn text_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Close sub-threshold gaps and push overlapping shots forward, per
/// sequence. Idempotent.
pub fn tighten(state: &mut ProjectState) -> usize {
    let mut adjusted = 0;
    let sequence_ids: Vec<SequenceId> = state
        .storyboard
        .sequences
        .iter()
        .map(|s| s.sequence_id.clone())
        .collect();

    for sequence_id in sequence_ids {
        let mut indices: Vec<usize> = state
            .storyboard
            .shots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.sequence_id == sequence_id)
            .map(|(i, _)| i)
            .collect();
        indices.sort_by(|&a, &b| {
            state.storyboard.shots[a]
                .start
                .partial_cmp(&state.storyboard.shots[b].start)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for window in indices.windows(2) {
            let (prev_idx, next_idx) = (window[0], window[1]);
            let prev_end = state.storyboard.shots[prev_idx].end;
            let next_start = state.storyboard.shots[next_idx].start;
            let gap = next_start - prev_end;

            if gap < 0.0 {
                // Overlap: push the later shot's start forward.
                state.storyboard.shots[next_idx].start = prev_end;
                adjusted += 1;
            } else if gap > 0.0 && gap <= TIGHTEN_GAP_SECS {
                // Sub-threshold hole: stretch the earlier shot.
                state.storyboard.shots[prev_idx].end = next_start;
                adjusted += 1;
            }
        }
    }

    if adjusted > 0 {
        debug!("tighten adjusted {} shot boundaries", adjusted);
    }
    adjusted
}

/// Enforce the audio-duration bound on the whole timeline. Idempotent;
/// safe to run any time the duration changes.
pub fn repair(state: &mut ProjectState) -> EngineResult<RepairReport> {
    let duration = state
        .audio_duration()
        .ok_or_else(|| EngineError::validation("no audio duration to repair against"))?;

    let mut report = RepairReport::default();

    let before = state.storyboard.sequences.len();
    state.storyboard.sequences.retain(|s| s.start < duration);
    report.sequences_removed = before - state.storyboard.sequences.len();

    for seq in &mut state.storyboard.sequences {
        if seq.end > duration {
            seq.end = duration;
            report.sequences_capped += 1;
        }
    }

    let live: Vec<SequenceId> = state
        .storyboard
        .sequences
        .iter()
        .map(|s| s.sequence_id.clone())
        .collect();

    let before = state.storyboard.shots.len();
    state
        .storyboard
        .shots
        .retain(|s| live.contains(&s.sequence_id) && s.start < duration);
    report.shots_removed = before - state.storyboard.shots.len();

    for shot in &mut state.storyboard.shots {
        if shot.end > duration {
            shot.end = duration;
            report.shots_capped += 1;
        }
    }

    if report.changed() {
        info!(
            "repair: removed {} sequences / {} shots, capped {} / {}",
            report.sequences_removed,
            report.shots_removed,
            report.sequences_capped,
            report.shots_capped
        );
    }
    Ok(report)
}
