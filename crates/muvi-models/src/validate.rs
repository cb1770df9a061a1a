//! State validation.
//!
//! Checks every invariant the data model promises after a save: reference
//! integrity, timeline bounds, shot coverage, and (when a resolver is
//! supplied) that done renders and the style lock actually point at files.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::ids::CastId;
use crate::render::RenderStatus;
use crate::state::ProjectState;
use crate::storyboard::MAX_SHOT_GAP_SECS;

/// Float slack for timeline comparisons; timings are stored at millisecond
/// precision.
const EPSILON: f64 = 0.001;

/// Resolves state URLs to filesystem paths for the IO-dependent checks.
///
/// Implemented by the path manager; kept as a trait so validation stays
/// runnable without a filesystem (tests, dry runs).
pub trait FileResolver {
    /// Resolve a state URL to an existing file, if any.
    fn resolve(&self, url: &str, state: &ProjectState) -> Option<PathBuf>;

    /// The project's folder, for containment checks.
    fn project_folder(&self, state: &ProjectState) -> Option<PathBuf>;
}

/// Outcome of a validation pass.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    fn push(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }
}

/// Validate a project state against the model invariants.
///
/// Pass a resolver to include the filesystem checks (done renders resolve,
/// style lock lives inside the project folder); without one those checks
/// are skipped.
pub fn validate_state(state: &ProjectState, resolver: Option<&dyn FileResolver>) -> ValidationReport {
    let mut report = ValidationReport::default();

    let cast_ids: HashSet<&CastId> = state.cast.iter().map(|m| &m.cast_id).collect();
    let duration = state.audio_duration();

    // Sequences: bounds, energy, cast references.
    for seq in &state.storyboard.sequences {
        if seq.start < 0.0 || seq.end <= seq.start {
            report.push(format!(
                "sequence {}: invalid range [{:.3}, {:.3}]",
                seq.sequence_id, seq.start, seq.end
            ));
        }
        if let Some(dur) = duration {
            if seq.end > dur + EPSILON {
                report.push(format!(
                    "sequence {}: end {:.3} exceeds audio duration {:.3}",
                    seq.sequence_id, seq.end, dur
                ));
            }
        }
        if !(0.0..=1.0).contains(&seq.energy) {
            report.push(format!(
                "sequence {}: energy {} out of [0, 1]",
                seq.sequence_id, seq.energy
            ));
        }
        for cast_id in &seq.cast {
            if !cast_ids.contains(cast_id) {
                report.push(format!(
                    "sequence {}: unknown cast_id {}",
                    seq.sequence_id, cast_id
                ));
            }
        }
    }

    // Shots: sequence reference, energy, cast references (array and
    // wardrobe keys).
    for shot in &state.storyboard.shots {
        if state.storyboard.sequence(&shot.sequence_id).is_none() {
            report.push(format!(
                "shot {}: unknown sequence {}",
                shot.shot_id, shot.sequence_id
            ));
        }
        if !(0.0..=1.0).contains(&shot.energy) {
            report.push(format!("shot {}: energy {} out of [0, 1]", shot.shot_id, shot.energy));
        }
        for cast_id in shot.cast.iter().chain(shot.wardrobe.keys()) {
            if !cast_ids.contains(cast_id) {
                report.push(format!("shot {}: unknown cast_id {}", shot.shot_id, cast_id));
            }
        }
    }

    // Per-sequence coverage: sorted shots span the sequence with no gap
    // above threshold and no overlap.
    for seq in &state.storyboard.sequences {
        let mut shots = state.storyboard.shots_of(&seq.sequence_id);
        if shots.is_empty() {
            continue;
        }
        shots.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

        if shots[0].start - seq.start > MAX_SHOT_GAP_SECS {
            report.push(format!(
                "sequence {}: leading gap {:.3}s before first shot",
                seq.sequence_id,
                shots[0].start - seq.start
            ));
        }
        if seq.end - shots[shots.len() - 1].end > MAX_SHOT_GAP_SECS {
            report.push(format!(
                "sequence {}: trailing gap {:.3}s after last shot",
                seq.sequence_id,
                seq.end - shots[shots.len() - 1].end
            ));
        }
        for pair in shots.windows(2) {
            let gap = pair[1].start - pair[0].end;
            if gap > MAX_SHOT_GAP_SECS {
                report.push(format!(
                    "sequence {}: gap {:.3}s between {} and {}",
                    seq.sequence_id, gap, pair[0].shot_id, pair[1].shot_id
                ));
            }
            if gap < -EPSILON {
                report.push(format!(
                    "sequence {}: {} overlaps {} by {:.3}s",
                    seq.sequence_id,
                    pair[0].shot_id,
                    pair[1].shot_id,
                    -gap
                ));
            }
        }
    }

    // Filesystem checks, resolver permitting.
    if let Some(resolver) = resolver {
        for shot in &state.storyboard.shots {
            if shot.render.status == RenderStatus::Done {
                match shot.render.image_url.as_deref() {
                    Some(url) => {
                        if resolver.resolve(url, state).is_none() {
                            report.push(format!(
                                "shot {}: render marked done but {} does not resolve",
                                shot.shot_id, url
                            ));
                        }
                    }
                    None => {
                        report.push(format!("shot {}: render marked done without image_url", shot.shot_id));
                    }
                }
            }
        }

        if let Some(lock_url) = state.project.style_lock_image.as_deref() {
            match (resolver.resolve(lock_url, state), resolver.project_folder(state)) {
                (Some(path), Some(folder)) => {
                    if !path.starts_with(&folder) {
                        report.push(format!(
                            "style_lock_image {} lives outside the project folder",
                            lock_url
                        ));
                    }
                }
                _ => report.push(format!("style_lock_image {} does not resolve", lock_url)),
            }
        }
    }

    report
}
