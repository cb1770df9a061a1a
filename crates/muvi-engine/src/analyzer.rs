//! Audio analysis: duration, tempo, lyrics and structure.

use std::path::Path;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use muvi_models::audio::{BpmSource, BPM_FALLBACK, BPM_MAX, BPM_MIN};
use muvi_models::{AudioDna, BeatGrid, DynamicsSpan, LyricLine, ProjectState, Section, StructureType};
use muvi_gen::{retry, RetryPolicy};

use crate::context::EngineContext;
use crate::costs::record_cost;
use crate::debug_log;
use crate::error::{EngineError, EngineResult};

/// Prompt sent to the audio-understanding service alongside the track.
const UNDERSTANDING_PROMPT: &str = "Analyze this song. Return a single JSON object with keys: \
     style (string), mood (string), bpm (number), \
     sections (array of {type, start, end} in seconds), \
     dynamics (array of {start, end, energy} with energy in 0..1), \
     delivery (string), story (string), \
     lyrics (array of {text, start}), instruments (array of strings).";

/// Drives the analysis pipeline for one uploaded track.
pub struct AudioAnalyzer<'a> {
    ctx: &'a EngineContext,
}

impl<'a> AudioAnalyzer<'a> {
    pub fn new(ctx: &'a EngineContext) -> Self {
        Self { ctx }
    }

    /// Analyze `audio_path` and populate `state.audio_dna`.
    ///
    /// Local probes that fail are skipped silently; a failed
    /// understanding call propagates.
    pub async fn analyze(
        &self,
        state: &mut ProjectState,
        audio_path: &Path,
        extra_prompt: &str,
    ) -> EngineResult<()> {
        if !audio_path.exists() {
            return Err(EngineError::not_found(format!(
                "audio file {}",
                audio_path.display()
            )));
        }

        // Local duration, two strategies in order.
        let mut duration = 0.0f64;
        let mut duration_source = String::new();
        match muvi_media::probe_duration(audio_path).await {
            Ok(d) => {
                duration = d;
                duration_source = "ffprobe".to_string();
            }
            Err(e) => debug!("ffprobe duration failed, trying decode: {}", e),
        }

        // Local tempo over decoded PCM; the decode doubles as the backup
        // duration strategy.
        let mut local_bpm: Option<f64> = None;
        match muvi_media::decode_mono(audio_path).await {
            Ok(samples) => {
                if duration <= 0.0 {
                    duration = muvi_media::samples_duration(&samples);
                    duration_source = "pcm".to_string();
                }
                local_bpm = crate::beat::detect_bpm(&samples, muvi_media::ANALYSIS_SAMPLE_RATE);
                if let Some(bpm) = local_bpm {
                    debug!("local tempo estimate: {:.1} BPM", bpm);
                }
            }
            Err(e) => debug!("PCM decode failed: {}", e),
        }

        if duration <= 0.0 {
            return Err(EngineError::validation(
                "could not determine audio duration from any probe",
            ));
        }

        // Hand the track to the external services.
        let audio_url = self.ctx.backend.upload_file(audio_path).await?;

        let whisper_text = if state.project.use_whisper {
            match self.transcribe(state, &audio_url).await {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("whisper transcription failed, keeping understanding lyrics: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let understanding = self.understand(state, &audio_url, extra_prompt).await?;

        let mut dna = normalize_understanding(&understanding);
        dna.meta.duration_sec = duration;
        dna.meta.duration_source = duration_source;

        // Local figures win; the external tempo is kept for reference.
        if let Some(bpm) = local_bpm {
            dna.meta.bpm = bpm;
            dna.meta.bpm_source = BpmSource::Librosa;
        } else if dna.meta.bpm_fal.is_some() {
            dna.meta.bpm = dna.meta.bpm_fal.unwrap();
            dna.meta.bpm_source = BpmSource::Fal;
        } else {
            dna.meta.bpm = BPM_FALLBACK;
            dna.meta.bpm_source = BpmSource::Fallback;
        }
        dna.meta.bpm = dna.meta.bpm.clamp(BPM_MIN, BPM_MAX);

        if let Some(text) = whisper_text {
            dna.lyrics = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| LyricLine {
                    text: l.to_string(),
                    start: None,
                })
                .collect();
            dna.lyrics_source = "whisper".to_string();
        }

        dna.beat_grid = BeatGrid::build(dna.meta.bpm, dna.meta.duration_sec);

        info!(
            "audio analyzed: {:.1}s at {:.1} BPM ({}), {} sections, {} lyric lines",
            dna.meta.duration_sec,
            dna.meta.bpm,
            dna.meta.bpm_source.as_str(),
            dna.sections.len(),
            dna.lyrics.len()
        );

        state.audio_dna = Some(dna);
        Ok(())
    }

    async fn transcribe(&self, state: &mut ProjectState, audio_url: &str) -> EngineResult<String> {
        let policy = RetryPolicy::new("whisper transcription");
        let started = Instant::now();
        let result = retry(&policy, || self.ctx.backend.transcribe(audio_url)).await?;

        let cost = self.ctx.pricing.cost_of("fal-ai/whisper");
        record_cost(&self.ctx.session_costs, state, "fal-ai/whisper", cost, "lyrics_whisper");
        debug_log::record_call(
            self.ctx.paths(),
            state,
            "whisper",
            json!({ "audio_url": audio_url }),
            &json!({ "chars": result.text.len() }),
            started.elapsed().as_millis(),
            cost,
        );
        Ok(result.text)
    }

    async fn understand(
        &self,
        state: &mut ProjectState,
        audio_url: &str,
        extra_prompt: &str,
    ) -> EngineResult<Value> {
        let prompt = if extra_prompt.is_empty() {
            UNDERSTANDING_PROMPT.to_string()
        } else {
            format!("{}\n\nAdditional context from the artist: {}", UNDERSTANDING_PROMPT, extra_prompt)
        };

        let policy = RetryPolicy::new("audio understanding");
        let started = Instant::now();
        let result = retry(&policy, || self.ctx.backend.understand_audio(audio_url, &prompt)).await;

        match result {
            Ok(raw) => {
                let value = unwrap_understanding(raw)?;
                let cost = self.ctx.pricing.cost_of("fal-ai/audio-understanding");
                record_cost(
                    &self.ctx.session_costs,
                    state,
                    "fal-ai/audio-understanding",
                    cost,
                    "audio_dna",
                );
                debug_log::record_call(
                    self.ctx.paths(),
                    state,
                    "audio_understanding",
                    json!({ "audio_url": audio_url, "prompt": prompt }),
                    &value,
                    started.elapsed().as_millis(),
                    cost,
                );
                Ok(value)
            }
            Err(e) => {
                debug_log::record_failure(
                    self.ctx.paths(),
                    state,
                    "audio_understanding",
                    json!({ "audio_url": audio_url }),
                    &e.to_string(),
                );
                Err(e.into())
            }
        }
    }
}

/// The understanding service wraps its JSON unpredictably: sometimes the
/// object itself, sometimes a fenced string, sometimes under `output`.
fn unwrap_understanding(raw: Value) -> EngineResult<Value> {
    match raw {
        Value::String(s) => Ok(muvi_gen::parse_fenced_json(&s)?),
        Value::Object(ref map) => {
            if let Some(Value::String(s)) = map.get("output") {
                Ok(muvi_gen::parse_fenced_json(s)?)
            } else {
                Ok(raw)
            }
        }
        other => Err(EngineError::validation(format!(
            "understanding response has unexpected shape: {}",
            other
        ))),
    }
}

/// Coerce the understanding blob into the audio DNA shape. Missing or
/// malformed fields become defaults; nothing here fails.
fn normalize_understanding(value: &Value) -> AudioDna {
    let mut dna = AudioDna::default();

    dna.style = string_at(value, "style");
    dna.mood = string_at(value, "mood");
    dna.delivery = string_at(value, "delivery");
    dna.story = string_at(value, "story");
    dna.meta.bpm_fal = value.get("bpm").and_then(Value::as_f64).filter(|b| *b > 0.0);

    if let Some(sections) = value.get("sections").and_then(Value::as_array) {
        for section in sections {
            let (Some(start), Some(end)) = (
                section.get("start").and_then(Value::as_f64),
                section.get("end").and_then(Value::as_f64),
            ) else {
                continue;
            };
            if end <= start {
                continue;
            }
            let kind = section
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("verse");
            dna.sections.push(Section {
                kind: StructureType::normalize(kind).as_str().to_string(),
                start,
                end,
            });
        }
    }

    if let Some(dynamics) = value.get("dynamics").and_then(Value::as_array) {
        for span in dynamics {
            let (Some(start), Some(end), Some(energy)) = (
                span.get("start").and_then(Value::as_f64),
                span.get("end").and_then(Value::as_f64),
                span.get("energy").and_then(Value::as_f64),
            ) else {
                continue;
            };
            dna.dynamics.push(DynamicsSpan {
                start,
                end,
                energy: energy.clamp(0.0, 1.0),
            });
        }
    }

    if let Some(lyrics) = value.get("lyrics").and_then(Value::as_array) {
        for line in lyrics {
            match line {
                Value::String(text) if !text.trim().is_empty() => dna.lyrics.push(LyricLine {
                    text: text.trim().to_string(),
                    start: None,
                }),
                Value::Object(_) => {
                    let text = string_at(line, "text");
                    if !text.is_empty() {
                        dna.lyrics.push(LyricLine {
                            text,
                            start: line.get("start").and_then(Value::as_f64),
                        });
                    }
                }
                _ => {}
            }
        }
        if !dna.lyrics.is_empty() {
            dna.lyrics_source = "fal".to_string();
        }
    }

    if let Some(instruments) = value.get("instruments").and_then(Value::as_array) {
        dna.instruments = instruments
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }

    dna
}

fn string_at(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_plain_object() {
        let value = unwrap_understanding(json!({"style": "synthwave"})).unwrap();
        assert_eq!(value["style"], "synthwave");
    }

    #[test]
    fn test_unwrap_fenced_string() {
        let value =
            unwrap_understanding(json!("```json\n{\"style\": \"grime\"}\n```")).unwrap();
        assert_eq!(value["style"], "grime");
    }

    #[test]
    fn test_unwrap_output_wrapper() {
        let value = unwrap_understanding(json!({"output": "{\"mood\": \"dark\"}"})).unwrap();
        assert_eq!(value["mood"], "dark");
    }

    #[test]
    fn test_normalize_coerces_fields() {
        let raw = json!({
            "style": " synth pop ",
            "mood": "wistful",
            "bpm": 97.5,
            "sections": [
                {"type": "Pre-Chorus", "start": 10.0, "end": 22.0},
                {"type": "verse", "start": 30.0, "end": 20.0},
                {"type": "chorus", "start": 22.0}
            ],
            "dynamics": [{"start": 0.0, "end": 10.0, "energy": 1.7}],
            "lyrics": ["first line", {"text": "second line", "start": 4.2}, ""],
            "instruments": ["bass", "pads"]
        });
        let dna = normalize_understanding(&raw);
        assert_eq!(dna.style, "synth pop");
        assert_eq!(dna.meta.bpm_fal, Some(97.5));
        // Inverted and incomplete sections are dropped.
        assert_eq!(dna.sections.len(), 1);
        assert_eq!(dna.sections[0].kind, "prechorus");
        assert_eq!(dna.dynamics[0].energy, 1.0);
        assert_eq!(dna.lyrics.len(), 2);
        assert_eq!(dna.lyrics[1].start, Some(4.2));
        assert_eq!(dna.instruments, vec!["bass", "pads"]);
    }
}
