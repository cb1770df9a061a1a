//! End-to-end pipeline test over mock collaborators: sequences, shots,
//! scenes, renders, videos and a final export, all against one project
//! state document.

use std::path::Path;
use std::sync::Arc;

use serde_json::json;

use muvi_engine::{
    export, generate_batch, EngineContext, ExportOptions, RenderOrchestrator, StoryboardPlanner,
};
use muvi_gen::{MockGenerationBackend, MockLlmClient};
use muvi_media::MockMediaMuxer;
use muvi_models::{
    CastMember, ExportMode, Project, ProjectState, RenderStatus, Role, STATE_VERSION,
};
use muvi_state::{SaveOptions, StateStore};
use muvi_storage::PathManager;
use tempfile::TempDir;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tiny_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([90, 90, 200]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
    bytes.into_inner()
}

/// Sequences response for a 45 s track: 3 sequences, contiguous.
fn sequences_response() -> serde_json::Value {
    json!({
        "story_summary": "a courier races the sunrise across the city",
        "sequences": [
            {"label": "Cold open", "start": 0.0, "end": 15.0, "structure_type": "intro",
             "energy": 0.2, "cast": ["lead_1"], "description": "empty streets at dawn"},
            {"label": "The run", "start": 15.0, "end": 30.0, "structure_type": "verse",
             "energy": 0.6, "cast": ["lead_1"], "description": "weaving through traffic"},
            {"label": "Sunrise", "start": 30.0, "end": 45.0, "structure_type": "chorus",
             "energy": 0.9, "cast": ["lead_1"], "description": "the city lights up"}
        ]
    })
}

/// Five shots per sequence, contiguous over a 15 s window.
fn shots_response(start: f64) -> serde_json::Value {
    let shots: Vec<serde_json::Value> = (0..5)
        .map(|i| {
            json!({
                "start": start + i as f64 * 3.0,
                "end": start + (i + 1) as f64 * 3.0,
                "energy": 0.5,
                "cast": ["lead_1"],
                "camera_language": if i == 2 { "close-up on her face" } else { "wide tracking" },
                "environment": "city streets",
                "prompt_base": format!("beat {}", i + 1)
            })
        })
        .collect();
    json!({ "shots": shots })
}

struct Harness {
    tmp: TempDir,
    ctx: Arc<EngineContext>,
    _server: MockServer,
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(tiny_png()))
        .mount(&server)
        .await;

    let mut llm = MockLlmClient::new();
    llm.expect_complete_json().returning(|_, _, prompt| {
        if prompt.contains("Design the narrative timeline") {
            Ok(sequences_response())
        } else if prompt.contains("Break this sequence into shots") {
            let start = if prompt.contains("[0.00s..15.00s]") {
                0.0
            } else if prompt.contains("[15.00s..30.00s]") {
                15.0
            } else {
                30.0
            };
            Ok(shots_response(start))
        } else {
            Ok(json!({
                "scenes": [
                    {"title": "Dawn streets", "prompt": "empty boulevard at dawn"},
                    {"title": "Traffic", "prompt": "dense morning traffic"},
                    {"title": "Skyline", "prompt": "sunlit skyline"}
                ]
            }))
        }
    });

    let mut backend = MockGenerationBackend::new();
    let gen_url = format!("{}/gen.png", server.uri());
    let gen_url2 = gen_url.clone();
    backend
        .expect_upload_file()
        .returning(|_| Ok("https://storage.fal.ai/up.png".to_string()));
    backend.expect_head_ok().returning(|_| true);
    backend
        .expect_text_to_image()
        .returning(move |_, _, _| Ok(gen_url.clone()));
    backend
        .expect_edit_image()
        .returning(move |_, _, _, _| Ok(gen_url2.clone()));

    let video_url = format!("{}/clip.mp4", server.uri());
    backend.expect_image_to_video().returning(move |_, _, _, _, _| {
        Ok(muvi_gen::GeneratedVideo {
            video_url: video_url.clone(),
            duration: Some(4.0),
            has_audio: false,
        })
    });

    let mut muxer = MockMediaMuxer::new();
    muxer.expect_clip_duration().returning(|_| Ok(4.0));
    muxer
        .expect_image_to_clip()
        .returning(|_, _, _, _, _, clip: &Path| {
            std::fs::write(clip, b"clip").unwrap();
            Ok(())
        });
    muxer.expect_trim().returning(|_, _, clip: &Path| {
        std::fs::write(clip, b"trimmed").unwrap();
        Ok(())
    });
    muxer.expect_speed_adjust().returning(|_, _, clip: &Path| {
        std::fs::write(clip, b"retimed").unwrap();
        Ok(())
    });
    muxer.expect_concat().returning(|_, _, output: &Path| {
        std::fs::write(output, b"final").unwrap();
        Ok(())
    });

    let tmp = TempDir::new().unwrap();
    let paths = PathManager::new(tmp.path()).unwrap();
    let store = Arc::new(StateStore::new(paths).unwrap());
    let ctx = Arc::new(EngineContext::new(
        store,
        Arc::new(backend),
        Arc::new(llm),
        Arc::new(muxer),
    ));

    Harness {
        tmp,
        ctx,
        _server: server,
    }
}

/// Project with analyzed 45 s audio and one lead with finished refs.
async fn seeded_project(h: &Harness) -> ProjectState {
    let mut state = ProjectState::new(Project::new("Courier", STATE_VERSION));
    let location = h
        .tmp
        .path()
        .join("live")
        .join("Courier")
        .to_string_lossy()
        .into_owned();
    state.project.project_location = Some(location);

    state.audio_dna = Some(muvi_models::AudioDna {
        meta: muvi_models::AudioMeta {
            duration_sec: 45.0,
            bpm: 120.0,
            ..Default::default()
        },
        ..Default::default()
    });
    if let Some(dna) = state.audio_dna.as_mut() {
        dna.beat_grid = muvi_models::BeatGrid::build(120.0, 45.0);
    }

    let mut lead = CastMember::new("lead_1".into(), "Noor", Role::Lead);
    lead.impact = 0.9;
    state.cast.push(lead);

    let renders = h.ctx.paths().renders_dir(&state).unwrap();
    std::fs::write(renders.join("lead_1_ref_a.png"), tiny_png()).unwrap();
    std::fs::write(renders.join("lead_1_ref_b.png"), tiny_png()).unwrap();
    state.cast_matrix.character_refs.insert(
        "lead_1".into(),
        muvi_models::CharacterRefs {
            ref_a: Some("/files/lead_1_ref_a.png".to_string()),
            ref_b: Some("/files/lead_1_ref_b.png".to_string()),
        },
    );

    let audio = h.ctx.paths().audio_dir(&state).unwrap().join("track.mp3");
    std::fs::write(&audio, b"mp3").unwrap();

    h.ctx.store.create(&mut state).await.unwrap();
    state
}

#[tokio::test]
async fn full_pipeline_short_track() {
    let h = harness().await;
    let mut state = seeded_project(&h).await;
    let project_id = state.project.id;

    // Sequences: a 45 s track targets 3 sequences / 18 shots.
    let planner = StoryboardPlanner::new(&h.ctx);
    planner.build_sequences(&mut state).await.unwrap();
    assert_eq!(state.storyboard.sequences.len(), 3);
    assert_eq!(state.storyboard.sequences[0].start, 0.0);
    assert_eq!(state.storyboard.sequences[2].end, 45.0);

    // Shots: every sequence expands, all ends inside the track.
    let total = planner.expand_all(&mut state).await.unwrap();
    assert_eq!(total, 15);
    assert!((15..=24).contains(&state.storyboard.shots.len()));
    assert!(state.storyboard.shots.iter().all(|s| s.end <= 45.0));

    // The whole timeline passes validation.
    let report = muvi_models::validate_state(&state, None);
    assert!(report.ok(), "validation errors: {:?}", report.errors);

    h.ctx
        .store
        .save(&mut state, SaveOptions::forced())
        .await
        .unwrap();

    // Every shot renders; the close-up shots pick ref_b.
    let orchestrator = RenderOrchestrator::new(&h.ctx);
    let shot_ids: Vec<_> = state
        .storyboard
        .shots
        .iter()
        .map(|s| s.shot_id.clone())
        .collect();
    for shot_id in &shot_ids {
        orchestrator
            .render_shot(project_id, shot_id, None)
            .await
            .unwrap();
    }

    let loaded = h.ctx.store.load(project_id).await.unwrap();
    assert!(loaded
        .storyboard
        .shots
        .iter()
        .all(|s| s.render.status == RenderStatus::Done));
    // Renders resolve on disk (the validator checks it too).
    let report = h.ctx.store.validate(&loaded, false).unwrap();
    assert!(report.ok(), "validation errors: {:?}", report.errors);
    // 15 renders priced and tallied.
    assert_eq!(
        loaded
            .costs
            .calls
            .iter()
            .filter(|c| c.note.as_deref() == Some("shot_render"))
            .count(),
        15
    );
    assert!(loaded.costs.is_consistent());

    // Stills export runs over all 15 shots.
    let result = export(&h.ctx, project_id, ExportOptions::default())
        .await
        .unwrap();
    assert_eq!(result.shots_exported, 15);
    assert_eq!(result.scene_transitions, 14);

    // Videos for every shot, then the img2vid export retimes them.
    let report = generate_batch(Arc::clone(&h.ctx), project_id, None, None)
        .await
        .unwrap();
    assert_eq!(report.success, 15);
    assert_eq!(report.failed, 0);

    let result = export(
        &h.ctx,
        project_id,
        ExportOptions {
            mode: ExportMode::Img2vid,
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(result.shots_exported, 15);
    assert_eq!(result.video_model.as_deref(), Some("veo3-fast"));
}

#[tokio::test]
async fn repair_is_idempotent_after_duration_change() {
    let h = harness().await;
    let mut state = seeded_project(&h).await;

    let planner = StoryboardPlanner::new(&h.ctx);
    planner.build_sequences(&mut state).await.unwrap();
    planner.expand_all(&mut state).await.unwrap();

    // The track turns out shorter than planned.
    state.audio_dna.as_mut().unwrap().meta.duration_sec = 40.0;
    let first = muvi_engine::repair(&mut state).unwrap();
    assert!(first.changed());
    assert!(state
        .storyboard
        .sequences
        .iter()
        .all(|s| s.end <= 40.0));
    assert!(state.storyboard.shots.iter().all(|s| s.end <= 40.0));

    let second = muvi_engine::repair(&mut state).unwrap();
    assert!(!second.changed());
}
