//! Canonical filenames for generated artifacts.
//!
//! Render, recovery and export all agree on these so files found on disk
//! can be matched back to state entries.

use muvi_models::{CastId, SceneId, ShotId};

/// Still image for a shot render (the stable name recovery falls back
/// to; fresh renders use [`shot_render_unique`]).
pub fn shot_render(shot_id: &ShotId) -> String {
    format!("{}.png", shot_id)
}

/// Unique still name for a fresh render. Re-rendering must produce a new
/// file, so every run gets its own suffix.
pub fn shot_render_unique(shot_id: &ShotId) -> String {
    let tag = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}.png", shot_id, &tag[..8])
}

/// Whether a renders-dir filename belongs to this shot's still (any
/// suffix, thumbnails excluded).
pub fn is_shot_render(file_name: &str, shot_id: &ShotId) -> bool {
    file_name.starts_with(shot_id.as_str())
        && file_name.ends_with(".png")
        && !file_name.contains("_thumb")
}

/// WebP thumbnail co-located with a still.
pub fn thumbnail_for(image_name: &str) -> String {
    match image_name.rsplit_once('.') {
        Some((stem, _)) => format!("{}_thumb.webp", stem),
        None => format!("{}_thumb.webp", image_name),
    }
}

/// Canonical cast reference; `variant` is 'a' (full body) or 'b'
/// (close-up).
pub fn cast_ref(cast_id: &CastId, variant: char) -> String {
    format!("{}_ref_{}.png", cast_id, variant)
}

/// Scene decor plate; `alt` selects the alternative plate.
pub fn scene_decor(scene_id: &SceneId, alt: bool) -> String {
    if alt {
        format!("{}_decor_alt.png", scene_id)
    } else {
        format!("{}_decor.png", scene_id)
    }
}

/// Scene wardrobe preview.
pub fn scene_wardrobe(scene_id: &SceneId) -> String {
    format!("{}_wardrobe.png", scene_id)
}

/// Generated video clip for a shot.
pub fn shot_video(shot_id: &ShotId) -> String {
    format!("video_{}.mp4", shot_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        let shot = ShotId::new("seq_01_sh02");
        assert_eq!(shot_render(&shot), "seq_01_sh02.png");
        assert_eq!(shot_video(&shot), "video_seq_01_sh02.mp4");
        assert_eq!(thumbnail_for("seq_01_sh02.png"), "seq_01_sh02_thumb.webp");
        assert_eq!(cast_ref(&CastId::new("lead_1"), 'a'), "lead_1_ref_a.png");
        assert_eq!(scene_decor(&SceneId::new("scene_02"), true), "scene_02_decor_alt.png");
    }

    #[test]
    fn test_unique_render_names_differ() {
        let shot = ShotId::new("seq_01_sh02");
        let first = shot_render_unique(&shot);
        let second = shot_render_unique(&shot);
        assert_ne!(first, second);
        assert!(is_shot_render(&first, &shot));
        assert!(is_shot_render(&second, &shot));
        assert!(!is_shot_render("seq_01_sh02_aa_thumb.webp", &shot));
        assert!(!is_shot_render("seq_01_sh03.png", &shot));
    }
}
