//! Deterministic prompt construction for the inference provider.
//!
//! The same (room, theme, quality, custom text) inputs always produce the
//! same prompt, so a generation is reproducible from its request parameters.

use crate::models::{Quality, RoomType, StyleTheme};

/// Extra prompt tail for premium generations; nudges the model toward
/// higher-fidelity output.
const PREMIUM_SUFFIX: &str = ", 8k, highly detailed, professional interior photography";

/// Build the text prompt sent to the inference provider.
pub fn build_prompt(
    room: RoomType,
    theme: StyleTheme,
    quality: Quality,
    custom: Option<&str>,
) -> String {
    let mut prompt = format!(
        "A {room} redesigned in {theme} style, {descriptor}, photorealistic interior design photo, natural lighting, high resolution",
        room = room.display_name(),
        theme = theme.display_name(),
        descriptor = theme.descriptor(),
    );

    if quality == Quality::Premium {
        prompt.push_str(PREMIUM_SUFFIX);
    }

    if let Some(custom) = custom {
        let custom = custom.trim();
        if !custom.is_empty() {
            prompt.push_str(". ");
            prompt.push_str(custom);
        }
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_is_deterministic() {
        let a = build_prompt(
            RoomType::Bedroom,
            StyleTheme::Scandinavian,
            Quality::Standard,
            None,
        );
        let b = build_prompt(
            RoomType::Bedroom,
            StyleTheme::Scandinavian,
            Quality::Standard,
            None,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_prompt_mentions_room_and_theme() {
        let prompt = build_prompt(
            RoomType::LivingRoom,
            StyleTheme::Industrial,
            Quality::Standard,
            None,
        );
        assert!(prompt.contains("living room"));
        assert!(prompt.contains("industrial"));
        assert!(prompt.contains("exposed brick"));
    }

    #[test]
    fn test_premium_adds_detail_suffix() {
        let standard = build_prompt(RoomType::Kitchen, StyleTheme::Modern, Quality::Standard, None);
        let premium = build_prompt(RoomType::Kitchen, StyleTheme::Modern, Quality::Premium, None);
        assert_ne!(standard, premium);
        assert!(premium.contains("highly detailed"));
        assert!(!standard.contains("highly detailed"));
    }

    #[test]
    fn test_custom_text_appended() {
        let prompt = build_prompt(
            RoomType::HomeOffice,
            StyleTheme::Japandi,
            Quality::Standard,
            Some("add a standing desk by the window"),
        );
        assert!(prompt.ends_with("add a standing desk by the window"));
    }

    #[test]
    fn test_blank_custom_text_ignored() {
        let without = build_prompt(RoomType::Bathroom, StyleTheme::Coastal, Quality::Standard, None);
        let with_blank = build_prompt(
            RoomType::Bathroom,
            StyleTheme::Coastal,
            Quality::Standard,
            Some("   "),
        );
        assert_eq!(without, with_blank);
    }
}
