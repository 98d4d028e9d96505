//! Shared styling for the viewer window

use eframe::egui::{Color32, Frame, Stroke};

use crate::display::surface::NoticeKind;
use crate::mqtt::mqtt_handler::ConnectionState;

/// Dark theme palette
pub struct UiColors;

impl UiColors {
    pub const MAIN_BG: Color32 = Color32::from_rgb(30, 30, 30);

    pub const INNER_BG: Color32 = Color32::from_rgb(25, 25, 25);

    pub const BORDER: Color32 = Color32::from_rgb(60, 60, 60);

    /// Connected, informational notices
    pub const ACTIVE: Color32 = Color32::from_rgb(50, 200, 20);

    /// Disconnected or failed, error notices
    pub const INACTIVE: Color32 = Color32::from_rgb(200, 50, 20);

    /// Handshake in progress
    pub const PENDING: Color32 = Color32::from_rgb(220, 180, 30);

    pub const TEXT: Color32 = Color32::from_rgb(210, 210, 210);
}

pub fn state_color(state: &ConnectionState) -> Color32 {
    match state {
        ConnectionState::Connected => UiColors::ACTIVE,
        ConnectionState::Connecting => UiColors::PENDING,
        ConnectionState::Disconnected | ConnectionState::Failed => UiColors::INACTIVE,
    }
}

pub fn notice_color(kind: NoticeKind) -> Color32 {
    match kind {
        NoticeKind::Info => UiColors::TEXT,
        NoticeKind::Error => UiColors::INACTIVE,
    }
}

pub fn create_frame(bg_color: Color32, border_color: Color32) -> Frame {
    Frame::new()
        .stroke(Stroke::new(1.0, border_color))
        .fill(bg_color)
        .inner_margin(4)
        .outer_margin(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connected_is_green() {
        assert_eq!(state_color(&ConnectionState::Connected), UiColors::ACTIVE);
        assert_eq!(state_color(&ConnectionState::Failed), UiColors::INACTIVE);
        assert_eq!(state_color(&ConnectionState::Disconnected), UiColors::INACTIVE);
        assert_eq!(state_color(&ConnectionState::Connecting), UiColors::PENDING);
    }
}
