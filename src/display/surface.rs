//! Display state owned by the UI thread
//!
//! Worker tasks never touch this state directly. They post [`DisplayEvent`]s
//! onto a channel and the UI thread applies them in arrival order with
//! [`DisplaySurface::drain`]. The surface holds at most one image; every
//! event replaces or clears it, nothing is queued or merged.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::materializer::{ImageDecodeError, Photo};
use crate::mqtt::error::{ConnectionError, SubscriptionError};
use crate::mqtt::message_decoder::DecodeError;

/// Notice shown whenever the image is cleared
pub const NO_MESSAGE_NOTICE: &str = "No message found for topic";

/// Events in flight between the workers and the UI. Kept small because each
/// `Show` carries a full bitmap.
pub const DISPLAY_CHANNEL_CAPACITY: usize = 4;

const MAX_NOTICES: usize = 5;

/// Why the displayed image was cleared
#[derive(Debug)]
pub enum ClearReason {
    /// A well formed message without a photo
    NoPhoto,
    Decode(DecodeError),
    Image(ImageDecodeError),
    Subscription(SubscriptionError),
    Connection(ConnectionError),
}

impl ClearReason {
    /// Error notice shown in addition to [`NO_MESSAGE_NOTICE`]
    pub fn error_notice(&self) -> Option<String> {
        match self {
            ClearReason::NoPhoto => None,
            ClearReason::Decode(e) => Some(format!("Error processing message: {}", e)),
            ClearReason::Image(e) => Some(format!("Error processing message: {}", e)),
            ClearReason::Subscription(e) => Some(format!("Error subscribing to topic: {}", e)),
            ClearReason::Connection(ConnectionError::Lost(_)) => Some("Connection lost".to_string()),
            ClearReason::Connection(e) => Some(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

/// Transient status text
#[derive(Debug, Clone)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
    posted_at: Instant,
}

impl Notice {
    pub fn is_active(&self, now: Instant, duration: Duration) -> bool {
        now.saturating_duration_since(self.posted_at) < duration
    }
}

/// Everything that can change what is on screen
#[derive(Debug)]
pub enum DisplayEvent {
    Show(Photo),
    Clear(ClearReason),
    Notice { kind: NoticeKind, text: String },
}

impl DisplayEvent {
    pub fn info(text: impl Into<String>) -> Self {
        DisplayEvent::Notice {
            kind: NoticeKind::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        DisplayEvent::Notice {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }

    /// Notices leave the image alone, everything else replaces it
    pub fn is_notice(&self) -> bool {
        matches!(self, DisplayEvent::Notice { .. })
    }
}

pub struct DisplaySurface {
    image: Option<Photo>,
    /// Bumped on every image change so renderers know when to re-upload
    generation: u64,
    notices: VecDeque<Notice>,
    notice_duration: Duration,
}

impl DisplaySurface {
    pub fn new(notice_duration: Duration) -> Self {
        Self {
            image: None,
            generation: 0,
            notices: VecDeque::new(),
            notice_duration,
        }
    }

    pub fn image(&self) -> Option<&Photo> {
        self.image.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn apply(&mut self, event: DisplayEvent) {
        match event {
            DisplayEvent::Show(photo) => {
                debug!("Showing photo {}x{}", photo.width(), photo.height());
                self.image = Some(photo);
                self.generation += 1;
            }
            DisplayEvent::Clear(reason) => {
                match reason.error_notice() {
                    Some(text) => {
                        warn!("Clearing display: {}", text);
                        self.post(NoticeKind::Error, text);
                    }
                    None => info!("Clearing display: message without photo"),
                }
                self.clear();
                self.post(NoticeKind::Info, NO_MESSAGE_NOTICE.to_string());
            }
            DisplayEvent::Notice { kind, text } => self.post(kind, text),
        }
    }

    /// Applies every pending event, returns how many were applied
    pub fn drain(&mut self, events: &mut mpsc::Receiver<DisplayEvent>) -> usize {
        let mut applied = 0;
        while let Ok(event) = events.try_recv() {
            self.apply(event);
            applied += 1;
        }
        applied
    }

    /// Notices still visible at `now`, oldest first
    pub fn active_notices(&self, now: Instant) -> impl Iterator<Item = &Notice> {
        let duration = self.notice_duration;
        self.notices
            .iter()
            .filter(move |notice| notice.is_active(now, duration))
    }

    /// Drops expired notices
    pub fn prune_notices(&mut self, now: Instant) {
        let duration = self.notice_duration;
        self.notices.retain(|notice| notice.is_active(now, duration));
    }

    fn clear(&mut self) {
        if self.image.take().is_some() {
            self.generation += 1;
        }
    }

    fn post(&mut self, kind: NoticeKind, text: String) {
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(Notice {
            kind,
            text,
            posted_at: Instant::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::materializer::{materialize, tests::png_fixture};

    fn surface() -> DisplaySurface {
        DisplaySurface::new(Duration::from_secs(2))
    }

    fn texts(surface: &DisplaySurface) -> Vec<String> {
        surface
            .active_notices(Instant::now())
            .map(|n| n.text.clone())
            .collect()
    }

    #[test]
    fn show_replaces_image_wholesale() {
        let (expected, encoded) = png_fixture();
        let mut surface = surface();
        assert!(surface.image().is_none());

        surface.apply(DisplayEvent::Show(materialize(&encoded).unwrap()));
        surface.apply(DisplayEvent::Show(materialize(&encoded).unwrap()));

        assert_eq!(surface.image().unwrap().pixels(), &expected);
        assert_eq!(surface.generation(), 2);
    }

    #[test]
    fn missing_photo_clears_with_no_message_notice() {
        let (_, encoded) = png_fixture();
        let mut surface = surface();
        surface.apply(DisplayEvent::Show(materialize(&encoded).unwrap()));

        surface.apply(DisplayEvent::Clear(ClearReason::NoPhoto));

        assert!(surface.image().is_none());
        assert_eq!(texts(&surface), vec![NO_MESSAGE_NOTICE.to_string()]);
    }

    #[test]
    fn connection_lost_clears_regardless_of_state() {
        let (_, encoded) = png_fixture();
        for preload in [true, false] {
            let mut surface = surface();
            if preload {
                surface.apply(DisplayEvent::Show(materialize(&encoded).unwrap()));
            }
            surface.apply(DisplayEvent::Clear(ClearReason::Connection(
                ConnectionError::Lost("reset by peer".to_string()),
            )));
            assert!(surface.image().is_none());
            assert_eq!(
                texts(&surface),
                vec!["Connection lost".to_string(), NO_MESSAGE_NOTICE.to_string()]
            );
        }
    }

    #[test]
    fn errors_post_error_notice_before_no_message() {
        let mut surface = surface();
        surface.apply(DisplayEvent::Clear(ClearReason::Decode(
            DecodeError::NotAnObject,
        )));
        let notices: Vec<(NoticeKind, String)> = surface
            .active_notices(Instant::now())
            .map(|n| (n.kind, n.text.clone()))
            .collect();
        assert_eq!(
            notices,
            vec![
                (
                    NoticeKind::Error,
                    "Error processing message: payload is not a JSON object".to_string()
                ),
                (NoticeKind::Info, NO_MESSAGE_NOTICE.to_string()),
            ]
        );
    }

    #[test]
    fn notices_expire() {
        let mut surface = surface();
        surface.apply(DisplayEvent::info("Subscribed to topic: animal/photos/boi"));
        assert_eq!(surface.active_notices(Instant::now()).count(), 1);

        let later = Instant::now() + Duration::from_secs(3);
        assert_eq!(surface.active_notices(later).count(), 0);
        surface.prune_notices(later);
        assert_eq!(surface.active_notices(Instant::now()).count(), 0);
    }

    #[test]
    fn keeps_only_latest_notices() {
        let mut surface = surface();
        for i in 0..8 {
            surface.apply(DisplayEvent::error(format!("notice {}", i)));
        }
        let notices = texts(&surface);
        assert_eq!(notices.len(), MAX_NOTICES);
        assert_eq!(notices.first().map(String::as_str), Some("notice 3"));
    }

    #[test]
    fn drain_applies_in_arrival_order() {
        let (_, encoded) = png_fixture();
        let (tx, mut rx) = mpsc::channel(8);
        tx.try_send(DisplayEvent::Show(materialize(&encoded).unwrap()))
            .unwrap();
        tx.try_send(DisplayEvent::Clear(ClearReason::NoPhoto)).unwrap();

        let mut surface = surface();
        assert_eq!(surface.drain(&mut rx), 2);
        assert!(surface.image().is_none());
        assert_eq!(surface.drain(&mut rx), 0);
    }
}
