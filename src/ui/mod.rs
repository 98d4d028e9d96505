//! # Photo Viewer User Interface
//!
//! Single eframe window with three areas:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Topic [cavalo ▾]  [Subscribe]          ● │  topic panel
//! ├──────────────────────────────────────────┤
//! │                                          │
//! │               latest photo               │  photo area
//! │                                          │
//! ├──────────────────────────────────────────┤
//! │ animal/photos/cavalo · 3 messages · 12:… │  status panel
//! └──────────────────────────────────────────┘
//! ```
//!
//! The UI thread is the only owner of the [`DisplaySurface`]. Every frame it
//! drains the display channel, then re-uploads the texture if the image
//! changed. Subscribing only queues a command, so a slow broker never stalls
//! rendering.

pub mod common;

use eframe::egui::{
    self, load::SizedTexture, Align2, Area, CentralPanel, ColorImage, ComboBox, Context, Id,
    TextureHandle, TextureOptions, TopBottomPanel,
};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::config::UIConfig;
use crate::display::surface::{ClearReason, DisplayEvent, DisplaySurface};
use crate::mqtt::mqtt_handler::{SessionCommander, SessionStatus};
use crate::mqtt::topic_selector::TopicSelector;

use self::common::{create_frame, notice_color, state_color, UiColors};

pub struct PhotoViewerUI {
    surface: DisplaySurface,
    display_rx: mpsc::Receiver<DisplayEvent>,
    commander: SessionCommander,
    status_rx: watch::Receiver<SessionStatus>,
    selector: TopicSelector,
    texture: Option<TextureHandle>,
    texture_generation: u64,
    poll_frequency: Duration,
}

impl PhotoViewerUI {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        display_rx: mpsc::Receiver<DisplayEvent>,
        commander: SessionCommander,
        status_rx: watch::Receiver<SessionStatus>,
        ui_config: &UIConfig,
    ) -> Self {
        let mut surface = DisplaySurface::new(ui_config.notice_duration());
        let mut selector = TopicSelector::default();
        if let Err(e) = selector.select_name(&ui_config.initial_topic) {
            surface.apply(DisplayEvent::error(format!("Invalid initial topic: {}", e)));
        }

        Self {
            surface,
            display_rx,
            commander,
            status_rx,
            selector,
            texture: None,
            texture_generation: 0,
            poll_frequency: ui_config.poll_frequency(),
        }
    }

    fn subscribe(&mut self) {
        let topic = self.selector.selected();
        info!("Subscribe requested for {}", self.selector.full_topic());
        if let Err(e) = self.commander.subscribe(topic) {
            error!("Could not request subscription to {}: {}", topic, e);
            self.surface
                .apply(DisplayEvent::Clear(ClearReason::Subscription(e)));
        }
    }

    /// Uploads the current photo once per image change
    fn sync_texture(&mut self, ctx: &Context) {
        if self.texture_generation == self.surface.generation() {
            return;
        }
        self.texture_generation = self.surface.generation();

        self.texture = self.surface.image().map(|photo| {
            let image = ColorImage::from_rgba_unmultiplied(photo.size(), photo.pixels().as_raw());
            ctx.load_texture("photo", image, TextureOptions::LINEAR)
        });
        debug!("Texture updated (generation {})", self.texture_generation);
    }

    fn topic_bar(&mut self, ui: &mut egui::Ui) {
        let status = self.status_rx.borrow().clone();

        ui.horizontal(|ui| {
            ui.label("Topic");
            ComboBox::from_id_salt("topic_selector")
                .selected_text(self.selector.selected().as_str())
                .show_ui(ui, |ui| {
                    for (index, topic) in self.selector.topics().iter().enumerate() {
                        let selected = self.selector.selected() == *topic;
                        if ui.selectable_label(selected, topic.as_str()).clicked() {
                            self.selector.select_index(Some(index));
                        }
                    }
                });

            if ui.button("Subscribe").clicked() {
                self.subscribe();
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.colored_label(state_color(&status.connection_state), "\u{2B24}");
            });
        });
    }

    fn photo_area(&self, ui: &mut egui::Ui) {
        create_frame(UiColors::INNER_BG, UiColors::BORDER).show(ui, |ui| {
            ui.centered_and_justified(|ui| match &self.texture {
                Some(texture) => {
                    ui.add(
                        egui::Image::new(SizedTexture::from_handle(texture))
                            .max_size(ui.available_size())
                            .maintain_aspect_ratio(true),
                    );
                }
                None => {
                    ui.colored_label(UiColors::BORDER, "No image");
                }
            });
        });
    }

    fn status_bar(&self, ui: &mut egui::Ui) {
        let status = self.status_rx.borrow().clone();

        ui.horizontal(|ui| {
            ui.colored_label(
                state_color(&status.connection_state),
                format!("{:?}", status.connection_state),
            );
            ui.separator();
            ui.label(status.active_topic.as_deref().unwrap_or("no subscription"));
            ui.separator();
            ui.label(format!("{} messages", status.messages_received));
            if let Some(photo) = self.surface.image() {
                ui.separator();
                ui.label(format!(
                    "{}x{} decoded {}",
                    photo.width(),
                    photo.height(),
                    photo.decoded_at().format("%H:%M:%S")
                ));
            }
            if let Some(last) = status.last_activity {
                ui.separator();
                ui.label(format!("last activity {}", last.format("%H:%M:%S")));
            }
            if let Some(error) = &status.last_error {
                ui.separator();
                ui.colored_label(UiColors::INACTIVE, error.as_str());
            }
        });
    }

    fn notices(&self, ctx: &Context) {
        let now = Instant::now();
        if self.surface.active_notices(now).next().is_none() {
            return;
        }

        Area::new(Id::new("notices"))
            .anchor(Align2::CENTER_BOTTOM, egui::vec2(0.0, -48.0))
            .show(ctx, |ui| {
                create_frame(UiColors::MAIN_BG, UiColors::BORDER).show(ui, |ui| {
                    for notice in self.surface.active_notices(now) {
                        ui.colored_label(notice_color(notice.kind), notice.text.as_str());
                    }
                });
            });
    }
}

impl eframe::App for PhotoViewerUI {
    fn update(&mut self, ctx: &Context, _frame: &mut eframe::Frame) {
        ctx.request_repaint_after(self.poll_frequency);

        let applied = self.surface.drain(&mut self.display_rx);
        if applied > 0 {
            debug!("Applied {} display events", applied);
        }
        self.surface.prune_notices(Instant::now());
        self.sync_texture(ctx);

        TopBottomPanel::top("topic_panel").show(ctx, |ui| self.topic_bar(ui));
        TopBottomPanel::bottom("status_panel").show(ctx, |ui| self.status_bar(ui));
        CentralPanel::default().show(ctx, |ui| self.photo_area(ui));
        self.notices(ctx);
    }
}
