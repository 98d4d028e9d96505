//! # Display Module
//!
//! Everything between a decoded `photo` field and the pixels on screen.
//!
//! ```text
//! display/
//! ├── materializer.rs  - base64 → bytes → RGBA bitmap
//! └── surface.rs       - UI-owned image/notice state and the events that change it
//! ```
//!
//! The materializer runs on worker threads. The surface is only ever mutated
//! on the UI thread by applying [`surface::DisplayEvent`]s received over a
//! `tokio::sync::mpsc` channel.

pub mod materializer;
pub mod surface;
