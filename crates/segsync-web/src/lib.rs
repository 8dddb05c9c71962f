#![forbid(unsafe_code)]

//! Client side of segsync.
//!
//! - [`wire`]: push-frame decoding and validation.
//! - [`SessionVizClient`]: keeps every visualization of one session in sync
//!   with the server's sequence-numbered updates.
//! - [`VizViewer`]: turns the client's logical changes into frame-by-frame
//!   motion.
//!
//! The host owns the transport and the frame loop. It hands raw frames to
//! [`SessionVizClient::handle_raw`], forwards the resulting notifications to
//! its viewers, and calls [`VizViewer::on_frame`] when a requested frame
//! fires. No threads, no blocking, no wall clock.

pub mod client;
pub mod viewer;
pub mod wire;

pub use client::{ClientError, ClientNotification, ClientStats, SessionVizClient};
pub use viewer::VizViewer;
pub use wire::{PAYLOAD_PREVIEW_CHARS, PushParseError, parse_push_event, payload_preview, validate_event};
