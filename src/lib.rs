//! `mixdown`: a real-time audio mixing service.
//!
//! This crate provides:
//! - Streaming decode of compressed audio files into PCM
//! - Per-voice format conversion (channel remix + resample) into a common
//!   mix format
//! - A consumer-pull mixer that sums one background track and any number
//!   of effect voices, then feeds the platform device queue under
//!   back-pressure
//! - A thread-safe control surface (play, stop, volume, query) mediated by
//!   a single mutex
//!
//! The service is driver-agnostic: hosts hand it an implementation of the
//! driver traits. An instrumented mock ships for tests and headless use,
//! and the `device-cpal` feature adds real playback through the platform's
//! default output device.

// Streaming decode of one audio file.
pub mod decoder;

// Source-format to mix-format conversion FIFO.
pub mod converter;

// Platform driver seam and the bundled implementations.
pub mod driver;
pub mod drivers;

// Mix constants and the saturating sum.
pub mod mixer;

// Stream/sample format value types.
pub mod format;

// The public service façade.
pub mod service;

// Crate-wide error surface.
pub mod error;

// Optional subscriber bootstrap for hosts without their own.
pub mod logging;

// Voice lifecycle and ownership, internal to the service.
mod voice;
mod voice_table;

pub use error::{Error, Result};
pub use format::{AudioFormat, SampleFormat};
pub use mixer::MIX_FRAMES;
pub use service::AudioService;
