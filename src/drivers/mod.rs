//! Bundled [`crate::driver::AudioDriver`] implementations.
//!
//! - [`mock`]: instrumented in-process driver for tests and headless hosts
//! - [`cpal`]: real playback through the platform's default output device
//!   (feature `device-cpal`)

pub mod mock;

#[cfg(feature = "device-cpal")]
pub mod cpal;
