//! One playing source.
//!
//! A [`Voice`] couples a [`StreamingDecoder`] with a converter stream and
//! the loop/finished flags. The mixer pulls from it with [`Voice::read_frames`],
//! which tops the converter up from the decoder on demand.
//!
//! Lifecycle: ACTIVE while the decoder produces input; at end-of-source a
//! looping voice seeks back and stays ACTIVE, a one-shot voice flushes its
//! converter and DRAINS; a drained (or closed) voice is dead and gets swept
//! by the table. Decode and converter failures never leave this module:
//! they are logged and the voice is marked finished.

use tracing::error;

use crate::decoder::StreamingDecoder;
use crate::driver::ConverterStream;

// Compressed-side read granularity, in bytes of source PCM per decoder pull.
const DECODE_CHUNK_SIZE: usize = 4096;

pub(crate) struct Voice {
    // None once the voice is closed; a closed voice cannot be refilled.
    decoder: Option<StreamingDecoder>,
    converter: Box<dyn ConverterStream>,
    looping: bool,
    finished: bool,
}

impl Voice {
    pub(crate) fn new(
        decoder: StreamingDecoder,
        converter: Box<dyn ConverterStream>,
        looping: bool,
    ) -> Self {
        Self {
            decoder: Some(decoder),
            converter,
            looping,
            finished: false,
        }
    }

    /// True while the voice still counts as playing: open and not finished.
    pub(crate) fn is_playing(&self) -> bool {
        self.decoder.is_some() && !self.finished
    }

    /// A voice is dead once it is closed, or finished with a drained
    /// converter. Buffered converter residue without a live decoder cannot
    /// be refilled, so a closed voice is dead regardless of residue.
    pub(crate) fn is_dead(&self) -> bool {
        match &self.decoder {
            None => true,
            Some(_) => self.finished && self.converter.available().unwrap_or(0) == 0,
        }
    }

    /// Pull up to `frames` mix-format frames into `out`.
    ///
    /// Tops the converter up from the decoder until it can satisfy the
    /// request or the source ends. Returns the byte count actually pulled
    /// (pre-zero-fill) so the mixer knows whether this voice contributed;
    /// the remainder of `out[..frames * bytes_per_frame]` is zeroed.
    pub(crate) fn read_frames(&mut self, out: &mut [u8], frames: usize, bytes_per_frame: usize) -> usize {
        if self.decoder.is_none() {
            return 0;
        }

        let bytes_needed = frames * bytes_per_frame;
        if bytes_needed == 0 || out.len() < bytes_needed {
            return 0;
        }

        self.top_up(bytes_needed);

        let pulled = match self.converter.pull(&mut out[..bytes_needed]) {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "failed to read converted audio");
                self.finished = true;
                0
            }
        };

        out[pulled..bytes_needed].fill(0);
        pulled
    }

    /// Decode-and-push until the converter holds `bytes_needed` or the
    /// source ends.
    fn top_up(&mut self, bytes_needed: usize) {
        let mut chunk = [0u8; DECODE_CHUNK_SIZE];

        while !self.finished {
            let available = match self.converter.available() {
                Ok(n) => n,
                Err(e) => {
                    error!(error = %e, "failed to query converter");
                    self.finished = true;
                    break;
                }
            };
            if available >= bytes_needed {
                break;
            }

            let Some(decoder) = self.decoder.as_mut() else {
                break;
            };

            match decoder.read_chunk(&mut chunk) {
                Ok(n) if n > 0 => {
                    if let Err(e) = self.converter.push(&chunk[..n]) {
                        error!(error = %e, "failed to queue decoded audio");
                        self.finished = true;
                    }
                }
                Ok(_) => {
                    if self.looping {
                        if let Err(e) = decoder.seek_to_start() {
                            error!(error = %e, "failed to rewind looping voice");
                            self.finished = true;
                        }
                        continue;
                    }
                    self.finished = true;
                    if let Err(e) = self.converter.flush() {
                        error!(error = %e, "failed to flush converter at end of source");
                    }
                }
                Err(e) => {
                    error!(error = %e, "decode error");
                    self.finished = true;
                }
            }
        }
    }
}
