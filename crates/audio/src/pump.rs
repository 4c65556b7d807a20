//! Pull-thread audio pump.
//!
//! A dedicated thread polls the decoder for PCM and pushes it to an output
//! port. When nothing is ready it writes one buffer of silence so the device
//! never starves; the blocking `output` call is what paces the loop.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use avb_common::{PlayerState, StateCell};
use avb_decoder::DecoderSession;

use crate::sink::{AudioOutput, PortFormat, PortId};
use crate::stats::AudioStats;

/// Back-off after a failed write so a broken port does not spin the thread.
const ERROR_BACKOFF: Duration = Duration::from_millis(5);

/// Everything the pump thread borrows from the session.
pub struct AudioPump {
    pub state: Arc<StateCell>,
    pub decoder: Arc<dyn DecoderSession>,
    pub output: Arc<dyn AudioOutput>,
    pub port: PortId,
    /// Format the port is currently configured for.
    pub format: PortFormat,
    pub stats: Arc<AudioStats>,
}

impl AudioPump {
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("audio-pump".to_string())
            .spawn(move || self.run())
    }

    /// Run until the player leaves `Active` or the decoder goes inactive.
    pub fn run(mut self) {
        info!(port = %self.port, format = %self.format, "Audio pump started");
        let mut silence = vec![0i16; self.format.buffer_samples()];

        while self.state.is(PlayerState::Active) && self.decoder.is_active() {
            let result = match self.decoder.audio_frame() {
                Some(frame) => {
                    if !self.format.matches(frame.sample_rate, frame.channels) {
                        self.reconfigure(frame.sample_rate, frame.channels);
                        silence.resize(self.format.buffer_samples(), 0);
                    }
                    let written = self.output.output(self.port, &frame.samples);
                    if written.is_ok() {
                        self.stats.record_frame();
                    }
                    written
                }
                None => {
                    let written = self.output.output(self.port, &silence);
                    if written.is_ok() {
                        self.stats.record_silence();
                    }
                    written
                }
            };

            if let Err(e) = result {
                warn!(error = %e, "Audio output failed");
                self.stats.record_error();
                thread::sleep(ERROR_BACKOFF);
            }
        }

        info!(stats = ?self.stats.snapshot(), "Audio pump exited");
    }

    fn reconfigure(&mut self, sample_rate: u32, channels: u16) {
        let format = self.format.with_stream(sample_rate, channels);
        match self.output.set_config(self.port, format) {
            Ok(()) => {
                debug!(from = %self.format, to = %format, "Audio port reconfigured");
                self.stats.record_reconfig();
            }
            Err(e) => {
                warn!(error = %e, %format, "Audio port reconfigure failed");
                self.stats.record_error();
            }
        }
        // Track the stream format either way so a failing port is not
        // re-asked on every frame.
        self.format = format;
    }
}
