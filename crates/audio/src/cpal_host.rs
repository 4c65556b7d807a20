//! System audio device via `cpal`, driving an [`AudioPullSource`] from the
//! device callback.
//!
//! `cpal::Stream` cannot move between threads on every platform, so each
//! registered stream lives on its own thread and is dropped there.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use crossbeam::channel::{self, Sender};
use tracing::{error, info, warn};

use avb_common::AudioError;

use crate::callback::{AudioCallbackHost, AudioPullSource, AudioStream};
use crate::sink::PortFormat;

/// The default output device of the default host.
#[derive(Debug, Default)]
pub struct CpalHost;

impl CpalHost {
    pub fn new() -> Self {
        Self
    }
}

impl AudioCallbackHost for CpalHost {
    fn register(
        &self,
        source: Arc<AudioPullSource>,
        format: PortFormat,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        let (ready_tx, ready_rx) = channel::bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let stream = match open_stream(source, format) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Keep the stream alive until asked to stop.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| AudioError::Device(format!("failed to spawn cpal thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                stop_tx,
                handle: Some(handle),
            })),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::Device("cpal thread exited early".to_string()))
            }
        }
    }
}

fn open_stream(
    source: Arc<AudioPullSource>,
    format: PortFormat,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| AudioError::PortOpen("no audio output device available".to_string()))?;
    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::PortOpen(format!("failed to query output config: {e}")))?;

    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(format.buffer_frames),
    };

    let stream = match supported.sample_format() {
        SampleFormat::I16 => build::<i16>(&device, &config, source)?,
        SampleFormat::F32 => build::<f32>(&device, &config, source)?,
        SampleFormat::U16 => build::<u16>(&device, &config, source)?,
        other => {
            return Err(AudioError::PortOpen(format!(
                "unsupported device sample format {other:?}"
            )))
        }
    };
    stream
        .play()
        .map_err(|e| AudioError::Device(format!("failed to start stream: {e}")))?;

    info!(
        device = device.name().unwrap_or_else(|_| "unknown".to_string()),
        %format,
        "cpal output stream started"
    );
    Ok(stream)
}

fn build<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    source: Arc<AudioPullSource>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    let mut scratch: Vec<i16> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0);
                source.fill_samples(&mut scratch);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            |err| error!(error = %err, "cpal stream error"),
            None,
        )
        .map_err(|e| AudioError::PortOpen(format!("failed to build stream: {e}")))
}

struct CpalStream {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl AudioStream for CpalStream {
    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.stop_tx.send(());
        if handle.join().is_err() {
            warn!("cpal output thread panicked");
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop();
    }
}
