//! Capture from the system default input device via cpal.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). [`CpalStream`] therefore stays on the consumer thread that
//! connected it; only the process callback moves to the cpal audio thread.
//!
//! The device must offer mono `f32` at the requested rate. There is no
//! conversion layer: other formats fail negotiation.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Data, InputCallbackInfo, SampleFormat, SampleRate, Stream, StreamConfig};
use tracing::{error, info};

use super::{
    AudioFormat, AudioTransport, ProcessCallback, SingleBufferQueue, StreamFlags, StreamNotifier,
    TransportState, TransportStream,
};
use crate::error::{BeatError, Result};

/// Default-host, default-device transport.
#[derive(Debug, Default)]
pub struct CpalTransport;

impl CpalTransport {
    pub fn new() -> Self {
        Self
    }

    fn select_device(&self) -> Result<cpal::Device> {
        cpal::default_host()
            .default_input_device()
            .ok_or(BeatError::NoInputDevice)
    }
}

fn supports(device: &cpal::Device, format: AudioFormat) -> Result<bool> {
    let ranges = device
        .supported_input_configs()
        .map_err(|e| BeatError::FormatNegotiation(e.to_string()))?;
    let rate = SampleRate(format.sample_rate);
    Ok(ranges.into_iter().any(|range| {
        range.channels() == format.channels
            && range.sample_format() == SampleFormat::F32
            && range.min_sample_rate() <= rate
            && rate <= range.max_sample_rate()
    }))
}

impl AudioTransport for CpalTransport {
    type Stream = CpalStream;

    fn connect(
        &mut self,
        format: AudioFormat,
        flags: StreamFlags,
        mut process: Box<dyn ProcessCallback>,
        notifier: StreamNotifier,
    ) -> Result<CpalStream> {
        let device = self.select_device()?;
        let device_name = device.name().unwrap_or_default();
        info!(device = device_name.as_str(), "opening input device");

        if !supports(&device, format)? {
            return Err(BeatError::FormatNegotiation(format!(
                "{device_name} does not offer {} channel f32 at {} Hz",
                format.channels, format.sample_rate
            )));
        }

        notifier.state_changed(TransportState::Unconnected, TransportState::Connecting, None);

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: SampleRate(format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let stride = format.stride();
        let error_notifier = notifier.clone();

        let stream = device
            .build_input_stream_raw(
                &config,
                SampleFormat::F32,
                move |data: &Data, _info: &InputCallbackInfo| {
                    let mut queue = SingleBufferQueue::new(data.bytes(), stride);
                    process.process(&mut queue);
                },
                move |err| {
                    error!("audio stream error: {err}");
                    error_notifier.state_changed(
                        TransportState::Streaming,
                        TransportState::Error,
                        Some(err.to_string()),
                    );
                },
                None,
            )
            .map_err(|e| BeatError::StreamCreate(e.to_string()))?;

        let mut stream = CpalStream {
            stream: Some(stream),
            notifier,
            active: false,
        };
        if flags.autoconnect {
            stream
                .start()
                .map_err(|e| BeatError::Connect(e.to_string()))?;
        }

        info!(
            sample_rate = format.sample_rate,
            channels = format.channels,
            "audio stream connected"
        );
        Ok(stream)
    }
}

pub struct CpalStream {
    stream: Option<Stream>,
    notifier: StreamNotifier,
    active: bool,
}

impl CpalStream {
    fn start(&mut self) -> Result<()> {
        let stream = self.stream.as_ref().ok_or(BeatError::NotInitialized)?;
        stream
            .play()
            .map_err(|e| BeatError::Transport(e.to_string()))?;
        let old = if self.active {
            TransportState::Streaming
        } else {
            TransportState::Connecting
        };
        self.active = true;
        self.notifier
            .state_changed(old, TransportState::Streaming, None);
        Ok(())
    }
}

impl TransportStream for CpalStream {
    fn set_active(&mut self, active: bool) -> Result<()> {
        if active {
            return self.start();
        }
        let stream = self.stream.as_ref().ok_or(BeatError::NotInitialized)?;
        // cpal has stopped invoking the data callback once `pause` returns.
        stream
            .pause()
            .map_err(|e| BeatError::Transport(e.to_string()))?;
        self.active = false;
        self.notifier
            .state_changed(TransportState::Streaming, TransportState::Paused, None);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            self.notifier
                .state_changed(TransportState::Paused, TransportState::Unconnected, None);
        }
        Ok(())
    }
}
