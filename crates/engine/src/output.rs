use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use basedrop::{Collector, Handle, Shared};
use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use lavoe_transport::AudioArc;

use crate::device::{DeviceError, OutputDevice};
use crate::source::{AudioSource, PlayFuture, SourceError};

pub const MAX_VOICES: usize = 32;
const COMMAND_CAPACITY: usize = 256;

type SharedAudio = Shared<AudioArc>;

pub enum EngineCommand {
    Add { voice: usize, audio: SharedAudio },
    Play(usize),
    Pause(usize),
    Seek { voice: usize, frame: u64 },
    Gain { voice: usize, gain: f32 },
}

/// Per-voice state published by the audio thread.
#[derive(Debug, Default)]
pub struct VoiceStatus {
    playing: AtomicBool,
    frame: AtomicU64,
    gain: AtomicU32,
}

impl VoiceStatus {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Acquire))
    }
}

struct Voice {
    audio: SharedAudio,
    frame: usize,
    playing: bool,
    gain: f32,
}

/// The audio-thread side: owns the voices and mixes them into output buffers.
/// Never allocates once constructed.
pub struct Mixer {
    voices: Vec<Option<Voice>>,
    status: Arc<[VoiceStatus]>,
    channels: usize,
}

impl Mixer {
    pub fn new(status: Arc<[VoiceStatus]>, channels: usize) -> Self {
        let mut voices = Vec::with_capacity(status.len());
        voices.resize_with(status.len(), || None);
        Self {
            voices,
            status,
            channels: channels.max(1),
        }
    }

    pub fn apply(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Add { voice, audio } => {
                if let Some(slot) = self.voices.get_mut(voice) {
                    *slot = Some(Voice {
                        audio,
                        frame: 0,
                        playing: false,
                        gain: 1.0,
                    });
                }
            }
            EngineCommand::Play(voice) => {
                if let Some(Some(v)) = self.voices.get_mut(voice) {
                    v.playing = v.frame < v.audio.frames();
                }
            }
            EngineCommand::Pause(voice) => {
                if let Some(Some(v)) = self.voices.get_mut(voice) {
                    v.playing = false;
                }
            }
            EngineCommand::Seek { voice, frame } => {
                if let Some(Some(v)) = self.voices.get_mut(voice) {
                    v.frame = (frame as usize).min(v.audio.frames());
                }
            }
            EngineCommand::Gain { voice, gain } => {
                if let Some(Some(v)) = self.voices.get_mut(voice) {
                    v.gain = gain;
                }
            }
        }
    }

    /// Mix every playing voice into `out` (interleaved, `channels` wide).
    /// A voice that runs out of audio stops by itself.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let channels = self.channels;

        for (index, slot) in self.voices.iter_mut().enumerate() {
            let Some(voice) = slot else { continue };
            if voice.playing {
                let frames = voice.audio.frames();
                for frame in out.chunks_mut(channels) {
                    if voice.frame >= frames {
                        voice.playing = false;
                        break;
                    }
                    for (ch, sample) in frame.iter_mut().enumerate() {
                        *sample += voice.audio.sample_for_channel(voice.frame, ch) * voice.gain;
                    }
                    voice.frame += 1;
                }
            }

            let status = &self.status[index];
            status.playing.store(voice.playing, Ordering::Release);
            status.frame.store(voice.frame as u64, Ordering::Release);
            status.gain.store(voice.gain.to_bits(), Ordering::Release);
        }
    }
}

type CommandQueue = Arc<Mutex<rtrb::Producer<EngineCommand>>>;

fn send(commands: &CommandQueue, command: EngineCommand) -> Result<(), SourceError> {
    commands
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(command)
        .map_err(|_| SourceError::Unavailable("output command queue is full".to_string()))
}

/// One voice on the output stream, controlled from the transport side.
pub struct VoiceHandle {
    voice: usize,
    sample_rate: u32,
    duration: f64,
    commands: CommandQueue,
    status: Arc<[VoiceStatus]>,
    suspended: Arc<AtomicBool>,
}

impl VoiceHandle {
    fn status(&self) -> &VoiceStatus {
        &self.status[self.voice]
    }

    fn command(&self, command: EngineCommand) {
        if let Err(err) = send(&self.commands, command) {
            tracing::warn!(voice = self.voice, %err, "dropped output command");
        }
    }
}

impl AudioSource for VoiceHandle {
    fn duration(&self) -> Option<f64> {
        Some(self.duration)
    }

    fn position(&self) -> f64 {
        self.status().frame() as f64 / self.sample_rate as f64
    }

    fn seek(&self, seconds: f64) {
        let frame = (seconds.max(0.0) * self.sample_rate as f64) as u64;
        self.status().frame.store(frame, Ordering::Release);
        self.command(EngineCommand::Seek {
            voice: self.voice,
            frame,
        });
    }

    fn set_volume(&self, gain: f32) {
        self.command(EngineCommand::Gain {
            voice: self.voice,
            gain: gain.clamp(0.0, 1.0),
        });
    }

    fn play(&self) -> PlayFuture {
        let result = if self.suspended.load(Ordering::Acquire) {
            Err(SourceError::NotAllowed("audio output is suspended".to_string()))
        } else {
            send(&self.commands, EngineCommand::Play(self.voice))
        };
        if result.is_ok() {
            self.status().playing.store(true, Ordering::Release);
        }
        Box::pin(std::future::ready(result))
    }

    fn pause(&self) {
        self.status().playing.store(false, Ordering::Release);
        self.command(EngineCommand::Pause(self.voice));
    }

    fn is_playing(&self) -> bool {
        self.status().is_playing()
    }
}

/// The default cpal output stream with a fixed pool of voices.
///
/// The stream is opened paused and stays silent until [`OutputDevice::resume`].
pub struct OutputEngine {
    sample_rate: u32,
    channels: u16,
    commands: CommandQueue,
    status: Arc<[VoiceStatus]>,
    next_voice: AtomicUsize,
    suspended: Arc<AtomicBool>,
    collector: Mutex<Collector>,
    handle: Handle,
    stream: cpal::Stream,
}

impl OutputEngine {
    pub fn open() -> anyhow::Result<Self> {
        let collector = Collector::new();
        let handle = collector.handle();

        let (command_tx, command_rx) = rtrb::RingBuffer::<EngineCommand>::new(COMMAND_CAPACITY);
        let status: Arc<[VoiceStatus]> = (0..MAX_VOICES).map(|_| VoiceStatus::default()).collect();

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

        let config = device.default_output_config()?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        let mixer = Mixer::new(status.clone(), channels as usize);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => {
                build_stream::<f32>(&device, &config.into(), mixer, command_rx)?
            }
            cpal::SampleFormat::I16 => {
                build_stream::<i16>(&device, &config.into(), mixer, command_rx)?
            }
            sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
        };

        if let Err(err) = stream.pause() {
            tracing::debug!(%err, "output stream cannot start paused");
        }

        tracing::info!(sample_rate, channels, "opened audio output");

        Ok(Self {
            sample_rate,
            channels,
            commands: Arc::new(Mutex::new(command_tx)),
            status,
            next_voice: AtomicUsize::new(0),
            suspended: Arc::new(AtomicBool::new(true)),
            collector: Mutex::new(collector),
            handle,
            stream,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl OutputDevice for OutputEngine {
    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire)
    }

    fn resume(&self) -> Result<(), DeviceError> {
        self.stream
            .play()
            .map_err(|e| DeviceError::Resume(e.to_string()))?;
        self.suspended.store(false, Ordering::Release);
        Ok(())
    }

    fn create_source(&self, audio: &AudioArc) -> Result<Arc<dyn AudioSource>, DeviceError> {
        let voice = self.next_voice.fetch_add(1, Ordering::SeqCst);
        if voice >= MAX_VOICES {
            return Err(DeviceError::VoicesExhausted);
        }

        let audio = if audio.sample_rate() == self.sample_rate {
            audio.clone()
        } else {
            audio
                .resample(self.sample_rate)
                .map_err(|e| DeviceError::Prepare(e.to_string()))?
        };
        let duration = audio.duration_secs();

        send(
            &self.commands,
            EngineCommand::Add {
                voice,
                audio: Shared::new(&self.handle, audio),
            },
        )
        .map_err(|e| DeviceError::Prepare(e.to_string()))?;

        self.collector
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .collect();

        Ok(Arc::new(VoiceHandle {
            voice,
            sample_rate: self.sample_rate,
            duration,
            commands: self.commands.clone(),
            status: self.status.clone(),
            suspended: self.suspended.clone(),
        }))
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
    mut command_rx: rtrb::Consumer<EngineCommand>,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    // Sized for the largest callback we expect; bigger buffers are mixed in chunks.
    let mut scratch = vec![0.0f32; 8192 * config.channels as usize];

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            while let Ok(command) = command_rx.pop() {
                mixer.apply(command);
            }

            let chunk = scratch.len();
            for out in data.chunks_mut(chunk) {
                let mix = &mut scratch[..out.len()];
                mixer.render(mix);
                for (sample, mixed) in out.iter_mut().zip(mix.iter()) {
                    *sample = T::from_sample(*mixed);
                }
            }
        },
        |err| tracing::error!(%err, "output stream error"),
        None,
    )?;

    Ok(stream)
}
