mod clock;
mod detector;
mod device;
mod driver;
mod output;
mod registry;
mod scheduler;
mod source;
mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use clock::{Clock, Step};
pub use detector::{StartCause, Transition, detect};
pub use device::{DeviceError, OutputDevice};
pub use driver::{DriveOutcome, PlayRequest, PlaybackDriver, SkipReason, block_offset_seconds};
pub use output::{EngineCommand, MAX_VOICES, Mixer, OutputEngine, VoiceHandle, VoiceStatus};
pub use registry::SourceRegistry;
pub use scheduler::{Scheduler, TickReport};
pub use source::{AudioSource, PlayFuture, SourceError};
pub use transport::{
    DEFAULT_SEEK_SETTLE, DEFAULT_SKIP_MEASURES, PlaybackEvent, Transport,
};
