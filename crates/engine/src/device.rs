use std::sync::Arc;

use lavoe_transport::AudioArc;

use crate::source::AudioSource;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeviceError {
    #[error("failed to resume output: {0}")]
    Resume(String),

    #[error("failed to prepare audio for output: {0}")]
    Prepare(String),

    #[error("no free output voice")]
    VoicesExhausted,
}

/// The platform audio output: starts suspended, must be resumed before
/// anything is heard, and creates one source per piece of track audio.
pub trait OutputDevice {
    fn is_suspended(&self) -> bool;

    fn resume(&self) -> Result<(), DeviceError>;

    fn create_source(&self, audio: &AudioArc) -> Result<Arc<dyn AudioSource>, DeviceError>;
}
