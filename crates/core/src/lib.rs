pub mod backend;
pub mod config;
pub mod poll;
pub mod session;

pub use backend::{BackendClient, BackendError, DownloadBody, GenerationRequest, TaskReport};
pub use config::Config;
pub use poll::{GenerationError, GenerationStatus, PollPolicy, generate_track, poll_generation};
pub use session::Session;

pub use lavoe_decode::{decode_bytes, decode_file};
pub use lavoe_engine::{OutputDevice, OutputEngine, PlaybackEvent, Transport};
pub use lavoe_project::{OfflineAudio, load_project_metadata};
pub use lavoe_render::{render_timeline, write_wav};
pub use lavoe_transport::{AudioArc, Block, BlockId, BoundAudio, Timeline, Track, TrackId};
