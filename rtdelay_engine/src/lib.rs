pub mod delay;
pub mod error;
pub mod export;
pub mod params;
pub mod pcm;
pub mod ring;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod source;
pub mod taps;

// Re-exports
pub use delay::DelayEngine;
pub use error::{PcmError, PlaybackError, SinkError};
pub use params::DelayControl;
pub use scheduler::{PlaybackEnd, PlaybackScheduler, PlaybackStats};
pub use session::{Output, PlaybackSession, SessionConfig, SessionEvent};
