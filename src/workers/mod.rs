pub mod ffmpeg;
pub mod policy;
pub mod progress;
pub mod scheduler;
pub mod transcoder;
