//! External media toolchain: subprocess invoker and the transcoding
//! stages built on it.

pub mod ffmpeg;
pub mod stages;
