//! vodrelay turns remote HLS lectures into watermarked, cover-art MP4s
//! and relays them to a Telegram recipient through a bounded worker
//! pool.

pub mod config;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod media;
pub mod notify;
pub mod pipeline;
pub mod telegram;

pub use error::{Error, Result};
