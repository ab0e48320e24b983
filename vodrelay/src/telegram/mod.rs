//! Telegram transport: Bot API client and the operator command loop.

pub mod api;
pub mod bot;
