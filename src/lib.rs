pub mod audit;
pub mod commands;
pub mod config;
pub mod data;
pub mod discord;
pub mod enforcement;
pub mod handlers;
pub mod logging;
pub mod status;

pub const BOT_NAME: &str = "member_sentry";
pub const COMMAND_TARGET: &str = "member_sentry::command";
pub const ERROR_TARGET: &str = "member_sentry::error";
pub const EVENT_TARGET: &str = "member_sentry::handlers";
pub const CONSOLE_TARGET: &str = "member_sentry";

pub use config::{Config, ConfigError};
pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
