//! Bot AI.

mod bot_manager;
mod bot_player;

pub use bot_manager::BotManager;
pub use bot_player::Bot;
