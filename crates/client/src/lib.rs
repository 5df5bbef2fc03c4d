//! Headless client core for the arena.
//!
//! Local-entity prediction, server reconciliation and remote-entity
//! interpolation. Rendering and sockets are left to the embedder: feed
//! received bytes to [`ClientGame::handle_packet`], send what
//! [`ClientGame::sample_input`] returns, draw [`ClientGame::render`].

pub mod config;
pub mod game;
pub mod interpolation;
pub mod prediction;
pub mod reconciliation;

pub use config::ClientConfig;
pub use game::{ClientGame, RenderEntity, RenderFrame};
pub use interpolation::{InterpolationBuffer, RemoteEntities, StateSample};
pub use prediction::{LocalEntity, PendingInputs, PredictionEngine, predict_from};
pub use reconciliation::{Correction, reconcile};
