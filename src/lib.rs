pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod observability;
pub mod state;
pub mod tracker;

pub use config::Config;
pub use engine::connection::ConnectionStatus;
pub use error::TrackingError;
pub use tracker::{OrderTracker, TrackingHandle, TrackingView};
