pub mod config;
pub mod crds;
pub mod dex;
pub mod error;
pub mod expose;
pub mod health;
pub mod proxy;
pub mod reconciler;
pub mod resources;
pub mod telemetry;
pub mod utils;
pub mod wait;
