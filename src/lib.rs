pub mod api;
pub mod blob;
pub mod exchange;
pub mod local_store;
pub mod models;
pub mod persist;
pub mod resources;
pub mod rewards;
pub mod settings;
pub mod store;
pub mod swaps;
pub mod tasks;
pub mod teachings;

pub use exchange::{Exchange, ExchangeError};
pub use models::Actor;
