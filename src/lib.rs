pub mod api;
pub mod args;
pub mod commands;
mod config;
mod error;
pub mod model;
pub mod server;
pub mod sync;
mod utils;


pub use api::Mode;
pub use config::Config;
pub use error::Error;
pub use error::ErrorType;
pub use error::Result;
pub(crate) use error::Res;
