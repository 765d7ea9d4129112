pub mod config;
pub mod error;
pub mod product;

pub use config::Config;
pub use error::*;
pub use product::*;
