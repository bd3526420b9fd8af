pub mod config;
pub mod context;
pub mod error;

pub use config::ComposerConfig;
pub use context::Context;
pub use error::{Error, Result, Stage};
