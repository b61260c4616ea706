pub mod config;
pub mod duration;

pub use config::{ArtifactFormat, ConfigError, LogFormat, OperatorConfig};
pub use duration::{is_valid_duration, parse_duration};
