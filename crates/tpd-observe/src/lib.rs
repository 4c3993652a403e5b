pub mod logger;

pub use logger::{init_logger, LoggerConfig, LoggerError, LoggerFormat, LoggerLevel};
