pub mod buffer;
pub mod config;
pub mod error;
pub(crate) mod kind;
pub mod linear;

pub use buffer::TimeBuffer;
pub use config::Config;
