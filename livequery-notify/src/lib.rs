pub mod adapter;
pub mod config;
pub mod payload;
pub mod source;

pub use adapter::NotifyBackend;
pub use config::NotifyConfig;
pub use payload::parse_payload;
pub use source::{ListenSource, NullListenSource, RawNotification};
