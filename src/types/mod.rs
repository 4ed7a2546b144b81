//! Core value types shared by the server components

pub mod message;
pub mod timestamp;

pub use message::PendingMessage;
pub use timestamp::TimestampFormat;
