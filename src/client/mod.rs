//! LineLog client implementation

pub mod line_client;

pub use line_client::LineLogClient;
