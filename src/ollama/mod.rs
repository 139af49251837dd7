pub mod bias;
pub mod blocking;
pub mod client;
pub mod payload;
pub mod probe;
pub mod stream;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use blocking::BlockingOllamaClient;
pub use client::OllamaClient;
pub use payload::ChatRequest;
