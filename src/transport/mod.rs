//! Typewire client transport over blocking byte streams

mod client;
mod pending;
mod request;
mod stream;
mod writer;

pub use client::{Client, ClientConfig, ConnectionState};
pub use request::Request;
pub use stream::SplitStream;
pub use writer::StreamWriter;
