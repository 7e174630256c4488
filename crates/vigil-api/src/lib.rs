// vigil-api: Async Rust client for the security platform's HTTP surfaces
// (event stream, capture-service control, per-location resources).

pub mod auth;
pub mod client;
pub mod control;
pub mod error;
pub mod models;
pub mod resources;
pub mod sse;
pub mod stream;
pub mod transport;

pub use auth::Credentials;
pub use client::ApiClient;
pub use error::Error;
pub use sse::{FrameDecoder, RawFrame};
pub use stream::{FrameStream, decode_frames};
pub use transport::{TlsMode, TransportConfig};
