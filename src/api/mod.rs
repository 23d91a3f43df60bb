pub mod client;
mod logging;
#[cfg(test)]
pub mod mock_client;
pub mod stream;

pub use client::{ApiClient, ByteStream, ClientSettings, FragmentStream};
pub use stream::StreamParser;
