pub mod sink;
pub mod streamer;
pub mod types;
