//! ktx2dec - KTX2 texture container decoder
//!
//! Parses KTX2 containers and turns them into GPU-ready textures,
//! transcoding Basis Universal payloads to whatever compressed format
//! the target hardware supports.

pub mod cache;
pub mod container;
pub mod decoder;
pub mod direct;
pub mod engine;
pub mod error;
pub mod negotiate;
pub mod pool;
pub mod supercompress;
