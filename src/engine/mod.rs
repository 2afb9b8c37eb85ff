// Engine orchestration: session lifecycle, resolution, download and caching.

pub mod cache;
pub mod downloader;
pub mod gallery;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod stats;
