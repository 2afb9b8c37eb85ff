// Host-facing entry points: engine assembly and tracing setup.

pub mod engine;
pub mod simple;

pub use engine::ImageEngine;
pub use simple::init_tracing;
