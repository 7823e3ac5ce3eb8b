pub mod engine;
pub mod messages;
pub mod metadata;

pub use engine::Engine;
pub use messages::Request;
pub use metadata::{MediaKind, Statistics, StreamDescriptor};
