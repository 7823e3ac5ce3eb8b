pub mod cipher;
pub mod js_fallback;
pub mod manifest;

pub use cipher::{CipherPrograms, SigTransform, TokenProgram, TransformOp};
pub use manifest::ManifestError;
