//! Backend implementations for different inference engines
//!
//! - Tract backend (pure Rust, no external dependencies)
//! - ONNX Runtime backend (native runtime, behind the `onnx` feature)
//! - Mock backends (deterministic fakes for tests and dry runs)

pub mod mock;

#[cfg(feature = "onnx")]
pub mod onnx;

#[cfg(feature = "tract")]
pub mod tract;

pub use self::mock::{FailingRemover, MockBackend, StaticRemover};

#[cfg(feature = "onnx")]
pub use self::onnx::OnnxBackend;

#[cfg(feature = "tract")]
pub use self::tract::TractBackend;
