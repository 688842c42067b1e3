#![warn(missing_docs)]
//! dimshift - re-imagine a photo inside the Upside Down.
//!
//! The crate sends a reference photo plus a fixed aesthetic instruction to
//! Gemini image generation, fanning one request out per wanted image, and
//! collects the results into a newest-first gallery.
//!
//! # Quick Start
//!
//! ```no_run
//! use dimshift::{DispatchRequest, Dispatcher, GeminiProvider, SourceImage};
//!
//! #[tokio::main]
//! async fn main() -> dimshift::Result<()> {
//!     let provider = GeminiProvider::builder().build()?;
//!     let source = SourceImage::from_path("me.jpg")?;
//!     let request = DispatchRequest::new(source, 3).with_instruction("hiding from the Demogorgon");
//!
//!     let batch = Dispatcher::new(provider).dispatch(&request).await?;
//!     for artifact in &batch.artifacts {
//!         artifact.image.save(artifact.file_name())?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`dispatch`]: parallel fan-out with a strict or settled join
//! - [`session`]: state record and credential lifecycle for front ends
//! - [`credential`]: durable storage of the API key
//! - [`image`]: provider trait, Gemini provider and image types

pub mod config;
pub mod credential;
pub mod dispatch;
mod error;
pub mod gallery;
pub mod image;
pub mod prompt;
pub mod session;

// Re-export error types at crate root
pub use error::{DimShiftError, Result, CREDENTIAL_INVALIDATION_SIGNATURE};

pub use config::Config;
pub use credential::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use dispatch::{DispatchRequest, Dispatcher, JoinPolicy, MAX_COUNT};
pub use gallery::{Artifact, Batch, Gallery};
pub use image::providers::{GeminiModel, GeminiProvider, GeminiProviderBuilder};
pub use image::{
    AspectRatio, GeneratedImage, GenerationMetadata, GenerationRequest, ImageFormat,
    ImageProvider, ImageSize, SourceImage,
};
pub use session::{CredentialState, GenerationSummary, Session, SessionState};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{DimShiftError, Result};
    pub use crate::dispatch::{DispatchRequest, Dispatcher, JoinPolicy};
    pub use crate::image::providers::GeminiProvider;
    pub use crate::image::{GeneratedImage, ImageProvider, SourceImage};
    pub use crate::session::Session;
}
