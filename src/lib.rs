#![warn(missing_docs)]
//! Turnaround - multi-view renderings of a source image via generative AI.
//!
//! Upload an image, get a one-phrase description of its subject, then render
//! that subject from several camera angles (front, back, left side, right
//! side by default). Runs are gated by a persisted credit quota: one credit
//! per attempt, charged up front.
//!
//! # Quick Start
//!
//! ```no_run
//! use turnaround::{
//!     FileStore, GeminiProvider, Orchestrator, QuotaStore, RenderMode, SourceImage,
//! };
//!
//! #[tokio::main]
//! async fn main() -> turnaround::Result<()> {
//!     let provider = GeminiProvider::builder().build()?;
//!     let quota = QuotaStore::load(FileStore::open("./data")?)?;
//!
//!     let mut orchestrator = Orchestrator::new(Box::new(provider), quota);
//!     orchestrator.upload(SourceImage::from_path("car.jpg")?);
//!     orchestrator.set_mode(RenderMode::Edit);
//!
//!     for view in orchestrator.generate().await? {
//!         view.image.save(format!("{}.png", view.view.replace(' ', "_")))?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Progress events
//!
//! [`Orchestrator::subscribe`] hands out a channel of [`RunEvent`]s so a
//! front-end can show the analyze step, per-view progress, and partial
//! results while the run is still in flight.

mod error;
pub mod image;
pub mod orchestrator;
pub mod provider;
pub mod quota;
pub mod storage;

pub use error::{Result, TurnaroundError};
pub use image::{GeneratedImage, GenerationMetadata, ImageFormat, SourceImage};
pub use orchestrator::{
    build_prompt, GeneratedView, Orchestrator, RenderMode, RunEvent, RunPhase, DEFAULT_VIEWS,
    INTER_CALL_DELAY,
};
pub use provider::{GeminiProvider, GeminiProviderBuilder, ProviderKind, ViewProvider, ViewRequest};
pub use quota::{QuotaState, QuotaStore, DEFAULT_TOTAL_CREDITS, TOTAL_CREDITS_KEY, USED_CREDITS_KEY};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::error::{Result, TurnaroundError};
    pub use crate::image::{GeneratedImage, SourceImage};
    pub use crate::orchestrator::{GeneratedView, Orchestrator, RenderMode, RunEvent};
    pub use crate::provider::{GeminiProvider, ViewProvider, ViewRequest};
    pub use crate::quota::QuotaStore;
    pub use crate::storage::{FileStore, KeyValueStore, MemoryStore};
}
