//! Worker pool and the document pipeline it runs.
//!
//! ```text
//! ┌────────────┐ dequeue ┌─────────────────────┐ spawn ┌──────────────────────────┐
//! │  JobQueue  │ ──────▶ │ DocumentProcessor   │ ────▶ │ executor (1 per permit)  │
//! └────────────┘         │ (coordinator loop)  │       │   Pipeline::run          │
//!       ▲                └─────────────────────┘       │     ├─ DocumentStorage   │
//!       │         complete / fail                      │     └─ InferenceClient   │
//!       └──────────────────────────────────────────────┴──────────────────────────┘
//! ```

pub mod inference;
pub mod pipeline;
pub mod storage;
pub mod worker;

pub use inference::{HttpInferenceClient, InferenceClient};
pub use pipeline::Pipeline;
pub use storage::{DirectoryUsage, DocumentStorage, LocalFileStorage, StorageStats, StorageTotals};
pub use worker::{DocumentProcessor, ProcessorConfig, ProcessorHandle, ProcessorStats};
