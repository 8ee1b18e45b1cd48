//! Stickerbatch Pipeline
//!
//! Sequences a run over a batch of files and packages the results:
//!
//! ```text
//! Idle ──start──▶ Processing ──────────────────────────────▶ Succeeded
//!                   │                                            ▲
//!                   ├─ Sticker Loader                            │
//!                   ├─ Batch Scheduler (images, batch by batch)  │
//!                   ├─ Video Offload (isolated worker)           │
//!                   └─ Archive Assembler ──── finalize ──────────┘
//!                   │
//!                   └─ any stage error ──▶ Failed ──retry──▶ Processing
//! ```
//!
//! [`Pipeline`] is the only type front ends need to talk to.

pub mod archive;
pub mod batch;
pub mod error;
pub mod offload;
pub mod orchestrator;
pub mod progress;

pub use archive::{ArchiveAssembler, FinishedArchive};
pub use batch::BatchScheduler;
pub use error::*;
pub use offload::VideoOffloadCoordinator;
pub use orchestrator::*;
pub use progress::ProgressTracker;
