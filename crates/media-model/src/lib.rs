//! Stickerbatch Media Model
//!
//! Defines the core data contracts shared by every stage:
//! - **Sources:** Caller-supplied files with a declared media kind
//! - **Placement:** Sticker position and size, normalized to percentages
//! - **Outputs:** Named blobs ready for archival
//!
//! Placement is stored as percentages of the target so that the same
//! placement applies to files of any resolution; it is resolved to pixels
//! separately for every target.

pub mod placement;
pub mod source;

pub use placement::*;
pub use source::*;
