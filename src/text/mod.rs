//! Text splitting and recursive summarization
//!
//! These are pure building blocks; the inference call that summarizes a single
//! chunk is supplied by the caller.

pub mod chunker;
pub mod reducer;

pub use chunker::{split, split_owned, Chunk, Chunks, PARAGRAPH_BREAK};
pub use reducer::{
    max_rounds, summarize, summarize_with_stats, Summary, SummaryPlan, BATCH_WIDTH,
};
