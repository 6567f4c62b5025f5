//! Recursive map-reduce summarization
//!
//! Reduces arbitrarily long text to a bounded summary using only a primitive
//! that summarizes one bounded-size piece at a time. Chunks are grouped into
//! batches of [`BATCH_WIDTH`], each batch is summarized into one output, and
//! the process repeats until the combined length drops below the target.
//!
//! Each round divides the number of units by the batch width, so the round
//! count is logarithmic in the initial chunk count. A backend that expands
//! instead of compressing is still cut off after [`max_rounds`] rounds, and
//! the smallest round result seen is returned.

use crate::text::chunker::{self, PARAGRAPH_BREAK};
use std::future::Future;
use tracing::{debug, warn};

/// Number of chunks summarized together in one reduce call
pub const BATCH_WIDTH: usize = 3;

/// Absolute minimum summary target, in characters
pub const MIN_TARGET_CHARS: usize = 1000;

/// Divisor giving the 20% compression target
const TARGET_DIVISOR: usize = 5;

/// Chunks never shrink below this size, to bound the number of model calls
pub const MIN_CHUNK_CHARS: usize = 2048;

/// Rounds allowed beyond the ideal logarithmic count
const EXTRA_ROUNDS: usize = 2;

/// Sizes derived from the input length and the backend's context budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryPlan {
    /// Upper bound for the summed length of the partial summaries
    pub target_size: usize,
    /// Chunk size used for the initial split
    pub chunk_size: usize,
}

impl SummaryPlan {
    pub fn new(text_len: usize, context_budget: usize) -> Self {
        let target_size = (text_len / TARGET_DIVISOR).max(MIN_TARGET_CHARS);
        let chunk_size = context_budget
            .saturating_sub(target_size)
            .max(MIN_CHUNK_CHARS);

        Self {
            target_size,
            chunk_size,
        }
    }
}

/// Outcome of a summarization run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub text: String,
    /// Reduce rounds executed (zero for single-pass inputs)
    pub rounds: usize,
    /// Calls made to the summarization primitive
    pub calls: usize,
}

/// Round cap for a run starting with `chunk_count` chunks:
/// `ceil(log3(chunk_count)) + 2`
pub fn max_rounds(chunk_count: usize) -> usize {
    let mut rounds = 0;
    let mut reach = 1;
    while reach < chunk_count {
        reach = reach.saturating_mul(BATCH_WIDTH);
        rounds += 1;
    }
    rounds + EXTRA_ROUNDS
}

fn total_len(chunks: &[String]) -> usize {
    chunks.iter().map(|c| c.chars().count()).sum()
}

/// Summarize `text` with a context budget given in characters.
///
/// `summarize_one` is invoked once per batch; errors abort the run and are
/// returned unchanged.
pub async fn summarize<F, Fut, E>(
    text: &str,
    context_budget: usize,
    summarize_one: F,
) -> Result<String, E>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String, E>>,
{
    summarize_with_stats(text, context_budget, summarize_one)
        .await
        .map(|summary| summary.text)
}

/// Same as [`summarize`], also reporting round and call counts
pub async fn summarize_with_stats<F, Fut, E>(
    text: &str,
    context_budget: usize,
    mut summarize_one: F,
) -> Result<Summary, E>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String, E>>,
{
    let plan = SummaryPlan::new(text.chars().count(), context_budget);
    let mut chunks = chunker::split_owned(text, plan.chunk_size);

    if chunks.len() == 1 {
        debug!(
            target_size = plan.target_size,
            "Input fits one chunk, summarizing in a single pass"
        );
        let only = chunks.pop().unwrap_or_default();
        let text = summarize_one(only).await?;
        return Ok(Summary {
            text,
            rounds: 0,
            calls: 1,
        });
    }

    let round_cap = max_rounds(chunks.len());
    debug!(
        chunks = chunks.len(),
        chunk_size = plan.chunk_size,
        target_size = plan.target_size,
        round_cap,
        "Starting recursive summarization"
    );

    let mut total = total_len(&chunks);
    let mut rounds = 0;
    let mut calls = 0;
    let mut best: Option<(usize, Vec<String>)> = None;

    while total > plan.target_size {
        if rounds == round_cap {
            warn!(
                rounds,
                total,
                target_size = plan.target_size,
                "Summarization did not converge, returning best effort result"
            );
            if let Some((_, best_chunks)) = best.take() {
                chunks = best_chunks;
            }
            break;
        }

        let mut outputs = Vec::with_capacity(chunks.len().div_ceil(BATCH_WIDTH));
        for batch in chunks.chunks(BATCH_WIDTH) {
            outputs.push(summarize_one(batch.concat()).await?);
            calls += 1;
        }

        rounds += 1;
        chunks = outputs;
        total = total_len(&chunks);
        debug!(round = rounds, units = chunks.len(), total, "Reduce round complete");

        let improved = best
            .as_ref()
            .map_or(true, |(best_total, _)| total < *best_total);
        if improved {
            best = Some((total, chunks.clone()));
        }
    }

    Ok(Summary {
        text: chunks.join(PARAGRAPH_BREAK),
        rounds,
        calls,
    })
}
