//! Property tests for chunking and recursive summarization

use offload_worker::text::{self, max_rounds, summarize_with_stats, SummaryPlan};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Paragraphs of short sentences, with the occasional run-on line
fn document() -> impl Strategy<Value = String> {
    let sentence = "[a-zA-Z ]{0,40}[.?!]?";
    let paragraph = prop::collection::vec(sentence, 0..8).prop_map(|s| s.join(" "));
    prop::collection::vec(paragraph, 0..12).prop_map(|p| p.join("\n\n"))
}

proptest! {
    #[test]
    fn prop_chunks_concatenate_to_input(input in document(), target in 1usize..400) {
        let chunks: Vec<&str> = text::split(&input, target).map(|c| c.as_str()).collect();
        prop_assert_eq!(chunks.concat(), input);
    }

    #[test]
    fn prop_chunk_count_is_never_zero(input in document(), target in 1usize..400) {
        prop_assert!(text::split(&input, target).count() >= 1);
    }

    #[test]
    fn prop_chunks_respect_target_when_sentences_fit(
        sentences in prop::collection::vec("[a-z]{1,20}\\.", 1..60),
        target in 21usize..300,
    ) {
        // Every sentence is at most 21 chars, so no chunk may exceed the target
        let input = sentences.concat();
        for chunk in text::split(&input, target) {
            prop_assert!(chunk.len <= target, "chunk of {} chars over {}", chunk.len, target);
        }
    }

    #[test]
    fn prop_multibyte_text_round_trips(input in "[äöü€漢字 .\n]{0,300}", target in 1usize..64) {
        let owned = text::split_owned(&input, target);
        prop_assert_eq!(owned.concat(), input);
    }
}

#[test]
fn test_empty_input_yields_one_empty_chunk() {
    let chunks: Vec<_> = text::split("", 100).collect();
    assert_eq!(chunks.len(), 1);
    assert!(chunks[0].is_empty());
}

#[test]
fn test_paragraphs_are_preferred_over_sentences() {
    let input = "One. Two.\n\nThree. Four.";
    let chunks = text::split_owned(input, 12);
    assert_eq!(chunks, vec!["One. Two.\n\n", "Three. Four."]);
}

#[tokio::test]
async fn test_reference_example_finishes_in_one_round() {
    let input = "abcdefghi.".repeat(1_200);
    assert_eq!(input.len(), 12_000);
    let plan = SummaryPlan::new(input.len(), 8_000);
    assert_eq!(plan.chunk_size, 5_600);
    assert_eq!(text::split(&input, plan.chunk_size).count(), 3);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let summary = summarize_with_stats(&input, 8_000, move |batch| {
        counter.fetch_add(1, Ordering::SeqCst);
        let len = batch.len();
        async move { Ok::<_, String>(format!("{len}:{}", "s".repeat(1_990))) }
    })
    .await
    .unwrap();

    assert_eq!(summary.rounds, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(summary.text.starts_with("12000:"));
}

#[tokio::test]
async fn test_compressing_backend_converges_within_round_cap() {
    let input = "Sentence number one is here. ".repeat(2_000);
    let plan = SummaryPlan::new(input.chars().count(), 4_000);
    let initial = text::split(&input, plan.chunk_size).count();

    let summary = summarize_with_stats(&input, 4_000, |batch| async move {
        // Keep a tenth of each batch
        let keep = batch.chars().count() / 10;
        Ok::<_, String>(batch.chars().take(keep).collect())
    })
    .await
    .unwrap();

    assert!(summary.rounds >= 1);
    assert!(summary.rounds <= max_rounds(initial));
    assert!(summary.text.chars().count() <= plan.target_size + 2 * initial);
}

#[tokio::test]
async fn test_expanding_backend_is_cut_off() {
    let input = "Grow. ".repeat(3_000);
    let plan = SummaryPlan::new(input.chars().count(), 2_048);
    let initial = text::split(&input, plan.chunk_size).count();

    let summary = summarize_with_stats(&input, 2_048, |batch| async move {
        Ok::<_, String>(format!("{batch}{batch}"))
    })
    .await
    .unwrap();

    assert_eq!(summary.rounds, max_rounds(initial));
}

#[tokio::test]
async fn test_primitive_error_aborts_the_run() {
    let input = "Fail. ".repeat(2_000);
    let result = summarize_with_stats(&input, 2_048, |_batch| async {
        Err::<String, _>("backend down".to_string())
    })
    .await;

    assert_eq!(result.unwrap_err(), "backend down");
}
