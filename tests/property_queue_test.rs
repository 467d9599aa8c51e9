//! Property tests for queue ordering and similarity dedup.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use memloom::domain::models::{OverflowPolicy, ScheduleMessage, TaskLabel};
use memloom::domain::ports::cosine_similarity;
use memloom::services::{dedup_by_embedding, MetricsRegistry, StatusTracker, TaskQueue};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
}

proptest! {
    /// FIFO holds within every stream key regardless of interleaving.
    #[test]
    fn prop_fifo_within_stream(user_picks in proptest::collection::vec(0u8..4, 1..60)) {
        let rt = runtime();
        rt.block_on(async move {
            let queue = TaskQueue::in_memory(
                1000,
                OverflowPolicy::DropOldest,
                Arc::new(StatusTracker::new()),
                Arc::new(MetricsRegistry::new()),
            );

            let mut expected: HashMap<String, Vec<String>> = HashMap::new();
            for (seq, user_pick) in user_picks.iter().enumerate() {
                let user = format!("user{user_pick}");
                let msg = ScheduleMessage::new(
                    &user,
                    "cube",
                    TaskLabel::MemoryUpdate,
                    seq.to_string(),
                );
                expected
                    .entry(msg.stream_key())
                    .or_default()
                    .push(msg.content.clone());
                queue.submit(vec![msg]).await;
            }

            let mut popped: HashMap<String, Vec<String>> = HashMap::new();
            loop {
                let batch = queue.get(7).await;
                if batch.is_empty() {
                    break;
                }
                for msg in batch {
                    popped.entry(msg.stream_key()).or_default().push(msg.content);
                }
            }

            prop_assert_eq!(popped, expected);
            Ok(())
        })?;
    }

    /// Every surviving pair sits below the similarity threshold.
    #[test]
    fn prop_dedup_output_pairs_below_threshold(
        embeddings in proptest::collection::vec(
            proptest::collection::vec(-1.0f32..1.0, 4),
            0..20,
        )
    ) {
        let threshold = 0.75;
        let kept = dedup_by_embedding(&embeddings, threshold);

        // Order is preserved.
        prop_assert!(kept.windows(2).all(|w| w[0] < w[1]));

        for (pos, &i) in kept.iter().enumerate() {
            for &j in &kept[pos + 1..] {
                if let Some(sim) = cosine_similarity(&embeddings[i], &embeddings[j]) {
                    prop_assert!(
                        sim < threshold,
                        "kept pair ({}, {}) has similarity {}",
                        i,
                        j,
                        sim
                    );
                }
            }
        }
    }

    /// Dropped items are always similar to some earlier kept item.
    #[test]
    fn prop_dedup_drops_are_justified(
        embeddings in proptest::collection::vec(
            proptest::collection::vec(-1.0f32..1.0, 4),
            0..20,
        )
    ) {
        let threshold = 0.75;
        let kept = dedup_by_embedding(&embeddings, threshold);
        let kept_set: std::collections::HashSet<usize> = kept.iter().copied().collect();

        for idx in 0..embeddings.len() {
            if kept_set.contains(&idx) {
                continue;
            }
            let justified = kept.iter().any(|&k| {
                k < idx
                    && cosine_similarity(&embeddings[k], &embeddings[idx])
                        .is_some_and(|sim| sim >= threshold)
            });
            prop_assert!(justified, "index {} dropped without a similar predecessor", idx);
        }
    }
}
