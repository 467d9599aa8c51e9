//! End-to-end scheduler flows: query → memory_update → working-memory
//! replacement, priority-1 bypass, and activation refresh idempotence.

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use memloom::domain::models::{
    MemoryKind, ScheduleMessage, SchedulerConfig, TaskLabel, TaskState, WebLogLabel,
};
use memloom::infrastructure::FileActivationCache;
use memloom::services::{MemScheduler, Modules};

use common::{item_with_key, message, wait_for, MockCube, MockTextMemory, OrthoEmbedder, RouterLlm};

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        consume_interval_seconds: 0.01,
        consume_batch: 10,
        ..Default::default()
    }
}

async fn build_scheduler(
    config: SchedulerConfig,
    llm: Arc<RouterLlm>,
    text: Arc<MockTextMemory>,
) -> MemScheduler {
    let scheduler = MemScheduler::new(config);
    scheduler
        .set_mem_cube("cube1", MockCube::new("cube-one", text))
        .await;
    scheduler
        .init_modules(Modules {
            chat_llm: Some(llm),
            embedder: Some(Arc::new(OrthoEmbedder::default())),
            ..Default::default()
        })
        .await
        .unwrap();
    scheduler
}

fn seeded_text_memory() -> Arc<MockTextMemory> {
    let text = Arc::new(MockTextMemory::default());
    text.set_working(vec![
        item_with_key("a", "alpha memory", "a", MemoryKind::WorkingMemory),
        item_with_key("b", "beta memory", "b", MemoryKind::WorkingMemory),
        item_with_key("c", "gamma memory", "c", MemoryKind::WorkingMemory),
    ]);
    text.set_search_results(vec![
        item_with_key("d", "delta memory", "d", MemoryKind::LongTermMemory),
        item_with_key("e", "epsilon memory", "e", MemoryKind::LongTermMemory),
    ]);
    text
}

fn reconciliation_llm() -> Arc<RouterLlm> {
    RouterLlm::for_memory_update(
        r#"{"keywords": ["delta"]}"#,
        r#"{"trigger_retrieval": true, "missing_evidences": ["tell me about delta"]}"#,
        r#"{"new_order": [3, 0, 1], "reasoning": "delta first"}"#,
        r#"{"keep": [true, true, true]}"#,
    )
}

#[tokio::test]
async fn test_query_update_replace_flow() {
    let text = seeded_text_memory();
    let scheduler = build_scheduler(fast_config(), reconciliation_llm(), text.clone()).await;
    scheduler.start().await.unwrap();

    scheduler
        .submit_messages(vec![message(
            "u1",
            "cube1",
            TaskLabel::Query,
            "tell me about delta",
        )])
        .await
        .unwrap();

    // The derived memory_update flows through the queue and the consumer.
    let replaced = wait_for(
        || {
            let text = text.clone();
            async move { text.replace_calls.load(std::sync::atomic::Ordering::SeqCst) > 0 }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(replaced, "working memory was never replaced");
    scheduler.stop().await;

    // Final working set: reranked delta first, capped to the survivors.
    assert_eq!(
        text.working_texts(),
        vec!["delta memory", "alpha memory", "beta memory"]
    );

    let events = scheduler.web_log_events().await;
    let add_messages: Vec<_> = events
        .iter()
        .filter(|e| e.label == WebLogLabel::AddMessage)
        .collect();
    assert_eq!(add_messages.len(), 1);
    let replacements: Vec<_> = events
        .iter()
        .filter(|e| e.label == WebLogLabel::UpdateMemory)
        .collect();
    assert_eq!(replacements.len(), 1);
    assert!(replacements[0]
        .log_content
        .contains("Working memory replaced: old=3, new=3"));

    // The user-turn event precedes the derived replacement event.
    let add_idx = events
        .iter()
        .position(|e| e.label == WebLogLabel::AddMessage)
        .unwrap();
    let replace_idx = events
        .iter()
        .position(|e| e.label == WebLogLabel::UpdateMemory)
        .unwrap();
    assert!(add_idx < replace_idx);
}

#[tokio::test]
async fn test_priority_one_bypasses_queue() {
    let text = seeded_text_memory();
    let scheduler = build_scheduler(fast_config(), RouterLlm::new(), text).await;
    // Consumer deliberately not started.

    scheduler
        .submit_messages(vec![
            message("u1", "cube1", TaskLabel::Answer, "the answer is tea"),
            message("u1", "cube1", TaskLabel::MemReorganize, r#"["m1"]"#),
        ])
        .await
        .unwrap();

    // The answer was handled inline before submit_messages returned.
    let events = scheduler.web_log_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].label, WebLogLabel::AddMessage);

    // The reorganize message is still queued.
    let sizes = scheduler.queue_sizes().await;
    assert_eq!(sizes.total, 1);
    assert_eq!(
        sizes.per_stream.get("u1:cube1:mem_reorganize").copied(),
        Some(1)
    );
}

#[tokio::test]
async fn test_empty_working_set_takes_candidates() {
    let text = Arc::new(MockTextMemory::default());
    text.set_search_results(vec![
        item_with_key("d", "delta memory", "d", MemoryKind::LongTermMemory),
        item_with_key("e", "epsilon memory", "e", MemoryKind::LongTermMemory),
    ]);
    let llm = RouterLlm::for_memory_update(
        r#"{"keywords": ["delta"]}"#,
        r#"{"trigger_retrieval": true, "missing_evidences": ["delta"]}"#,
        r#"{"new_order": [0, 1], "reasoning": "keep order"}"#,
        r#"{"keep": [true, true]}"#,
    );
    let scheduler = build_scheduler(fast_config(), llm, text.clone()).await;
    scheduler.start().await.unwrap();

    scheduler
        .submit_messages(vec![message(
            "u1",
            "cube1",
            TaskLabel::MemoryUpdate,
            "delta",
        )])
        .await
        .unwrap();

    let replaced = wait_for(
        || {
            let text = text.clone();
            async move { text.replace_calls.load(std::sync::atomic::Ordering::SeqCst) > 0 }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(replaced);
    scheduler.stop().await;

    assert_eq!(text.working_texts(), vec!["delta memory", "epsilon memory"]);
}

#[tokio::test]
async fn test_fast_mode_items_evicted_on_replace() {
    let text = Arc::new(MockTextMemory::default());
    let mut fast = item_with_key("f", "raw fast chunk", "f", MemoryKind::WorkingMemory);
    fast.metadata.tags.push("mode:fast".to_string());
    text.set_working(vec![
        fast,
        item_with_key("n", "normal memory", "n", MemoryKind::WorkingMemory),
    ]);
    let llm = RouterLlm::for_memory_update(
        r#"{"keywords": ["normal"]}"#,
        r#"{"trigger_retrieval": true, "missing_evidences": ["normal"]}"#,
        r#"{"new_order": [0], "reasoning": "only one left"}"#,
        r#"{"keep": [true]}"#,
    );
    let scheduler = build_scheduler(fast_config(), llm, text.clone()).await;
    scheduler.start().await.unwrap();

    scheduler
        .submit_messages(vec![message(
            "u1",
            "cube1",
            TaskLabel::MemoryUpdate,
            "normal",
        )])
        .await
        .unwrap();

    let replaced = wait_for(
        || {
            let text = text.clone();
            async move { text.replace_calls.load(std::sync::atomic::Ordering::SeqCst) > 0 }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(replaced);
    scheduler.stop().await;

    // The fast-tagged item never survives a replace.
    assert_eq!(text.working_texts(), vec!["normal memory"]);
}

#[tokio::test]
async fn test_all_messages_reach_terminal_state() {
    let text = seeded_text_memory();
    let scheduler = build_scheduler(fast_config(), reconciliation_llm(), text).await;
    scheduler.start().await.unwrap();

    let query = message("u1", "cube1", TaskLabel::Query, "tell me about delta");
    let query_id = query.item_id.clone();
    scheduler.submit_messages(vec![query]).await.unwrap();

    let status = scheduler.status_tracker();
    let all_terminal = wait_for(
        || {
            let status = status.clone();
            async move {
                // The inline query and its derived memory_update both done.
                status.count_in_state(TaskState::Succeeded).await >= 2
            }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(all_terminal, "not all tasks reached a terminal state");
    scheduler.stop().await;

    let record = scheduler.task_status(&query_id).await.unwrap();
    assert_eq!(record.state, TaskState::Succeeded);
    assert!(record.finished_at.is_some());
}

#[tokio::test]
async fn test_activation_refresh_is_idempotent_across_turns() {
    // Working set only, no retrievable candidates: both turns reconcile to
    // the same working set and therefore the same composed prompt.
    let text = Arc::new(MockTextMemory::default());
    text.set_working(vec![
        item_with_key("a", "alpha memory", "a", MemoryKind::WorkingMemory),
        item_with_key("b", "beta memory", "b", MemoryKind::WorkingMemory),
        item_with_key("c", "gamma memory", "c", MemoryKind::WorkingMemory),
    ]);
    let cache: Arc<FileActivationCache> = Arc::new(FileActivationCache::new());

    let dir = tempfile::tempdir().unwrap();
    let config = SchedulerConfig {
        consume_interval_seconds: 0.01,
        enable_activation_memory: true,
        act_mem_update_interval_seconds: 0,
        act_mem_dump_path: dir.path().join("act.json"),
        ..Default::default()
    };

    let llm = RouterLlm::for_memory_update(
        r#"{"keywords": ["delta"]}"#,
        r#"{"trigger_retrieval": true, "missing_evidences": ["delta"]}"#,
        r#"{"new_order": [0, 1, 2], "reasoning": "keep order"}"#,
        r#"{"keep": [true, true, true]}"#,
    );

    let scheduler = MemScheduler::new(config);
    let cube = Arc::new(common::MockCube {
        cube_name: "cube-one".to_string(),
        text: text.clone(),
        activation: Some(cache.clone()),
        preferences: None,
    });
    scheduler.set_mem_cube("cube1", cube as Arc<dyn memloom::domain::ports::MemCube>).await;
    scheduler
        .init_modules(Modules {
            chat_llm: Some(llm),
            embedder: Some(Arc::new(OrthoEmbedder::default())),
            ..Default::default()
        })
        .await
        .unwrap();
    scheduler.start().await.unwrap();

    for _ in 0..2 {
        scheduler
            .submit_messages(vec![message(
                "u1",
                "cube1",
                TaskLabel::MemoryUpdate,
                "tell me about delta",
            )])
            .await
            .unwrap();
        let settled = wait_for(
            || {
                let status = scheduler.status_tracker();
                async move { status.count_in_state(TaskState::Submitted).await == 0
                    && status.count_in_state(TaskState::Running).await == 0 }
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(settled);
    }
    scheduler.stop().await;

    // Identical compositions across both turns: exactly one cache entry.
    use memloom::domain::ports::ActivationCache;
    let entries = cache.get_all().await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_submit_before_init_is_an_error() {
    let scheduler = MemScheduler::new(SchedulerConfig::default());
    let result = scheduler
        .submit_messages(vec![ScheduleMessage::new(
            "u1",
            "cube1",
            TaskLabel::Query,
            "too early",
        )])
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_disabled_handler_is_skipped() {
    let text = seeded_text_memory();
    let config = SchedulerConfig {
        disabled_handlers: vec!["answer".to_string()],
        ..fast_config()
    };
    let scheduler = build_scheduler(config, RouterLlm::new(), text).await;

    scheduler
        .submit_messages(vec![message("u1", "cube1", TaskLabel::Answer, "skipped")])
        .await
        .unwrap();

    // No addMessage event: the handler never ran.
    assert!(scheduler.web_log_events().await.is_empty());
}

#[tokio::test]
async fn test_set_mem_cubes_bulk() {
    let text = seeded_text_memory();
    let scheduler = MemScheduler::new(fast_config());
    let mut cubes: HashMap<String, Arc<dyn memloom::domain::ports::MemCube>> = HashMap::new();
    cubes.insert(
        "cube1".to_string(),
        MockCube::new("one", text.clone()) as Arc<dyn memloom::domain::ports::MemCube>,
    );
    cubes.insert(
        "cube2".to_string(),
        MockCube::new("two", text) as Arc<dyn memloom::domain::ports::MemCube>,
    );
    scheduler.set_mem_cubes(cubes).await;
    scheduler
        .init_modules(Modules {
            chat_llm: Some(RouterLlm::new()),
            ..Default::default()
        })
        .await
        .unwrap();

    scheduler
        .submit_messages(vec![message("u1", "cube2", TaskLabel::Answer, "hi")])
        .await
        .unwrap();
    let events = scheduler.web_log_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].memcube_name.as_deref(), Some("two"));
}
