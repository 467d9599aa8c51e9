//! Handler semantics: add-path classification, feedback log folding,
//! mem_read idempotence, and merge event shapes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use memloom::domain::models::{
    KbOperation, LogBody, MemoryKind, SchedulerConfig, TaskLabel, TaskState, WebLogLabel,
};
use memloom::domain::ports::{FeedbackOutcome, FeedbackRecord, MERGED_TO_EDGE};
use memloom::services::{MemScheduler, Modules};

use common::{
    item_with_key, message, wait_for, EchoMemReader, FixedFeedback, MockCube, MockGraphStore,
    MockTextMemory, RouterLlm,
};

fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        consume_interval_seconds: 0.01,
        consume_batch: 10,
        ..Default::default()
    }
}

async fn build_scheduler(
    config: SchedulerConfig,
    text: Arc<MockTextMemory>,
    modules: Modules,
) -> MemScheduler {
    let scheduler = MemScheduler::new(config);
    scheduler
        .set_mem_cube("cube1", MockCube::new("cube-one", text))
        .await;
    let mut modules = modules;
    if modules.chat_llm.is_none() {
        modules.chat_llm = Some(RouterLlm::new());
    }
    scheduler.init_modules(modules).await.unwrap();
    scheduler
}

#[tokio::test]
async fn test_add_with_duplicate_key_becomes_update() {
    // The graph already holds a node with the same (key, memory_type).
    let graph = Arc::new(MockGraphStore::default())
        .with_node("orig-1", "favfruit", "UserMemory");
    let text = Arc::new(MockTextMemory {
        graph: Some(graph),
        ..Default::default()
    });
    text.insert_item(item_with_key(
        "orig-1",
        "the favourite fruit is apples",
        "favfruit",
        MemoryKind::UserMemory,
    ));
    text.insert_item(item_with_key(
        "m1",
        "the favourite fruit is pears",
        "favfruit",
        MemoryKind::UserMemory,
    ));

    let scheduler = build_scheduler(fast_config(), text, Modules::default()).await;
    scheduler
        .submit_messages(vec![message("u1", "cube1", TaskLabel::Add, r#"["m1"]"#)])
        .await
        .unwrap();

    let events = scheduler.web_log_events().await;
    assert!(events.iter().all(|e| e.label != WebLogLabel::AddMemory));
    let updates: Vec<_> = events
        .iter()
        .filter(|e| e.label == WebLogLabel::UpdateMemory)
        .collect();
    assert_eq!(updates.len(), 1);
    let LogBody::Entries(entries) = &updates[0].memcube_log_content else {
        panic!("expected legacy entries");
    };
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].ref_id.as_deref(), Some("orig-1"));
    assert_eq!(
        updates[0].metadata[0]["original_content"],
        serde_json::json!("the favourite fruit is apples")
    );
}

#[tokio::test]
async fn test_add_new_key_emits_add_memory() {
    let graph = Arc::new(MockGraphStore::default());
    let text = Arc::new(MockTextMemory {
        graph: Some(graph),
        ..Default::default()
    });
    text.insert_item(item_with_key(
        "m2",
        "user enjoys hiking",
        "hobby",
        MemoryKind::UserMemory,
    ));

    let scheduler = build_scheduler(fast_config(), text, Modules::default()).await;
    scheduler
        .submit_messages(vec![message("u1", "cube1", TaskLabel::Add, r#"["m2"]"#)])
        .await
        .unwrap();

    let events = scheduler.web_log_events().await;
    let adds: Vec<_> = events
        .iter()
        .filter(|e| e.label == WebLogLabel::AddMemory)
        .collect();
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].memory_len, 1);
}

#[tokio::test]
async fn test_add_in_cloud_mode_folds_into_knowledge_base_update() {
    let graph = Arc::new(MockGraphStore::default())
        .with_node("orig-1", "favfruit", "UserMemory");
    let text = Arc::new(MockTextMemory {
        graph: Some(graph),
        ..Default::default()
    });
    text.insert_item(item_with_key(
        "orig-1",
        "old fruit fact",
        "favfruit",
        MemoryKind::UserMemory,
    ));
    text.insert_item(item_with_key(
        "m1",
        "new fruit fact",
        "favfruit",
        MemoryKind::UserMemory,
    ));
    text.insert_item(item_with_key(
        "m3",
        "fresh unrelated fact",
        "newkey",
        MemoryKind::UserMemory,
    ));

    let config = SchedulerConfig {
        cloud_mode: true,
        ..fast_config()
    };
    let scheduler = build_scheduler(config, text, Modules::default()).await;
    scheduler
        .submit_messages(vec![message(
            "u1",
            "cube1",
            TaskLabel::Add,
            r#"["m1", "m3"]"#,
        )])
        .await
        .unwrap();

    let events = scheduler.web_log_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].label, WebLogLabel::KnowledgeBaseUpdate);
    let LogBody::Knowledge(records) = &events[0].memcube_log_content else {
        panic!("expected knowledge-base records");
    };
    assert_eq!(records.len(), 2);
    let update = records
        .iter()
        .find(|r| r.operation == KbOperation::Update)
        .unwrap();
    assert_eq!(update.original_content.as_deref(), Some("old fruit fact"));
    assert!(records.iter().any(|r| r.operation == KbOperation::Add));
}

#[tokio::test]
async fn test_feedback_cloud_log_carries_original_content() {
    let text = Arc::new(MockTextMemory::default());
    let feedback = FixedFeedback {
        outcome: FeedbackOutcome {
            add: vec![FeedbackRecord {
                id: "n1".to_string(),
                memory: "x".to_string(),
                origin_memory: None,
                source_doc_id: None,
            }],
            update: vec![FeedbackRecord {
                id: "n2".to_string(),
                memory: "y".to_string(),
                origin_memory: Some("y0".to_string()),
                source_doc_id: None,
            }],
        },
    };
    let config = SchedulerConfig {
        cloud_mode: true,
        ..fast_config()
    };
    let scheduler = build_scheduler(
        config,
        text,
        Modules {
            feedback: Some(Arc::new(feedback)),
            ..Default::default()
        },
    )
    .await;
    scheduler.start().await.unwrap();

    scheduler
        .submit_messages(vec![message(
            "u1",
            "cube1",
            TaskLabel::MemFeedback,
            r#"{"feedback_content": "prefer y over y0"}"#,
        )])
        .await
        .unwrap();

    let status = scheduler.status_tracker();
    let done = wait_for(
        || {
            let status = status.clone();
            async move { status.count_in_state(TaskState::Succeeded).await >= 1 }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(done);
    scheduler.stop().await;

    let events = scheduler.web_log_events().await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].label, WebLogLabel::KnowledgeBaseUpdate);
    let LogBody::Knowledge(records) = &events[0].memcube_log_content else {
        panic!("expected knowledge-base records");
    };
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].operation, KbOperation::Add);
    assert_eq!(records[0].memory_id, "n1");
    assert_eq!(records[1].operation, KbOperation::Update);
    assert_eq!(records[1].original_content.as_deref(), Some("y0"));
    assert_eq!(records[1].trigger_source, "Feedback");
}

#[tokio::test]
async fn test_mem_read_is_idempotent_on_redelivery() {
    let text = Arc::new(MockTextMemory::default());
    let mut raw = item_with_key("raw-1", "raw chunk about tea", "tea", MemoryKind::WorkingMemory);
    raw.metadata.tags.push("mode:fast".to_string());
    text.insert_item(raw);

    let scheduler = build_scheduler(
        fast_config(),
        text.clone(),
        Modules {
            mem_reader: Some(Arc::new(EchoMemReader)),
            ..Default::default()
        },
    )
    .await;
    scheduler.start().await.unwrap();

    for expected_done in 1..=2 {
        scheduler
            .submit_messages(vec![message(
                "u1",
                "cube1",
                TaskLabel::MemRead,
                r#"["raw-1"]"#,
            )])
            .await
            .unwrap();
        let status = scheduler.status_tracker();
        let done = wait_for(
            || {
                let status = status.clone();
                async move {
                    status.count_in_state(TaskState::Succeeded).await >= expected_done
                }
            },
            Duration::from_secs(5),
        )
        .await;
        assert!(done, "mem_read round {expected_done} did not finish");
    }
    scheduler.stop().await;

    // Same final long-term set after both deliveries; the raw id is gone.
    assert_eq!(text.long_term_ids(), vec!["fine-raw-1"]);
    assert!(text.items.lock().unwrap().get("raw-1").is_none());
    assert!(text.refresh_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_mem_reorganize_emits_merge_event_with_post_merge_row() {
    let graph = Arc::new(MockGraphStore::default())
        .with_edge("m1", "merged-target", MERGED_TO_EDGE);
    let text = Arc::new(MockTextMemory {
        graph: Some(graph),
        ..Default::default()
    });
    text.insert_item(item_with_key("m1", "first tea fact", "tea", MemoryKind::LongTermMemory));
    text.insert_item(item_with_key("m2", "second tea fact", "tea", MemoryKind::LongTermMemory));
    text.insert_item(item_with_key(
        "merged-target",
        "combined tea fact",
        "tea",
        MemoryKind::LongTermMemory,
    ));

    let scheduler = build_scheduler(fast_config(), text.clone(), Modules::default()).await;
    scheduler.start().await.unwrap();

    scheduler
        .submit_messages(vec![message(
            "u1",
            "cube1",
            TaskLabel::MemReorganize,
            r#"["m1", "m2"]"#,
        )])
        .await
        .unwrap();

    let status = scheduler.status_tracker();
    let done = wait_for(
        || {
            let status = status.clone();
            async move { status.count_in_state(TaskState::Succeeded).await >= 1 }
        },
        Duration::from_secs(5),
    )
    .await;
    assert!(done);
    scheduler.stop().await;

    let events = scheduler.web_log_events().await;
    let merges: Vec<_> = events
        .iter()
        .filter(|e| e.label == WebLogLabel::MergeMemory)
        .collect();
    assert_eq!(merges.len(), 1);
    let LogBody::Entries(entries) = &merges[0].memcube_log_content else {
        panic!("expected legacy entries");
    };
    // Two pre-merge rows plus the synthetic post-merge row.
    assert_eq!(entries.len(), 3);
    let post: Vec<_> = entries
        .iter()
        .filter(|e| e.entry_type.as_deref() == Some("postMerge"))
        .collect();
    assert_eq!(post.len(), 1);
    assert_eq!(post[0].ref_id.as_deref(), Some("merged-target"));
    // memory_len counts only the pre-merge rows.
    assert_eq!(merges[0].memory_len, 2);
    assert!(text.refresh_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1);
}
