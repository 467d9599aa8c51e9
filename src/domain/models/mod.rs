//! Domain models for the memloom scheduler.

pub mod config;
pub mod memory;
pub mod message;
pub mod monitor;
pub mod status;
pub mod weblog;

pub use config::{
    ConsumerMode, DatabaseConfig, FineStrategy, LogConfig, LogFormat, OverflowPolicy,
    RateLimitConfig, SchedulerConfig, SearchMethod,
};
pub use memory::{
    append_related_content, detach_related_content, normalize_text_key, MemoryItem, MemoryKind,
    MemoryMetadata, MemoryStatus, FAST_MODE_TAG,
};
pub use message::{group_by_user_and_cube, ChatTurn, ScheduleMessage, TaskLabel};
pub use monitor::{QueryHistory, QueryRecord, WorkingMemoryEntry, WorkingSet};
pub use status::{TaskState, TaskStatusRecord};
pub use weblog::{
    EventStatus, KbOperation, KbRecord, LogBody, LogContentEntry, WebLogEvent, WebLogLabel,
    ACTIVATION_MEMORY_TYPE, LONG_TERM_MEMORY_TYPE, NOT_APPLICABLE_TYPE, USER_INPUT_TYPE,
    WORKING_MEMORY_TYPE,
};
