pub mod batch_planner;
pub mod checkpoint_store;
pub mod labeling_service;
pub mod llm_service;
pub mod persistence_writer;
pub mod report;
pub mod request_tracker;
pub mod response_parser;

pub use batch_planner::{plan, Plan, PlanOptions};
pub use checkpoint_store::{ArtifactHandle, ArtifactLocator, CheckpointStore, Resolved, TimestampedNaming};
pub use labeling_service::LabelingService;
pub use llm_service::LlmLabelingService;
pub use persistence_writer::PersistenceWriter;
pub use request_tracker::{AggregateStats, RequestTracker, SessionStats};
