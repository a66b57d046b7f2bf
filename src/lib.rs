//! # Batch Labeler
//!
//! 可断点续跑的批量标注引擎：把表格数据集分批发给外部分类服务，
//! 每批结果原子地写回断点文件，并在并发访问下提供请求统计。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 文件与时间这类底层能力
//! - `TableCodec` / `CsvCodec` - 断点文件编解码
//! - `write_atomic` - 写临时文件再 rename
//! - `Sleeper` - 可替换的等待能力
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `CheckpointStore` - 定位并加载断点文件
//! - `batch_planner` - 规划待处理批次
//! - `PersistenceWriter` - 原子提交
//! - `RequestTracker` - 请求统计（等锁有上限）
//! - `LlmLabelingService` - LLM 标注能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一批"的完整处理流程
//! - `BatchCtx` - 上下文封装（数据集 + 批次序号）
//! - `BatchFlow` - 调用 → 校验 → 记录 → 重试/切换
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/labeling_orchestrator` - 批次顺序、提交、总结
//! - `orchestrator/controller` - start / stop / progress / stats
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod export;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use orchestrator::{LabelingController, LabelingOrchestrator, RunSummary};
pub use services::{CheckpointStore, LabelingService, LlmLabelingService, RequestTracker};
pub use workflow::{BatchFlow, BatchOutcome, RetryPolicy};
