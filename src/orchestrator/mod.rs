//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批次调度和运行生命周期，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `controller` - 控制面
//! - 给 CLI 用的 start / stop / wait / progress / stats
//! - 恢复断点、规划批次、装配编排器
//! - 在后台任务中运行，持有停止信号
//!
//! ### `labeling_orchestrator` - 标注编排器
//! - 按顺序处理批次，每批委托 `BatchFlow`
//! - 成功后提交断点文件
//! - 输出运行总结
//!
//! ### `session_report` - 会话报告
//!
//! ## 层次关系
//!
//! ```text
//! controller (生命周期)
//!     ↓
//! labeling_orchestrator (处理 Vec<Batch>)
//!     ↓
//! workflow::BatchFlow (处理单个批次)
//!     ↓
//! services (能力层：checkpoint / planner / writer / tracker / llm)
//!     ↓
//! infrastructure (基础设施：codec / atomic_file / sleeper)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：controller 管生命周期，orchestrator 管批次顺序
//! 2. **资源隔离**：只有编排器持有断点表和回退游标
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure
//! 4. **无业务逻辑**：只做调度和统计，不做具体业务判断

pub mod controller;
pub mod labeling_orchestrator;
pub mod session_report;

// 重新导出主要类型
pub use controller::{LabelingController, StartInfo};
pub use labeling_orchestrator::{
    BatchReport, BatchStatusReport, LabelingOrchestrator, OrchestratorOptions, RunAborted,
    RunSummary,
};
