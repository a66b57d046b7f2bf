//! 标注服务契约
//!
//! 外部分类服务是黑盒：给定输入项和允许的分类，返回结构化结果或失败。

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::models::{LabelItem, LabelRequest, Route};

/// 标注服务
///
/// 失败只有三类：`Transient`、`QuotaExceeded`、`Malformed`，由编排器决定重试还是切换组合。
#[async_trait]
pub trait LabelingService: Send + Sync {
    async fn label(
        &self,
        request: &LabelRequest,
        route: &Route,
    ) -> Result<Vec<LabelItem>, ServiceError>;
}
