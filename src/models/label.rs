//! 标注服务的请求/响应数据

use crate::models::row::RowId;
use serde::Serialize;

/// 请求中的一个输入项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputItem {
    pub id: RowId,
    pub text: String,
}

/// 发往标注服务的一次请求
#[derive(Debug, Clone)]
pub struct LabelRequest {
    /// 有序输入项
    pub items: Vec<InputItem>,
    /// 允许的分类集合
    pub allowed_labels: Vec<String>,
    /// 提示词说明
    pub instructions: String,
}

impl LabelRequest {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// 服务返回的一条标注
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelItem {
    pub id: RowId,
    pub label: String,
    pub justification: String,
}

impl LabelItem {
    pub fn new(id: RowId, label: impl Into<String>, justification: impl Into<String>) -> Self {
        Self {
            id,
            label: label.into(),
            justification: justification.into(),
        }
    }
}
