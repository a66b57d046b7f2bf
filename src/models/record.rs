//! 请求记录：一次外部服务调用尝试的结果

use crate::error::ServiceError;
use crate::models::batch::Batch;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// 凭据标识（密钥列表中的下标，显示时从 1 开始）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CredentialId(pub usize);

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API#{}", self.0 + 1)
    }
}

/// 一个 (凭据, 模型) 回退组合
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub credential: CredentialId,
    pub model: String,
}

impl Route {
    pub fn new(credential: usize, model: impl Into<String>) -> Self {
        Self {
            credential: CredentialId(credential),
            model: model.into(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.model, self.credential)
    }
}

/// 调用结果分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Transient,
    QuotaExceeded,
    Malformed,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        matches!(self, Outcome::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Transient => "transient",
            Outcome::QuotaExceeded => "quota_exceeded",
            Outcome::Malformed => "malformed",
        }
    }
}

impl From<&ServiceError> for Outcome {
    fn from(err: &ServiceError) -> Self {
        match err {
            ServiceError::Transient(_) => Outcome::Transient,
            ServiceError::QuotaExceeded(_) => Outcome::QuotaExceeded,
            ServiceError::Malformed(_) => Outcome::Malformed,
        }
    }
}

/// 一次调用尝试，记录后不可变
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub timestamp: DateTime<Utc>,
    pub credential: CredentialId,
    pub model: String,
    pub elapsed: Duration,
    pub outcome: Outcome,
    pub batch: Option<Batch>,
    pub error: Option<String>,
}

impl RequestRecord {
    pub fn success(route: &Route, elapsed: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            credential: route.credential,
            model: route.model.clone(),
            elapsed,
            outcome: Outcome::Success,
            batch: None,
            error: None,
        }
    }

    pub fn failure(route: &Route, elapsed: Duration, err: &ServiceError) -> Self {
        Self {
            timestamp: Utc::now(),
            credential: route.credential,
            model: route.model.clone(),
            elapsed,
            outcome: Outcome::from(err),
            batch: None,
            error: Some(err.to_string()),
        }
    }

    pub fn for_batch(mut self, batch: Batch) -> Self {
        self.batch = Some(batch);
        self
    }
}
