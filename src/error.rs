use std::path::PathBuf;
use thiserror::Error;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 断点文件错误（恢复阶段致命）
    #[error("断点错误: {0}")]
    Checkpoint(#[from] CheckpointError),
    /// 持久化错误（运行阶段致命）
    #[error("持久化错误: {0}")]
    Persistence(#[from] PersistenceError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 已有任务在运行
    #[error("数据集 {dataset} 的标注任务已在运行")]
    AlreadyRunning { dataset: String },
    /// 没有正在运行的任务
    #[error("没有正在运行的标注任务")]
    NotRunning,
    /// 运行因持久化失败中止
    #[error(transparent)]
    Aborted(#[from] crate::orchestrator::RunAborted),
    /// 后台任务异常退出
    #[error("标注任务异常退出: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// 单次调用失败（逐次尝试级别，不会中止整个运行）
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// 网络/服务端的临时错误：同一组合重试
    #[error("临时服务错误: {0}")]
    Transient(String),
    /// 配额/限流：切换到下一个 (凭据, 模型) 组合
    #[error("配额已用尽: {0}")]
    QuotaExceeded(String),
    /// 响应格式不合法：与临时错误同样重试
    #[error("响应格式错误: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// 按错误信息关键字归类
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        const QUOTA_KEYWORDS: [&str; 6] = [
            "quota",
            "rate limit",
            "rate_limit",
            "429",
            "resource_exhausted",
            "permission denied",
        ];
        if QUOTA_KEYWORDS.iter().any(|k| lower.contains(k)) {
            ServiceError::QuotaExceeded(message)
        } else {
            ServiceError::Transient(message)
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, ServiceError::QuotaExceeded(_))
    }
}

/// 断点存储错误
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// 已存在的断点文件无法解析，调用方必须上报而不是重新开始
    #[error("断点文件无法读取 ({path}): {reason}")]
    ArtifactUnreadable { path: PathBuf, reason: String },
    /// 源数据集不存在或无法解析
    #[error("源数据集无法读取 ({path}): {reason}")]
    SourceUnreadable { path: PathBuf, reason: String },
    /// 文件系统错误
    #[error("断点目录操作失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// 持久化错误
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// 序列化失败
    #[error("断点编码失败 ({path}): {reason}")]
    Encode { path: PathBuf, reason: String },
    /// 写入/替换失败，磁盘上仍是上一次提交的状态
    #[error("断点写入失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 写入线程异常退出
    #[error("断点写入任务异常退出: {0}")]
    Join(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 没有任何 API 密钥
    #[error("没有找到 API 密钥，至少需要 LLM_API_KEY_1")]
    MissingCredentials,
    /// 模型回退列表为空
    #[error("模型回退列表为空")]
    EmptyModelList,
    /// 字段取值非法
    #[error("配置项 {field} 取值非法: {reason}")]
    InvalidValue { field: String, reason: String },
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ========== 便捷构造函数 ==========

impl CheckpointError {
    pub fn unreadable(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        CheckpointError::ArtifactUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CheckpointError::Io {
            path: path.into(),
            source,
        }
    }
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_quota_keywords() {
        assert!(ServiceError::classify("429 Too Many Requests").is_quota());
        assert!(ServiceError::classify("RESOURCE_EXHAUSTED: daily quota").is_quota());
        assert!(ServiceError::classify("Rate limit reached for model").is_quota());
        assert_eq!(
            ServiceError::classify("connection reset by peer"),
            ServiceError::Transient("connection reset by peer".to_string())
        );
    }
}
