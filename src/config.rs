use crate::error::ConfigError;
use crate::models::Route;
use crate::workflow::retry::{BackoffPolicy, RetryPolicy};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 源数据集目录
    pub dataset_dir: PathBuf,
    /// 断点文件输出目录
    pub output_dir: PathBuf,
    /// 日志目录
    pub log_dir: PathBuf,
    /// 输入文本所在列
    pub text_column: String,
    /// 允许的分类集合
    pub allowed_labels: Vec<String>,
    // --- LLM 配置 ---
    pub api_base_url: String,
    /// 轮换用的 API 密钥
    pub api_keys: Vec<String>,
    /// 模型回退顺序
    pub models: Vec<String>,
    // --- 运行参数 ---
    /// 每批行数
    pub batch_width: usize,
    /// 每批最多重试次数
    pub max_attempts: u32,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 统计快照获取锁的超时（毫秒）
    pub stats_lock_timeout_ms: u64,
    /// 提示词模板路径
    pub prompt_template_path: PathBuf,
    /// 是否重新处理部分完成的批次
    pub force_partial: bool,
    /// 是否接受部分合法的响应
    pub relaxed_validation: bool,
    /// 请求统计导出文件
    pub stats_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("dataset"),
            output_dir: PathBuf::from("results"),
            log_dir: PathBuf::from("logs"),
            text_column: "text".to_string(),
            allowed_labels: vec![
                "positif".to_string(),
                "negatif".to_string(),
                "netral".to_string(),
            ],
            api_base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            api_keys: Vec::new(),
            models: vec![
                "gemini-2.5-flash".to_string(),
                "gemini-2.5-flash-lite".to_string(),
            ],
            batch_width: 50,
            max_attempts: 3,
            request_timeout_secs: 900,
            stats_lock_timeout_ms: 3000,
            prompt_template_path: PathBuf::from("prompt_template.txt"),
            force_partial: false,
            relaxed_validation: false,
            stats_file: PathBuf::from("logs/request_stats.json"),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            dataset_dir: env_path("DATASET_DIR").unwrap_or(default.dataset_dir),
            output_dir: env_path("OUTPUT_DIR").unwrap_or(default.output_dir),
            log_dir: env_path("LOG_DIR").unwrap_or(default.log_dir),
            text_column: std::env::var("TEXT_COLUMN").unwrap_or(default.text_column),
            allowed_labels: env_list("ALLOWED_LABELS").unwrap_or(default.allowed_labels),
            api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.api_base_url),
            api_keys: numbered_keys("LLM_API_KEY"),
            models: env_list("MODEL_FALLBACK_LIST").unwrap_or(default.models),
            batch_width: env_parse("BATCH_WIDTH").unwrap_or(default.batch_width),
            max_attempts: env_parse("MAX_RETRY").unwrap_or(default.max_attempts),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(default.request_timeout_secs),
            stats_lock_timeout_ms: env_parse("STATS_LOCK_TIMEOUT_MS").unwrap_or(default.stats_lock_timeout_ms),
            prompt_template_path: env_path("PROMPT_TEMPLATE").unwrap_or(default.prompt_template_path),
            force_partial: env_parse("FORCE_PARTIAL").unwrap_or(default.force_partial),
            relaxed_validation: env_parse("RELAXED_VALIDATION").unwrap_or(default.relaxed_validation),
            stats_file: env_path("STATS_FILE").unwrap_or(default.stats_file),
        }
    }

    /// 从 TOML 文件加载，缺省字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 检查运行前必须满足的条件
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_keys.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::MissingCredentials);
        }
        if self.models.is_empty() {
            return Err(ConfigError::EmptyModelList);
        }
        if self.batch_width == 0 {
            return Err(ConfigError::invalid("batch_width", "必须大于 0"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "必须大于 0"));
        }
        if self.allowed_labels.is_empty() {
            return Err(ConfigError::invalid("allowed_labels", "至少需要一个分类"));
        }
        Ok(())
    }

    /// 回退组合：按模型优先，每个模型下依次轮换所有密钥
    pub fn routes(&self) -> Vec<Route> {
        let keys: Vec<usize> = self
            .api_keys
            .iter()
            .enumerate()
            .filter(|(_, k)| !k.trim().is_empty())
            .map(|(i, _)| i)
            .collect();
        self.models
            .iter()
            .flat_map(|model| keys.iter().map(move |&k| Route::new(k, model.clone())))
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            routes: self.routes(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stats_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.stats_lock_timeout_ms)
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name).ok().map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_list(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|v| split_list(&v)).filter(|l| !l.is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// 读取 `PREFIX_1`, `PREFIX_2`, ... 直到第一个缺口
fn numbered_keys(prefix: &str) -> Vec<String> {
    (1..)
        .map_while(|i| std::env::var(format!("{}_{}", prefix, i)).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_keys(n: usize) -> Config {
        Config {
            api_keys: (0..n).map(|i| format!("key-{}", i)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_routes_are_model_major() {
        let config = config_with_keys(2);
        let routes = config.routes();
        assert_eq!(
            routes,
            vec![
                Route::new(0, "gemini-2.5-flash"),
                Route::new(1, "gemini-2.5-flash"),
                Route::new(0, "gemini-2.5-flash-lite"),
                Route::new(1, "gemini-2.5-flash-lite"),
            ]
        );
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            Config::default().validate(),
            Err(ConfigError::MissingCredentials)
        ));
        assert!(config_with_keys(1).validate().is_ok());

        let zero_width = Config {
            batch_width: 0,
            ..config_with_keys(1)
        };
        assert!(matches!(
            zero_width.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "batch_width"
        ));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_list(" , ").is_empty());
    }

    #[test]
    fn test_from_toml_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("labeler.toml");
        std::fs::write(
            &path,
            "api_keys = [\"k1\"]\nbatch_width = 25\nallowed_labels = [\"ya\", \"tidak\"]\n",
        )
        .unwrap();

        let config = Config::from_toml_file(&path).unwrap();
        assert_eq!(config.batch_width, 25);
        assert_eq!(config.allowed_labels, vec!["ya", "tidak"]);
        assert_eq!(config.max_attempts, 3);
        assert!(config.validate().is_ok());
    }
}
