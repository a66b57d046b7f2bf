//! LLM 标注服务 - 业务能力层
//!
//! 只负责"把一批输入发给模型并拿回结构化标注"，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 兼容 OpenAI API 的服务（Gemini 的 OpenAI 兼容端点等）
//! - 每个密钥一个客户端，模型由每次调用的 `Route` 决定

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ConfigError, ServiceError};
use crate::models::{LabelItem, LabelRequest, Route};
use crate::services::labeling_service::LabelingService;
use crate::services::response_parser::parse_label_items;

/// 模板中的数据占位符
pub const DATA_PLACEHOLDER: &str = "{data_json}";

/// 找不到模板文件时使用的默认模板
pub const DEFAULT_TEMPLATE: &str = r#"Classify the sentiment of every item in the following JSON array.

{data_json}

Return ONLY a JSON array, one object per input item, with this structure:
[
  {"id": 0, "label": "<one of the allowed labels>", "justification": "short reason"},
  ...
]"#;

const SYSTEM_MESSAGE: &str = "You are a careful annotation assistant. \
                              Answer with a single JSON array and nothing else.";

/// 读取提示词模板；文件不存在时使用默认模板
pub fn load_prompt_template(path: &Path) -> Result<String, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            if !content.contains(DATA_PLACEHOLDER) {
                return Err(ConfigError::invalid(
                    "prompt_template",
                    format!("模板中缺少 {} 占位符", DATA_PLACEHOLDER),
                ));
            }
            info!("📝 已加载提示词模板: {}", path.display());
            Ok(content)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("⚠️ 提示词模板 {} 不存在，使用默认模板", path.display());
            Ok(DEFAULT_TEMPLATE.to_string())
        }
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// 把输入项填进模板，并附上允许的分类
pub fn render_prompt(request: &LabelRequest) -> String {
    let data_json = serde_json::to_string_pretty(&request.items).unwrap_or_default();
    let template = if request.instructions.contains(DATA_PLACEHOLDER) {
        request.instructions.as_str()
    } else {
        DEFAULT_TEMPLATE
    };
    format!(
        "{}\n\nAllowed labels: {}\nReturn exactly {} items.",
        template.replace(DATA_PLACEHOLDER, &data_json),
        request.allowed_labels.join(", "),
        request.len()
    )
}

/// LLM 标注服务
///
/// 职责：
/// - 按 `Route` 选择密钥和模型发起调用
/// - 调用受 `request_timeout` 限制，超时算临时错误
/// - 按错误信息把失败归类为临时错误或配额错误
pub struct LlmLabelingService {
    clients: Vec<Client<OpenAIConfig>>,
    request_timeout: Duration,
}

impl LlmLabelingService {
    /// 为每个密钥创建客户端（下标与 `CredentialId` 对齐）
    pub fn new(config: &Config) -> Self {
        let clients = config
            .api_keys
            .iter()
            .map(|key| {
                let openai_config = OpenAIConfig::new()
                    .with_api_key(key)
                    .with_api_base(&config.api_base_url);
                Client::with_config(openai_config)
            })
            .collect();

        Self {
            clients,
            request_timeout: config.request_timeout(),
        }
    }

    async fn send(&self, client: &Client<OpenAIConfig>, model: &str, prompt: String) -> Result<String, ServiceError> {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(SYSTEM_MESSAGE)
            .build()
            .map_err(|e| ServiceError::Transient(e.to_string()))?;
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(|e| ServiceError::Transient(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.2)
            .max_tokens(8192u32)
            .build()
            .map_err(|e| ServiceError::Transient(e.to_string()))?;

        let response = client
            .chat()
            .create(request)
            .await
            .map_err(|e| ServiceError::classify(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ServiceError::Malformed("LLM 返回内容为空".to_string()))
    }
}

#[async_trait]
impl LabelingService for LlmLabelingService {
    async fn label(
        &self,
        request: &LabelRequest,
        route: &Route,
    ) -> Result<Vec<LabelItem>, ServiceError> {
        let client = self.clients.get(route.credential.0).ok_or_else(|| {
            ServiceError::Transient(format!("未配置的凭据 {}", route.credential))
        })?;

        let prompt = render_prompt(request);
        debug!(
            "调用 LLM API，模型: {}，{} 项，提示词 {} 字符",
            route.model,
            request.len(),
            prompt.chars().count()
        );

        let started = Instant::now();
        let content = tokio::time::timeout(self.request_timeout, self.send(client, &route.model, prompt))
            .await
            .map_err(|_| {
                ServiceError::Transient(format!(
                    "请求超时 ({} 秒)",
                    self.request_timeout.as_secs()
                ))
            })??;
        debug!(
            "LLM API 调用成功，耗时 {:.2}s，响应 {} 字符",
            started.elapsed().as_secs_f64(),
            content.len()
        );

        parse_label_items(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InputItem;
    use tempfile::TempDir;

    fn request(template: &str) -> LabelRequest {
        LabelRequest {
            items: vec![
                InputItem { id: 7, text: "kampus bagus".to_string() },
                InputItem { id: 8, text: "antri lama".to_string() },
            ],
            allowed_labels: vec!["positif".to_string(), "negatif".to_string()],
            instructions: template.to_string(),
        }
    }

    #[test]
    fn test_render_prompt_fills_placeholder() {
        let prompt = render_prompt(&request("Data:\n{data_json}\nEnd"));
        assert!(prompt.starts_with("Data:\n["));
        assert!(prompt.contains("\"id\": 7"));
        assert!(prompt.contains("antri lama"));
        assert!(prompt.contains("Allowed labels: positif, negatif"));
        assert!(prompt.contains("exactly 2 items"));
        assert!(!prompt.contains(DATA_PLACEHOLDER));
    }

    #[test]
    fn test_render_prompt_without_placeholder_uses_default() {
        let prompt = render_prompt(&request(""));
        assert!(prompt.contains("kampus bagus"));
    }

    #[test]
    fn test_load_prompt_template() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("none.txt");
        assert_eq!(load_prompt_template(&missing).unwrap(), DEFAULT_TEMPLATE);

        let bad = dir.path().join("bad.txt");
        std::fs::write(&bad, "no placeholder").unwrap();
        assert!(load_prompt_template(&bad).is_err());

        let good = dir.path().join("good.txt");
        std::fs::write(&good, "Label: {data_json}").unwrap();
        assert_eq!(load_prompt_template(&good).unwrap(), "Label: {data_json}");
    }

    #[tokio::test]
    async fn test_unknown_credential_is_transient() {
        let config = Config {
            api_keys: vec!["k".to_string()],
            ..Default::default()
        };
        let service = LlmLabelingService::new(&config);
        let err = service
            .label(&request(DEFAULT_TEMPLATE), &Route::new(5, "m"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transient(_)));
    }

    /// 需要真实密钥：LLM_API_KEY_1=... cargo test test_live_labeling -- --ignored --nocapture
    #[tokio::test]
    #[ignore]
    async fn test_live_labeling() {
        let _ = tracing_subscriber::fmt::try_init();
        let config = Config::from_env();
        let service = LlmLabelingService::new(&config);
        let route = config.routes().into_iter().next().expect("需要 LLM_API_KEY_1");

        let items = service.label(&request(DEFAULT_TEMPLATE), &route).await.unwrap();
        println!("{:?}", items);
        assert_eq!(items.len(), 2);
    }
}
