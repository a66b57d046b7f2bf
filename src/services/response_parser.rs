//! 模型输出解析
//!
//! 模型经常在 JSON 外面包一层 markdown、夹杂说明文字，或者输出被截断。
//! 依次尝试：
//! 1. 整段解析
//! 2. 第一个 ```json 代码块
//! 3. 文本里的每个 `[...]` 片段
//! 4. 以 `[` 开头的截断输出：截到最后一个完整的 `}` 再补齐 `]`

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::models::{LabelItem, RowId};

const LABEL_KEYS: [&str; 2] = ["label", "category"];
const JUSTIFICATION_KEYS: [&str; 2] = ["justification", "justifikasi"];

/// 从模型输出中提取标注条目
///
/// 无法识别的元素被跳过，条数是否够由校验环节判断。
pub fn parse_label_items(raw: &str) -> Result<Vec<LabelItem>, ServiceError> {
    let array = extract_json_array(raw).ok_or_else(|| {
        ServiceError::Malformed(format!(
            "无法从响应中提取 JSON 数组: {}",
            crate::utils::logging::truncate_text(raw.trim(), 80)
        ))
    })?;

    let total = array.len();
    let items: Vec<LabelItem> = array.iter().filter_map(to_label_item).collect();
    if items.len() < total {
        debug!("{} 个元素无法识别，已跳过", total - items.len());
    }
    Ok(items)
}

/// 按顺序尝试各种提取方式
pub fn extract_json_array(raw: &str) -> Option<Vec<Value>> {
    let text = raw.trim();

    if let Some(array) = parse_array(text) {
        return Some(array);
    }

    if let Ok(re) = Regex::new(r"(?s)```(?:json)?\s*(.*?)```") {
        if let Some(block) = re.captures(text).and_then(|c| c.get(1)) {
            debug!("在 markdown 代码块中找到 JSON");
            if let Some(array) = parse_array(block.as_str()) {
                return Some(array);
            }
        }
    }

    if let Ok(re) = Regex::new(r"(?s)\[.*?\]") {
        for (i, m) in re.find_iter(text).enumerate() {
            if let Some(array) = parse_array(m.as_str()) {
                debug!("第 {} 个 [...] 片段解析成功", i + 1);
                return Some(array);
            }
        }
    }

    if text.starts_with('[') {
        if let Some(array) = repair_truncated(text) {
            warn!("⚠️ 响应被截断，恢复了 {} 条", array.len());
            return Some(array);
        }
    }

    None
}

fn parse_array(text: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

fn repair_truncated(text: &str) -> Option<Vec<Value>> {
    let mut fixed = text.to_string();

    if fixed.matches('{').count() > fixed.matches('}').count() {
        let last = fixed.rfind('}')?;
        fixed.truncate(last + 1);
    }

    let missing = fixed
        .matches('[')
        .count()
        .saturating_sub(fixed.matches(']').count());
    fixed.push_str(&"]".repeat(missing));

    parse_array(&fixed)
}

fn to_label_item(value: &Value) -> Option<LabelItem> {
    let obj = value.as_object()?;
    let id = obj.get("id").and_then(parse_id)?;
    let pick = |keys: &[&str]| {
        keys.iter()
            .find_map(|k| obj.get(*k))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
    };
    Some(LabelItem {
        id,
        label: pick(&LABEL_KEYS)?,
        justification: pick(&JUSTIFICATION_KEYS)?,
    })
}

fn parse_id(value: &Value) -> Option<RowId> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
            .and_then(|v| RowId::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
