//! 表格编解码
//!
//! 断点文件格式：`id, <原始列...>, label, justification`，行序与源数据集一致。
//! 具体编码只在这里出现，上层只依赖 `TableCodec`。

use crate::models::{Row, Table};
use std::path::Path;
use thiserror::Error;

pub const ID_COLUMN: &str = "id";
pub const LABEL_COLUMN: &str = "label";
pub const JUSTIFICATION_COLUMN: &str = "justification";
/// 源数据集自带的 id 列在断点文件中的列名
pub const SOURCE_ID_COLUMN: &str = "source_id";

/// 编解码错误
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("CSV 解析失败: {0}")]
    Csv(#[from] csv::Error),
    #[error("缺少列: {0}")]
    MissingColumn(String),
    #[error("第 {line} 行的 id 非法: '{value}'")]
    InvalidId { line: usize, value: String },
    #[error("第 {line} 行的 id 应为 {expected}，实际为 {found}")]
    IdMismatch {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("编码失败: {0}")]
    Encode(String),
}

/// 表格编解码能力
pub trait TableCodec: Send + Sync {
    /// 文件扩展名（不含点）
    fn extension(&self) -> &str;

    /// 读取源数据集（按位置编号，自带的 id 列改名为 `source_id`）
    fn read_source(&self, path: &Path, text_column: &str) -> Result<Table, CodecError>;

    /// 读取断点文件（必须带 id 列且 id 与位置一致）
    fn read_artifact(&self, path: &Path, text_column: &str) -> Result<Table, CodecError>;

    /// 编码为断点文件内容
    fn encode_artifact(&self, table: &Table) -> Result<Vec<u8>, CodecError>;
}

/// CSV 实现
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvCodec;

impl CsvCodec {
    fn decode<R: std::io::Read>(
        &self,
        reader: R,
        text_column: &str,
        require_ids: bool,
    ) -> Result<Table, CodecError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(reader);

        let headers = rdr.headers()?.clone();
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        // 源数据集自带的 id 只是普通输入列，行号按位置
        let id_idx = if require_ids { find(ID_COLUMN) } else { None };
        let label_idx = find(LABEL_COLUMN);
        let just_idx = find(JUSTIFICATION_COLUMN);

        if require_ids && id_idx.is_none() {
            return Err(CodecError::MissingColumn(ID_COLUMN.to_string()));
        }

        let reserved = |i: usize| Some(i) == id_idx || Some(i) == label_idx || Some(i) == just_idx;
        let columns: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !reserved(*i))
            .map(|(_, h)| match h.trim() {
                ID_COLUMN => SOURCE_ID_COLUMN.to_string(),
                name => name.to_string(),
            })
            .collect();

        let mut rows = Vec::new();
        for (position, record) in rdr.records().enumerate() {
            let record = record?;
            // 表头占第 1 行
            let line = position + 2;

            let id = match id_idx {
                Some(i) => {
                    let raw = record.get(i).unwrap_or_default().trim();
                    let found = parse_id(raw).ok_or_else(|| CodecError::InvalidId {
                        line,
                        value: raw.to_string(),
                    })?;
                    if found != position {
                        return Err(CodecError::IdMismatch {
                            line,
                            expected: position,
                            found,
                        });
                    }
                    found
                }
                None => position,
            };

            let optional = |idx: Option<usize>| {
                idx.and_then(|i| record.get(i))
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };

            let fields = record
                .iter()
                .enumerate()
                .filter(|(i, _)| !reserved(*i))
                .map(|(_, v)| v.to_string())
                .collect();

            rows.push(Row {
                id,
                fields,
                label: optional(label_idx),
                justification: optional(just_idx),
            });
        }

        Table::new(columns, text_column, rows)
            .ok_or_else(|| CodecError::MissingColumn(text_column.to_string()))
    }
}

/// 兼容表格软件导出的 `12.0`
fn parse_id(raw: &str) -> Option<usize> {
    raw.parse::<usize>()
        .ok()
        .or_else(|| raw.strip_suffix(".0").and_then(|s| s.parse().ok()))
}

impl TableCodec for CsvCodec {
    fn extension(&self) -> &str {
        "csv"
    }

    fn read_source(&self, path: &Path, text_column: &str) -> Result<Table, CodecError> {
        let file = std::fs::File::open(path).map_err(csv::Error::from)?;
        self.decode(file, text_column, false)
    }

    fn read_artifact(&self, path: &Path, text_column: &str) -> Result<Table, CodecError> {
        let file = std::fs::File::open(path).map_err(csv::Error::from)?;
        self.decode(file, text_column, true)
    }

    fn encode_artifact(&self, table: &Table) -> Result<Vec<u8>, CodecError> {
        let mut wtr = csv::Writer::from_writer(Vec::new());

        let mut header = Vec::with_capacity(table.columns.len() + 3);
        header.push(ID_COLUMN);
        header.extend(table.columns.iter().map(String::as_str));
        header.push(LABEL_COLUMN);
        header.push(JUSTIFICATION_COLUMN);
        wtr.write_record(&header)?;

        for row in &table.rows {
            let id = row.id.to_string();
            let mut record = Vec::with_capacity(header.len());
            record.push(id.as_str());
            record.extend(row.fields.iter().map(String::as_str));
            record.push(row.label.as_deref().unwrap_or_default());
            record.push(row.justification.as_deref().unwrap_or_default());
            wtr.write_record(&record)?;
        }

        wtr.into_inner()
            .map_err(|e| CodecError::Encode(e.to_string()))
    }
}
