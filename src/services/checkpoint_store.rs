//! 断点存储 - 业务能力层
//!
//! 只负责"找到并加载断点文件"，不关心流程
//!
//! ## 约定
//! - 断点文件命名：`{数据集}_labeled_{YYYYmmdd_HHMMSS}.{扩展名}`，取时间戳最新的一个
//! - 没有断点文件时，从 `dataset_dir/{数据集}.{扩展名}` 复制一份（输出列清空）
//! - 已有断点文件读不出来必须报错，不能悄悄重新开始
//! - 上次提交中断留下的 `.tmp` 文件在恢复时删除

use chrono::{Local, NaiveDateTime};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::CheckpointError;
use crate::infrastructure::atomic_file::temp_path_for;
use crate::infrastructure::{write_atomic, CsvCodec, TableCodec};
use crate::models::{Progress, Table};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// 断点文件定位策略
pub trait ArtifactLocator: Send + Sync {
    /// 目录中该数据集最新的断点文件
    fn latest(&self, dir: &Path, dataset: &str, extension: &str) -> io::Result<Option<PathBuf>>;

    /// 新断点文件的文件名
    fn fresh_name(&self, dataset: &str, extension: &str) -> String;
}

/// 按文件名中的时间戳定位
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampedNaming;

impl TimestampedNaming {
    fn prefix(dataset: &str) -> String {
        format!("{}_labeled_", dataset)
    }

    /// 从文件名解析时间戳，不匹配返回 None
    pub fn parse(file_name: &str, dataset: &str, extension: &str) -> Option<NaiveDateTime> {
        let stamp = file_name
            .strip_prefix(&Self::prefix(dataset))?
            .strip_suffix(extension)?
            .strip_suffix('.')?;
        NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
    }
}

impl ArtifactLocator for TimestampedNaming {
    fn latest(&self, dir: &Path, dataset: &str, extension: &str) -> io::Result<Option<PathBuf>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut best: Option<(NaiveDateTime, PathBuf)> = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stamp) = name
                .to_str()
                .and_then(|n| Self::parse(n, dataset, extension))
            else {
                continue;
            };
            if best.as_ref().map_or(true, |(b, _)| stamp > *b) {
                best = Some((stamp, entry.path()));
            }
        }
        Ok(best.map(|(_, path)| path))
    }

    fn fresh_name(&self, dataset: &str, extension: &str) -> String {
        format!(
            "{}{}.{}",
            Self::prefix(dataset),
            Local::now().format(TIMESTAMP_FORMAT),
            extension
        )
    }
}

/// 活动断点文件的句柄
///
/// 同一句柄的所有克隆共享提交锁，保证同一时刻只有一个提交在进行。
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    pub dataset: String,
    pub path: PathBuf,
    pub(crate) commit_lock: Arc<Mutex<()>>,
}

impl ArtifactHandle {
    pub fn new(dataset: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            dataset: dataset.into(),
            path: path.into(),
            commit_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// `resolve` 的结果
#[derive(Debug)]
pub struct Resolved {
    pub handle: ArtifactHandle,
    pub table: Table,
    pub progress: Progress,
    /// 是否新建了断点文件
    pub created: bool,
}

/// 断点存储
pub struct CheckpointStore {
    dataset_dir: PathBuf,
    output_dir: PathBuf,
    text_column: String,
    codec: Arc<dyn TableCodec>,
    locator: Box<dyn ArtifactLocator>,
}

impl CheckpointStore {
    pub fn new(config: &Config) -> Self {
        Self {
            dataset_dir: config.dataset_dir.clone(),
            output_dir: config.output_dir.clone(),
            text_column: config.text_column.clone(),
            codec: Arc::new(CsvCodec),
            locator: Box::new(TimestampedNaming),
        }
    }

    pub fn with_locator(mut self, locator: Box<dyn ArtifactLocator>) -> Self {
        self.locator = locator;
        self
    }

    pub fn codec(&self) -> Arc<dyn TableCodec> {
        self.codec.clone()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// 定位（或新建）断点文件并加载
    pub fn resolve(&self, dataset: &str) -> Result<Resolved, CheckpointError> {
        let dataset = dataset_stem(dataset);
        let ext = self.codec.extension();

        std::fs::create_dir_all(&self.output_dir)
            .map_err(|e| CheckpointError::io(&self.output_dir, e))?;

        let existing = self
            .locator
            .latest(&self.output_dir, dataset, ext)
            .map_err(|e| CheckpointError::io(&self.output_dir, e))?;

        let (path, table, created) = match existing {
            Some(path) => {
                remove_stale_temp(&path);
                info!("📂 找到断点文件: {}", path.display());
                let table = self
                    .codec
                    .read_artifact(&path, &self.text_column)
                    .map_err(|e| CheckpointError::unreadable(&path, e))?;
                (path, table, false)
            }
            None => {
                let (path, table) = self.create_fresh(dataset)?;
                (path, table, true)
            }
        };

        let progress = table.progress();
        info!(
            "📊 进度: {}/{} ({:.1}%) - 剩余 {} 行",
            progress.completed,
            progress.total,
            progress.percent,
            progress.remaining()
        );

        Ok(Resolved {
            handle: ArtifactHandle::new(dataset, path),
            table,
            progress,
            created,
        })
    }

    /// 只读查询进度，没有断点文件时返回 None
    pub fn progress(&self, dataset: &str) -> Result<Option<Progress>, CheckpointError> {
        let dataset = dataset_stem(dataset);
        let Some(path) = self
            .locator
            .latest(&self.output_dir, dataset, self.codec.extension())
            .map_err(|e| CheckpointError::io(&self.output_dir, e))?
        else {
            return Ok(None);
        };
        let table = self
            .codec
            .read_artifact(&path, &self.text_column)
            .map_err(|e| CheckpointError::unreadable(&path, e))?;
        Ok(Some(table.progress()))
    }

    fn create_fresh(&self, dataset: &str) -> Result<(PathBuf, Table), CheckpointError> {
        let ext = self.codec.extension();
        let source = self.dataset_dir.join(format!("{}.{}", dataset, ext));
        let mut table = self
            .codec
            .read_source(&source, &self.text_column)
            .map_err(|e| CheckpointError::SourceUnreadable {
                path: source.clone(),
                reason: e.to_string(),
            })?;
        for row in &mut table.rows {
            row.label = None;
            row.justification = None;
        }

        let path = self
            .output_dir
            .join(self.locator.fresh_name(dataset, ext));
        let bytes = self
            .codec
            .encode_artifact(&table)
            .map_err(|e| CheckpointError::io(&path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
        write_atomic(&path, &bytes).map_err(|e| CheckpointError::io(&path, e))?;

        info!(
            "🆕 创建新断点文件: {} ({} 行)",
            path.display(),
            table.len()
        );
        Ok((path, table))
    }
}

/// `foo.csv` 和 `foo` 指同一个数据集
fn dataset_stem(dataset: &str) -> &str {
    Path::new(dataset)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(dataset)
}

fn remove_stale_temp(artifact: &Path) {
    let temp = temp_path_for(artifact);
    if temp.exists() {
        match std::fs::remove_file(&temp) {
            Ok(()) => warn!("🧹 删除上次中断留下的临时文件: {}", temp.display()),
            Err(e) => warn!("临时文件 {} 删除失败: {}", temp.display(), e),
        }
    }
}
