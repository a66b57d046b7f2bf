//! 持久化 - 业务能力层
//!
//! 只负责"把整张表原子地写回断点文件"
//!
//! 写临时文件 → 刷盘 → rename 覆盖，磁盘上永远是上一次或这一次提交的完整内容。
//! 同一句柄的提交经由句柄上的锁串行化。

use std::sync::Arc;
use tracing::debug;

use crate::error::PersistenceError;
use crate::infrastructure::{write_atomic, CsvCodec, TableCodec};
use crate::models::Table;
use crate::services::checkpoint_store::ArtifactHandle;

pub struct PersistenceWriter {
    codec: Arc<dyn TableCodec>,
}

impl Default for PersistenceWriter {
    fn default() -> Self {
        Self::new(Arc::new(CsvCodec))
    }
}

impl PersistenceWriter {
    pub fn new(codec: Arc<dyn TableCodec>) -> Self {
        Self { codec }
    }

    /// 提交整张表
    pub async fn commit(&self, handle: &ArtifactHandle, table: &Table) -> Result<(), PersistenceError> {
        let _guard = handle.commit_lock.lock().await;

        let bytes = self
            .codec
            .encode_artifact(table)
            .map_err(|e| PersistenceError::Encode {
                path: handle.path.clone(),
                reason: e.to_string(),
            })?;

        let path = handle.path.clone();
        let size = bytes.len();
        tokio::task::spawn_blocking(move || {
            write_atomic(&path, &bytes).map_err(|e| PersistenceError::io(&path, e))
        })
        .await
        .map_err(|e| PersistenceError::Join(e.to_string()))??;

        debug!("💾 已提交 {} 字节到 {}", size, handle.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::atomic_file::temp_path_for;
    use crate::models::{LabelItem, Row};
    use tempfile::TempDir;

    fn table(n: usize) -> Table {
        let rows = (0..n).map(|i| Row::unlabeled(i, vec![format!("t{}", i)])).collect();
        Table::new(vec!["text".to_string()], "text", rows).unwrap()
    }

    #[tokio::test]
    async fn test_commit_round_trips() {
        let dir = TempDir::new().unwrap();
        let handle = ArtifactHandle::new("d", dir.path().join("d_labeled_20250101_000000.csv"));
        let writer = PersistenceWriter::default();

        let mut t = table(3);
        t.apply(&[LabelItem::new(1, "positif", "baik")]);
        writer.commit(&handle, &t).await.unwrap();

        let read = CsvCodec.read_artifact(&handle.path, "text").unwrap();
        assert_eq!(read, t);
        assert!(!temp_path_for(&handle.path).exists());
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        let handle = ArtifactHandle::new("d", dir.path().join("d_labeled_20250101_000000.csv"));
        let writer = PersistenceWriter::default();

        let before = table(2);
        writer.commit(&handle, &before).await.unwrap();

        std::fs::create_dir(temp_path_for(&handle.path)).unwrap();
        let mut after = before.clone();
        after.apply(&[LabelItem::new(0, "positif", "x")]);
        let err = writer.commit(&handle, &after).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));

        let read = CsvCodec.read_artifact(&handle.path, "text").unwrap();
        assert_eq!(read, before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_are_serialized() {
        let dir = TempDir::new().unwrap();
        let handle = ArtifactHandle::new("d", dir.path().join("d_labeled_20250101_000000.csv"));
        let writer = Arc::new(PersistenceWriter::default());

        let mut tasks = Vec::new();
        for i in 0..8 {
            let writer = writer.clone();
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                let mut t = table(8);
                t.apply(&[LabelItem::new(i, "positif", format!("w{}", i))]);
                writer.commit(&handle, &t).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        let read = CsvCodec.read_artifact(&handle.path, "text").unwrap();
        assert_eq!(read.progress().completed, 1);
    }
}
