//! 会话报告
//!
//! 每次运行结束写 `{log_dir}/sessions/session_{YYYYmmdd_HHMMSS}/summary.json`

use chrono::Local;
use std::io;
use std::path::{Path, PathBuf};

use crate::infrastructure::write_atomic;
use crate::orchestrator::RunSummary;

pub fn session_dir(log_dir: &Path) -> PathBuf {
    log_dir
        .join("sessions")
        .join(format!("session_{}", Local::now().format("%Y%m%d_%H%M%S")))
}

/// 写入运行总结，返回文件路径
pub fn write_session_report(log_dir: &Path, summary: &RunSummary) -> io::Result<PathBuf> {
    let path = session_dir(log_dir).join("summary.json");
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(&path, json.as_bytes())?;
    Ok(path)
}
