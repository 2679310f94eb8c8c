use super::{LoggingConfig, build_current_log_path};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// 一次清理的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// 超出保留天数被删除的文件数
    pub removed: usize,
    /// 压缩为 `.gz` 的历史文件数
    pub compressed: usize,
}

/// 清理日志目录: 删除过期文件, 按需压缩今天以前的日志
pub fn cleanup_logs(config: &LoggingConfig) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    let Some(directory) = config.directory.as_deref().map(Path::new) else {
        return Ok(report);
    };
    if !directory.exists() {
        return Ok(report);
    }

    let today = Local::now().date_naive();
    let cutoff = today - ChronoDuration::days(config.retention_days);
    let current = build_current_log_path(directory, &config.file_prefix, today);

    for entry in fs::read_dir(directory).with_context(|| format!("读取日志目录失败, path={}", directory.display()))? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        let file_path = entry.path();

        let Some((date, compressed)) = parse_rotated_log_name(&file_name, &config.file_prefix) else {
            continue;
        };

        if date < cutoff {
            match fs::remove_file(&file_path) {
                Ok(()) => report.removed += 1,
                Err(err) => warn!("删除过期日志失败, path={}, err={}", file_path.display(), err),
            }
            continue;
        }

        if config.compress_history && !compressed && date < today && file_path != current {
            match compress_to_gz(&file_path) {
                Ok(true) => report.compressed += 1,
                Ok(false) => {}
                Err(err) => warn!("压缩历史日志失败, path={}, err={}", file_path.display(), err),
            }
        }
    }

    Ok(report)
}

/// 压缩后删除原文件, 目标已存在时跳过并返回 `false`
fn compress_to_gz(path: &Path) -> Result<bool> {
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    if gz_path.exists() {
        return Ok(false);
    }

    let mut input = File::open(path).with_context(|| format!("打开待压缩日志失败, path={}", path.display()))?;
    let output = File::create(&gz_path).with_context(|| format!("创建压缩日志失败, path={}", gz_path.display()))?;
    let mut encoder = GzEncoder::new(output, Compression::default());

    let mut buf = [0u8; 8 * 1024];
    loop {
        let read = input.read(&mut buf)?;
        if read == 0 {
            break;
        }
        encoder.write_all(&buf[..read])?;
    }

    encoder.finish()?;
    fs::remove_file(path).with_context(|| format!("删除已压缩日志失败, path={}", path.display()))?;
    Ok(true)
}

fn parse_rotated_log_name(file_name: &str, prefix: &str) -> Option<(NaiveDate, bool)> {
    let with_prefix = file_name.strip_prefix(prefix)?;
    let with_dot = with_prefix.strip_prefix('.')?;

    if let Some(date_part) = with_dot.strip_suffix(".log") {
        let date = parse_date(date_part)?;
        return Some((date, false));
    }

    if let Some(date_part) = with_dot.strip_suffix(".log.gz") {
        let date = parse_date(date_part)?;
        return Some((date, true));
    }

    None
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    if value.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}
