//! 日志系统.
//!
//! 控制台层使用自定义格式, 配置了目录时再挂一个按天滚动的文件层.
//! 解码器内部通过 `log` 门面输出, 由订阅器桥接进 tracing.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Registry,
    fmt::{self, FormatEvent, FormatFields, format::Writer},
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

mod maintenance;

pub use maintenance::{CleanupReport, cleanup_logs};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// EnvFilter 语法, 例如 `info` 或 `info,tao_codec=debug`
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default = "default_true")]
    pub console: bool,
    /// 日志目录, 为空时不写文件
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_true")]
    pub compress_history: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_file_prefix() -> String {
    "tao-avc".to_string()
}

fn default_retention_days() -> i64 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            console: true,
            directory: None,
            file_prefix: default_file_prefix(),
            retention_days: default_retention_days(),
            compress_history: true,
        }
    }
}

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// 初始化全局订阅器, 进程内只能成功一次
pub fn init(config: &LoggingConfig) -> Result<()> {
    let mut report = CleanupReport::default();
    let file_layer = match config.directory.as_deref() {
        Some(directory) => {
            std::fs::create_dir_all(directory).with_context(|| format!("创建日志目录失败, path={}", directory))?;
            report = cleanup_logs(config)?;
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(&config.file_prefix)
                .filename_suffix("log")
                .build(directory)
                .with_context(|| format!("创建滚动日志失败, path={}", directory))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            LOG_GUARD.set(guard).ok();
            Some(
                fmt::Layer::default()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(LineFormatter { ansi: false })
                    .with_filter(build_filter(&config.level)?),
            )
        }
        None => None,
    };

    let console_layer = if config.console {
        Some(
            fmt::Layer::default()
                .with_writer(std::io::stdout)
                .with_ansi(true)
                .event_format(LineFormatter { ansi: true })
                .with_filter(build_filter(&config.level)?),
        )
    } else {
        None
    };

    Registry::default()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("日志系统已初始化")?;
    if report.removed + report.compressed > 0 {
        tracing::info!("历史日志清理完成, removed={}, compressed={}", report.removed, report.compressed);
    }
    Ok(())
}

fn build_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(level).with_context(|| format!("日志级别非法, level={}", level))
}

pub(crate) fn build_current_log_path(directory: &Path, prefix: &str, date: NaiveDate) -> PathBuf {
    directory.join(format!("{}.{}.log", prefix, date.format("%Y-%m-%d")))
}

/// 单行日志格式: `[月-日 时:分:秒.毫秒] LEVEL target > 字段`
///
/// 控制台开启 `ansi` 时给级别着色并附带源码位置.
struct LineFormatter {
    ansi: bool,
}

impl LineFormatter {
    fn level_color(level: tracing::Level) -> &'static str {
        match level {
            tracing::Level::ERROR => "\x1b[31m",
            tracing::Level::WARN => "\x1b[33m",
            tracing::Level::INFO => "\x1b[32m",
            _ => "\x1b[34m",
        }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormatter
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        write!(writer, "[{}] ", Local::now().format("%m-%d %H:%M:%S%.3f"))?;
        let level = meta.level().as_str();
        if self.ansi {
            write!(writer, "{}{:5}\x1b[0m ", Self::level_color(*meta.level()), level)?;
        } else {
            write!(writer, "{:5} ", level)?;
        }
        match (self.ansi, meta.file(), meta.line()) {
            (true, Some(file), Some(line)) => write!(writer, "{}:{} > ", file, line)?,
            // log 桥接的记录没有源码位置
            _ => write!(writer, "{} > ", meta.target())?,
        }
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
