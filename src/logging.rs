//! # Logging モジュール
//!
//! エッジシミュレータのログ出力を初期化します。
//!
//! コンソールには人間向けの compact 形式、ファイルには日次ローテーションの
//! JSON 形式で出力します。ファイル書き込みは tracing-appender の
//! non-blocking ライターで行い、tick ループの処理速度に影響しません。
//!
//! ## 出力先
//!
//! - `Console`: コンソールのみ
//! - `File`: ファイルのみ（logs/edgesim.YYYY-MM-DD）
//! - `Both`: コンソールとファイルの両方
//!
//! `RUST_LOG` が設定されている場合は [`LogConfig::level`] より優先されます。

use std::str::FromStr;

use thiserror::Error;
use tracing::Level;
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// ログ初期化のエラー
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("無効な出力先: {0}. 利用可能: console, file, both")]
    InvalidOutput(String),

    #[error("ログディレクトリを作成できません {dir}: {source}")]
    Directory {
        dir: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ログシステムは既に初期化されています: {0}")]
    AlreadyInitialized(#[from] tracing_subscriber::util::TryInitError),
}

/// ログ出力先
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogOutput {
    /// コンソールのみ
    Console,
    /// ファイルのみ
    File,
    /// コンソールとファイルの両方
    Both,
}

impl LogOutput {
    pub fn writes_console(&self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    pub fn writes_file(&self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "console" | "stdout" => Ok(Self::Console),
            "file" => Ok(Self::File),
            "both" | "all" => Ok(Self::Both),
            other => Err(LoggingError::InvalidOutput(other.to_string())),
        }
    }
}

/// ログ設定
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub output: LogOutput,
    /// ログファイルのディレクトリ（File または Both の場合）
    pub log_dir: String,
    /// ログファイル名のプレフィックス
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            output: LogOutput::Both,
            log_dir: "logs".to_string(),
            file_prefix: "edgesim".to_string(),
        }
    }
}

/// ログシステムを初期化
///
/// # 引数
///
/// * `config` - ログ設定
///
/// # 戻り値
///
/// ファイル出力時は非同期ライターのガード。プロセス終了まで保持すると、
/// 終了時に未書き込みのログがフラッシュされます。
///
/// # 例
///
/// ```rust,no_run
/// use edgesim::logging::{LogConfig, LogOutput, init_logging};
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     output: LogOutput::Console,
///     ..LogConfig::default()
/// };
///
/// let _guard = init_logging(config).expect("ログ初期化に失敗");
/// ```
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_string()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = config.output.writes_console().then(|| {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
    });

    let (file_layer, guard) = if config.output.writes_file() {
        ensure_log_directory(&config.log_dir).map_err(|source| LoggingError::Directory {
            dir: config.log_dir.clone(),
            source,
        })?;
        let file_appender = rolling::daily(&config.log_dir, &config.file_prefix);
        let (writer, guard) = non_blocking(file_appender);
        let layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(false)
            .with_line_number(false)
            .json();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// ログレベルを文字列から解析
///
/// # 引数
///
/// * `level_str` - ログレベル文字列 ("trace", "debug", "info", "warn", "error")
///
/// # 戻り値
///
/// 解析されたログレベル、無効な場合はINFO
pub fn parse_log_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!("警告: 無効なログレベル '{}'. INFOを使用します", level_str);
            Level::INFO
        }
    }
}

/// `-v` の回数からログレベルを決定（0 回は `base` のまま）
pub fn level_for_verbosity(base: Level, verbose: u8) -> Level {
    match verbose {
        0 => base,
        1 => base.max(Level::DEBUG),
        _ => Level::TRACE,
    }
}

/// ログディレクトリを作成
pub fn ensure_log_directory(log_dir: &str) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(log_dir)
}
