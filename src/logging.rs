//! # Logging モジュール
//!
//! アリーナのイベントログを `tracing` の購読者として組み立てます。
//!
//! シミュレーションは `AGENT_SPAWNED` / `STATE_CHANGE` / `PROJECTILE_LAUNCHED` /
//! `KILL_CREDITED` / `POOL_EXHAUSTED` / `MATCH_OVER` などの大文字プレフィックスを
//! メッセージ先頭に付け、エージェント名・座標・プール名を構造化フィールドで出します。
//! ここではそれらを1つのレジストリに重ねた層で受けます。
//!
//! - コンソール層: 人が追いやすいコンパクト形式
//! - ファイル層: `logs/arenasim.YYYY-MM-DD` への JSON 行（非ブロッキング書き込み）
//!
//! どちらの層も `Option` で挿入するため、出力先の組み合わせは [`LogOutput`] だけで決まります。
//! フィルタは `RUST_LOG` が優先され、未設定なら [`LogConfig::filter`] を使います
//! （例: `info`, `arenasim::simulation=debug,arenasim::models::pool=trace`）。

use std::str::FromStr;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter};

/// ログ初期化のエラー
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("無効な出力先: {0} (console, file, both のいずれか)")]
    InvalidOutput(String),

    #[error("無効なフィルタ指定: {0}")]
    Filter(#[from] ParseError),

    #[error("ログディレクトリを作成できません: {0}")]
    Directory(#[from] std::io::Error),

    #[error("購読者は既に設定されています: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// ログ出力先
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

impl LogOutput {
    pub fn to_console(self) -> bool {
        matches!(self, LogOutput::Console | LogOutput::Both)
    }

    pub fn to_file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(LoggingError::InvalidOutput(s.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// `EnvFilter` のディレクティブ
    pub filter: String,
    pub output: LogOutput,
    /// ファイル層の出力ディレクトリ
    pub log_dir: String,
    /// 日次ローテーションするファイル名のプレフィックス
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            output: LogOutput::Console,
            log_dir: "logs".to_string(),
            file_prefix: "arenasim".to_string(),
        }
    }
}

impl LogConfig {
    fn env_filter(&self) -> Result<EnvFilter, ParseError> {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&self.filter))
    }
}

/// グローバル購読者を設定する
///
/// ファイル層を使う場合は非同期書き込みのガードを返します。ドロップすると
/// 未書き込みのイベントが捨てられるため、`main` が実行終了まで保持します。
///
/// ```no_run
/// use arenasim::logging::{init_logging, LogConfig, LogOutput};
///
/// let _guard = init_logging(&LogConfig {
///     filter: "arenasim=debug".to_string(),
///     output: LogOutput::Both,
///     ..LogConfig::default()
/// })?;
/// # Ok::<(), arenasim::logging::LoggingError>(())
/// ```
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = config.env_filter()?;

    let console = config
        .output
        .to_console()
        .then(|| fmt::layer().with_target(true).compact());

    let (file, guard) = if config.output.to_file() {
        std::fs::create_dir_all(&config.log_dir)?;
        let (writer, guard) = non_blocking(rolling::daily(&config.log_dir, &config.file_prefix));
        (Some(fmt::layer().json().with_writer(writer)), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_output_from_str() {
        assert_eq!("console".parse::<LogOutput>().unwrap(), LogOutput::Console);
        assert_eq!("FILE".parse::<LogOutput>().unwrap(), LogOutput::File);
        assert_eq!("both".parse::<LogOutput>().unwrap(), LogOutput::Both);
        assert!(matches!(
            "syslog".parse::<LogOutput>(),
            Err(LoggingError::InvalidOutput(name)) if name == "syslog"
        ));
    }

    #[test]
    fn test_output_selects_layers() {
        assert!(LogOutput::Console.to_console() && !LogOutput::Console.to_file());
        assert!(!LogOutput::File.to_console() && LogOutput::File.to_file());
        assert!(LogOutput::Both.to_console() && LogOutput::Both.to_file());
    }

    #[test]
    fn test_default_config_targets_arena_log() {
        let config = LogConfig::default();
        assert_eq!(config.file_prefix, "arenasim");
        assert_eq!(config.output, LogOutput::Console);
        assert_eq!(config.filter, "info");
    }

    #[test]
    fn test_filter_accepts_module_directives() {
        assert!(EnvFilter::try_new("arenasim::simulation=debug,arenasim::models::pool=trace").is_ok());
        assert!(EnvFilter::try_new("arenasim=verbose").is_err());
    }
}
