mod config;
mod days;
mod misskey;
mod note;
mod version;

use std::process::ExitCode;

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use crate::{
    config::Config,
    days::days_passed,
    misskey::{DEFAULT_TIMEOUT, MisskeyClient},
    note::format_note_text,
    version::{long_version, short_version},
};

/// 基準日からの経過日数を Misskey に投稿する。
#[derive(Parser)]
#[command(version = short_version(), long_version = long_version())]
struct Args {
    /// 投稿せず、本文をログに出力するだけにする
    #[arg(long)]
    dry_run: bool,

    /// ログの出力形式
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_format);

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{e:#}");
            error!(error = %message, "mkdays failed");
            ExitCode::FAILURE
        }
    }
}

/// ログを標準出力に向ける。プロセス開始時に 1 度だけ呼ぶ。
fn init_tracing(format: LogFormat) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stdout)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        );

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(args: &Args) -> Result<()> {
    info!(version = short_version(), "mkdays version");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        date = %config.reference_date_raw,
        timezone = %config.timezone,
        url = %config.api_url,
        "Configuration loaded"
    );

    let now = Utc::now().with_timezone(&config.timezone);
    let (days, text) = compose_note(&config, &now);

    if args.dry_run {
        info!(days, text = %text, "Dry run, skipping post");
        return Ok(());
    }

    let client = MisskeyClient::new(DEFAULT_TIMEOUT)
        .context("Failed to create Misskey client")?;
    client
        .post_note(&config.api_url, &config.token, &text)
        .await
        .context("Failed to post note")?;

    info!(
        days,
        date = %config.reference_date_raw,
        "Successfully posted to Misskey"
    );

    Ok(())
}

/// `now` 時点の経過日数と投稿本文を求める。
///
/// 基準日が未来の場合は警告を出し、0 日として扱う。
fn compose_note(config: &Config, now: &DateTime<Tz>) -> (u64, String) {
    if *now < config.reference_date {
        warn!(
            date = %config.reference_date_raw,
            "Specific date is in the future, posting 0 days"
        );
    }

    let days = days_passed(&config.reference_date, now);
    (days, format_note_text(&config.custom_text, days))
}
