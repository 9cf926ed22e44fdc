//! 環境変数から実行設定を読み込む。

use std::env;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone as _};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::info;

use crate::note::build_api_url;

pub const SPECIFIC_DATE: &str = "SPECIFIC_DATE";
pub const MK_TOKEN: &str = "MK_TOKEN";
pub const MISSKEY_HOST: &str = "MISSKEY_HOST";
pub const CUSTOM_TEXT: &str = "CUSTOM_TEXT";
pub const TZ: &str = "TZ";

/// `TZ` が未設定のときに使うタイムゾーン。
pub const DEFAULT_TIMEZONE: &str = "Asia/Tokyo";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable not set")]
    MissingField(&'static str),
    #[error("Invalid SPECIFIC_DATE '{raw}': {reason}. Expected format: YYYY-MM-DD")]
    InvalidDate { raw: String, reason: String },
    #[error("Invalid timezone '{name}': {reason}")]
    InvalidTimezone { name: String, reason: String },
}

/// 1 回の実行で使う設定。構築後は変更しない。
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// 基準日の 0 時 (`timezone` 上)
    pub reference_date: DateTime<Tz>,
    /// `SPECIFIC_DATE` の生の値（ログ出力用）
    pub reference_date_raw: String,
    pub token: String,
    /// ノート作成 API の URL
    pub api_url: String,
    pub custom_text: String,
    pub timezone: Tz,
}

impl Config {
    /// プロセスの環境変数から設定を読み込む。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 任意のキー/値ルックアップから設定を読み込む。
    ///
    /// 空文字列の値は未設定として扱う。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let require = |key: &'static str| lookup(key).ok_or(ConfigError::MissingField(key));

        let reference_date_raw = require(SPECIFIC_DATE)?;
        let token = require(MK_TOKEN)?;
        let host = require(MISSKEY_HOST)?;

        let tz_name = lookup(TZ).unwrap_or_else(|| {
            info!(
                timezone = DEFAULT_TIMEZONE,
                "TZ environment variable not set, using default"
            );
            DEFAULT_TIMEZONE.to_string()
        });
        let timezone = parse_timezone(&tz_name)?;

        let custom_text = require(CUSTOM_TEXT)?;

        let date = parse_date(&reference_date_raw)?;
        let reference_date =
            start_of_day(date, timezone).ok_or_else(|| ConfigError::InvalidDate {
                raw: reference_date_raw.clone(),
                reason: format!("no valid local time on {date} in {timezone}"),
            })?;

        Ok(Self {
            reference_date,
            reference_date_raw,
            token,
            api_url: build_api_url(&host),
            custom_text,
            timezone,
        })
    }
}

fn parse_timezone(name: &str) -> Result<Tz, ConfigError> {
    name.parse::<Tz>()
        .map_err(|e| ConfigError::InvalidTimezone {
            name: name.to_string(),
            reason: e.to_string(),
        })
}

/// `YYYY-MM-DD` を厳密にパースする。
///
/// chrono の `%Y` は桁数や符号を許容するため、形を先に確認する。
fn parse_date(raw: &str) -> Result<NaiveDate, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidDate {
        raw: raw.to_string(),
        reason,
    };

    let bytes = raw.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return Err(invalid("does not match YYYY-MM-DD".to_string()));
    }

    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|e| invalid(e.to_string()))
}

/// 指定日の 0 時をタイムゾーン上の時刻として返す。
///
/// 0 時が重複する場合は早い方、夏時間の切り替えで 0 時が存在しない場合は
/// その日の最初に存在する時刻を使う。
fn start_of_day(date: NaiveDate, tz: Tz) -> Option<DateTime<Tz>> {
    let midnight = date.and_time(NaiveTime::MIN);
    if let Some(dt) = tz.from_local_datetime(&midnight).earliest() {
        return Some(dt);
    }

    // ギャップは最大でも数時間なので 15 分刻みで探す
    (1..=4 * 24)
        .map(|quarter| midnight + chrono::Duration::minutes(15 * quarter))
        .take_while(|local| local.date() == date)
        .find_map(|local| tz.from_local_datetime(&local).earliest())
}
