//! 基準日からの経過日数を計算する。

use chrono::{DateTime, TimeZone};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// `reference` から `now` までに経過した 24 時間の個数を返す。
///
/// 暦日の差ではなく経過時間から求めるので、夏時間の切り替えをまたいでも
/// ずれない。`reference` が未来の場合は 0。
pub fn days_passed<Tz: TimeZone>(reference: &DateTime<Tz>, now: &DateTime<Tz>) -> u64 {
    let elapsed = now.clone().signed_duration_since(reference.clone());
    // num_seconds は 0 方向に丸めるが、負の値は 0 に切り上げるので問題ない
    let days = elapsed.num_seconds().div_euclid(SECONDS_PER_DAY);
    u64::try_from(days).unwrap_or(0)
}
