//! 投稿するノートの本文とリクエストを組み立てる。

use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use thiserror::Error;

/// ノート作成 API のパス。
pub const NOTES_CREATE_PATH: &str = "/api/notes/create";

#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Failed to serialize note payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to build request: {0}")]
    InvalidRequest(#[from] reqwest::Error),
}

/// `notes/create` に送る JSON ボディ。
#[derive(Debug, Serialize)]
pub struct NotePayload<'a> {
    /// API トークン
    #[serde(rename = "i")]
    pub token: &'a str,
    pub text: &'a str,
}

/// ホスト名からノート作成 API の URL を組み立てる。
///
/// ホストに `localhost` が含まれる場合は http、それ以外は https を使う。
pub fn build_api_url(host: &str) -> String {
    let scheme = if host.contains("localhost") {
        "http"
    } else {
        "https"
    };
    format!("{scheme}://{host}{NOTES_CREATE_PATH}")
}

/// 経過日数を装飾付きのノート本文に埋め込む。
pub fn format_note_text(custom_text: &str, days_passed: u64) -> String {
    format!("<center>{custom_text}\n\n$[jelly $[sparkle {days_passed}日]]</center>")
}

/// ノート作成の POST リクエストを組み立てる。送信はしない。
pub fn build_note_request(
    client: &reqwest::Client,
    api_url: &str,
    token: &str,
    text: &str,
) -> Result<reqwest::Request, RequestError> {
    let body = serde_json::to_vec(&NotePayload { token, text })?;

    let request = client
        .post(api_url)
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .build()?;

    Ok(request)
}
