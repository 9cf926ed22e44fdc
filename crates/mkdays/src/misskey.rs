//! Misskey API へノートを投稿する。

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;
use tracing::{info, warn};

use crate::note::{RequestError, build_note_request};
use crate::version::user_agent;

/// API 呼び出しのタイムアウト。
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum PostError {
    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("Failed to send request to Misskey API ({url}): {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Misskey API returned non-successful status: {status}. Body: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Misskey API クライアント。
pub struct MisskeyClient {
    http_client: reqwest::Client,
}

impl MisskeyClient {
    /// 新しい MisskeyClient を作成する。
    pub fn new(timeout: Duration) -> Result<Self, PostError> {
        let http_client = client_builder(timeout).build().map_err(PostError::Client)?;

        Ok(Self { http_client })
    }

    /// ノートを 1 件投稿し、成功時のステータスを返す。
    ///
    /// 2xx 以外のステータスは [`PostError::Rejected`] になる。再送はしない。
    pub async fn post_note(
        &self,
        api_url: &str,
        token: &str,
        text: &str,
    ) -> Result<StatusCode, PostError> {
        let request = build_note_request(&self.http_client, api_url, token, text)?;

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(|source| PostError::Transport {
                url: api_url.to_string(),
                source,
            })?;

        let status = response.status();

        // ボディが読めなくてもステータスで判定する
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, "Failed to read response body");
                String::new()
            }
        };

        info!(status = %status, "API response status");
        if !body.is_empty() {
            info!(body = %body, "API response body");
        }

        if !status.is_success() {
            return Err(PostError::Rejected { status, body });
        }

        Ok(status)
    }
}

fn client_builder(timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::HeaderMap, routing::post};
    use reqwest::header::USER_AGENT;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// 本番と同じ設定で、環境のプロキシ設定だけを無視するクライアント。
    fn local_client() -> MisskeyClient {
        let http_client = client_builder(DEFAULT_TIMEOUT).no_proxy().build().unwrap();
        MisskeyClient { http_client }
    }

    /// 受信したリクエストの User-Agent とボディ。
    struct Received {
        user_agent: String,
        body: Value,
    }

    /// テスト用の API サーバーを起動し、エンドポイント URL と受信内容のチャンネルを返す。
    async fn spawn_server(
        status: StatusCode,
        reply: &'static str,
    ) -> (String, mpsc::Receiver<Received>) {
        let (tx, rx) = mpsc::channel(1);
        let app = Router::new().route(
            "/api/notes/create",
            post(move |headers: HeaderMap, Json(body): Json<Value>| {
                let tx = tx.clone();
                async move {
                    let user_agent = headers
                        .get(USER_AGENT)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    tx.send(Received { user_agent, body }).await.ok();
                    (status, reply)
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/api/notes/create"), rx)
    }

    /// リクエストを読み切ってから `response` をそのまま書き込み、接続を閉じるサーバー。
    async fn spawn_raw_server(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{addr}/api/notes/create")
    }

    /// ヘッダーと Content-Length 分のボディを読む。
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);

            let text = String::from_utf8_lossy(&buf);
            let Some(header_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let content_length = text[..header_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                return;
            }
        }
    }

    #[test]
    fn new_client() {
        assert!(MisskeyClient::new(DEFAULT_TIMEOUT).is_ok());
    }

    #[tokio::test]
    async fn post_note_success() {
        let (url, mut rx) = spawn_server(StatusCode::OK, r#"{"createdNote":{}}"#).await;
        let client = local_client();

        let status = client.post_note(&url, "token", "本文").await.unwrap();
        assert_eq!(status, StatusCode::OK);

        let received = rx.recv().await.unwrap();
        assert_eq!(
            received.body,
            serde_json::json!({ "i": "token", "text": "本文" })
        );
        assert_eq!(received.user_agent, user_agent());
    }

    #[tokio::test]
    async fn post_note_rejected() {
        let (url, _rx) = spawn_server(StatusCode::UNAUTHORIZED, "credential required").await;
        let client = local_client();

        let err = client.post_note(&url, "bad", "text").await.unwrap_err();
        match err {
            PostError::Rejected { status, body } => {
                assert_eq!(status, StatusCode::UNAUTHORIZED);
                assert_eq!(body, "credential required");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn post_note_connection_refused() {
        // 一度バインドして閉じたポートには誰もいない
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = local_client();
        let url = format!("http://{addr}/api/notes/create");
        let err = client.post_note(&url, "token", "text").await.unwrap_err();
        assert!(matches!(err, PostError::Transport { url: u, .. } if u == url));
    }

    #[tokio::test]
    async fn post_note_truncated_body_still_succeeds() {
        // Content-Length より短いボディで切断する
        let url = spawn_raw_server("HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nabc").await;
        let client = local_client();

        let status = client.post_note(&url, "token", "text").await.unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn post_note_truncated_body_rejected_by_status() {
        let url = spawn_raw_server(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 100\r\n\r\nabc",
        )
        .await;
        let client = local_client();

        let err = client.post_note(&url, "token", "text").await.unwrap_err();
        match err {
            PostError::Rejected { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
