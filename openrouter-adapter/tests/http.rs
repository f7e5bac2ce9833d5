use std::time::Duration;

use metanovel_openrouter::{OpenRouterConfig, OpenRouterTransport};
use metanovel_resilience::{Transport, TransportError, TransportErrorKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serves one canned HTTP response and hands back the raw request.
async fn serve_once(status_line: &str, extra_headers: &str, body: &str) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api/v1", listener.local_addr().unwrap());
    let response = format!(
        "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n{extra_headers}\r\n{body}",
        body.len()
    );
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        tx.send(request).ok();
    });

    (base_url, rx)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn transport(base_url: &str) -> OpenRouterTransport {
    OpenRouterTransport::new(
        OpenRouterConfig::new("sk-test")
            .with_model("test/model")
            .with_base_url(base_url),
    )
    .unwrap()
}

#[tokio::test]
async fn test_successful_completion() {
    let (base_url, request) = serve_once(
        "200 OK",
        "",
        r#"{"choices": [{"message": {"content": "{\"title\": \"Salt\"}"}, "finish_reason": "stop"}]}"#,
    )
    .await;

    let response = transport(&base_url)
        .send("Write the canon bible", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(response.body, r#"{"title": "Salt"}"#);
    let request = request.await.unwrap();
    assert!(request.starts_with("POST /api/v1/chat/completions"));
    assert!(request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
    assert!(request.contains("\"model\":\"test/model\""));
    assert!(request.contains("Write the canon bible"));
}

#[tokio::test]
async fn test_rate_limit_with_retry_after() {
    let (base_url, _request) = serve_once(
        "429 Too Many Requests",
        "retry-after: 7\r\n",
        r#"{"error": {"message": "Rate limit exceeded", "code": 429}}"#,
    )
    .await;

    let err = transport(&base_url)
        .send("prompt", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), TransportErrorKind::RateLimited);
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    assert!(err.to_string().contains("Rate limit exceeded"));
}

#[tokio::test]
async fn test_auth_failure_is_permanent() {
    let (base_url, _request) = serve_once(
        "401 Unauthorized",
        "",
        r#"{"error": {"message": "No auth credentials found", "code": 401}}"#,
    )
    .await;

    let err = transport(&base_url)
        .send("prompt", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Auth { status: 401, .. }));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (base_url, _request) = serve_once("502 Bad Gateway", "", "upstream down").await;

    let err = transport(&base_url)
        .send("prompt", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), TransportErrorKind::Server);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_connection_refused_is_network() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}/api/v1", listener.local_addr().unwrap());
    drop(listener);

    let err = transport(&base_url)
        .send("prompt", Duration::from_secs(5))
        .await
        .unwrap_err();

    assert!(err.is_transient());
}
