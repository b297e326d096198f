//! Exercises the HTTP backend against a local canned-response server.

use lantern_core::ResourceKind;
use lantern_resolver::{
    BackendConfig, EndpointConfig, HttpResolverBackend, IdDispatch, ResolverBackend,
    ResolverError, ResponseStep,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serves exactly one request with a canned response and reports the
/// request head back to the test.
async fn serve_once(
    status_line: &'static str,
    body: &'static str,
) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (head_tx, head_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let read = socket.read(&mut buf).await.unwrap();
        let _ = head_tx.send(String::from_utf8_lossy(&buf[..read]).into_owned());

        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
    });

    (format!("http://{addr}"), head_rx)
}

fn joined_config(base_url: String) -> BackendConfig {
    let mut config = BackendConfig::odysee();
    config.base_url = base_url;
    config
}

fn single_config(base_url: String) -> BackendConfig {
    let endpoint = EndpointConfig {
        path: "video".to_owned(),
        param: "video_id".to_owned(),
        dispatch: IdDispatch::Single,
        response_path: vec![
            ResponseStep::Field("data".to_owned()),
            ResponseStep::Field("locator".to_owned()),
        ],
    };
    BackendConfig {
        name: "local".to_owned(),
        base_url,
        sign_request: false,
        video: endpoint.clone(),
        channel: endpoint,
    }
}

#[tokio::test]
async fn joined_group_resolves_and_reports_negatives() {
    let body = r#"{"data":{"videos":{"abc":"lbry://show:1","zzz":null}}}"#;
    let (base_url, head_rx) = serve_once("200 OK", body).await;
    let backend = HttpResolverBackend::new(joined_config(base_url)).unwrap();

    let ids = vec!["abc".to_owned(), "zzz".to_owned()];
    let results = backend.resolve_group(ResourceKind::Video, &ids).await.unwrap();

    assert_eq!(
        results.get("abc"),
        Some(&Some("lbry://show:1".to_owned()))
    );
    assert_eq!(results.get("zzz"), Some(&None));

    let head = head_rx.await.unwrap();
    assert!(head.starts_with("GET /yt/resolve?video_ids=abc%2Czzz"), "{head}");
    assert!(head.contains("cache-control: no-cache"), "{head}");
}

#[tokio::test]
async fn joined_group_with_missing_ids_treats_them_as_negative() {
    let body = r#"{"data":{"videos":{"abc":"lbry://show:1"}}}"#;
    let (base_url, _head_rx) = serve_once("200 OK", body).await;
    let backend = HttpResolverBackend::new(joined_config(base_url)).unwrap();

    let ids = vec!["abc".to_owned(), "missing".to_owned()];
    let results = backend.resolve_group(ResourceKind::Video, &ids).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results.get("missing"), Some(&None));
}

#[tokio::test]
async fn joined_group_server_error_is_transient() {
    let (base_url, _head_rx) = serve_once("500 Internal Server Error", "{}").await;
    let backend = HttpResolverBackend::new(joined_config(base_url)).unwrap();

    let ids = vec!["abc".to_owned()];
    let err = backend
        .resolve_group(ResourceKind::Video, &ids)
        .await
        .unwrap_err();
    assert!(matches!(err, ResolverError::Status(500)));
}

#[tokio::test]
async fn single_resolves_locator_value() {
    let body = r#"{"data":{"locator":"lbry://show:1"}}"#;
    let (base_url, head_rx) = serve_once("200 OK", body).await;
    let backend = HttpResolverBackend::new(single_config(base_url)).unwrap();

    let result = backend.resolve_single(ResourceKind::Video, "abc").await.unwrap();
    assert_eq!(result.as_deref(), Some("lbry://show:1"));

    let head = head_rx.await.unwrap();
    assert!(head.starts_with("GET /video?video_id=abc"), "{head}");
}

#[tokio::test]
async fn single_not_found_is_a_definitive_negative() {
    let (base_url, _head_rx) = serve_once("404 Not Found", "{}").await;
    let backend = HttpResolverBackend::new(single_config(base_url)).unwrap();

    let result = backend.resolve_single(ResourceKind::Video, "zzz").await.unwrap();
    assert_eq!(result, None);
}

#[tokio::test]
async fn single_null_locator_is_a_definitive_negative() {
    let body = r#"{"data":{"locator":null}}"#;
    let (base_url, _head_rx) = serve_once("200 OK", body).await;
    let backend = HttpResolverBackend::new(single_config(base_url)).unwrap();

    let result = backend.resolve_single(ResourceKind::Video, "zzz").await.unwrap();
    assert_eq!(result, None);
}

#[tokio::test]
async fn single_server_error_is_transient() {
    let (base_url, _head_rx) = serve_once("503 Service Unavailable", "{}").await;
    let backend = HttpResolverBackend::new(single_config(base_url)).unwrap();

    let err = backend
        .resolve_single(ResourceKind::Video, "abc")
        .await
        .unwrap_err();
    assert!(matches!(err, ResolverError::Status(503)));
}
