// SPDX-License-Identifier: Apache-2.0

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use hyper_rustls::{ConfigBuilderExt, HttpsConnector};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::{ClientConfig, RootCertStore};
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

use crate::collector::CollectorTransport;
use crate::collector::error::{Error, Result};
use crate::collector::messages::{CheckpointResponse, ProcessRecordRequest, StartPositionRequest};
use crate::crypto::init_crypto_provider;

pub const START_POSITION_PATH: &str = "/GetStartPosition";
pub const PROCESS_RECORD_PATH: &str = "/ProcessCdr";

const JSON_CONTENT_TYPE: &str = "application/json";

/// JSON over HTTP(S) transport to the collector.
#[derive(Clone)]
pub struct HttpCollector {
    client: HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>,
    start_position_uri: Uri,
    process_record_uri: Uri,
    request_timeout: Duration,
}

impl HttpCollector {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        init_crypto_provider().map_err(|e| Error::Tls(e.to_string()))?;

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_client_config())
            .https_or_http()
            .enable_http1()
            .build();

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .timer(TokioTimer::new())
            .build::<_, Full<Bytes>>(https);

        Ok(Self {
            client,
            start_position_uri: endpoint(base_url, START_POSITION_PATH)?,
            process_record_uri: endpoint(base_url, PROCESS_RECORD_PATH)?,
            request_timeout,
        })
    }

    async fn post<B: Serialize>(&self, uri: &Uri, body: &B) -> Result<CheckpointResponse> {
        let payload = serde_json::to_vec(body)?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri.clone())
            .header(CONTENT_TYPE, JSON_CONTENT_TYPE)
            .body(Full::new(Bytes::from(payload)))?;

        match tokio::time::timeout(self.request_timeout, self.exchange(req)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.request_timeout)),
        }
    }

    async fn exchange(&self, req: Request<Full<Bytes>>) -> Result<CheckpointResponse> {
        let resp = self.client.request(req).await?;
        let (head, body) = resp.into_parts();

        if !(200..=202).contains(&head.status.as_u16()) {
            return Err(Error::Status(head.status));
        }

        let data = body.collect().await?.to_bytes();
        Ok(serde_json::from_slice(&data)?)
    }
}

impl CollectorTransport for HttpCollector {
    async fn get_start_position(&self, request: &StartPositionRequest) -> Result<CheckpointResponse> {
        self.post(&self.start_position_uri, request).await
    }

    async fn process_record(&self, request: &ProcessRecordRequest) -> Result<CheckpointResponse> {
        self.post(&self.process_record_uri, request).await
    }
}

fn tls_client_config() -> ClientConfig {
    match ClientConfig::builder().with_native_roots() {
        Ok(builder) => builder.with_no_client_auth(),
        Err(e) => {
            warn!(error = %e, "No native root certificates, HTTPS collectors cannot be verified");
            ClientConfig::builder()
                .with_root_certificates(RootCertStore::empty())
                .with_no_client_auth()
        }
    }
}

fn endpoint(base_url: &str, path: &str) -> Result<Uri> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    let uri: Uri = url
        .parse()
        .map_err(|e| Error::InvalidUri(format!("{}: {}", url, e)))?;

    match uri.scheme_str() {
        Some("http") | Some("https") if uri.host().is_some() => Ok(uri),
        _ => Err(Error::InvalidUri(format!(
            "{}: expected an http or https URL",
            url
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::body::Incoming;
    use hyper::service::service_fn;
    use hyper::{Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use serde_json::{Value, json};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<(String, Option<String>, Value)>>>;

    /// Minimal collector answering every request with a fixed status and body.
    async fn spawn_collector(status: StatusCode, body: &'static str, delay: Duration) -> (String, Seen) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let seen_srv = seen.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = seen_srv.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req: Request<Incoming>| {
                        let seen = seen.clone();
                        async move {
                            let path = req.uri().path().to_string();
                            let content_type = req
                                .headers()
                                .get(CONTENT_TYPE)
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string);
                            let data = req.into_body().collect().await?.to_bytes();
                            let json: Value = serde_json::from_slice(&data).unwrap_or_default();
                            seen.lock().unwrap().push((path, content_type, json));

                            tokio::time::sleep(delay).await;
                            Ok::<_, hyper::Error>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from_static(body.as_bytes())))
                                    .unwrap(),
                            )
                        }
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });

        (format!("http://{}", addr), seen)
    }

    fn process_request() -> ProcessRecordRequest {
        ProcessRecordRequest {
            host: "host-a".to_string(),
            instance: "main".to_string(),
            filename: "cdr_001.cdr".to_string(),
            position: 8,
            record_length: 9,
            data: "{\"b\":2}".to_string(),
        }
    }

    #[test]
    fn test_endpoint_joining() {
        assert_eq!(
            endpoint("http://collector:8080/api/", PROCESS_RECORD_PATH)
                .unwrap()
                .to_string(),
            "http://collector:8080/api/ProcessCdr"
        );
        assert_eq!(
            endpoint("https://collector", START_POSITION_PATH)
                .unwrap()
                .to_string(),
            "https://collector/GetStartPosition"
        );
        assert!(matches!(
            endpoint("collector:8080", START_POSITION_PATH),
            Err(Error::InvalidUri(_))
        ));
        assert!(matches!(
            endpoint("ftp://collector", START_POSITION_PATH),
            Err(Error::InvalidUri(_))
        ));
    }

    #[tokio::test]
    async fn test_get_start_position() {
        let (url, seen) = spawn_collector(
            StatusCode::OK,
            r#"{"startFile":"cdr_004.cdr","startPosition":512}"#,
            Duration::ZERO,
        )
        .await;
        let collector = HttpCollector::new(&url, Duration::from_secs(5)).unwrap();

        let resp = collector
            .get_start_position(&StartPositionRequest {
                host: "host-a".to_string(),
                instance: "main".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(resp.start_file, "cdr_004.cdr");
        assert_eq!(resp.start_position, 512);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, START_POSITION_PATH);
        assert_eq!(seen[0].1.as_deref(), Some(JSON_CONTENT_TYPE));
        assert_eq!(seen[0].2, json!({"host": "host-a", "instance": "main"}));
    }

    #[tokio::test]
    async fn test_process_record_wire_format() {
        let (url, seen) = spawn_collector(
            StatusCode::ACCEPTED,
            r#"{"startFile":"cdr_001.cdr","startPosition":17}"#,
            Duration::ZERO,
        )
        .await;
        let collector = HttpCollector::new(&url, Duration::from_secs(5)).unwrap();

        let resp = collector.process_record(&process_request()).await.unwrap();
        assert_eq!(resp.start_position, 17);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, PROCESS_RECORD_PATH);
        assert_eq!(
            seen[0].2,
            json!({
                "host": "host-a",
                "instance": "main",
                "filename": "cdr_001.cdr",
                "position": 8,
                "recordLength": 9,
                "data": "{\"b\":2}",
            })
        );
    }

    #[tokio::test]
    async fn test_error_status_is_failure() {
        let (url, _) = spawn_collector(StatusCode::INTERNAL_SERVER_ERROR, "{}", Duration::ZERO).await;
        let collector = HttpCollector::new(&url, Duration::from_secs(5)).unwrap();

        let err = collector.process_record(&process_request()).await.unwrap_err();
        assert!(matches!(err, Error::Status(StatusCode::INTERNAL_SERVER_ERROR)));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_failure() {
        let (url, _) = spawn_collector(StatusCode::OK, "<html>busy</html>", Duration::ZERO).await;
        let collector = HttpCollector::new(&url, Duration::from_secs(5)).unwrap();

        let err = collector.process_record(&process_request()).await.unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[tokio::test]
    async fn test_slow_collector_times_out() {
        let (url, _) = spawn_collector(StatusCode::OK, "{}", Duration::from_secs(2)).await;
        let collector = HttpCollector::new(&url, Duration::from_millis(100)).unwrap();

        let err = collector.process_record(&process_request()).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let collector = HttpCollector::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();
        let err = collector.process_record(&process_request()).await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }
}
