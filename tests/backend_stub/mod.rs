use std::io::Read as _;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body: Value,
}

#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
    pub delay: Option<Duration>,
}

#[allow(dead_code)]
impl StubResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            delay: None,
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn raw(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_owned(),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Production backend stand-in. Every request is recorded and answered by
/// `handler`.
pub struct BackendStub {
    pub base_url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[allow(dead_code)]
impl BackendStub {
    pub fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&StubRequest) -> StubResponse + Send + 'static,
    {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start backend stub server");
        let base_url = format!("http://{}", server.server_addr());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                let (path, query) = match url.split_once('?') {
                    Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
                    None => (url, None),
                };
                let mut raw = String::new();
                let _ = request.as_reader().read_to_string(&mut raw);
                let stub_request = StubRequest {
                    method: request.method().to_string(),
                    path,
                    query,
                    body: serde_json::from_str(&raw).unwrap_or(Value::Null),
                };
                recorded.lock().unwrap().push(stub_request.clone());

                let reply = handler(&stub_request);
                if let Some(delay) = reply.delay {
                    thread::sleep(delay);
                }
                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                        .expect("build header");
                let response = tiny_http::Response::from_string(reply.body)
                    .with_status_code(reply.status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }

    pub fn request_to(&self, path: &str) -> Option<StubRequest> {
        self.requests().into_iter().find(|r| r.path == path)
    }
}

impl Drop for BackendStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Answers every stage endpoint with a plausible success envelope.
#[allow(dead_code)]
pub fn happy_backend(req: &StubRequest) -> StubResponse {
    match req.path.as_str() {
        "/api/automations/extract-youtube" => StubResponse::ok(serde_json::json!({
            "success": true,
            "data": {
                "channel_id": "UCnight",
                "channel_name": "Night Stories",
                "total_videos": 5,
                "total_views": 60000,
                "total_likes": 1200,
                "videos": (0..5).map(|i| serde_json::json!({
                    "title": format!("Haunted lighthouse part {i}"),
                    "views": 12000,
                    "duration": "12:30",
                    "published_at": "3 days ago",
                })).collect::<Vec<_>>(),
            }
        })),
        "/api/automations/generate-titles" | "/api/automations/generate-titles-custom" => {
            let count = req.body["count"].as_u64().unwrap_or(5);
            let custom = req.body.get("custom_prompt").cloned();
            StubResponse::ok(serde_json::json!({
                "success": true,
                "data": {
                    "generated_titles": (0..count).map(|i| serde_json::json!({
                        "title": format!("The keeper never slept {i}"),
                        "score": (i as f64) + 5.0,
                        "reasoning": "curiosity gap",
                    })).collect::<Vec<_>>(),
                    "total_generated": count,
                    "ai_provider_used": "gemini",
                    "source_titles_count": req.body["source_titles"].as_array().map_or(0, Vec::len),
                    "custom_prompt_used": custom,
                }
            }))
        }
        "/api/premise/generate" => StubResponse::ok(serde_json::json!({
            "success": true,
            "premises": req.body["titles"].as_array().cloned().unwrap_or_default().into_iter().map(|t| serde_json::json!({
                "title": t,
                "premise": "A keeper hears knocking from below the waterline.",
            })).collect::<Vec<_>>(),
        })),
        "/api/scripts/generate" => {
            let chapters = req.body["number_of_chapters"].as_u64().unwrap_or(1);
            StubResponse::ok(serde_json::json!({
                "success": true,
                "scripts": {
                    "title": req.body["title"],
                    "chapters": (1..=chapters).map(|i| serde_json::json!({
                        "title": format!("Chapter {i}"),
                        "content": format!("The tide rose for the {i}th time."),
                    })).collect::<Vec<_>>(),
                }
            }))
        }
        "/api/workflow/logs" => StubResponse::ok(serde_json::json!({"success": true, "logs": []})),
        _ => StubResponse::json(404, serde_json::json!({"success": false, "error": "not found"})),
    }
}
