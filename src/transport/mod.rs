//! Pooled task client.
//!
//! Presents a synchronous `get`/`post` surface backed by a fixed pool of worker
//! threads draining a FIFO task queue. Each origin gets one client, weakly
//! cached so a dropped client's workers shut down and a later acquire for the
//! same origin starts fresh. One retry with a new connection on transport
//! failure; one retry with a fresh token on a 401.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;

use crate::pool::ConnectionPoolRegistry;

/// Seconds of slack subtracted from a cached token's expiry before it is
/// considered stale.
const TOKEN_EXPIRY_SKEW_SECONDS: i64 = 30;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub error: Option<String>,
}

impl HttpResponse {
    fn error(message: impl Into<String>) -> Self {
        HttpResponse {
            status: 0,
            body: String::new(),
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

enum TaskKind {
    Get,
    Post(String),
}

struct RequestTask {
    kind: TaskKind,
    endpoint: String,
    headers: Vec<(String, String)>,
    completion: mpsc::Sender<HttpResponse>,
}

struct TokenFetcher {
    token_endpoint_path: String,
    client_id: String,
    api_key: String,
}

struct CachedToken {
    token: String,
    expires_at: i64,
}

struct TokenState {
    cached: Option<CachedToken>,
    fetch_in_progress: bool,
}

/// Per-origin pooled task client. Construct via [`PooledTaskClientRegistry::acquire`].
pub struct PooledTaskClient {
    base_url: String,
    pool: Arc<ConnectionPoolRegistry>,
    queue: Arc<(Mutex<VecDeque<RequestTask>>, Condvar)>,
    stopping: Arc<Mutex<bool>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    token_state: Mutex<TokenState>,
    token_condvar: Condvar,
    token_fetcher: Option<TokenFetcher>,
}

impl PooledTaskClient {
    fn new(
        base_url: String,
        pool: Arc<ConnectionPoolRegistry>,
        num_worker_threads: usize,
        token_fetcher: Option<TokenFetcher>,
    ) -> Arc<Self> {
        let num_worker_threads = if num_worker_threads == 0 {
            let hc = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            2.max(hc * 2)
        } else {
            num_worker_threads
        };
        tracing::info!(workers = num_worker_threads, base_url = %base_url, "starting pooled task client");

        let client = Arc::new(PooledTaskClient {
            base_url,
            pool,
            queue: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
            stopping: Arc::new(Mutex::new(false)),
            workers: Mutex::new(Vec::new()),
            token_state: Mutex::new(TokenState {
                cached: None,
                fetch_in_progress: false,
            }),
            token_condvar: Condvar::new(),
            token_fetcher,
        });

        let mut workers = Vec::with_capacity(num_worker_threads);
        for _ in 0..num_worker_threads {
            let worker_client = Arc::clone(&client);
            workers.push(std::thread::spawn(move || worker_client.worker_loop()));
        }
        *client.workers.lock().unwrap() = workers;
        client
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let task = {
                let (mutex, condvar) = &*self.queue;
                let mut guard = mutex.lock().unwrap();
                loop {
                    if *self.stopping.lock().unwrap() && guard.is_empty() {
                        return;
                    }
                    if let Some(task) = guard.pop_front() {
                        break task;
                    }
                    guard = condvar.wait(guard).unwrap();
                }
            };
            self.run_task(task);
        }
    }

    fn run_task(&self, task: RequestTask) {
        let Some(conn) = self.pool.borrow(&self.base_url) else {
            let _ = task.completion.send(HttpResponse::error("pool borrow timeout"));
            return;
        };
        match self.perform_once(&conn, &task) {
            Ok(response) => {
                self.pool.return_connection(&self.base_url, conn);
                let _ = task.completion.send(response);
                return;
            }
            Err(_) => {
                self.pool.discard(&self.base_url, conn);
            }
        }

        let Some(conn) = self.pool.borrow(&self.base_url) else {
            let _ = task
                .completion
                .send(HttpResponse::error("pool borrow timeout after retry"));
            return;
        };
        match self.perform_once(&conn, &task) {
            Ok(response) => {
                self.pool.return_connection(&self.base_url, conn);
                let _ = task.completion.send(response);
            }
            Err(e) => {
                self.pool.discard(&self.base_url, conn);
                let _ = task.completion.send(HttpResponse::error(e));
            }
        }
    }

    fn perform_once(&self, conn: &crate::pool::PooledConnection, task: &RequestTask) -> Result<HttpResponse, String> {
        let url = format!("{}{}", self.base_url, task.endpoint);
        let mut builder = match &task.kind {
            TaskKind::Get => conn.client.get(&url),
            TaskKind::Post(body) => conn
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .body(body.clone()),
        };
        for (k, v) in &task.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        let response = builder.send().map_err(|e| format!("HTTP exception: {e}"))?;
        let status = response.status().as_u16();
        let body = response.text().map_err(|e| format!("HTTP exception: {e}"))?;
        Ok(HttpResponse {
            status,
            body,
            error: None,
        })
    }

    fn enqueue(&self, kind: TaskKind, endpoint: &str, headers: Vec<(String, String)>) -> HttpResponse {
        if *self.stopping.lock().unwrap() {
            return HttpResponse::error("client shutting down");
        }
        let (tx, rx) = mpsc::channel();
        let task = RequestTask {
            kind,
            endpoint: endpoint.to_string(),
            headers,
            completion: tx,
        };
        {
            let (mutex, condvar) = &*self.queue;
            mutex.lock().unwrap().push_back(task);
            condvar.notify_one();
        }
        rx.recv()
            .unwrap_or_else(|_| HttpResponse::error("client shutting down"))
    }

    fn default_headers(&self, auth_required: bool) -> Result<Vec<(String, String)>, HttpResponse> {
        let mut headers = vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("User-Agent".to_string(), "dbps-pooled-client/0.1".to_string()),
        ];
        if auth_required {
            match self.ensure_valid_token() {
                Ok(token) => headers.push(("Authorization".to_string(), format!("Bearer {token}"))),
                Err(e) => return Err(HttpResponse::error(e)),
            }
        }
        Ok(headers)
    }

    /// Synchronous GET; when `auth_required`, retries once after invalidating
    /// the cached token if the server responds 401.
    pub fn get(&self, endpoint: &str, auth_required: bool) -> HttpResponse {
        let headers = match self.default_headers(auth_required) {
            Ok(h) => h,
            Err(e) => return e,
        };
        let response = self.enqueue(TaskKind::Get, endpoint, headers);
        if auth_required && response.is_unauthorized() {
            self.invalidate_cached_token();
            let headers = match self.default_headers(true) {
                Ok(h) => h,
                Err(e) => return e,
            };
            return self.enqueue(TaskKind::Get, endpoint, headers);
        }
        response
    }

    /// Synchronous POST; same 401-retry semantics as [`get`](Self::get).
    pub fn post(&self, endpoint: &str, body: String, auth_required: bool) -> HttpResponse {
        let headers = match self.default_headers(auth_required) {
            Ok(h) => h,
            Err(e) => return e,
        };
        let response = self.enqueue(TaskKind::Post(body.clone()), endpoint, headers);
        if auth_required && response.is_unauthorized() {
            self.invalidate_cached_token();
            let headers = match self.default_headers(true) {
                Ok(h) => h,
                Err(e) => return e,
            };
            return self.enqueue(TaskKind::Post(body), endpoint, headers);
        }
        response
    }

    fn ensure_valid_token(&self) -> Result<String, String> {
        let fetcher = self
            .token_fetcher
            .as_ref()
            .ok_or_else(|| "no token fetcher configured".to_string())?;
        let mut state = self.token_state.lock().unwrap();
        loop {
            let now = chrono::Utc::now().timestamp();
            if let Some(cached) = &state.cached {
                if cached.expires_at > now + TOKEN_EXPIRY_SKEW_SECONDS {
                    return Ok(cached.token.clone());
                }
            }
            if state.fetch_in_progress {
                state = self.token_condvar.wait(state).unwrap();
                continue;
            }
            state.fetch_in_progress = true;
            drop(state);

            let fetch_result = self.fetch_token(fetcher);

            state = self.token_state.lock().unwrap();
            state.fetch_in_progress = false;
            match fetch_result {
                Ok(cached) => {
                    let token = cached.token.clone();
                    state.cached = Some(cached);
                    self.token_condvar.notify_all();
                    return Ok(token);
                }
                Err(e) => {
                    self.token_condvar.notify_all();
                    return Err(e);
                }
            }
        }
    }

    fn fetch_token(&self, fetcher: &TokenFetcher) -> Result<CachedToken, String> {
        let body = serde_json::json!({
            "client_id": fetcher.client_id,
            "api_key": fetcher.api_key,
        })
        .to_string();
        let response = self.enqueue(TaskKind::Post(body), &fetcher.token_endpoint_path, vec![]);
        if !response.is_success() {
            return Err(response
                .error
                .unwrap_or_else(|| format!("token fetch failed with status {}", response.status)));
        }
        let parsed: serde_json::Value =
            serde_json::from_str(&response.body).map_err(|e| format!("malformed token response: {e}"))?;
        let token = parsed
            .get("token")
            .and_then(|v| v.as_str())
            .ok_or("token response missing token field")?
            .to_string();
        let expires_in = parsed.get("expires_in").and_then(|v| v.as_i64()).unwrap_or(0);
        Ok(CachedToken {
            token,
            expires_at: chrono::Utc::now().timestamp() + expires_in,
        })
    }

    fn invalidate_cached_token(&self) {
        let mut state = self.token_state.lock().unwrap();
        state.cached = None;
    }
}

impl Drop for PooledTaskClient {
    fn drop(&mut self) {
        *self.stopping.lock().unwrap() = true;
        self.queue.1.notify_all();
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for w in workers {
            let _ = w.join();
        }
        let mut guard = self.queue.0.lock().unwrap();
        while let Some(task) = guard.pop_front() {
            let _ = task.completion.send(HttpResponse::error("client shutting down"));
        }
    }
}

/// Weak per-origin singleton registry for [`PooledTaskClient`] instances.
pub struct PooledTaskClientRegistry {
    instances: Mutex<HashMap<String, Weak<PooledTaskClient>>>,
    pool: Arc<ConnectionPoolRegistry>,
}

impl PooledTaskClientRegistry {
    pub fn new(pool: Arc<ConnectionPoolRegistry>) -> Self {
        PooledTaskClientRegistry {
            instances: Mutex::new(HashMap::new()),
            pool,
        }
    }

    /// Returns the cached client for `base_url`, or constructs a fresh one.
    pub fn acquire(
        &self,
        base_url: &str,
        num_worker_threads: usize,
        credentials: Option<(String, String, String)>,
    ) -> Arc<PooledTaskClient> {
        let mut instances = self.instances.lock().unwrap();
        if let Some(existing) = instances.get(base_url).and_then(Weak::upgrade) {
            return existing;
        }
        let token_fetcher = credentials.map(|(endpoint, client_id, api_key)| TokenFetcher {
            token_endpoint_path: endpoint,
            client_id,
            api_key,
        });
        let client = PooledTaskClient::new(base_url.to_string(), Arc::clone(&self.pool), num_worker_threads, token_fetcher);
        instances.insert(base_url.to_string(), Arc::downgrade(&client));
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_success_classification() {
        let ok = HttpResponse {
            status: 200,
            body: String::new(),
            error: None,
        };
        assert!(ok.is_success());
        let unauthorized = HttpResponse {
            status: 401,
            body: String::new(),
            error: None,
        };
        assert!(unauthorized.is_unauthorized());
        assert!(!unauthorized.is_success());
    }

    #[test]
    fn registry_reuses_live_instance() {
        let pool = Arc::new(ConnectionPoolRegistry::new());
        let registry = PooledTaskClientRegistry::new(pool);
        let a = registry.acquire("http://example.invalid", 2, None);
        let b = registry.acquire("http://example.invalid", 2, None);
        assert!(Arc::ptr_eq(&a, &b));
    }
}
