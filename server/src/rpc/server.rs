//! Request dispatch and the serve loop

use serde::Serialize;
use serde_json::{json, Value};
use std::io;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::{mpsc, Semaphore};

use super::methods::{
    parse_params, Method, MultiSearchParams, RecordIdParams, RecordUpdateParams, SuggestParams,
    TranslateParams,
};
use super::protocol::{parse_request, JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use super::transport::{InputLine, LineReader, LineWriter, DEFAULT_MAX_LINE_BYTES};
use crate::bootstrap::{Bootstrap, BootstrapState};
use crate::error::{ServiceError, ServiceResult};
use crate::query::{IngestRequest, QueryService, SearchRequest};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bounds applied by [`serve`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServeLimits {
    /// Longest accepted input line
    pub max_line_bytes: usize,
    /// Requests handled at once; reading pauses while all are busy
    pub max_in_flight: usize,
}

impl Default for ServeLimits {
    fn default() -> Self {
        Self {
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            max_in_flight: 64,
        }
    }
}

/// Shared state behind the RPC surface. The query service is attached once
/// bootstrap has finished.
pub struct ServiceHandle {
    bootstrap: Arc<Bootstrap>,
    query: OnceLock<Arc<QueryService>>,
    started: Instant,
}

impl ServiceHandle {
    pub fn new(bootstrap: Arc<Bootstrap>) -> Self {
        Self {
            bootstrap,
            query: OnceLock::new(),
            started: Instant::now(),
        }
    }

    /// Attach the query service. Returns false if one was already attached.
    pub fn set_ready(&self, service: Arc<QueryService>) -> bool {
        self.query.set(service).is_ok()
    }

    /// The query service, or why it is not available yet
    pub fn query(&self) -> ServiceResult<Arc<QueryService>> {
        if let Some(service) = self.query.get() {
            return Ok(service.clone());
        }
        match self.bootstrap.state() {
            BootstrapState::Failed { reason } => Err(ServiceError::BootstrapFailed(reason)),
            state => Err(ServiceError::NotReady(format!(
                "bootstrap in progress ({})",
                state_name(&state)
            ))),
        }
    }

    /// Answer one request
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        tracing::debug!("Handling request: {}", request.method);
        let result = match Method::parse(&request.method) {
            Some(method) => self.call(method, request.params).await,
            None => Err(JsonRpcError::method_not_found(&request.method)),
        };
        match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(error) => {
                tracing::debug!("{} failed: {}", request.method, error.message);
                JsonRpcResponse::error(request.id, error)
            }
        }
    }

    async fn call(&self, method: Method, params: Option<Value>) -> Result<Value, JsonRpcError> {
        match method {
            Method::Health => Ok(self.health()),
            Method::Capabilities => self.capabilities(),
            Method::StoreCheck => {
                self.blocking(|service| {
                    let store = service.store();
                    store.probe()?;
                    Ok(json!({ "reachable": true, "stats": store.stats() }))
                })
                .await
            }
            Method::Search => {
                let request: SearchRequest = parse_params(params)?;
                self.blocking(move |service| service.search(&request)).await
            }
            Method::MultiSearch => {
                let params: MultiSearchParams = parse_params(params)?;
                self.blocking(move |service| service.multi_search(&params.queries))
                    .await
            }
            Method::RecordPut => {
                let request: IngestRequest = parse_params(params)?;
                self.blocking(move |service| service.ingest(request)).await
            }
            Method::RecordUpdate => {
                let params: RecordUpdateParams = parse_params(params)?;
                self.blocking(move |service| {
                    service.update_text(&params.id, &params.text, params.language.as_deref())
                })
                .await
            }
            Method::RecordGet => {
                let params: RecordIdParams = parse_params(params)?;
                self.blocking(move |service| service.get(&params.id)).await
            }
            Method::RecordDelete => {
                let params: RecordIdParams = parse_params(params)?;
                self.blocking(move |service| {
                    let deleted = service.delete(&params.id)?;
                    Ok(json!({ "id": params.id, "deleted": deleted }))
                })
                .await
            }
            Method::Suggest => {
                let params: SuggestParams = parse_params(params)?;
                self.blocking(move |service| {
                    let suggestions = service.suggest(
                        &params.text,
                        params.language.as_deref(),
                        params.limit,
                    )?;
                    Ok(json!({ "suggestions": suggestions }))
                })
                .await
            }
            Method::Translate => {
                let params: TranslateParams = parse_params(params)?;
                self.blocking(move |service| {
                    let text = service.translate(&params.text, &params.from, &params.to)?;
                    Ok(json!({ "text": text, "from": params.from, "to": params.to }))
                })
                .await
            }
        }
    }

    fn health(&self) -> Value {
        let state = self.bootstrap.state();
        let status = match (&state, self.query.get()) {
            (BootstrapState::Failed { .. }, _) => "failed",
            (_, Some(_)) => "ok",
            _ => "starting",
        };
        json!({
            "status": status,
            "bootstrap": state,
            "version": SERVER_VERSION,
            "uptime_secs": self.started.elapsed().as_secs(),
        })
    }

    fn capabilities(&self) -> Result<Value, JsonRpcError> {
        let mut value = json!({ "required": self.bootstrap.descriptor() });
        if let Some(service) = self.query.get() {
            value["store"] = serde_json::to_value(service.store().capabilities())
                .map_err(|e| JsonRpcError::internal_error(e.to_string()))?;
        }
        Ok(value)
    }

    /// Run a query service call off the async runtime
    async fn blocking<T, F>(&self, f: F) -> Result<Value, JsonRpcError>
    where
        T: Serialize + Send + 'static,
        F: FnOnce(&QueryService) -> ServiceResult<T> + Send + 'static,
    {
        let service = self.query()?;
        let result = tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|e| JsonRpcError::internal_error(format!("Request task failed: {}", e)))?;
        let value = result?;
        serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
    }
}

fn state_name(state: &BootstrapState) -> &'static str {
    match state {
        BootstrapState::NotStarted => "not_started",
        BootstrapState::WaitingForStore { .. } => "waiting_for_store",
        BootstrapState::InstallingCapabilities { .. } => "installing_capabilities",
        BootstrapState::Ready => "ready",
        BootstrapState::Failed { .. } => "failed",
    }
}

/// Serve requests until the reader reaches EOF.
///
/// Each request runs in its own task, at most `limits.max_in_flight` at a
/// time; a single writer task serializes the responses. Lines that are not
/// UTF-8 or exceed `limits.max_line_bytes` get a parse error. Returns once
/// every in-flight request has been answered.
pub async fn serve<R, W>(
    handle: Arc<ServiceHandle>,
    reader: R,
    writer: W,
    limits: ServeLimits,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
    let writer_task = tokio::spawn(async move {
        let mut writer = LineWriter::new(writer);
        while let Some(response) = rx.recv().await {
            writer.write_response(&response).await?;
        }
        Ok::<(), io::Error>(())
    });

    tracing::info!("JSON-RPC server listening on stdio");
    let permits = Arc::new(Semaphore::new(limits.max_in_flight.max(1)));
    let mut reader = LineReader::with_limit(reader, limits.max_line_bytes);
    while let Some(line) = reader.next_line().await? {
        let parsed = match line {
            InputLine::Text(text) => parse_request(&text),
            InputLine::Rejected(reason) => Err(JsonRpcError::parse_error(format!(
                "Parse error: {}",
                reason
            ))),
        };
        let request = match parsed {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!("Rejected input line: {}", error.message);
                let _ = tx.send(JsonRpcResponse::error(None, error));
                continue;
            }
        };

        // The semaphore is never closed
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let handle = handle.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let notification = request.is_notification();
            let response = handle.handle(request).await;
            if !notification {
                let _ = tx.send(response);
            }
            drop(permit);
        });
    }

    tracing::info!("Client disconnected");
    drop(tx);
    writer_task
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapPolicy;
    use crate::provision::ServiceProvisioner;
    use crate::query::QueryConfig;
    use crate::suggest::Vocabulary;
    use crate::translate::{LanguagePair, PhraseModel, TranslationAdapter};
    use geosearch_store::{Capability, StoreConfig, SystemClock, VectorEngine};
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::sync::watch;

    const DIM: usize = 32;

    fn bootstrap_for(provisioner: Arc<ServiceProvisioner>) -> Arc<Bootstrap> {
        Arc::new(Bootstrap::new(
            provisioner.clone(),
            provisioner.capability_names(),
            BootstrapPolicy::new(Duration::from_millis(5), 2),
            Arc::new(SystemClock),
        ))
    }

    fn provisioner(dir: &TempDir) -> Arc<ServiceProvisioner> {
        Arc::new(ServiceProvisioner::new(
            dir.path().join("db"),
            StoreConfig::new(DIM),
            vec![Capability::geo_grid(), Capability::hnsw()],
            None,
        ))
    }

    async fn ready_handle(dir: &TempDir) -> Arc<ServiceHandle> {
        let provisioner = provisioner(dir);
        let bootstrap = bootstrap_for(provisioner.clone());
        let (_shutdown, rx) = watch::channel(false);
        bootstrap.run(rx).await.unwrap();

        let adapter = TranslationAdapter::with_models(
            vec![
                PhraseModel::from_entries(
                    LanguagePair::parse("en-sv").unwrap(),
                    vec![("hello", "hej")],
                    Vec::<(&str, &str)>::new(),
                ),
                PhraseModel::from_entries(
                    LanguagePair::parse("sv-en").unwrap(),
                    vec![("hej", "hello")],
                    Vec::<(&str, &str)>::new(),
                ),
            ],
            16,
        );
        let service = QueryService::new(
            provisioner.store().unwrap(),
            Arc::new(VectorEngine::hashing(DIM).unwrap()),
            Arc::new(adapter),
            Arc::new(Vocabulary::new(["Hej"]).with_general_terms(["hejsan"])),
            QueryConfig::default(),
        );
        let handle = Arc::new(ServiceHandle::new(bootstrap));
        assert!(handle.set_ready(Arc::new(service)));
        handle
    }

    fn request(id: u64, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(id)),
            method: method.to_string(),
            params: Some(params),
        }
    }

    async fn serve_bytes(handle: Arc<ServiceHandle>, input: &[u8], limits: ServeLimits) -> Vec<Value> {
        let (out_w, mut out_r) = tokio::io::duplex(1 << 16);
        serve(handle, input, out_w, limits).await.unwrap();

        let mut output = String::new();
        out_r.read_to_string(&mut output).await.unwrap();
        output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn error_code(response: &JsonRpcResponse) -> i32 {
        response.error.as_ref().map(|e| e.code).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_not_ready_until_attached() {
        let dir = TempDir::new().unwrap();
        let handle = ServiceHandle::new(bootstrap_for(provisioner(&dir)));

        let response = handle.handle(request(1, "search", json!({"text": "hej"}))).await;
        assert_eq!(error_code(&response), -32005);
        let data = response.error.unwrap().data.unwrap();
        assert_eq!(data["kind"], "not_ready");

        let health = handle.handle(request(2, "health", json!({}))).await;
        let result = health.result.unwrap();
        assert_eq!(result["status"], "starting");
        assert_eq!(result["bootstrap"]["state"], "not_started");

        let caps = handle.handle(request(3, "capabilities", json!({}))).await;
        assert_eq!(caps.result.unwrap()["required"]["capabilities"][0]["name"], "geo_grid");
    }

    #[tokio::test]
    async fn test_record_lifecycle_and_search() {
        let dir = TempDir::new().unwrap();
        let handle = ready_handle(&dir).await;

        let put = handle
            .handle(request(
                1,
                "record.put",
                json!({"id": "1", "text": "hej", "language": "sv",
                       "position": {"lat": 59.33, "lon": 18.06}}),
            ))
            .await;
        assert_eq!(put.result.unwrap()["id"], "1");

        let search = handle
            .handle(request(
                2,
                "search",
                json!({"text": "hello", "language": "en",
                       "origin": {"lat": 59.331, "lon": 18.06}, "radius_m": 5000}),
            ))
            .await;
        let result = search.result.unwrap();
        assert_eq!(result["normalized_query"], "hej");
        assert_eq!(result["results"][0]["record"]["id"], "1");
        let distance = result["results"][0]["distance_m"].as_f64().unwrap();
        assert!((distance - 111.2).abs() < 1.0);

        let update = handle
            .handle(request(3, "record.update", json!({"id": "1", "text": "hej hej"})))
            .await;
        assert_eq!(update.result.unwrap()["text"], "hej hej");

        let delete = handle.handle(request(4, "record.delete", json!({"id": "1"}))).await;
        assert_eq!(delete.result.unwrap()["deleted"], true);

        let get = handle.handle(request(5, "record.get", json!({"id": "1"}))).await;
        assert_eq!(error_code(&get), -32006);
    }

    #[tokio::test]
    async fn test_multi_search_refinement() {
        let dir = TempDir::new().unwrap();
        let handle = ready_handle(&dir).await;

        let queries = json!({"queries": [
            {"text": "hello"},
            {"text": "hejsan", "language": "sv"},
        ]});
        let multi = handle.handle(request(1, "search.multi", queries)).await;
        let result = multi.result.unwrap();
        assert_eq!(result["need_refine"], true);
        assert_eq!(result["refine_which"], json!([1]));
        assert_eq!(result["allow_raw_search"], json!([false, true]));
        assert_eq!(result["responses"], json!([]));

        let queries = json!({"queries": [
            {"text": "hello"},
            {"text": "hejsan", "language": "sv", "allow_raw_search": true},
        ]});
        let multi = handle.handle(request(2, "search.multi", queries)).await;
        let result = multi.result.unwrap();
        assert_eq!(result["need_refine"], false);
        assert_eq!(result["responses"].as_array().unwrap().len(), 2);
        assert_eq!(result["responses"][1]["refined"], true);
    }

    #[tokio::test]
    async fn test_error_codes() {
        let dir = TempDir::new().unwrap();
        let handle = ready_handle(&dir).await;

        let cases = [
            (request(1, "nope", json!({})), -32601),
            (request(2, "search", json!({"limit": 3})), -32602),
            (request(3, "search", json!({"text": "x", "radius_m": 10})), -32602),
            (request(4, "translate", json!({"text": "x", "from": "en", "to": "fi"})), -32602),
            (
                request(5, "search.multi", json!({"queries": [{"text": "a"}, {"text": "b"}, {"text": "c"}]})),
                -32602,
            ),
        ];
        for (req, code) in cases {
            let method = req.method.clone();
            let response = handle.handle(req).await;
            assert_eq!(error_code(&response), code, "{}", method);
        }
    }

    #[tokio::test]
    async fn test_suggest_translate_and_store_check() {
        let dir = TempDir::new().unwrap();
        let handle = ready_handle(&dir).await;

        let suggest = handle.handle(request(1, "suggest", json!({"text": "hello"}))).await;
        assert_eq!(suggest.result.unwrap()["suggestions"], json!(["Hello (Hej)"]));

        let translate = handle
            .handle(request(2, "translate", json!({"text": "hello", "from": "en", "to": "sv"})))
            .await;
        assert_eq!(translate.result.unwrap()["text"], "hej");

        let check = handle.handle(request(3, "store.check", json!({}))).await;
        let result = check.result.unwrap();
        assert_eq!(result["reachable"], true);
        assert_eq!(result["stats"]["totalRecords"], 0);

        let health = handle.handle(request(4, "health", json!({}))).await;
        assert_eq!(health.result.unwrap()["status"], "ok");
    }

    #[tokio::test]
    async fn test_serve_over_pipes() {
        let dir = TempDir::new().unwrap();
        let handle = ready_handle(&dir).await;

        let input = [
            r#"{"jsonrpc":"2.0","id":1,"method":"health"}"#,
            "",
            r#"{"jsonrpc":"2.0","method":"health"}"#,
            "this is not json",
            r#"{"jsonrpc":"2.0","id":2,"method":"search","params":{"text":"hello"}}"#,
            r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#,
        ]
        .join("\n");

        let responses = serve_bytes(handle, input.as_bytes(), ServeLimits::default()).await;
        // The notification gets no response
        assert_eq!(responses.len(), 4);

        let by_id: HashMap<String, &Value> =
            responses.iter().map(|r| (r["id"].to_string(), r)).collect();
        assert_eq!(by_id["1"]["result"]["status"], "ok");
        assert_eq!(by_id["2"]["result"]["results"], json!([]));
        assert_eq!(by_id["3"]["error"]["code"], -32601);
        assert_eq!(by_id["null"]["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn test_serve_continues_after_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let handle = ready_handle(&dir).await;

        let input = b"\xff\xfe\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"health\"}\n";
        let responses = serve_bytes(handle, input, ServeLimits::default()).await;
        assert_eq!(responses.len(), 2);

        let rejected = responses.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(rejected["error"]["code"], -32700);
        let health = responses.iter().find(|r| r["id"] == 1).unwrap();
        assert_eq!(health["result"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_serve_rejects_oversized_lines() {
        let dir = TempDir::new().unwrap();
        let handle = ready_handle(&dir).await;

        let long = format!(
            r#"{{"jsonrpc":"2.0","id":1,"method":"search","params":{{"text":"{}"}}}}"#,
            "x".repeat(200)
        );
        let input = format!("{}\n{}\n", long, r#"{"jsonrpc":"2.0","id":2,"method":"health"}"#);
        let limits = ServeLimits {
            max_line_bytes: 128,
            ..ServeLimits::default()
        };
        let responses = serve_bytes(handle, input.as_bytes(), limits).await;
        assert_eq!(responses.len(), 2);

        let rejected = responses.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(rejected["error"]["code"], -32700);
        assert!(responses.iter().any(|r| r["id"] == 2));
    }

    #[tokio::test]
    async fn test_null_id_is_answered() {
        let dir = TempDir::new().unwrap();
        let handle = ready_handle(&dir).await;

        let input = [
            r#"{"jsonrpc":"2.0","id":null,"method":"health"}"#,
            r#"{"jsonrpc":"2.0","method":"health"}"#,
        ]
        .join("\n");
        let responses = serve_bytes(handle, input.as_bytes(), ServeLimits::default()).await;
        assert_eq!(responses.len(), 1);
        assert!(responses[0]["id"].is_null());
        assert_eq!(responses[0]["result"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_single_request_in_flight_answers_all() {
        let dir = TempDir::new().unwrap();
        let handle = ready_handle(&dir).await;

        let input: String = (1..=10)
            .map(|id| {
                format!(
                    r#"{{"jsonrpc":"2.0","id":{},"method":"search","params":{{"text":"hello"}}}}"#,
                    id
                ) + "\n"
            })
            .collect();
        let limits = ServeLimits {
            max_in_flight: 1,
            ..ServeLimits::default()
        };
        let responses = serve_bytes(handle, input.as_bytes(), limits).await;
        assert_eq!(responses.len(), 10);
        assert!(responses.iter().all(|r| r["error"].is_null()));
    }
}
