//! In-process fakes of the Zabbix endpoints for tests.

use super::protocol::{read_frame, write_frame, SenderItem, SenderRequest, SenderResponse};

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Trapper that records every batch and acknowledges it.
pub struct FakeTrapper {
    pub port: u16,
    pub requests: mpsc::UnboundedReceiver<Vec<SenderItem>>,
}

impl FakeTrapper {
    pub fn ack(n: usize) -> SenderResponse {
        SenderResponse {
            response: "success".to_string(),
            info: Some(format!(
                "processed: {}; failed: 0; total: {}; seconds spent: 0.000042",
                n, n
            )),
        }
    }
}

pub async fn spawn_fake_trapper() -> FakeTrapper {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let body = match read_frame(&mut socket).await {
                Ok(body) => body,
                Err(_) => continue,
            };
            let request: SenderRequest = serde_json::from_slice(&body).unwrap();
            assert_eq!(request.request, "sender data");
            let n = request.data.len();
            let _ = tx.send(request.data);

            let ack = serde_json::to_vec(&FakeTrapper::ack(n)).unwrap();
            let _ = write_frame(&mut socket, &ack).await;
        }
    });

    FakeTrapper { port, requests: rx }
}

/// JSON-RPC endpoint served by an axum router.
pub struct FakeApi {
    pub url: String,
    pub logins: Arc<AtomicUsize>,
}

type RpcHandler = dyn Fn(&str, &Value, Option<&str>) -> Result<Value, (i64, String)> + Send + Sync;

#[derive(Clone)]
struct FakeApiState {
    handler: Arc<RpcHandler>,
    logins: Arc<AtomicUsize>,
}

/// Serve `handler(method, params, auth)` results; `Err((code, message))`
/// becomes a JSON-RPC error object.
pub async fn spawn_fake_api<F>(handler: F) -> FakeApi
where
    F: Fn(&str, &Value, Option<&str>) -> Result<Value, (i64, String)> + Send + Sync + 'static,
{
    let logins = Arc::new(AtomicUsize::new(0));
    let state = FakeApiState {
        handler: Arc::new(handler),
        logins: logins.clone(),
    };
    let router = Router::new()
        .route("/zabbix/api_jsonrpc.php", post(handle_rpc))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });

    FakeApi {
        url: format!("http://127.0.0.1:{}/zabbix/api_jsonrpc.php", port),
        logins,
    }
}

async fn handle_rpc(State(state): State<FakeApiState>, Json(request): Json<Value>) -> Json<Value> {
    let method = request["method"].as_str().unwrap_or_default();
    if method == "user.login" {
        state.logins.fetch_add(1, Ordering::SeqCst);
    }

    let auth = request["auth"].as_str();
    Json(match (state.handler)(method, &request["params"], auth) {
        Ok(result) => json!({"jsonrpc": "2.0", "result": result, "id": request["id"]}),
        Err((code, message)) => json!({
            "jsonrpc": "2.0",
            "error": {"code": code, "message": message, "data": ""},
            "id": request["id"],
        }),
    })
}
