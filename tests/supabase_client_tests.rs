// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Supabase client tests against a local stub of the GoTrue and PostgREST
//! endpoints.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taski::backend::{
    AuthEventKind, AuthProvider, Filter, MagicLinkCallback, Order, RowStore, SupabaseClient,
};
use taski::config::Config;
use taski::error::AppError;
use taski::models::{Session, User};
use tempfile::TempDir;

const GOOD_TOKEN: &str = "good-token";
const VALID_REFRESH: &str = "valid-refresh";

/// A request seen by the stub.
#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    headers: HeaderMap,
    body: Value,
}

type Log = Arc<Mutex<Vec<Seen>>>;

fn parse_query(uri: &Uri) -> HashMap<String, String> {
    uri.query()
        .unwrap_or("")
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |s: &str| urlencoding::decode(s).unwrap().into_owned();
            (decode(k), decode(v))
        })
        .collect()
}

fn stub_user() -> Value {
    json!({
        "id": "ada",
        "email": "ada@example.com",
        "user_metadata": { "full_name": "Ada", "department_id": "Software" }
    })
}

async fn stub(
    State(log): State<Log>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let seen = Seen {
        method,
        path: uri.path().to_string(),
        query: parse_query(&uri),
        headers: headers.clone(),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    };
    log.lock().unwrap().push(seen.clone());

    let bearer = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    match (seen.method.as_str(), seen.path.as_str()) {
        ("POST", "/auth/v1/otp") => Json(json!({})).into_response(),
        ("GET", "/auth/v1/user") => {
            if bearer == format!("Bearer {}", GOOD_TOKEN) {
                Json(stub_user()).into_response()
            } else {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({ "msg": "invalid JWT: unable to parse or verify signature" })),
                )
                    .into_response()
            }
        }
        ("POST", "/auth/v1/token") => {
            // Each refresh token is spent by its first use.
            let uses = log
                .lock()
                .unwrap()
                .iter()
                .filter(|s| {
                    s.path == seen.path && s.body["refresh_token"] == seen.body["refresh_token"]
                })
                .count();
            tokio::time::sleep(Duration::from_millis(50)).await;
            if seen.body["refresh_token"] == VALID_REFRESH && uses == 1 {
                Json(json!({
                    "access_token": "fresh-token",
                    "refresh_token": "next-refresh",
                    "token_type": "bearer",
                    "expires_in": 3600,
                    "user": stub_user(),
                }))
                .into_response()
            } else {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({
                        "error": "invalid_grant",
                        "error_description": "Invalid Refresh Token: Already Used"
                    })),
                )
                    .into_response()
            }
        }
        ("POST", "/auth/v1/logout") => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        ("GET", "/rest/v1/profiles") => {
            if seen.query.get("id").map(String::as_str) == Some("eq.ada") {
                Json(json!({ "id": "ada", "full_name": "Ada" })).into_response()
            } else {
                (
                    StatusCode::NOT_ACCEPTABLE,
                    Json(json!({
                        "code": "PGRST116",
                        "message": "JSON object requested, multiple (or no) rows returned"
                    })),
                )
                    .into_response()
            }
        }
        ("POST", "/rest/v1/profiles") => {
            if seen.body["id"] == "ada" {
                (
                    StatusCode::CONFLICT,
                    Json(json!({
                        "code": "23505",
                        "message": "duplicate key value violates unique constraint \"profiles_pkey\""
                    })),
                )
                    .into_response()
            } else {
                StatusCode::CREATED.into_response()
            }
        }
        ("GET", "/rest/v1/tasks") => Json(json!([
            { "id": 2, "title": "Newer" },
            { "id": 1, "title": "Older" }
        ]))
        .into_response(),
        ("PATCH", "/rest/v1/tasks") => {
            if seen.query.get("id").map(String::as_str) == Some("eq.1") {
                Json(json!([{ "id": 1, "status": seen.body["status"] }])).into_response()
            } else {
                Json(json!([])).into_response()
            }
        }
        ("GET", "/rest/v1/slow") => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!([])).into_response()
        }
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

struct Stub {
    client: SupabaseClient,
    log: Log,
    dir: TempDir,
    config: Config,
}

impl Stub {
    fn requests(&self, path: &str) -> Vec<Seen> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.path == path)
            .cloned()
            .collect()
    }

    fn session_path(&self) -> std::path::PathBuf {
        self.dir.path().join("session.json")
    }
}

async fn start_stub() -> Stub {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new().fallback(stub).with_state(log.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        supabase_url: format!("http://{}/", addr),
        supabase_anon_key: "anon-key".to_string(),
        session_file: dir.path().join("session.json"),
        request_timeout: Duration::from_millis(500),
        offline: false,
        ..Config::default()
    };

    Stub {
        client: SupabaseClient::new(&config).unwrap(),
        log,
        dir,
        config,
    }
}

fn persisted(user: Value, access_token: &str, refresh_token: &str, expires_at: i64) -> Session {
    Session {
        access_token: access_token.to_string(),
        refresh_token: refresh_token.to_string(),
        token_type: "bearer".to_string(),
        expires_at: Some(expires_at),
        user: serde_json::from_value::<User>(user).unwrap(),
    }
}

fn write_session(stub: &Stub, session: &Session) {
    std::fs::write(stub.session_path(), serde_json::to_vec(session).unwrap()).unwrap();
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ─── Auth ────────────────────────────────────────────────────

#[tokio::test]
async fn test_magic_link_request() {
    let stub = start_stub().await;

    stub.client
        .sign_in_with_magic_link(
            "ada@example.com",
            json!({ "full_name": "Ada", "department_id": "Software" }),
            "http://localhost:5173",
        )
        .await
        .unwrap();

    let seen = &stub.requests("/auth/v1/otp")[0];
    assert_eq!(seen.query["redirect_to"], "http://localhost:5173");
    assert_eq!(seen.headers["apikey"], "anon-key");
    assert_eq!(
        seen.body,
        json!({
            "email": "ada@example.com",
            "data": { "full_name": "Ada", "department_id": "Software" },
            "create_user": true,
        })
    );
}

#[tokio::test]
async fn test_complete_magic_link_persists_session() {
    let stub = start_stub().await;
    let mut events = stub.client.subscribe();

    let callback = MagicLinkCallback::from_fragment(&format!(
        "access_token={}&refresh_token=r1&expires_in=3600&token_type=bearer&type=magiclink",
        GOOD_TOKEN
    ));
    let session = stub.client.complete_magic_link(&callback).await.unwrap();

    assert_eq!(session.user.id, "ada");
    assert_eq!(session.refresh_token, "r1");
    assert!(session.expires_at.unwrap() > now());

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, AuthEventKind::SignedIn);

    let saved: Session =
        serde_json::from_slice(&std::fs::read(stub.session_path()).unwrap()).unwrap();
    assert_eq!(saved, session);
}

#[tokio::test]
async fn test_complete_magic_link_with_rejected_token() {
    let stub = start_stub().await;
    let callback = MagicLinkCallback::from_fragment("access_token=expired&type=magiclink");

    let err = stub.client.complete_magic_link(&callback).await.unwrap_err();

    assert!(matches!(err, AppError::Provider(ref msg) if msg.contains("invalid JWT")));
    assert!(!stub.session_path().exists());
}

#[tokio::test]
async fn test_persisted_session_is_restored() {
    let stub = start_stub().await;
    write_session(
        &stub,
        &persisted(stub_user(), GOOD_TOKEN, VALID_REFRESH, now() + 3600),
    );

    let session = stub.client.current_session().await.unwrap().unwrap();

    assert_eq!(session.access_token, GOOD_TOKEN);
    assert!(stub.requests("/auth/v1/token").is_empty());
}

#[tokio::test]
async fn test_expiring_session_is_refreshed() {
    let stub = start_stub().await;
    let mut events = stub.client.subscribe();
    write_session(
        &stub,
        &persisted(stub_user(), "stale-token", VALID_REFRESH, now() + 60),
    );

    let session = stub.client.current_session().await.unwrap().unwrap();

    assert_eq!(session.access_token, "fresh-token");
    assert_eq!(
        stub.requests("/auth/v1/token")[0].query["grant_type"],
        "refresh_token"
    );
    assert_eq!(events.recv().await.unwrap().kind, AuthEventKind::TokenRefreshed);

    let saved: Session =
        serde_json::from_slice(&std::fs::read(stub.session_path()).unwrap()).unwrap();
    assert_eq!(saved.refresh_token, "next-refresh");
}

#[tokio::test]
async fn test_concurrent_refreshes_spend_token_once() {
    let stub = start_stub().await;
    write_session(
        &stub,
        &persisted(stub_user(), "stale-token", VALID_REFRESH, now() + 30),
    );

    let (a, b) = tokio::join!(stub.client.current_session(), stub.client.current_session());

    assert_eq!(a.unwrap().unwrap().access_token, "fresh-token");
    assert_eq!(b.unwrap().unwrap().access_token, "fresh-token");
    assert_eq!(stub.requests("/auth/v1/token").len(), 1);

    let after = stub.client.current_session().await.unwrap().unwrap();
    assert_eq!(after.refresh_token, "next-refresh");
    assert!(stub.session_path().exists());
}

#[tokio::test]
async fn test_rejected_refresh_signs_out() {
    let stub = start_stub().await;
    let mut events = stub.client.subscribe();
    write_session(
        &stub,
        &persisted(stub_user(), "stale-token", "used-refresh", now() - 10),
    );

    assert!(stub.client.current_session().await.unwrap().is_none());
    assert_eq!(events.recv().await.unwrap().kind, AuthEventKind::SignedOut);
    assert!(!stub.session_path().exists());
}

#[tokio::test]
async fn test_sign_out_clears_even_when_revocation_fails() {
    let stub = start_stub().await;
    write_session(
        &stub,
        &persisted(stub_user(), GOOD_TOKEN, VALID_REFRESH, now() + 3600),
    );
    stub.client.current_session().await.unwrap();
    let mut events = stub.client.subscribe();

    stub.client.sign_out().await.unwrap();

    let logout = &stub.requests("/auth/v1/logout")[0];
    assert_eq!(
        logout.headers["authorization"],
        format!("Bearer {}", GOOD_TOKEN).as_str()
    );
    assert_eq!(events.recv().await.unwrap().kind, AuthEventKind::SignedOut);
    assert!(stub.client.current_session().await.unwrap().is_none());
    assert!(!stub.session_path().exists());
}

// ─── Rows ────────────────────────────────────────────────────

#[tokio::test]
async fn test_select_one_found_and_missing() {
    let stub = start_stub().await;

    let row = stub
        .client
        .select_one("profiles", &Filter::eq("id", "ada"))
        .await
        .unwrap();
    assert_eq!(row["full_name"], "Ada");

    let seen = &stub.requests("/rest/v1/profiles")[0];
    assert_eq!(seen.headers["accept"], "application/vnd.pgrst.object+json");
    assert_eq!(seen.query["select"], "*");

    let err = stub
        .client
        .select_one("profiles", &Filter::eq("id", "nobody"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_rows_use_anon_key_without_session() {
    let stub = start_stub().await;

    let rows = stub
        .client
        .select_many("tasks", None, Some(&Order::desc("created_at")))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    let seen = &stub.requests("/rest/v1/tasks")[0];
    assert_eq!(seen.query["order"], "created_at.desc");
    assert_eq!(seen.headers["authorization"], "Bearer anon-key");
    assert_eq!(seen.headers["apikey"], "anon-key");
}

#[tokio::test]
async fn test_rows_use_session_token() {
    let stub = start_stub().await;
    write_session(
        &stub,
        &persisted(stub_user(), GOOD_TOKEN, VALID_REFRESH, now() + 3600),
    );

    stub.client.select_many("tasks", None, None).await.unwrap();

    let seen = &stub.requests("/rest/v1/tasks")[0];
    assert_eq!(
        seen.headers["authorization"],
        format!("Bearer {}", GOOD_TOKEN).as_str()
    );
    assert!(!seen.query.contains_key("order"));
}

#[tokio::test]
async fn test_insert_duplicate_is_constraint() {
    let stub = start_stub().await;

    stub.client
        .insert("profiles", json!({ "id": "grace", "full_name": "Grace" }))
        .await
        .unwrap();
    let seen = &stub.requests("/rest/v1/profiles")[0];
    assert_eq!(seen.headers["prefer"], "return=minimal");

    let err = stub
        .client
        .insert("profiles", json!({ "id": "ada", "full_name": "Ada" }))
        .await
        .unwrap_err();
    assert!(err.is_constraint_violation());
}

#[tokio::test]
async fn test_update_matches_or_not_found() {
    let stub = start_stub().await;

    stub.client
        .update("tasks", json!({ "status": "completed" }), &Filter::eq("id", "1"))
        .await
        .unwrap();
    let seen = &stub.requests("/rest/v1/tasks")[0];
    assert_eq!(seen.method, Method::PATCH);
    assert_eq!(seen.query["id"], "eq.1");
    assert_eq!(seen.body, json!({ "status": "completed" }));

    let err = stub
        .client
        .update("tasks", json!({ "status": "completed" }), &Filter::eq("id", "404"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

// ─── Transport ───────────────────────────────────────────────

#[tokio::test]
async fn test_slow_backend_times_out() {
    let stub = start_stub().await;

    let err = stub
        .client
        .select_many("slow", None, None)
        .await
        .unwrap_err();

    assert!(err.is_transient(), "{:?}", err);
}

#[tokio::test]
async fn test_unreachable_backend_is_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let stub = start_stub().await;
    let config = Config {
        supabase_url: format!("http://{}", addr),
        ..stub.config.clone()
    };
    let client = SupabaseClient::new(&config).unwrap();

    let err = client
        .select_one("profiles", &Filter::eq("id", "ada"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Network(_)));
}
