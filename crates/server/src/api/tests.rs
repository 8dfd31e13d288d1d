//! Route-level tests against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use depesche_core::config::{SchedulerConfig, ServerConfig};
use depesche_core::SystemClock;
use depesche_engine::{spawn_scheduler_loop, LocalTickLock, TickLock, TickScheduler};
use depesche_notify::Dispatcher;
use depesche_source::{MessageSource, ScriptedSource};
use depesche_store::models::{ChannelKind, ChannelUpsert, NewPost};
use depesche_store::traits::{AccountStore, ChannelStore, PostStore, Stores, TickRunStore};

use crate::router::build_router;
use crate::state::AppState;

const TOKEN: &str = "test-token";

struct TestApp {
    app: Router,
    stores: Stores,
}

fn test_app(api_token: Option<&str>) -> TestApp {
    let stores = Stores::memory();
    let scheduler = TickScheduler::new(
        stores.clone(),
        Arc::new(LocalTickLock::new()) as Arc<dyn TickLock>,
        Arc::new(ScriptedSource::new()) as Arc<dyn MessageSource>,
        Arc::new(Dispatcher::empty()),
        Arc::new(SystemClock),
        SchedulerConfig::default(),
    );
    // Hour-long interval: only the startup tick and explicit triggers run.
    let (trigger, _task) =
        spawn_scheduler_loop(Arc::new(scheduler), Duration::from_secs(3600), None);
    let state = Arc::new(AppState {
        stores: stores.clone(),
        trigger,
        config_summary: json!({ "profile": "default" }),
    });
    let server = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        cors_origin: "*".into(),
        api_token: api_token.map(str::to_string),
    };
    TestApp { app: build_router(state, &server), stores }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {TOKEN}"))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {TOKEN}"))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(res: Response) -> Value {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn wait_for_run(stores: &Stores, trigger_type: &str) {
    for _ in 0..400 {
        let runs = stores.ticks.recent(50).await.unwrap();
        if runs.iter().any(|r| r.trigger_type == trigger_type) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no {trigger_type} run recorded in time");
}

#[tokio::test]
async fn health_is_open_without_a_token() {
    let t = test_app(Some(TOKEN));
    let res = t
        .app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn api_routes_sit_behind_the_token_gate() {
    let t = test_app(Some(TOKEN));

    let bare = Request::builder()
        .uri("/api/channels")
        .body(Body::empty())
        .unwrap();
    let res = t.app.clone().oneshot(bare).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .uri("/api/channels")
        .header("Authorization", "Bearer wrong")
        .body(Body::empty())
        .unwrap();
    let res = t.app.clone().oneshot(wrong).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = t.app.clone().oneshot(get("/api/channels")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = t.app.oneshot(get("/api/config")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["profile"], "default");
}

#[tokio::test]
async fn missing_token_config_fails_closed() {
    let t = test_app(None);
    let res = t.app.oneshot(get("/api/channels")).await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn channel_registration_is_idempotent_and_filterable() {
    let t = test_app(Some(TOKEN));

    let res = t
        .app
        .clone()
        .oneshot(post_json(
            "/api/channels",
            json!({ "type": "public", "identifier": "@News", "backfill_days": 3 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let first = body_json(res).await;
    assert_eq!(first["identifier"], "news");
    assert_eq!(first["backfill_days"], 3);

    let res = t
        .app
        .clone()
        .oneshot(post_json(
            "/api/channels",
            json!({ "type": "public", "identifier": "news", "title": "The News" }),
        ))
        .await
        .unwrap();
    let second = body_json(res).await;
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["title"], "The News");

    let res = t.app.clone().oneshot(get("/api/channels?q=new")).await.unwrap();
    let page = body_json(res).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["limit"], 50);
    assert_eq!(page["items"][0]["identifier"], "news");

    let res = t
        .app
        .clone()
        .oneshot(get("/api/channels?type=private"))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["total"], 0);

    let res = t
        .app
        .oneshot(post_json("/api/channels", json!({ "type": "public", "identifier": "  " })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn posts_are_scoped_to_a_channel_with_inclusive_date_bounds() {
    let t = test_app(Some(TOKEN));
    let channel = t
        .stores
        .channels
        .upsert(ChannelUpsert {
            kind: ChannelKind::Public,
            identifier: "daily".into(),
            title: Some("Daily".into()),
            backfill_days: 0,
            is_active: true,
        })
        .await
        .unwrap();

    let at = |day: u32| Utc.with_ymd_and_hms(2026, 1, day, 12, 0, 0).unwrap();
    let posts: Vec<NewPost> = (10..=12)
        .map(|day| NewPost {
            external_message_id: day as i64,
            source_url: None,
            published_at: at(day),
            text: format!("post {day}"),
            raw_payload: None,
        })
        .collect();
    t.stores.posts.insert_batch(channel.id, &posts).await.unwrap();

    let uri = format!("/api/posts?channel_id={}", channel.id);
    let res = t.app.clone().oneshot(get(&uri)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let page = body_json(res).await;
    assert_eq!(page["total"], 3);
    assert_eq!(page["items"][0]["external_message_id"], 12);
    assert_eq!(page["items"][0]["channel"]["identifier"], "daily");

    let uri = format!(
        "/api/posts?channel_id={}&date_from=2026-01-11&date_to=2026-01-11",
        channel.id
    );
    let page = body_json(t.app.clone().oneshot(get(&uri)).await.unwrap()).await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["external_message_id"], 11);

    let res = t
        .app
        .clone()
        .oneshot(get("/api/posts?channel_identifier=@Daily"))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["total"], 3);

    let res = t.app.clone().oneshot(get("/api/posts")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = t.app.clone().oneshot(get("/api/posts?channel_id=999")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let uri = format!("/api/posts?channel_id={}&date_from=yesterday", channel.id);
    let res = t.app.oneshot(get(&uri)).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn manual_trigger_is_accepted_and_recorded() {
    let t = test_app(Some(TOKEN));
    wait_for_run(&t.stores, "scheduled").await;

    let res = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/ticks")
                .header("Authorization", format!("Bearer {TOKEN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(res).await["status"], "queued");

    wait_for_run(&t.stores, "manual").await;
    let res = t.app.oneshot(get("/api/ticks")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let runs = body_json(res).await;
    let triggers: Vec<&str> = runs
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["trigger_type"].as_str().unwrap())
        .collect();
    assert!(triggers.contains(&"manual"));
    assert!(triggers.contains(&"scheduled"));
}

#[tokio::test]
async fn status_reports_account_and_channel_counts() {
    let t = test_app(Some(TOKEN));
    wait_for_run(&t.stores, "scheduled").await;

    t.stores.accounts.upsert("alpha", "vault:alpha").await.unwrap();
    let cooled = t.stores.accounts.upsert("bravo", "vault:bravo").await.unwrap();
    t.stores
        .accounts
        .set_cooldown(cooled.id, Utc::now() + chrono::Duration::hours(1), "slow down")
        .await
        .unwrap();

    t.stores
        .channels
        .upsert(ChannelUpsert {
            kind: ChannelKind::Public,
            identifier: "one".into(),
            title: None,
            backfill_days: 0,
            is_active: true,
        })
        .await
        .unwrap();
    t.stores
        .channels
        .upsert(ChannelUpsert {
            kind: ChannelKind::Public,
            identifier: "two".into(),
            title: None,
            backfill_days: 0,
            is_active: false,
        })
        .await
        .unwrap();

    let res = t.app.oneshot(get("/api/status")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["accounts"]["active"], 1);
    assert_eq!(body["accounts"]["cooldown"], 1);
    assert_eq!(body["channels"]["total"], 2);
    assert_eq!(body["channels"]["active"], 1);
    assert_eq!(body["latest_tick"]["trigger_type"], "scheduled");
}
