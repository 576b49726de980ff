mod support;

use axum::http::StatusCode;
use serde_json::json;
use shelfcache::application::control::ControlOutcome;
use shelfcache::application::strategy::ResponseSource;
use shelfcache::application::worker::{EventOutcome, ProxyEvent};
use shelfcache::cache::{CacheStore, RequestKey};

use support::{FakeUpstream, activated_worker, body_json, get};

const CHAPTER: &str = "/getBookContent?url=book-9&index=12";

fn cache_chapter(url: &str, content: serde_json::Value) -> Vec<u8> {
    json!({ "type": "CACHE_CHAPTER", "url": url, "content": content })
        .to_string()
        .into_bytes()
}

#[tokio::test]
async fn cached_chapter_is_served_as_success_envelope() {
    let upstream = FakeUpstream::new();
    let (worker, _) = activated_worker(upstream.clone()).await;
    upstream.set_online(false);

    let payload = json!({ "title": "Chapter 12", "text": "It was a dark night." });
    let outcome = worker
        .post_message(&cache_chapter(
            &format!("http://reader.local{CHAPTER}"),
            payload.clone(),
        ))
        .await;
    assert_eq!(outcome, ControlOutcome::Applied("CACHE_CHAPTER"));

    let served = worker.fetch(&get(CHAPTER)).await;
    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.status, StatusCode::OK);
    assert_eq!(
        body_json(&served),
        json!({ "isSuccess": true, "data": payload })
    );
    worker.background().settle().await;
    assert_eq!(upstream.total_hits(), 1, "only the background revalidation");
}

#[tokio::test]
async fn chapter_url_embedding_a_book_url_round_trips() {
    let upstream = FakeUpstream::new();
    let (worker, _) = activated_worker(upstream.clone()).await;
    upstream.set_online(false);
    let chapter = "/getBookContent?url=http://book.example/1&index=3";

    let outcome = worker
        .post_message(&cache_chapter(chapter, json!("embedded")))
        .await;
    assert_eq!(outcome, ControlOutcome::Applied("CACHE_CHAPTER"));

    let served = worker.fetch(&get(chapter)).await;
    assert_eq!(served.response.status, StatusCode::OK);
    assert_eq!(
        body_json(&served),
        json!({ "isSuccess": true, "data": "embedded" })
    );
}

#[tokio::test]
async fn absolute_chapter_url_keeps_its_query_verbatim() {
    let upstream = FakeUpstream::new();
    let (worker, _) = activated_worker(upstream.clone()).await;
    upstream.set_online(false);

    let outcome = worker
        .post_message(&cache_chapter(
            "http://reader.local/getBookContent?url=a'b&index=1",
            json!("quoted"),
        ))
        .await;
    assert_eq!(outcome, ControlOutcome::Applied("CACHE_CHAPTER"));

    let served = worker.fetch(&get("/getBookContent?url=a'b&index=1")).await;
    assert_eq!(served.response.status, StatusCode::OK);
    assert_eq!(
        body_json(&served),
        json!({ "isSuccess": true, "data": "quoted" })
    );
}

#[tokio::test]
async fn later_cache_chapter_overwrites_earlier() {
    let upstream = FakeUpstream::new();
    let (worker, _) = activated_worker(upstream.clone()).await;
    upstream.set_online(false);

    worker.post_message(&cache_chapter(CHAPTER, json!("first"))).await;
    worker.post_message(&cache_chapter(CHAPTER, json!("second"))).await;

    let served = worker.fetch(&get(CHAPTER)).await;
    assert_eq!(body_json(&served), json!({ "isSuccess": true, "data": "second" }));
}

#[tokio::test]
async fn clear_makes_the_next_request_a_full_miss() {
    let upstream = FakeUpstream::new();
    let (worker, _) = activated_worker(upstream.clone()).await;
    worker.post_message(&cache_chapter(CHAPTER, json!("stale"))).await;
    upstream.respond_json(CHAPTER, &json!({ "isSuccess": true, "data": "fresh" }));

    let outcome = worker
        .post_message(br#"{"type":"CLEAR_CHAPTER_CACHE"}"#)
        .await;
    assert_eq!(outcome, ControlOutcome::Applied("CLEAR_CHAPTER_CACHE"));
    assert!(
        !worker
            .store()
            .namespaces()
            .await
            .expect("namespaces")
            .contains(worker.namespaces().chapters())
    );

    let served = worker.fetch(&get(CHAPTER)).await;
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(body_json(&served), json!({ "isSuccess": true, "data": "fresh" }));
    assert_eq!(upstream.hits(CHAPTER), 1);

    let key = RequestKey::get(CHAPTER).expect("key");
    assert!(
        worker
            .store()
            .lookup(worker.namespaces().chapters(), &key)
            .await
            .expect("lookup")
            .is_some(),
        "namespace is recreated by the next write"
    );
}

#[tokio::test]
async fn clear_leaves_static_assets_alone() {
    let upstream = FakeUpstream::new();
    let (worker, store) = activated_worker(upstream.clone()).await;
    upstream.respond_text("/index.html", "<html>");
    worker.fetch(&get("/index.html")).await;
    worker.background().settle().await;

    worker
        .post_message(br#"{"type":"CLEAR_CHAPTER_CACHE"}"#)
        .await;
    assert_eq!(store.entry_count(worker.namespaces().static_assets()), 1);
}

#[tokio::test]
async fn malformed_messages_change_nothing() {
    let upstream = FakeUpstream::new();
    let (worker, store) = activated_worker(upstream.clone()).await;
    worker.post_message(&cache_chapter(CHAPTER, json!("kept"))).await;

    for raw in [
        &b""[..],
        b"{",
        b"\xff\xfe",
        br#"{"type":"CACHE_CHAPTER"}"#,
        br#"{"type":"CACHE_CHAPTER","url":"/x"}"#,
        br#"{"type":"PURGE_ALL"}"#,
        br#"{"kind":"CLEAR_CHAPTER_CACHE"}"#,
        br#"["CLEAR_CHAPTER_CACHE"]"#,
        br#"{"type":"CACHE_CHAPTER","url":"http://","content":1}"#,
    ] {
        assert_eq!(worker.post_message(raw).await, ControlOutcome::Dropped);
    }

    assert_eq!(store.entry_count(worker.namespaces().chapters()), 1);
}

#[tokio::test]
async fn messages_dispatch_as_acknowledged_events() {
    let upstream = FakeUpstream::new();
    let (worker, _) = activated_worker(upstream).await;

    let outcome = worker
        .dispatch(ProxyEvent::Message(cache_chapter(CHAPTER, json!(1)).into()))
        .await;
    assert!(matches!(
        outcome,
        EventOutcome::Acknowledged(ControlOutcome::Applied("CACHE_CHAPTER"))
    ));

    let outcome = worker
        .dispatch(ProxyEvent::Message(bytes::Bytes::from_static(b"nonsense")))
        .await;
    assert!(matches!(
        outcome,
        EventOutcome::Acknowledged(ControlOutcome::Dropped)
    ));
}
