mod support;

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use bytes::Bytes;
use shelfcache::application::lifecycle::InstallOutcome;
use shelfcache::application::worker::{Worker, WorkerConfig};
use shelfcache::cache::{
    CacheConfig, CacheStore, CachedResponse, DiskStore, NamespaceName, Namespaces, RequestKey,
    StoreBackend,
};
use tempfile::TempDir;

use support::{FakeUpstream, body_text, get};

fn ns(name: &str) -> NamespaceName {
    NamespaceName::new(name).expect("valid namespace")
}

fn html(body: &'static str) -> CachedResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
    headers.insert(header::ETAG, HeaderValue::from_static("\"abc\""));
    CachedResponse::new(StatusCode::OK, &headers, Bytes::from_static(body.as_bytes()))
}

fn disk_config(dir: &TempDir, version: &str) -> WorkerConfig {
    let namespaces = Namespaces::new(
        NamespaceName::versioned("shelfcache-static", version).expect("static name"),
        ns("shelfcache-chapters"),
    )
    .expect("distinct namespaces");
    WorkerConfig {
        cache: CacheConfig {
            backend: StoreBackend::Disk,
            directory: dir.path().to_path_buf(),
            namespaces,
            ..CacheConfig::default()
        },
        ..WorkerConfig::default()
    }
}

fn shell_upstream() -> Arc<FakeUpstream> {
    let upstream = FakeUpstream::new();
    for target in ["/", "/index.html", "/manifest.json"] {
        upstream.respond_text(target, "shell");
    }
    upstream
}

#[tokio::test]
async fn entries_survive_reopening_the_store() {
    let dir = TempDir::new().expect("temp dir");
    let key = RequestKey::get("/getBookContent?url=a&index=1").expect("key");

    let first = DiskStore::new(dir.path());
    first
        .put(&ns("chapters"), &key, html("<p>chapter</p>"))
        .await
        .expect("put");
    drop(first);

    let reopened = DiskStore::new(dir.path());
    let entry = reopened
        .lookup(&ns("chapters"), &key)
        .await
        .expect("lookup")
        .expect("entry persisted");
    assert_eq!(entry, html("<p>chapter</p>"));
    assert_eq!(
        entry.header(&header::ETAG),
        Some(&HeaderValue::from_static("\"abc\""))
    );
}

#[tokio::test]
async fn namespaces_are_directories() {
    let dir = TempDir::new().expect("temp dir");
    let store = DiskStore::new(dir.path());
    let key = RequestKey::get("/a").expect("key");

    store.put(&ns("alpha"), &key, html("a")).await.expect("put");
    store.open(&ns("beta")).await.expect("open");
    std::fs::create_dir(dir.path().join("not a namespace")).expect("foreign dir");
    std::fs::write(dir.path().join("stray.txt"), b"x").expect("stray file");
    std::fs::create_dir(dir.path().join(".alpha.0.trash")).expect("tombstone dir");

    assert_eq!(
        store.namespaces().await.expect("namespaces"),
        vec![ns("alpha"), ns("beta")]
    );

    assert!(store.delete_namespace(&ns("alpha")).await.expect("delete"));
    assert!(!dir.path().join("alpha").exists());
    assert!(!store.delete_namespace(&ns("alpha")).await.expect("delete"));
    assert!(store.lookup(&ns("alpha"), &key).await.expect("lookup").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clearing_a_namespace_wins_over_concurrent_writes() {
    let dir = TempDir::new().expect("temp dir");
    let store = Arc::new(DiskStore::new(dir.path()));
    let chapters = ns("chapters");

    for round in 0..20 {
        let seed = RequestKey::get(&format!("/getBookContent?index={round}")).expect("key");
        store.put(&chapters, &seed, html("seed")).await.expect("seed");

        let writers: Vec<_> = (0..8)
            .map(|writer| {
                let store = Arc::clone(&store);
                let chapters = chapters.clone();
                tokio::spawn(async move {
                    let key = RequestKey::get(&format!("/getBookContent?writer={writer}"))
                        .expect("key");
                    // A write racing the clear may land or fail; either is fine.
                    let _ = store.put(&chapters, &key, html("late")).await;
                })
            })
            .collect();

        let cleared = store.delete_namespace(&chapters).await;
        assert!(matches!(cleared, Ok(true)), "round {round}: {cleared:?}");
        assert!(store.lookup(&chapters, &seed).await.expect("lookup").is_none());

        for writer in writers {
            writer.await.expect("writer task");
        }
    }

    let names = store.namespaces().await.expect("namespaces");
    assert!(names.iter().all(|name| *name == chapters), "{names:?}");
}

#[tokio::test]
async fn missing_root_has_no_namespaces() {
    let dir = TempDir::new().expect("temp dir");
    let store = DiskStore::new(dir.path().join("never-created"));
    assert!(store.namespaces().await.expect("namespaces").is_empty());
}

#[tokio::test]
async fn version_bump_prunes_old_static_namespace_across_restarts() {
    let dir = TempDir::new().expect("temp dir");
    let upstream = shell_upstream();
    upstream.respond_text("/getBookContent?index=7", "chapter seven");

    let v1_config = disk_config(&dir, "v1");
    let v1 = Worker::new(
        v1_config.clone(),
        v1_config.cache.open_store(),
        upstream.clone(),
    );
    v1.install().await.expect("install v1");
    v1.activate().await.expect("activate v1");
    v1.fetch(&get("/getBookContent?index=7")).await;
    assert!(v1.shutdown(std::time::Duration::from_secs(1)).await);

    let v2_config = disk_config(&dir, "v2");
    let v2 = Worker::new(
        v2_config.clone(),
        v2_config.cache.open_store(),
        upstream.clone(),
    );
    v2.install().await.expect("install v2");
    let pruned = v2.activate().await.expect("activate v2");
    assert_eq!(pruned, vec![ns("shelfcache-static-v1")]);
    assert!(!dir.path().join("shelfcache-static-v1").exists());

    upstream.set_online(false);
    let chapter = v2.fetch(&get("/getBookContent?index=7")).await;
    assert_eq!(body_text(&chapter), "chapter seven");
}

#[tokio::test]
async fn restart_of_same_version_installs_offline_by_reuse() {
    let dir = TempDir::new().expect("temp dir");
    let upstream = shell_upstream();
    let config = disk_config(&dir, "v1");

    let first = Worker::new(config.clone(), config.cache.open_store(), upstream.clone());
    assert_eq!(
        first.install().await.expect("install"),
        InstallOutcome::Fetched(3)
    );

    upstream.set_online(false);
    let second = Worker::new(config.clone(), config.cache.open_store(), upstream);
    assert_eq!(
        second.install().await.expect("install by reuse"),
        InstallOutcome::Reused(3)
    );
    second.activate().await.expect("activate");

    let shell = second.fetch(&get("/index.html")).await;
    assert_eq!(body_text(&shell), "shell");
}
