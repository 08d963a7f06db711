//! Resource cache lifecycle tests

use astralbot::fetch::FetchClient;
use astralbot::resources::{ResourceCache, ScopedResources};
use std::time::Duration;
use tempfile::TempDir;

async fn cache() -> (std::sync::Arc<ResourceCache>, TempDir) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let cache = ResourceCache::open(temp.path().join("cache"), FetchClient::new(), Duration::from_secs(5))
        .await
        .unwrap();
    (cache, temp)
}

#[tokio::test]
async fn test_materialize_and_release() {
    let mut server = mockito::Server::new_async().await;
    let _img = server.mock("GET", "/a.png").with_body(b"png-bytes").create_async().await;
    let (cache, _temp) = cache().await;

    let handle = cache
        .materialize(&format!("{}/a.png", server.url()), "a.png")
        .await
        .unwrap();
    assert_eq!(tokio::fs::read(handle.path()).await.unwrap(), b"png-bytes");
    assert!(handle.file_name().ends_with(".png"));

    assert!(cache.release(&handle).await);
    assert!(!cache.release(&handle).await);
    assert!(!handle.path().exists());

    let stats = cache.stats();
    assert_eq!((stats.allocated, stats.released, stats.live), (1, 1, 0));
}

#[tokio::test]
async fn test_failed_download_leaves_nothing() {
    let mut server = mockito::Server::new_async().await;
    let _gone = server.mock("GET", "/gone.png").with_status(404).create_async().await;
    let (cache, _temp) = cache().await;

    let err = cache.materialize(&format!("{}/gone.png", server.url()), "gone.png").await;
    assert!(err.is_err());
    assert_eq!(cache.stats().live, 0);

    let mut entries = tokio::fs::read_dir(cache.dir()).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn test_scope_release_and_detach() {
    let (cache, _temp) = cache().await;
    let mut scope = ScopedResources::new(cache.clone());

    let kept = scope.store_bytes("kept.jpg", b"1").await.unwrap();
    let dropped = scope.store_bytes("dropped.jpg", b"2").await.unwrap();
    assert_eq!(scope.len(), 2);

    assert!(scope.detach(&kept));
    assert!(!scope.detach(&kept));
    assert_eq!(scope.release().await, 1);

    assert!(cache.is_live(&kept));
    assert!(!cache.is_live(&dropped));
    assert!(kept.path().exists());
    assert!(!dropped.path().exists());
}

#[test]
fn test_scope_drop_releases() {
    let (cache, _temp) = tokio_test::block_on(cache());
    let handle = {
        let mut scope = ScopedResources::new(cache.clone());
        tokio_test::block_on(scope.store_bytes("temp.bin", b"abc")).unwrap()
    };
    assert!(!cache.is_live(&handle));
    assert!(!handle.path().exists());
}

#[tokio::test]
async fn test_unique_names() {
    let (cache, _temp) = cache().await;
    let a = cache.allocate("../../etc/passwd");
    let b = cache.allocate("../../etc/passwd");
    assert_ne!(a.path(), b.path());
    assert!(a.path().starts_with(cache.dir()));
    cache.release_all([&a, &b]).await;
    assert_eq!(cache.stats().live, 0);
}
