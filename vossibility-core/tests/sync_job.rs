use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use vossibility_core::contract::{MockUpstream, PageRequest};
use vossibility_core::error::SyncError;
use vossibility_core::sink::MemorySink;
use vossibility_core::store::TransformingStore;
use vossibility_core::sync::{blob_from_item, SyncJob, SyncOptions};
use vossibility_core::transform::Transformations;
use vossibility_core::{Destination, EventKind, Repository, StateFilter};

/// Issue history of `n` items; every third one is a pull request.
fn history(n: u64) -> Vec<Value> {
    (1..=n)
        .map(|number| {
            let mut item = json!({
                "number": number,
                "title": format!("item {number}"),
                "state": "open",
                "updated_at": "2015-10-16T10:00:00Z"
            });
            if number % 3 == 0 {
                item["pull_request"] = json!({"url": format!("https://api.github.com/pulls/{number}")});
            }
            item
        })
        .collect()
}

fn page_of(items: &[Value], page: PageRequest) -> Vec<Value> {
    let start = (page.from - 1) as usize;
    let end = (start + page.per_page as usize).min(items.len());
    items.get(start..end).map(<[Value]>::to_vec).unwrap_or_default()
}

fn serve_history(upstream: &mut MockUpstream, items: Vec<Value>, expected_pages: usize) {
    upstream
        .expect_list_issues()
        .times(expected_pages)
        .returning(move |_, _, page| Ok(page_of(&items, page)));
}

fn options(per_page: u32) -> SyncOptions {
    SyncOptions {
        per_page,
        ..SyncOptions::default()
    }
}

fn job(upstream: MockUpstream, sink: Arc<MemorySink>, options: SyncOptions) -> SyncJob<MockUpstream, MemorySink> {
    let store = Arc::new(TransformingStore::new(sink, Transformations::default()));
    SyncJob::new(Arc::new(upstream), store, options)
}

#[tokio::test]
async fn test_pagination_terminates_after_confirming_exhaustion() {
    // (items, page size, expected requests = ceil(N/P) + 1)
    let cases = [(7u64, 3u32, 4usize), (6, 3, 3), (0, 5, 1), (1, 100, 2)];

    for (n, per_page, expected_pages) in cases {
        let mut upstream = MockUpstream::new();
        serve_history(&mut upstream, history(n), expected_pages);
        let sink = Arc::new(MemorySink::new());

        let report = job(upstream, sink.clone(), options(per_page))
            .run(&[Repository::new("docker", "docker")])
            .await;

        assert!(report.is_success(), "n={n} per_page={per_page}");
        let repo = &report.repositories[0];
        assert_eq!(repo.pages, expected_pages as u64, "n={n} per_page={per_page}");
        assert_eq!(repo.indexed, n);
        assert_eq!(repo.next_cursor, n + 1);
        assert_eq!(sink.documents(Destination::Snapshot).await.len(), n as usize);
        assert!(sink.documents(Destination::Live).await.is_empty());
    }
}

#[tokio::test]
async fn test_snapshot_documents_are_keyed_by_number_and_kind_is_inferred() {
    let mut upstream = MockUpstream::new();
    serve_history(&mut upstream, history(3), 2);
    let sink = Arc::new(MemorySink::new());

    job(upstream, sink.clone(), options(10))
        .run(&[Repository::new("docker", "machine")])
        .await;

    let issue = sink.get(Destination::Snapshot, "docker/machine/1").await.unwrap();
    assert_eq!(issue.kind, EventKind::Issue);
    let pull = sink.get(Destination::Snapshot, "docker/machine/3").await.unwrap();
    assert_eq!(pull.kind, EventKind::PullRequest);
    assert_eq!(pull.timestamp.to_rfc3339(), "2015-10-16T10:00:00+00:00");
}

#[tokio::test]
async fn test_resync_overwrites_snapshot_documents() {
    let mut upstream = MockUpstream::new();
    let mut items = history(2);
    serve_history(&mut upstream, items.clone(), 2);
    let sink = Arc::new(MemorySink::new());
    let repos = [Repository::new("docker", "docker")];
    job(upstream, sink.clone(), options(10)).run(&repos).await;

    items[0]["state"] = json!("closed");
    let mut upstream = MockUpstream::new();
    serve_history(&mut upstream, items, 2);
    job(upstream, sink.clone(), options(10)).run(&repos).await;

    let docs = sink.documents(Destination::Snapshot).await;
    assert_eq!(docs.len(), 2);
    let first = sink.get(Destination::Snapshot, "docker/docker/1").await.unwrap();
    assert_eq!(first.data["state"], "closed");
}

#[tokio::test]
async fn test_malformed_items_are_skipped() {
    let mut items = history(4);
    items[1] = json!({"title": "no number here"});
    let mut upstream = MockUpstream::new();
    serve_history(&mut upstream, items, 2);
    let sink = Arc::new(MemorySink::new());

    let report = job(upstream, sink.clone(), options(10))
        .run(&[Repository::new("docker", "docker")])
        .await;

    let repo = &report.repositories[0];
    assert!(repo.error.is_none());
    assert_eq!(repo.indexed, 3);
    assert_eq!(repo.skipped, 1);
    assert_eq!(repo.next_cursor, 5);
    assert_eq!(sink.documents(Destination::Snapshot).await.len(), 3);
}

#[tokio::test]
async fn test_fetch_failure_aborts_repository_and_reports_cursor() {
    let items = history(10);
    let mut upstream = MockUpstream::new();
    upstream
        .expect_list_issues()
        .withf(|repo, _, _| repo.repo == "broken")
        .times(2)
        .returning(move |_, _, page| {
            if page.from == 1 {
                Ok(page_of(&items, page))
            } else {
                Err("502 bad gateway".into())
            }
        });
    let healthy = history(2);
    upstream
        .expect_list_issues()
        .withf(|repo, _, _| repo.repo == "healthy")
        .times(2)
        .returning(move |_, _, page| Ok(page_of(&healthy, page)));
    let sink = Arc::new(MemorySink::new());

    let report = job(upstream, sink.clone(), options(4))
        .run(&[Repository::new("docker", "broken"), Repository::new("docker", "healthy")])
        .await;

    assert!(!report.is_success());
    let broken = &report.repositories[0];
    assert_eq!(broken.indexed, 4);
    assert_eq!(broken.next_cursor, 5);
    assert!(matches!(
        broken.error,
        Some(SyncError::Fetch { cursor: 5, .. })
    ));

    let healthy = &report.repositories[1];
    assert!(healthy.error.is_none());
    assert_eq!(healthy.indexed, 2);
    assert_eq!(sink.documents(Destination::Snapshot).await.len(), 6);
}

#[tokio::test]
async fn test_sync_starts_from_offset_with_state_filter() {
    let items = history(6);
    let mut upstream = MockUpstream::new();
    upstream
        .expect_list_issues()
        .withf(|_, state, _| *state == StateFilter::Open)
        .times(2)
        .returning(move |_, _, page| Ok(page_of(&items, page)));
    let sink = Arc::new(MemorySink::new());

    let report = job(
        upstream,
        sink.clone(),
        SyncOptions {
            from: 5,
            state: StateFilter::Open,
            ..options(10)
        },
    )
    .run(&[Repository::new("docker", "docker")])
    .await;

    assert_eq!(report.repositories[0].indexed, 2);
    assert!(sink.get(Destination::Snapshot, "docker/docker/4").await.is_none());
    assert!(sink.get(Destination::Snapshot, "docker/docker/5").await.is_some());
}

#[tokio::test]
async fn test_live_storage_option_is_honoured_and_resync_is_idempotent() {
    let mut upstream = MockUpstream::new();
    // Two runs over the same history, two requests each.
    serve_history(&mut upstream, history(1), 4);
    let sink = Arc::new(MemorySink::new());
    let job = job(
        upstream,
        sink.clone(),
        SyncOptions {
            storage: Destination::Live,
            ..options(10)
        },
    );
    let repositories = [Repository::new("docker", "docker")];

    job.run(&repositories).await;
    job.run(&repositories).await;

    assert!(sink.documents(Destination::Snapshot).await.is_empty());
    let docs = sink.documents(Destination::Live).await;
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, "docker/docker/1/sync-2015-10-16T10:00:00Z");
}

#[tokio::test]
async fn test_updated_item_gets_a_new_live_document() {
    let mut upstream = MockUpstream::new();
    let mut calls = 0;
    upstream.expect_list_issues().times(4).returning(move |_, _, page| {
        calls += 1;
        let updated_at = if calls <= 2 {
            "2015-10-16T10:00:00Z"
        } else {
            "2015-10-17T10:00:00Z"
        };
        let item = json!({"number": 1, "title": "item 1", "updated_at": updated_at});
        Ok(page_of(&[item], page))
    });
    let sink = Arc::new(MemorySink::new());
    let job = job(
        upstream,
        sink.clone(),
        SyncOptions {
            storage: Destination::Live,
            ..options(10)
        },
    );
    let repositories = [Repository::new("docker", "docker")];

    job.run(&repositories).await;
    job.run(&repositories).await;

    assert_eq!(sink.documents(Destination::Live).await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sleeps_between_pages() {
    let mut upstream = MockUpstream::new();
    serve_history(&mut upstream, history(4), 3);
    let sink = Arc::new(MemorySink::new());
    let started = tokio::time::Instant::now();

    job(
        upstream,
        sink,
        SyncOptions {
            sleep_per_page: Duration::from_secs(10),
            ..options(2)
        },
    )
    .run(&[Repository::new("docker", "docker")])
    .await;

    assert!(started.elapsed() >= Duration::from_secs(20));
}

#[test]
fn test_blob_from_item_ignores_null_pull_request() {
    let blob = blob_from_item(json!({"number": 1, "pull_request": null}));
    assert_eq!(blob.kind, EventKind::Issue);
    assert_eq!(blob.delivery, "sync");
}
