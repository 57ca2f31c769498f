//! Integration Tests: counter ledger under contention and injected faults
//!
//! The in-memory store runs transactions one at a time, so the concurrent
//! tests here check that queued callers all land; interleaved races are
//! replayed through injected faults. Real contention is covered in
//! `postgres_store_test.rs`.
//!
//! Coverage:
//! - Concurrent likes and comments lose no updates
//! - Stale versions and timeouts are retried to exactly one delta
//! - Exhausted retries roll back the detail row with the counter
//! - A cascade failing before or after the post flag changes nothing
//! - The reconciler repairs like drift and leaves comment counts alone

mod common;

use common::TestWall;
use futures::future::join_all;
use wall_service::domain::FeedScope;
use wall_service::error::ServiceError;
use wall_service::repository::{StoreFault, WallStore};
use wall_service::services::CounterRetryPolicy;
use wall_service::workers::CounterReconciler;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_likes_are_all_counted() {
    let wall = TestWall::new();
    let author = wall.user("author@uni.edu").await;
    let post = wall
        .services
        .posts
        .create_post(author, "Hello", FeedScope::National)
        .await
        .unwrap();

    let post_id = post.id;
    let mut fans = Vec::new();
    for _ in 0..40 {
        fans.push(wall.user("fan@uni.edu").await);
    }

    let handles = fans.iter().map(|&fan| {
        let services = wall.services.clone();
        tokio::spawn(async move { services.likes.toggle_like(post_id, fan).await })
    });
    for result in join_all(handles).await {
        assert!(result.unwrap().unwrap());
    }

    let stored = wall.store.find_post(post.id).await.unwrap().unwrap();
    assert_eq!(stored.like_count, 40);
    assert_eq!(wall.store.like_rows(post.id).await, 40);
    assert_eq!(stored.version, 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_comments_and_toggles() {
    let wall = TestWall::new();
    let author = wall.user("author@uni.edu").await;
    let fan = wall.user("fan@uni.edu").await;
    let post = wall
        .services
        .posts
        .create_post(author, "Hello", FeedScope::National)
        .await
        .unwrap();

    let post_id = post.id;
    let comment_tasks: Vec<_> = (0..20)
        .map(|i| {
            let services = wall.services.clone();
            tokio::spawn(async move {
                services
                    .comments
                    .add_comment(post_id, author, &format!("comment {}", i))
                    .await
                    .map(|_| ())
            })
        })
        .collect();
    // an even number of toggles by one user ends unliked
    let toggle_tasks: Vec<_> = (0..10)
        .map(|_| {
            let services = wall.services.clone();
            tokio::spawn(async move { services.likes.toggle_like(post_id, fan).await.map(|_| ()) })
        })
        .collect();

    for result in join_all(comment_tasks.into_iter().chain(toggle_tasks)).await {
        result.unwrap().unwrap();
    }

    let stored = wall.store.find_post(post.id).await.unwrap().unwrap();
    assert_eq!(stored.comment_count, 20);
    assert_eq!(stored.like_count, 0);
    assert_eq!(wall.store.like_rows(post.id).await, 0);
}

#[tokio::test]
async fn test_retry_applies_exactly_one_delta() {
    let wall = TestWall::with_policy(CounterRetryPolicy::immediate(4));
    let author = wall.user("author@uni.edu").await;
    let post = wall
        .services
        .posts
        .create_post(author, "Hello", FeedScope::National)
        .await
        .unwrap();

    wall.store
        .inject_faults(
            post.id,
            [
                StoreFault::StaleVersion,
                StoreFault::Timeout,
                StoreFault::StaleVersion,
            ],
        )
        .await;
    wall.services
        .comments
        .add_comment(post.id, author, "made it")
        .await
        .unwrap();

    let stored = wall.store.find_post(post.id).await.unwrap().unwrap();
    assert_eq!(stored.comment_count, 1);
    assert_eq!(wall.store.all_comments(post.id).await.len(), 1);
    assert_eq!(wall.store.pending_faults(post.id).await, 0);
}

#[tokio::test]
async fn test_exhausted_retries_roll_back_everything() {
    let wall = TestWall::with_policy(CounterRetryPolicy::immediate(3));
    let author = wall.user("author@uni.edu").await;
    let fan = wall.user("fan@uni.edu").await;
    let post = wall
        .services
        .posts
        .create_post(author, "Hello", FeedScope::National)
        .await
        .unwrap();
    let comment = wall
        .services
        .comments
        .add_comment(post.id, author, "keep me")
        .await
        .unwrap();

    wall.store
        .inject_faults(post.id, std::iter::repeat(StoreFault::Timeout).take(3))
        .await;
    let err = wall.services.likes.toggle_like(post.id, fan).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict { post_id, .. } if post_id == post.id));
    assert_eq!(wall.store.like_rows(post.id).await, 0);

    wall.store
        .inject_faults(post.id, std::iter::repeat(StoreFault::StaleVersion).take(3))
        .await;
    let err = wall
        .services
        .comments
        .hide_comment(post.id, comment.id, author)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict { .. }));
    assert!(!wall.store.all_comments(post.id).await[0].hidden);

    let stored = wall.store.find_post(post.id).await.unwrap().unwrap();
    assert_eq!((stored.like_count, stored.comment_count), (0, 1));

    // the store recovers once the faults are gone
    assert!(wall.services.likes.toggle_like(post.id, fan).await.unwrap());
}

#[tokio::test]
async fn test_failed_cascade_changes_nothing() {
    let wall = TestWall::with_policy(CounterRetryPolicy::immediate(2));
    let author = wall.user("author@uni.edu").await;
    let post = wall
        .services
        .posts
        .create_post(author, "Hello", FeedScope::National)
        .await
        .unwrap();
    for text in ["a", "b", "c"] {
        wall.services
            .comments
            .add_comment(post.id, author, text)
            .await
            .unwrap();
    }

    wall.store
        .inject_faults(post.id, [StoreFault::StaleVersion, StoreFault::StaleVersion])
        .await;
    let err = wall.services.posts.hide_post(post.id, author).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict { .. }));

    let stored = wall.store.find_post(post.id).await.unwrap().unwrap();
    assert!(!stored.hidden);
    assert!(wall
        .store
        .all_comments(post.id)
        .await
        .iter()
        .all(|c| !c.hidden));
}

#[tokio::test]
async fn test_cascade_failure_after_post_flag_rolls_back() {
    let wall = TestWall::new();
    let author = wall.user("author@uni.edu").await;
    let post = wall
        .services
        .posts
        .create_post(author, "Hello", FeedScope::National)
        .await
        .unwrap();
    for text in ["a", "b", "c"] {
        wall.services
            .comments
            .add_comment(post.id, author, text)
            .await
            .unwrap();
    }

    // the post CAS succeeds, then the bulk comment update times out
    wall.store
        .inject_faults(post.id, [StoreFault::CascadeTimeout])
        .await;
    let err = wall.services.posts.hide_post(post.id, author).await.unwrap_err();
    assert!(matches!(err, ServiceError::Store(_)));
    assert_eq!(wall.store.pending_faults(post.id).await, 0);

    let stored = wall.store.find_post(post.id).await.unwrap().unwrap();
    assert!(!stored.hidden);
    assert_eq!((stored.comment_count, stored.version), (3, 3));
    assert!(wall
        .store
        .all_comments(post.id)
        .await
        .iter()
        .all(|c| !c.hidden && c.version == 0));

    // and the same cascade goes through once the store recovers
    let hidden = wall.services.posts.hide_post(post.id, author).await.unwrap();
    assert!(hidden.hidden);
    assert!(wall
        .store
        .all_comments(post.id)
        .await
        .iter()
        .all(|c| c.hidden));
}

#[tokio::test]
async fn test_reconciler_repairs_forced_drift() {
    let wall = TestWall::new();
    let author = wall.user("author@uni.edu").await;
    let fan = wall.user("fan@uni.edu").await;
    let svc = &wall.services;

    let post = svc
        .posts
        .create_post(author, "Hello", FeedScope::National)
        .await
        .unwrap();
    svc.comments.add_comment(post.id, author, "x").await.unwrap();
    svc.comments.add_comment(post.id, author, "y").await.unwrap();
    svc.likes.toggle_like(post.id, fan).await.unwrap();

    let mut drifted = wall.store.find_post(post.id).await.unwrap().unwrap();
    drifted.like_count = 7;
    wall.store.force_post(drifted).await;

    let reconciler = CounterReconciler::new(std::sync::Arc::new(wall.store.clone()), 100);
    let report = reconciler.run_once().await.unwrap();
    assert_eq!((report.scanned, report.repaired), (1, 1));

    let repaired = wall.store.find_post(post.id).await.unwrap().unwrap();
    assert_eq!((repaired.like_count, repaired.comment_count), (1, 2));
}

#[tokio::test]
async fn test_reconciler_keeps_count_after_cascade() {
    let wall = TestWall::new();
    let author = wall.user("author@uni.edu").await;
    let svc = &wall.services;

    let post = svc
        .posts
        .create_post(author, "Hello", FeedScope::National)
        .await
        .unwrap();
    let first = svc.comments.add_comment(post.id, author, "1").await.unwrap();
    svc.comments.add_comment(post.id, author, "2").await.unwrap();
    svc.comments.add_comment(post.id, author, "3").await.unwrap();
    svc.comments
        .hide_comment(post.id, first.id, author)
        .await
        .unwrap();
    svc.posts.hide_post(post.id, author).await.unwrap();
    svc.posts.unhide_post(post.id, author).await.unwrap();

    // unhide_post restores every comment but not the count
    let before = wall.store.find_post(post.id).await.unwrap().unwrap();
    assert_eq!(before.comment_count, 2);
    assert!(wall.store.all_comments(post.id).await.iter().all(|c| !c.hidden));

    let reconciler = CounterReconciler::new(std::sync::Arc::new(wall.store.clone()), 100);
    let report = reconciler.run_once().await.unwrap();
    assert_eq!((report.scanned, report.repaired), (1, 0));

    let after = wall.store.find_post(post.id).await.unwrap().unwrap();
    assert_eq!(after.comment_count, 2);
    assert_eq!(after.version, before.version);
}
