mod support;

use review_roster::db::{self, PrStatus, ReviewerPicker};
use review_roster::error::Error;
use support::{caller, member, seed_team, test_pool, unique};

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs TEST_DATABASE_URL"]
async fn test_create_returns_open_record() {
    let pool = test_pool().await;
    let (author, pr) = (unique("author"), unique("pr"));
    seed_team(&pool, &unique("Team"), &[member(&author, true)]).await;

    let mut conn = pool.get().await.unwrap();
    let created = db::create_pull_request(&caller(), &pr, "fix", &author, &mut conn)
        .await
        .unwrap();

    assert_eq!(created.id, pr);
    assert_eq!(created.name, "fix");
    assert_eq!(created.author_id, author);
    assert_eq!(created.status, PrStatus::Open);
    assert!(db::is_open(&pr, &mut conn).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs TEST_DATABASE_URL"]
async fn test_duplicate_id_conflicts() {
    let pool = test_pool().await;
    let (author, pr) = (unique("author"), unique("pr"));
    seed_team(&pool, &unique("Team"), &[member(&author, true)]).await;

    let mut conn = pool.get().await.unwrap();
    db::create_pull_request(&caller(), &pr, "fix", &author, &mut conn)
        .await
        .unwrap();
    let again = db::create_pull_request(&caller(), &pr, "fix again", &author, &mut conn).await;

    assert!(matches!(again, Err(Error::Conflict(_))));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs TEST_DATABASE_URL"]
async fn test_author_must_be_active_member() {
    let pool = test_pool().await;
    let (idle, loner) = (unique("idle"), unique("loner"));
    seed_team(&pool, &unique("Team"), &[member(&idle, false)]).await;

    let mut conn = pool.get().await.unwrap();
    db::provision_user(&loner, "Loner", true, &mut conn)
        .await
        .unwrap();

    for author in [idle.as_str(), loner.as_str(), "nobody"] {
        let result =
            db::create_pull_request(&caller(), &unique("pr"), "fix", author, &mut conn).await;
        assert!(
            matches!(result, Err(Error::NotFound(_))),
            "{} should not be able to author",
            author
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs TEST_DATABASE_URL"]
async fn test_merge_unknown_is_not_found() {
    let pool = test_pool().await;
    let mut conn = pool.get().await.unwrap();

    let result = db::merge_pull_request(&caller(), &unique("pr_unknown"), &mut conn).await;
    assert!(matches!(result, Err(Error::NotFound(_))));

    let result = db::full_info(&caller(), &unique("pr_unknown"), &mut conn).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs TEST_DATABASE_URL"]
async fn test_merge_is_idempotent() {
    let pool = test_pool().await;
    let (author, reviewer, pr) = (unique("author"), unique("reviewer"), unique("pr"));
    seed_team(
        &pool,
        &unique("Team"),
        &[member(&author, true), member(&reviewer, true)],
    )
    .await;

    let mut conn = pool.get().await.unwrap();
    db::create_pull_request(&caller(), &pr, "fix", &author, &mut conn)
        .await
        .unwrap();
    let picker = ReviewerPicker::new(Some(1));
    db::assign_reviewers(&caller(), &pr, &author, 2, &picker, &mut conn)
        .await
        .unwrap();

    let first = db::merge_pull_request(&caller(), &pr, &mut conn)
        .await
        .unwrap();
    assert_eq!(first.status, PrStatus::Merged);
    assert!(first.merged_at.is_some());
    assert_eq!(first.assigned_reviewers, vec![reviewer]);

    let second = db::merge_pull_request(&caller(), &pr, &mut conn)
        .await
        .unwrap();
    assert_eq!(second, first);
    assert!(!db::is_open(&pr, &mut conn).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs TEST_DATABASE_URL"]
async fn test_concurrent_merges_agree() {
    let pool = test_pool().await;
    let (author, pr) = (unique("author"), unique("pr"));
    seed_team(&pool, &unique("Team"), &[member(&author, true)]).await;
    {
        let mut conn = pool.get().await.unwrap();
        db::create_pull_request(&caller(), &pr, "fix", &author, &mut conn)
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..6 {
        let pool = pool.clone();
        let pr = pr.clone();
        handles.push(tokio::spawn(async move {
            let mut conn = pool.get().await.unwrap();
            db::merge_pull_request(&caller(), &pr, &mut conn).await
        }));
    }

    let mut merged_at = Vec::new();
    for handle in handles {
        let merged = handle.await.unwrap().unwrap();
        assert_eq!(merged.status, PrStatus::Merged);
        merged_at.push(merged.merged_at.unwrap());
    }
    merged_at.dedup();
    assert_eq!(merged_at.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs TEST_DATABASE_URL"]
async fn test_merged_pull_request_stays_merged() {
    let pool = test_pool().await;
    let (author, r1, r2, pr) = (
        unique("author"),
        unique("r1"),
        unique("r2"),
        unique("pr"),
    );
    seed_team(
        &pool,
        &unique("Team"),
        &[member(&author, true), member(&r1, true), member(&r2, true)],
    )
    .await;

    let mut conn = pool.get().await.unwrap();
    let picker = ReviewerPicker::new(Some(5));
    db::create_pull_request(&caller(), &pr, "fix", &author, &mut conn)
        .await
        .unwrap();
    let assigned = db::assign_reviewers(&caller(), &pr, &author, 1, &picker, &mut conn)
        .await
        .unwrap();
    let merged = db::merge_pull_request(&caller(), &pr, &mut conn)
        .await
        .unwrap();

    let other = if assigned[0] == r1 { &r2 } else { &r1 };
    let reassign = db::reassign_reviewer(&caller(), &pr, &assigned[0], other, &mut conn).await;
    assert!(matches!(reassign, Err(Error::Conflict(_))));

    let assign = db::assign_reviewers(&caller(), &pr, &author, 1, &picker, &mut conn).await;
    assert!(matches!(assign, Err(Error::Conflict(_))));

    let info = db::full_info(&caller(), &pr, &mut conn).await.unwrap();
    assert_eq!(info, merged);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs TEST_DATABASE_URL"]
async fn test_reviews_for_user() {
    let pool = test_pool().await;
    let (author, reviewer) = (unique("author"), unique("reviewer"));
    let (pr1, pr2) = (unique("pr1"), unique("pr2"));
    seed_team(
        &pool,
        &unique("Team"),
        &[member(&author, true), member(&reviewer, true)],
    )
    .await;

    let mut conn = pool.get().await.unwrap();
    let picker = ReviewerPicker::new(None);
    for pr in [&pr1, &pr2] {
        db::create_pull_request(&caller(), pr, "change", &author, &mut conn)
            .await
            .unwrap();
        db::assign_reviewers(&caller(), pr, &author, 1, &picker, &mut conn)
            .await
            .unwrap();
    }
    db::merge_pull_request(&caller(), &pr2, &mut conn)
        .await
        .unwrap();

    let reviews = db::reviews_for_user(&caller(), &reviewer, &mut conn)
        .await
        .unwrap();
    let summary = reviews
        .iter()
        .map(|pr| (pr.id.clone(), pr.status))
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        vec![(pr1, PrStatus::Open), (pr2, PrStatus::Merged)]
    );

    assert!(db::reviews_for_user(&caller(), &author, &mut conn)
        .await
        .unwrap()
        .is_empty());
    assert!(matches!(
        db::reviews_for_user(&caller(), &unique("ghost"), &mut conn).await,
        Err(Error::NotFound(_))
    ));
}
