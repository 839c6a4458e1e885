//! Integration tests for repository CRUD and record rules.
//!
//! Exercises the repository layer over an in-memory store:
//! - Create/get round-trips and insertion-ordered listing
//! - Unique key and reference violations
//! - Derived field recomputation and lifecycle immutability
//! - Annotation append and upload bookkeeping

mod common;

use assert_matches::assert_matches;
use chrono::Utc;
use occtrack_core::annotation::AnnotationKind;
use occtrack_core::error::CoreError;
use occtrack_core::lifecycle::{DetectionStatus, ErrorDetails, ERROR_ANALYSIS_FAILED};
use occtrack_core::occlusion::{DetectionResults, OcclusionLevel};
use occtrack_core::upload::MediaKind;
use occtrack_db::models::{CreateAnnotation, DetectionPatch, UpdateUser};
use occtrack_db::{DbError, HistoryQuery};

use common::*;

fn core_err(err: DbError) -> CoreError {
    match err {
        DbError::Core(e) => e,
        other => panic!("expected a domain error, got {other:?}"),
    }
}

fn note(user_id: &str, comment: &str) -> CreateAnnotation {
    CreateAnnotation {
        user_id: user_id.to_string(),
        kind: AnnotationKind::Note,
        vehicle_id: None,
        comment: Some(comment.to_string()),
        payload: None,
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[tokio::test]
async fn user_create_get_round_trip() {
    let (_, repos) = memory_repos().await;
    let created = repos.users.create(new_user("alice")).await.unwrap();
    let fetched = repos.users.get(&created.meta.id).await.unwrap();
    assert_eq!(created, fetched);
    assert_eq!(created.meta.created_at, created.meta.updated_at);
}

#[tokio::test]
async fn duplicate_email_is_rejected_case_insensitively() {
    let (_, repos) = memory_repos().await;
    repos.users.create(new_user("alice")).await.unwrap();

    let mut dup = new_user("alice2");
    dup.email = "ALICE@example.com".to_string();
    let err = core_err(repos.users.create(dup).await.unwrap_err());
    assert_matches!(err, CoreError::ConstraintViolation(_));

    let found = repos.users.find_by_email(" Alice@Example.com ").await.unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn update_rechecks_uniqueness_and_bumps_updated_at() {
    let (_, repos) = memory_repos().await;
    let alice = repos.users.create(new_user("alice")).await.unwrap();
    let bob = repos.users.create(new_user("bob")).await.unwrap();

    let err = repos
        .users
        .update(
            &bob.meta.id,
            UpdateUser {
                email: Some(alice.email.clone()),
                display_name: None,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(core_err(err), CoreError::ConstraintViolation(_));

    let renamed = repos
        .users
        .update(
            &bob.meta.id,
            UpdateUser {
                email: None,
                display_name: Some("Bob".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(renamed.display_name.as_deref(), Some("Bob"));
    assert_eq!(renamed.meta.created_at, bob.meta.created_at);
    assert!(renamed.meta.updated_at >= bob.meta.updated_at);
}

#[tokio::test]
async fn get_missing_is_not_found() {
    let (_, repos) = memory_repos().await;
    let err = repos.users.get("nope").await.unwrap_err();
    assert!(err.is_not_found());
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_infers_media_kind_and_lowercases_checksum() {
    let (_, repos) = memory_repos().await;
    let mut input = new_upload("u1", 7);
    input.checksum = input.checksum.to_uppercase();
    input.tags = vec![" b ".to_string(), "a".to_string(), "b".to_string()];

    let upload = repos.uploads.create(input).await.unwrap();
    assert_eq!(upload.media_kind, MediaKind::Image);
    assert_eq!(upload.checksum, checksum(7));
    assert_eq!(upload.tags, vec!["a", "b"]);
}

#[tokio::test]
async fn list_by_user_keeps_insertion_order() {
    let (_, repos) = memory_repos().await;
    let a = repos.uploads.create(new_upload("u1", 1)).await.unwrap();
    repos.uploads.create(new_upload("u2", 2)).await.unwrap();
    let c = repos.uploads.create(new_upload("u1", 3)).await.unwrap();

    let ids: Vec<_> = repos
        .uploads
        .list_by_user("u1")
        .await
        .unwrap()
        .into_iter()
        .map(|u| u.meta.id)
        .collect();
    assert_eq!(ids, vec![a.meta.id, c.meta.id]);
    assert_eq!(repos.uploads.count().await.unwrap(), 3);
}

#[tokio::test]
async fn record_access_counts_downloads() {
    let (_, repos) = memory_repos().await;
    let upload = repos.uploads.create(new_upload("u1", 1)).await.unwrap();
    let now = Utc::now();
    repos.uploads.record_access(&upload.meta.id, now).await.unwrap();
    let after = repos.uploads.record_access(&upload.meta.id, now).await.unwrap();
    assert_eq!(after.download_count, 2);
    assert_eq!(after.last_accessed_at, Some(now));
}

#[tokio::test]
async fn tags_freeze_once_a_detection_references_the_upload() {
    let (_, repos) = memory_repos().await;
    let upload = repos.uploads.create(new_upload("u1", 1)).await.unwrap();
    let tagged = repos
        .uploads
        .set_tags(&upload.meta.id, &["night".to_string()])
        .await
        .unwrap();
    assert_eq!(tagged.tags, vec!["night"]);

    repos
        .detections
        .create(new_detection("u1", &upload.meta.id))
        .await
        .unwrap();
    let err = repos
        .uploads
        .set_tags(&upload.meta.id, &["day".to_string()])
        .await
        .unwrap_err();
    assert_matches!(core_err(err), CoreError::ConstraintViolation(_));

    // Bookkeeping still works.
    assert!(repos
        .uploads
        .record_access(&upload.meta.id, Utc::now())
        .await
        .is_ok());
}

#[tokio::test]
async fn upload_delete_does_not_cascade() {
    let (_, repos) = memory_repos().await;
    let (upload, detection) = seeded_detection(&repos, "u1", 1).await;

    assert!(repos.uploads.delete(&upload.meta.id).await.unwrap());
    assert!(!repos.uploads.delete(&upload.meta.id).await.unwrap());

    let still_there = repos.detections.get(&detection.meta.id).await.unwrap();
    assert_eq!(still_there.upload_id, upload.meta.id);
}

// ---------------------------------------------------------------------------
// Detections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_detection_for_upload_is_constraint_violation() {
    let (_, repos) = memory_repos().await;
    let (upload, _) = seeded_detection(&repos, "u1", 1).await;

    let err = repos
        .detections
        .create(new_detection("u1", &upload.meta.id))
        .await
        .unwrap_err();
    assert_matches!(core_err(err), CoreError::ConstraintViolation(_));
    assert_eq!(repos.detections.count().await.unwrap(), 1);
}

#[tokio::test]
async fn detection_for_missing_upload_is_rejected() {
    let (_, repos) = memory_repos().await;
    let err = repos
        .detections
        .create(new_detection("u1", "missing"))
        .await
        .unwrap_err();
    assert_matches!(core_err(err), CoreError::ConstraintViolation(_));
}

#[tokio::test]
async fn derived_fields_ignore_caller_values() {
    let (_, repos) = memory_repos().await;
    let (_, detection) = seeded_detection(&repos, "u1", 1).await;
    let id = detection.meta.id;

    let mut results = DetectionResults::from_vehicles(
        vec![vehicle("v1", 0.0), vehicle("v2", 55.0), vehicle("v3", 0.0)],
        None,
    );
    results.total_vehicles = 10;
    results.occluded_vehicles = 10;
    results.occlusion_percentage = 99.0;

    repos.detections.transition(&id, DetectionPatch::Start).await.unwrap();
    let done = repos
        .detections
        .transition(&id, DetectionPatch::Complete(results))
        .await
        .unwrap();

    let stored = repos.detections.get(&id).await.unwrap();
    assert_eq!(stored, done);
    let r = stored.results.as_ref().unwrap();
    assert_eq!(r.total_vehicles, 3);
    assert_eq!(r.occluded_vehicles, 1);
    assert_eq!(r.occlusion_percentage, 1.0 / 3.0 * 100.0);
    assert!(!r.vehicles[0].occlusion.is_occluded);
    assert_eq!(stored.status(), DetectionStatus::Completed);
    assert!(stored.job.processing_duration.is_some());
}

#[tokio::test]
async fn analyzer_occlusion_flags_survive_completion() {
    let (_, repos) = memory_repos().await;
    let (_, detection) = seeded_detection(&repos, "u1", 1).await;
    let id = detection.meta.id;

    let mut flagged = vehicle("v1", 0.0);
    flagged.occlusion.is_occluded = true;
    flagged.occlusion.occlusion_level = OcclusionLevel::Heavy;
    let results = DetectionResults::from_vehicles(vec![flagged, vehicle("v2", 0.0)], None);

    repos.detections.transition(&id, DetectionPatch::Start).await.unwrap();
    repos
        .detections
        .transition(&id, DetectionPatch::Complete(results))
        .await
        .unwrap();

    let stored = repos.detections.get(&id).await.unwrap();
    let r = stored.results.as_ref().unwrap();
    assert!(r.vehicles[0].occlusion.is_occluded);
    assert_eq!(r.vehicles[0].occlusion.occlusion_level, OcclusionLevel::Heavy);
    assert_eq!(r.occluded_vehicles, 1);
    assert_eq!(r.occlusion_percentage, 50.0);
}

#[tokio::test]
async fn terminal_detection_refuses_processing_and_stays_untouched() {
    let (_, repos) = memory_repos().await;
    let (_, detection) = seeded_detection(&repos, "u1", 1).await;
    let id = detection.meta.id;

    repos.detections.transition(&id, DetectionPatch::Start).await.unwrap();
    let failed = repos
        .detections
        .transition(
            &id,
            DetectionPatch::Fail(ErrorDetails::new(ERROR_ANALYSIS_FAILED, "boom", Utc::now())),
        )
        .await
        .unwrap();

    let err = repos
        .detections
        .transition(&id, DetectionPatch::Start)
        .await
        .unwrap_err();
    assert_matches!(
        core_err(err),
        CoreError::InvalidTransition {
            from: DetectionStatus::Failed,
            to: DetectionStatus::Processing
        }
    );
    assert_eq!(repos.detections.get(&id).await.unwrap(), failed);
}

#[tokio::test]
async fn annotations_append_after_terminal_state() {
    let (_, repos) = memory_repos().await;
    let (_, detection) = seeded_detection(&repos, "u1", 1).await;
    let id = detection.meta.id;
    repos.detections.transition(&id, DetectionPatch::Cancel).await.unwrap();

    let first = repos
        .detections
        .append_annotation(&id, note("u1", "wrong frame"))
        .await
        .unwrap();
    repos
        .detections
        .append_annotation(&id, note("u1", "second look"))
        .await
        .unwrap();

    let err = repos
        .detections
        .append_annotation(&id, note("someone-else", "hi"))
        .await
        .unwrap_err();
    assert_matches!(core_err(err), CoreError::Forbidden(_));

    let stored = repos.detections.get(&id).await.unwrap();
    assert_eq!(stored.status(), DetectionStatus::Cancelled);
    assert_eq!(stored.annotations.len(), 2);
    assert_eq!(stored.annotations[0], first);
}

#[tokio::test]
async fn history_is_newest_first_with_status_filter() {
    let (_, repos) = memory_repos().await;
    let mut ids = Vec::new();
    for seed in 1..=4 {
        let (_, d) = seeded_detection(&repos, "u1", seed).await;
        ids.push(d.meta.id);
    }
    seeded_detection(&repos, "u2", 9).await;
    repos
        .detections
        .transition(&ids[1], DetectionPatch::Cancel)
        .await
        .unwrap();

    let all = repos
        .detections
        .history("u1", &HistoryQuery::default())
        .await
        .unwrap();
    let got: Vec<_> = all.iter().map(|d| d.meta.id.clone()).collect();
    let mut expected = ids.clone();
    expected.reverse();
    assert_eq!(got, expected);

    let page = repos
        .detections
        .history(
            "u1",
            &HistoryQuery {
                status: None,
                limit: Some(2),
                offset: Some(1),
            },
        )
        .await
        .unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].meta.id, ids[2]);

    let cancelled = repos
        .detections
        .history(
            "u1",
            &HistoryQuery {
                status: Some(DetectionStatus::Cancelled),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].meta.id, ids[1]);
}

#[tokio::test]
async fn stats_summarize_one_user() {
    let (_, repos) = memory_repos().await;
    let (_, a) = seeded_detection(&repos, "u1", 1).await;
    let (_, b) = seeded_detection(&repos, "u1", 2).await;
    seeded_detection(&repos, "u1", 3).await;

    let results = DetectionResults::from_vehicles(vec![vehicle("v1", 50.0), vehicle("v2", 0.0)], None);
    repos.detections.transition(&a.meta.id, DetectionPatch::Start).await.unwrap();
    repos
        .detections
        .transition(&a.meta.id, DetectionPatch::Complete(results))
        .await
        .unwrap();
    repos.detections.transition(&b.meta.id, DetectionPatch::Cancel).await.unwrap();

    let stats = repos.detections.stats("u1").await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.total_vehicles, 2);
    assert_eq!(stats.occluded_vehicles, 1);
    assert_eq!(stats.average_occlusion_percentage, 50.0);
}
