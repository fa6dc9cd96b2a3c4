use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;

use super::*;
use crate::limits::*;

/// 2024-09-02 is a Monday.
const MONDAY: &str = "2024-09-02";

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotguard_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn lab(id: &str) -> Resource {
    Resource {
        id: id.into(),
        name: format!("{id} lab"),
        kind: ResourceKind::Lab,
        capacity: 30,
        location: "Block C".into(),
        status: ResourceStatus::Available,
    }
}

fn class(resource_id: &str, weekday: Weekday, start: Minutes, end: Minutes) -> NewCommitment {
    NewCommitment {
        resource_id: resource_id.into(),
        slot: Slot::Recurring {
            weekday,
            range: TimeRange::new(start, end),
        },
        purpose: "Operating Systems".into(),
        owner_name: "Dr. Rao".into(),
        audience: AudienceScope::Cohort {
            year: 2,
            section: Some("A".into()),
        },
        source: SourceType::Class,
    }
}

fn booking(resource_id: &str, on: &str, start: Minutes, end: Minutes) -> NewCommitment {
    NewCommitment {
        resource_id: resource_id.into(),
        slot: Slot::Dated {
            date: date(on),
            range: TimeRange::new(start, end),
        },
        purpose: "Project demo".into(),
        owner_name: "Student council".into(),
        audience: AudienceScope::All,
        source: SourceType::AdhocBooking,
    }
}

async fn engine_with_lab() -> Engine {
    let engine = Engine::in_memory(EngineSettings::default());
    engine.register_resource(lab("LAB1")).await.unwrap();
    engine
}

async fn engine_with_faculty(settings: EngineSettings) -> Engine {
    let engine = Engine::in_memory(settings);
    engine
        .register_faculty("F1".into(), Some("Dr. Iyer".into()), None)
        .await
        .unwrap();
    engine
}

// ── Registry ─────────────────────────────────────────────

#[tokio::test]
async fn register_and_get_resource() {
    let engine = engine_with_lab().await;
    let got = engine.get_resource("LAB1").await.unwrap();
    assert_eq!(got, lab("LAB1"));
    assert!(matches!(
        engine.get_resource("LAB9").await,
        Err(EngineError::NotFound(Entity::Resource(_)))
    ));
}

#[tokio::test]
async fn register_rejects_duplicates_and_bad_input() {
    let engine = engine_with_lab().await;
    assert!(matches!(
        engine.register_resource(lab("LAB1")).await,
        Err(EngineError::AlreadyExists(Entity::Resource(_)))
    ));

    let mut nameless = lab("LAB2");
    nameless.name = " ".into();
    assert!(matches!(
        engine.register_resource(nameless).await,
        Err(EngineError::Validation(_))
    ));

    let mut empty = lab("LAB3");
    empty.capacity = 0;
    assert!(matches!(
        engine.register_resource(empty).await,
        Err(EngineError::Validation(_))
    ));

    let long_id = "x".repeat(MAX_ID_LEN + 1);
    assert!(matches!(
        engine.register_resource(lab(&long_id)).await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn list_resources_sorted_by_id() {
    let engine = Engine::in_memory(EngineSettings::default());
    for id in ["VENUE", "LAB2", "LAB1"] {
        engine.register_resource(lab(id)).await.unwrap();
    }
    let ids: Vec<_> = engine
        .list_resources()
        .await
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec!["LAB1", "LAB2", "VENUE"]);
}

#[tokio::test]
async fn remove_resource_requires_no_commitments() {
    let engine = engine_with_lab().await;
    let admitted = engine
        .add_commitment(class("LAB1", Weekday::Mon, 540, 600), ConflictPolicy::Reject)
        .await
        .unwrap();
    assert!(matches!(
        engine.remove_resource("LAB1").await,
        Err(EngineError::HasCommitments(_))
    ));
    engine.remove_commitment(admitted.commitment.id).await.unwrap();
    engine.remove_resource("LAB1").await.unwrap();
    assert!(engine.list_resources().await.is_empty());
}

// ── Commitment store ─────────────────────────────────────

#[tokio::test]
async fn add_requires_registered_resource() {
    let engine = Engine::in_memory(EngineSettings::default());
    let err = engine
        .add_commitment(booking("NOPE", MONDAY, 540, 600), ConflictPolicy::Reject)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ResourceUnavailable {
            reason: Unavailable::Missing,
            ..
        }
    ));
}

#[tokio::test]
async fn add_rejects_malformed_range() {
    let engine = engine_with_lab().await;
    for (start, end) in [(600, 600), (660, 600), (1380, 1440)] {
        let err = engine
            .add_commitment(booking("LAB1", MONDAY, start, end), ConflictPolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{start}..{end}: {err}");
    }
}

#[tokio::test]
async fn listing_follows_canonical_order() {
    let engine = Engine::in_memory(EngineSettings::default());
    engine.register_resource(lab("LAB1")).await.unwrap();
    engine.register_resource(lab("LAB2")).await.unwrap();

    let b = engine
        .add_commitment(booking("LAB1", MONDAY, 600, 660), ConflictPolicy::Reject)
        .await
        .unwrap();
    let late = engine
        .add_commitment(class("LAB1", Weekday::Tue, 900, 960), ConflictPolicy::Reject)
        .await
        .unwrap();
    let early = engine
        .add_commitment(class("LAB1", Weekday::Tue, 480, 540), ConflictPolicy::Reject)
        .await
        .unwrap();
    let other = engine
        .add_commitment(class("LAB2", Weekday::Mon, 480, 540), ConflictPolicy::Reject)
        .await
        .unwrap();

    let all: Vec<_> = engine
        .list_commitments(None)
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(
        all,
        vec![
            early.commitment.id,
            late.commitment.id,
            b.commitment.id,
            other.commitment.id
        ]
    );

    let lab2 = engine.list_commitments(Some("LAB2")).await.unwrap();
    assert_eq!(lab2, vec![other.commitment]);
    assert!(engine.list_commitments(Some("LAB9")).await.is_err());
}

#[tokio::test]
async fn remove_unknown_commitment_is_not_found() {
    let engine = engine_with_lab().await;
    let id = ulid::Ulid::new();
    assert!(matches!(
        engine.remove_commitment(id).await,
        Err(EngineError::NotFound(Entity::Commitment(got))) if got == id
    ));
}

// ── Conflict engine: scenarios ───────────────────────────

#[tokio::test]
async fn scenario_a_booking_over_weekly_class_conflicts() {
    let engine = engine_with_lab().await;
    let cls = engine
        .add_commitment(class("LAB1", Weekday::Mon, 540, 600), ConflictPolicy::Reject)
        .await
        .unwrap();

    let err = engine
        .add_commitment(booking("LAB1", MONDAY, 570, 630), ConflictPolicy::Reject)
        .await
        .unwrap_err();
    assert_eq!(err.conflicts(), &[cls.commitment.clone()]);
    assert!(err.to_string().contains(&cls.commitment.id.to_string()));
    assert_eq!(engine.list_commitments(Some("LAB1")).await.unwrap().len(), 1);
}

#[tokio::test]
async fn scenario_b_adjacent_booking_succeeds() {
    let engine = engine_with_lab().await;
    engine
        .add_commitment(class("LAB1", Weekday::Mon, 540, 600), ConflictPolicy::Reject)
        .await
        .unwrap();
    let admitted = engine
        .add_commitment(booking("LAB1", MONDAY, 600, 660), ConflictPolicy::Reject)
        .await
        .unwrap();
    assert!(admitted.warnings.is_empty());
}

#[tokio::test]
async fn scenario_d_maintenance_blocks_new_but_keeps_existing() {
    let engine = engine_with_lab().await;
    let cls = engine
        .add_commitment(class("LAB1", Weekday::Mon, 540, 600), ConflictPolicy::Reject)
        .await
        .unwrap();

    let updated = engine
        .set_resource_status("LAB1", ResourceStatus::Maintenance)
        .await
        .unwrap();
    assert_eq!(updated.status, ResourceStatus::Maintenance);

    let err = engine
        .add_commitment(booking("LAB1", "2024-09-03", 600, 660), ConflictPolicy::Reject)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::ResourceUnavailable {
            reason: Unavailable::Maintenance,
            ..
        }
    ));
    assert_eq!(
        engine.list_commitments(Some("LAB1")).await.unwrap(),
        vec![cls.commitment.clone()]
    );

    engine
        .set_resource_status("LAB1", ResourceStatus::Available)
        .await
        .unwrap();
    engine
        .add_commitment(booking("LAB1", "2024-09-03", 600, 660), ConflictPolicy::Reject)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_e_concurrent_overlapping_bookings_one_wins() {
    for _ in 0..20 {
        let engine = Arc::new(engine_with_lab().await);
        let a = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .add_commitment(booking("LAB1", MONDAY, 600, 720), ConflictPolicy::Reject)
                    .await
            })
        };
        let b = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .add_commitment(booking("LAB1", MONDAY, 600, 720), ConflictPolicy::Reject)
                    .await
            })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::Conflict(list)) if list.len() == 1))
            .count();
        assert_eq!((ok, conflicts), (1, 1));
        assert_eq!(engine.list_commitments(Some("LAB1")).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn admission_is_self_consistent() {
    let engine = engine_with_lab().await;
    let candidate = booking("LAB1", MONDAY, 600, 660);
    let admitted = engine
        .add_commitment(candidate.clone(), ConflictPolicy::Reject)
        .await
        .unwrap();
    let clashes = engine.can_admit("LAB1", &candidate.slot).await.unwrap();
    assert_eq!(clashes, vec![admitted.commitment]);
}

#[tokio::test]
async fn can_admit_reports_free_slot_and_maintenance() {
    let engine = engine_with_lab().await;
    let slot = Slot::Recurring {
        weekday: Weekday::Wed,
        range: TimeRange::new(600, 660),
    };
    assert!(engine.can_admit("LAB1", &slot).await.unwrap().is_empty());
    engine
        .set_resource_status("LAB1", ResourceStatus::Maintenance)
        .await
        .unwrap();
    assert!(matches!(
        engine.can_admit("LAB1", &slot).await,
        Err(EngineError::ResourceUnavailable { .. })
    ));
}

#[tokio::test]
async fn warn_policy_admits_and_returns_clashes() {
    let engine = engine_with_lab().await;
    let first = engine
        .add_commitment(class("LAB1", Weekday::Thu, 540, 660), ConflictPolicy::Reject)
        .await
        .unwrap();
    let second = engine
        .add_commitment(class("LAB1", Weekday::Thu, 600, 720), ConflictPolicy::Warn)
        .await
        .unwrap();
    assert_eq!(second.warnings, vec![first.commitment]);
    assert_eq!(engine.list_commitments(Some("LAB1")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn conflict_lists_every_clash() {
    let engine = engine_with_lab().await;
    let a = engine
        .add_commitment(class("LAB1", Weekday::Mon, 540, 600), ConflictPolicy::Reject)
        .await
        .unwrap();
    let b = engine
        .add_commitment(booking("LAB1", MONDAY, 600, 660), ConflictPolicy::Reject)
        .await
        .unwrap();
    let err = engine
        .add_commitment(booking("LAB1", MONDAY, 560, 640), ConflictPolicy::Reject)
        .await
        .unwrap_err();
    assert_eq!(err.conflicts(), &[a.commitment, b.commitment]);
}

// ── Updates ──────────────────────────────────────────────

#[tokio::test]
async fn update_readmits_excluding_itself() {
    let engine = engine_with_lab().await;
    let a = engine
        .add_commitment(class("LAB1", Weekday::Mon, 540, 600), ConflictPolicy::Reject)
        .await
        .unwrap();
    let b = engine
        .add_commitment(class("LAB1", Weekday::Mon, 600, 660), ConflictPolicy::Reject)
        .await
        .unwrap();

    let widened = CommitmentPatch {
        slot: Some(Slot::Recurring {
            weekday: Weekday::Mon,
            range: TimeRange::new(540, 610),
        }),
        ..Default::default()
    };
    let err = engine
        .update_commitment(a.commitment.id, widened, ConflictPolicy::Reject)
        .await
        .unwrap_err();
    assert_eq!(err.conflicts(), &[b.commitment.clone()]);

    let shifted = CommitmentPatch {
        slot: Some(Slot::Recurring {
            weekday: Weekday::Mon,
            range: TimeRange::new(530, 590),
        }),
        purpose: Some("Networks".into()),
        ..Default::default()
    };
    let updated = engine
        .update_commitment(a.commitment.id, shifted, ConflictPolicy::Reject)
        .await
        .unwrap();
    assert_eq!(updated.commitment.purpose, "Networks");
    assert_eq!(updated.commitment.range(), TimeRange::new(530, 590));
    assert_eq!(
        engine.get_commitment(a.commitment.id).await.unwrap(),
        updated.commitment
    );
}

#[tokio::test]
async fn update_moves_between_resources() {
    let engine = engine_with_lab().await;
    engine.register_resource(lab("LAB2")).await.unwrap();
    let blocker = engine
        .add_commitment(class("LAB2", Weekday::Fri, 600, 660), ConflictPolicy::Reject)
        .await
        .unwrap();
    let moving = engine
        .add_commitment(class("LAB1", Weekday::Fri, 600, 660), ConflictPolicy::Reject)
        .await
        .unwrap();

    let to_lab2 = CommitmentPatch {
        resource_id: Some("LAB2".into()),
        ..Default::default()
    };
    let err = engine
        .update_commitment(moving.commitment.id, to_lab2.clone(), ConflictPolicy::Reject)
        .await
        .unwrap_err();
    assert_eq!(err.conflicts(), &[blocker.commitment.clone()]);

    engine.remove_commitment(blocker.commitment.id).await.unwrap();
    let moved = engine
        .update_commitment(moving.commitment.id, to_lab2, ConflictPolicy::Reject)
        .await
        .unwrap();
    assert_eq!(moved.commitment.resource_id, "LAB2");
    assert!(engine.list_commitments(Some("LAB1")).await.unwrap().is_empty());
    assert_eq!(
        engine.list_commitments(Some("LAB2")).await.unwrap(),
        vec![moved.commitment.clone()]
    );
    engine.remove_commitment(moved.commitment.id).await.unwrap();
    engine.remove_resource("LAB2").await.unwrap();
}

#[tokio::test]
async fn update_into_maintenance_is_refused() {
    let engine = engine_with_lab().await;
    let c = engine
        .add_commitment(booking("LAB1", MONDAY, 600, 660), ConflictPolicy::Reject)
        .await
        .unwrap();
    engine
        .set_resource_status("LAB1", ResourceStatus::Maintenance)
        .await
        .unwrap();
    let patch = CommitmentPatch {
        purpose: Some("Rescheduled demo".into()),
        ..Default::default()
    };
    assert!(matches!(
        engine
            .update_commitment(c.commitment.id, patch, ConflictPolicy::Reject)
            .await,
        Err(EngineError::ResourceUnavailable { .. })
    ));
    engine.remove_commitment(c.commitment.id).await.unwrap();
}

#[tokio::test]
async fn update_moves_toward_a_lower_id() {
    let engine = engine_with_lab().await;
    engine.register_resource(lab("LAB0")).await.unwrap();
    let c = engine
        .add_commitment(booking("LAB1", MONDAY, 600, 660), ConflictPolicy::Reject)
        .await
        .unwrap()
        .commitment;
    let patch = CommitmentPatch {
        resource_id: Some("LAB0".into()),
        purpose: Some("Moved demo".into()),
        ..Default::default()
    };
    let moved = engine
        .update_commitment(c.id, patch, ConflictPolicy::Reject)
        .await
        .unwrap()
        .commitment;
    assert_eq!((moved.resource_id.as_str(), moved.purpose.as_str()), ("LAB0", "Moved demo"));
    assert_eq!(engine.get_commitment(c.id).await.unwrap(), moved);
    assert_eq!(engine.store().resource_for_commitment(&c.id).as_deref(), Some("LAB0"));
}

/// Queue a move and a second operation behind a held lock on LAB1, then
/// release it. The move runs first; the second operation must follow the
/// commitment to LAB2 instead of reporting it missing.
async fn behind_a_move<T, F>(op: impl FnOnce(Arc<Engine>, CommitmentId) -> F) -> (Commitment, T)
where
    F: std::future::Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let engine = Arc::new(engine_with_lab().await);
    engine.register_resource(lab("LAB2")).await.unwrap();
    let id = engine
        .add_commitment(class("LAB1", Weekday::Tue, 600, 660), ConflictPolicy::Reject)
        .await
        .unwrap()
        .commitment
        .id;

    let held = engine.store().get_resource("LAB1").unwrap().write_owned().await;
    let mover = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let patch = CommitmentPatch {
                resource_id: Some("LAB2".into()),
                ..Default::default()
            };
            engine.update_commitment(id, patch, ConflictPolicy::Reject).await
        })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let follower = tokio::spawn(op(engine.clone(), id));
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    drop(held);

    let moved = mover.await.unwrap().unwrap().commitment;
    (moved, follower.await.unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remove_follows_a_concurrent_move() {
    let (moved, removed) = behind_a_move(|engine, id| async move {
        let removed = engine.remove_commitment(id).await;
        (removed, engine.list_commitments(Some("LAB2")).await.unwrap())
    })
    .await;
    let (removed, left_on_lab2) = removed;
    assert_eq!(removed.unwrap(), moved);
    assert!(left_on_lab2.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn get_follows_a_concurrent_move() {
    let (moved, fetched) =
        behind_a_move(|engine, id| async move { engine.get_commitment(id).await }).await;
    assert_eq!(fetched.unwrap(), moved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn update_follows_a_concurrent_move() {
    let (moved, updated) = behind_a_move(|engine, id| async move {
        let patch = CommitmentPatch {
            purpose: Some("Distributed Systems".into()),
            ..Default::default()
        };
        engine.update_commitment(id, patch, ConflictPolicy::Reject).await
    })
    .await;
    let updated = updated.unwrap().commitment;
    assert_eq!(updated.resource_id, "LAB2");
    assert_eq!(updated.slot, moved.slot);
    assert_eq!(updated.purpose, "Distributed Systems");
}

// ── Grid report ──────────────────────────────────────────

#[tokio::test]
async fn grid_report_is_deterministic() {
    let engine = Engine::in_memory(EngineSettings::default());
    for id in ["LAB2", "LAB1"] {
        engine.register_resource(lab(id)).await.unwrap();
        for (start, end) in [(540, 600), (570, 630), (620, 700), (800, 860), (830, 900)] {
            engine
                .add_commitment(class(id, Weekday::Wed, start, end), ConflictPolicy::Warn)
                .await
                .unwrap();
        }
        engine
            .add_commitment(booking(id, "2024-09-04", 850, 880), ConflictPolicy::Warn)
            .await
            .unwrap();
    }

    let first = engine.find_all_conflicts(None).await.unwrap();
    let second = engine.find_all_conflicts(None).await.unwrap();
    assert_eq!(first, second);

    let keys: Vec<_> = first
        .iter()
        .map(|g| (g.resource_id.as_str(), g.day, g.window, g.commitments.len()))
        .collect();
    let wed = DayKey::Weekday(Weekday::Wed);
    let wed_date = DayKey::Date(date("2024-09-04"));
    assert_eq!(
        keys,
        vec![
            ("LAB1", wed, TimeRange::new(540, 700), 3),
            ("LAB1", wed, TimeRange::new(800, 900), 2),
            ("LAB1", wed_date, TimeRange::new(800, 900), 3),
            ("LAB2", wed, TimeRange::new(540, 700), 3),
            ("LAB2", wed, TimeRange::new(800, 900), 2),
            ("LAB2", wed_date, TimeRange::new(800, 900), 3),
        ]
    );

    let only_lab2 = engine.find_all_conflicts(Some("LAB2")).await.unwrap();
    assert_eq!(only_lab2, first[3..].to_vec());
}

#[tokio::test]
async fn grid_report_unknown_resource() {
    let engine = Engine::in_memory(EngineSettings::default());
    assert!(matches!(
        engine.find_all_conflicts(Some("LAB1")).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Workload ledger ──────────────────────────────────────

#[tokio::test]
async fn scenario_c_bands_follow_allocation() {
    let engine = engine_with_faculty(EngineSettings::default()).await;
    for i in 0..3 {
        engine.assign("F1", &format!("EV{i}"), None).await.unwrap();
    }
    let snap = engine.workload_snapshot("F1").await.unwrap();
    assert_eq!((snap.allocated_points, snap.band), (30, Band::Available));

    for i in 3..10 {
        engine.assign("F1", &format!("EV{i}"), None).await.unwrap();
    }
    let snap = engine.workload_snapshot("F1").await.unwrap();
    assert_eq!(snap.allocated_points, 100);
    assert_eq!(snap.capacity_points, 100);
    assert_eq!(snap.utilization_percent, 100);
    assert_eq!(snap.band, Band::Overloaded);
    assert_eq!(snap.assigned_event_ids.len(), 10);
}

#[tokio::test]
async fn assign_is_not_double_counted() {
    let engine = engine_with_faculty(EngineSettings::default()).await;
    engine.assign("F1", "EV1", Some(15)).await.unwrap();
    assert!(matches!(
        engine.assign("F1", "EV1", Some(15)).await,
        Err(EngineError::AlreadyAssigned { .. })
    ));
    assert_eq!(
        engine.workload_snapshot("F1").await.unwrap().allocated_points,
        15
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assigns_of_one_event_count_once() {
    for _ in 0..20 {
        let engine = Arc::new(engine_with_faculty(EngineSettings::default()).await);
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.assign("F1", "FEST", Some(12)).await })
            })
            .collect();
        let mut results = Vec::new();
        for t in tasks {
            results.push(t.await.unwrap());
        }
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::AlreadyAssigned { .. })))
            .count();
        assert_eq!((ok, duplicates), (1, 3));
        let snap = engine.workload_snapshot("F1").await.unwrap();
        assert_eq!(snap.allocated_points, 12);
        assert_eq!(snap.assigned_event_ids, vec!["FEST"]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assigns_of_distinct_events_all_land() {
    let engine = Arc::new(engine_with_faculty(EngineSettings::default()).await);
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.assign("F1", &format!("EV{i:02}"), Some(3)).await })
        })
        .collect();
    for t in tasks {
        t.await.unwrap().unwrap();
    }
    let snap = engine.workload_snapshot("F1").await.unwrap();
    assert_eq!(snap.allocated_points, 48);
    assert_eq!(snap.assigned_event_ids.len(), 16);
}

#[tokio::test]
async fn workload_is_additive() {
    let engine = engine_with_faculty(EngineSettings::default()).await;
    let weights = [10, 5, 25, 7, 3];
    for (i, w) in weights.iter().enumerate() {
        engine.assign("F1", &format!("EV{i}"), Some(*w)).await.unwrap();
    }
    assert_eq!(
        engine.workload_snapshot("F1").await.unwrap().allocated_points,
        weights.iter().sum::<u32>()
    );

    let snap = engine.unassign("F1", "EV2").await.unwrap();
    assert_eq!(snap.allocated_points, 25);
    let snap = engine.unassign("F1", "EV0").await.unwrap();
    assert_eq!(snap.allocated_points, 15);
    assert_eq!(snap.assigned_event_ids, vec!["EV1", "EV3", "EV4"]);

    assert!(matches!(
        engine.unassign("F1", "EV2").await,
        Err(EngineError::NotAssigned { .. })
    ));
}

#[tokio::test]
async fn ledger_rejects_unknown_faculty_and_zero_points() {
    let engine = engine_with_faculty(EngineSettings::default()).await;
    assert!(matches!(
        engine.assign("F9", "EV1", None).await,
        Err(EngineError::NotFound(Entity::Faculty(_)))
    ));
    assert!(matches!(
        engine.assign("F1", "EV1", Some(0)).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .register_faculty("F1".into(), None, None)
            .await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn hard_cap_refuses_past_capacity() {
    let settings = EngineSettings {
        workload_policy: AdmissionPolicy::HardCap,
        ..EngineSettings::default()
    };
    let engine = engine_with_faculty(settings).await;
    for i in 0..10 {
        engine.assign("F1", &format!("EV{i}"), None).await.unwrap();
    }
    let err = engine.assign("F1", "EV10", Some(1)).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::OverCapacity {
            allocated: 100,
            capacity: 100,
            requested: 1,
            ..
        }
    ));

    engine.set_faculty_capacity("F1", 120).await.unwrap();
    let snap = engine.assign("F1", "EV10", Some(20)).await.unwrap();
    assert_eq!(snap.allocated_points, 120);
    assert_eq!(snap.band, Band::Overloaded);
}

#[tokio::test]
async fn warn_only_allows_over_allocation() {
    let engine = engine_with_faculty(EngineSettings::default()).await;
    let snap = engine.assign("F1", "BIG", Some(150)).await.unwrap();
    assert_eq!(snap.utilization_percent, 150);
    assert_eq!(snap.band, Band::Overloaded);
}

#[tokio::test]
async fn list_workloads_sorted() {
    let engine = engine_with_faculty(EngineSettings::default()).await;
    engine
        .register_faculty("A7".into(), None, Some(40))
        .await
        .unwrap();
    engine.assign("A7", "EV1", Some(20)).await.unwrap();
    let all = engine.list_workloads().await;
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].faculty_id, "A7");
    assert_eq!(all[0].band, Band::Moderate);
    assert_eq!(all[1].faculty_id, "F1");
}

// ── Journal ──────────────────────────────────────────────

async fn populate(engine: &Engine) -> (Commitment, Commitment) {
    engine.register_resource(lab("LAB1")).await.unwrap();
    engine.register_resource(lab("LAB2")).await.unwrap();
    let cls = engine
        .add_commitment(class("LAB1", Weekday::Mon, 540, 600), ConflictPolicy::Reject)
        .await
        .unwrap();
    let gone = engine
        .add_commitment(booking("LAB1", MONDAY, 700, 760), ConflictPolicy::Reject)
        .await
        .unwrap();
    engine.remove_commitment(gone.commitment.id).await.unwrap();
    let moved = engine
        .add_commitment(booking("LAB1", MONDAY, 800, 860), ConflictPolicy::Reject)
        .await
        .unwrap();
    let moved = engine
        .update_commitment(
            moved.commitment.id,
            CommitmentPatch {
                resource_id: Some("LAB2".into()),
                ..Default::default()
            },
            ConflictPolicy::Reject,
        )
        .await
        .unwrap();
    engine
        .set_resource_status("LAB2", ResourceStatus::Maintenance)
        .await
        .unwrap();

    engine
        .register_faculty("F1".into(), Some("Dr. Iyer".into()), Some(80))
        .await
        .unwrap();
    engine.assign("F1", "EV1", None).await.unwrap();
    engine.assign("F1", "EV2", Some(30)).await.unwrap();
    engine.unassign("F1", "EV1").await.unwrap();
    (cls.commitment, moved.commitment)
}

async fn assert_populated(engine: &Engine, cls: &Commitment, moved: &Commitment) {
    assert_eq!(
        engine.list_commitments(Some("LAB1")).await.unwrap(),
        vec![cls.clone()]
    );
    assert_eq!(
        engine.list_commitments(Some("LAB2")).await.unwrap(),
        vec![moved.clone()]
    );
    assert_eq!(
        engine.get_resource("LAB2").await.unwrap().status,
        ResourceStatus::Maintenance
    );
    let snap = engine.workload_snapshot("F1").await.unwrap();
    assert_eq!(snap.allocated_points, 30);
    assert_eq!(snap.capacity_points, 80);
    assert_eq!(snap.assigned_event_ids, vec!["EV2"]);
    assert_eq!(engine.store().commitment_count(), 2);
}

#[tokio::test]
async fn replay_rebuilds_state() {
    let path = test_wal_path("replay.wal");
    let (cls, moved) = {
        let engine = Engine::open(&path, EngineSettings::default()).unwrap();
        populate(&engine).await
    };
    let engine = Engine::open(&path, EngineSettings::default()).unwrap();
    assert_populated(&engine, &cls, &moved).await;
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let (cls, moved) = {
        let engine = Engine::open(&path, EngineSettings::default()).unwrap();
        let pair = populate(&engine).await;
        assert!(engine.wal_appends_since_compact().await > 0);
        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert!(std::fs::metadata(&path).unwrap().len() < before);
        pair
    };
    let engine = Engine::open(&path, EngineSettings::default()).unwrap();
    assert_populated(&engine, &cls, &moved).await;
}

#[tokio::test]
async fn in_memory_engine_has_no_journal() {
    let engine = Engine::in_memory(EngineSettings::default());
    engine.register_resource(lab("LAB1")).await.unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);
    engine.compact_wal().await.unwrap();
}
