mod support;

use chrono::Duration;
use uuid::Uuid;

use support::*;

#[tokio::test]
async fn sync_places_patient_by_visit_start_time() {
    let harness = build_test_cell();
    let provider = Uuid::new_v4();
    let (early_patient, late_patient) = (Uuid::new_v4(), Uuid::new_v4());

    harness
        .directory
        .insert_visit(upcoming_visit(early_patient, provider, 10))
        .await;
    harness
        .directory
        .insert_visit(upcoming_visit(late_patient, provider, 40))
        .await;

    // Sync in reverse arrival order; temporal order must still win.
    harness
        .cell
        .synchronizer
        .sync_patient(late_patient)
        .await
        .expect("late patient sync");
    harness
        .cell
        .synchronizer
        .sync_patient(early_patient)
        .await
        .expect("early patient sync");

    let early_pos = harness
        .cell
        .store
        .position(provider, early_patient)
        .await
        .unwrap()
        .expect("early patient queued");
    let late_pos = harness
        .cell
        .store
        .position(provider, late_patient)
        .await
        .unwrap()
        .expect("late patient queued");

    assert!(early_pos < late_pos);
    assert_gap_free(&harness.cell.store.list(provider).await.unwrap());
}

#[tokio::test]
async fn sync_is_idempotent_without_store_changes() {
    let harness = build_test_cell();
    let provider = Uuid::new_v4();
    let patient = Uuid::new_v4();
    let other = Uuid::new_v4();

    harness
        .directory
        .insert_visit(upcoming_visit(other, provider, 5))
        .await;
    harness
        .directory
        .insert_visit(upcoming_visit(patient, provider, 25))
        .await;

    harness
        .cell
        .synchronizer
        .sync_patient(patient)
        .await
        .expect("first sync");
    let first = harness.cell.store.list(provider).await.unwrap();

    harness
        .cell
        .synchronizer
        .sync_patient(patient)
        .await
        .expect("second sync");
    let second = harness.cell.store.list(provider).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn sync_spans_multiple_provider_queues() {
    let harness = build_test_cell();
    let (cardiology, dermatology) = (Uuid::new_v4(), Uuid::new_v4());
    let patient = Uuid::new_v4();

    harness
        .directory
        .insert_visit(upcoming_visit(patient, cardiology, 15))
        .await;
    harness
        .directory
        .insert_visit(upcoming_visit(patient, dermatology, 45))
        .await;

    let outcome = harness
        .cell
        .synchronizer
        .sync_patient(patient)
        .await
        .expect("sync");

    assert_eq!(outcome.providers.len(), 2);
    assert_eq!(
        harness.cell.store.position(cardiology, patient).await.unwrap(),
        Some(0)
    );
    assert_eq!(
        harness.cell.store.position(dermatology, patient).await.unwrap(),
        Some(0)
    );
}

#[tokio::test]
async fn sync_with_no_active_visits_is_a_no_op() {
    let harness = build_test_cell();
    let patient = Uuid::new_v4();

    let outcome = harness
        .cell
        .synchronizer
        .sync_patient(patient)
        .await
        .expect("sync");

    assert!(outcome.providers.is_empty());
    assert!(outcome.visits.is_empty());
}

#[tokio::test]
async fn sync_ignores_terminal_visits() {
    let harness = build_test_cell();
    let provider = Uuid::new_v4();
    let patient = Uuid::new_v4();

    let visit = upcoming_visit(patient, provider, 10);
    let visit_id = visit.id;
    harness.directory.insert_visit(visit).await;
    harness
        .directory
        .set_visit_status(visit_id, waiting_room_cell::VisitStatus::Cancelled)
        .await;

    let outcome = harness
        .cell
        .synchronizer
        .sync_patient(patient)
        .await
        .expect("sync");

    assert!(outcome.providers.is_empty());
    assert_eq!(harness.cell.store.position(provider, patient).await.unwrap(), None);
}

#[tokio::test]
async fn rebuild_provider_corrects_drifted_positions() {
    let harness = build_test_cell();
    let provider = Uuid::new_v4();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

    harness
        .directory
        .insert_visit(upcoming_visit(a, provider, 10))
        .await;
    harness
        .directory
        .insert_visit(upcoming_visit(b, provider, 20))
        .await;
    harness
        .directory
        .insert_visit(upcoming_visit(c, provider, 30))
        .await;

    // Simulate drift: duplicate positions written out-of-band.
    harness.cell.store.add(provider, a, 2, None).await.unwrap();
    harness.cell.store.add(provider, b, 2, None).await.unwrap();
    harness.cell.store.add(provider, c, 0, None).await.unwrap();

    harness
        .cell
        .synchronizer
        .rebuild_provider(provider)
        .await
        .expect("rebuild");

    let entries = harness.cell.store.list(provider).await.unwrap();
    assert_gap_free(&entries);
    assert_eq!(entries[0].patient_id, a);
    assert_eq!(entries[1].patient_id, b);
    assert_eq!(entries[2].patient_id, c);
}

#[tokio::test]
async fn rebuild_emits_provider_snapshot() {
    let harness = build_test_cell();
    let provider = Uuid::new_v4();
    let patient = Uuid::new_v4();

    harness
        .directory
        .insert_visit(upcoming_visit(patient, provider, 10))
        .await;

    let mut receiver = harness.cell.fanout.subscribe_provider(provider).await;

    harness
        .cell
        .synchronizer
        .rebuild_provider(provider)
        .await
        .expect("rebuild");

    let message = receiver.recv().await.expect("one update pushed");
    let update: waiting_room_cell::ProviderQueueUpdate =
        serde_json::from_str(&message).expect("well-formed payload");
    assert_eq!(update.provider_id, provider);
    assert_eq!(update.entries.len(), 1);
    assert_eq!(update.entries[0].patient_id, patient);
}

#[tokio::test]
async fn gap_free_invariant_survives_mixed_mutations() {
    let harness = build_test_cell();
    let provider = Uuid::new_v4();
    let patients: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
    let mut visit_ids = Vec::new();

    for (offset, patient) in patients.iter().enumerate() {
        let visit = upcoming_visit(*patient, provider, 10 + offset as i64 * 10);
        visit_ids.push(visit.id);
        harness.directory.insert_visit(visit).await;
        harness
            .cell
            .synchronizer
            .sync_patient(*patient)
            .await
            .expect("sync");
    }

    // Two visits complete; the status-change flow removes each patient.
    for index in [2, 0] {
        harness
            .directory
            .set_visit_status(visit_ids[index], waiting_room_cell::VisitStatus::Completed)
            .await;
        assert!(harness
            .cell
            .store
            .remove(provider, patients[index])
            .await
            .unwrap());
    }

    let entries = harness.cell.store.list(provider).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_gap_free(&entries);

    // A reconnect re-sync afterwards must not disturb the compacted run.
    harness
        .cell
        .synchronizer
        .sync_patient(patients[4])
        .await
        .expect("re-sync");

    let entries = harness.cell.store.list(provider).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert_gap_free(&entries);
}

#[tokio::test]
async fn patient_snapshot_aggregates_across_providers() {
    let harness = build_test_cell();
    let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
    let patient = Uuid::new_v4();
    let rival = Uuid::new_v4();

    harness
        .directory
        .insert_visit(upcoming_visit(rival, first, 5))
        .await;
    harness
        .directory
        .insert_visit(upcoming_visit(patient, first, 25))
        .await;
    harness
        .directory
        .insert_visit(upcoming_visit(patient, second, 35))
        .await;

    harness.cell.synchronizer.sync_patient(rival).await.unwrap();
    let outcome = harness
        .cell
        .synchronizer
        .sync_patient(patient)
        .await
        .unwrap();

    let snapshot = harness
        .cell
        .synchronizer
        .patient_snapshot(patient, &outcome.providers)
        .await
        .unwrap();

    assert_eq!(snapshot.len(), 2);
    let first_entry = snapshot.iter().find(|e| e.provider_id == first).unwrap();
    let second_entry = snapshot.iter().find(|e| e.provider_id == second).unwrap();
    assert_eq!(first_entry.position, 1);
    assert_eq!(second_entry.position, 0);
}

#[tokio::test]
async fn stale_entry_is_rebuilt_not_duplicated() {
    let harness = build_test_cell();
    let provider = Uuid::new_v4();
    let patient = Uuid::new_v4();

    harness
        .directory
        .insert_visit(upcoming_visit(patient, provider, 20))
        .await;

    // A leftover entry at a wrong position from a previous life.
    harness.cell.store.add(provider, patient, 7, None).await.unwrap();

    harness
        .cell
        .synchronizer
        .sync_patient(patient)
        .await
        .expect("sync");

    let entries = harness.cell.store.list(provider).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].position, 0);
    assert!(entries[0].visit_id.is_some());
}

#[tokio::test]
async fn later_visit_does_not_move_patient_behind_their_earliest() {
    let harness = build_test_cell();
    let provider = Uuid::new_v4();
    let patient = Uuid::new_v4();
    let other = Uuid::new_v4();

    let earliest = upcoming_visit(patient, provider, 10);
    let earliest_id = earliest.id;
    harness.directory.insert_visit(earliest).await;
    harness
        .directory
        .insert_visit(upcoming_visit(other, provider, 20))
        .await;
    harness
        .directory
        .insert_visit(upcoming_visit(patient, provider, 30))
        .await;

    harness.cell.synchronizer.sync_patient(other).await.unwrap();
    harness.cell.synchronizer.sync_patient(patient).await.unwrap();

    let entries = harness.cell.store.list(provider).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].patient_id, patient);
    assert_eq!(entries[0].visit_id, Some(earliest_id));
    assert_gap_free(&entries);
}

#[tokio::test]
async fn sync_tolerates_visits_far_in_the_future() {
    let harness = build_test_cell();
    let provider = Uuid::new_v4();
    let patient = Uuid::new_v4();

    harness
        .directory
        .insert_visit(visit_at(
            patient,
            provider,
            chrono::Utc::now() + Duration::days(14),
        ))
        .await;

    harness
        .cell
        .synchronizer
        .sync_patient(patient)
        .await
        .expect("sync");

    assert_eq!(
        harness.cell.store.position(provider, patient).await.unwrap(),
        Some(0)
    );
}
