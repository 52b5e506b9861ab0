use std::path::{Path, PathBuf};

use super::*;
use crate::limits::*;
use crate::notify::Notice;
use crate::time::{parse_datetime, FixedClock};

// 2025-09-01T00:00:00Z
const SEPT_1: Ms = 1_756_684_800_000;
// 2025-09-05T08:00:00Z, when APPT001 starts (120 minutes, TECH001).
const SEPT_5_8AM: Ms = 1_757_059_200_000;

fn sample_fixtures() -> Fixtures {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("mock_data");
    Fixtures::load(&dir).unwrap()
}

fn engine_at(now: Ms) -> (Engine, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(now));
    (Engine::in_memory(sample_fixtures(), clock.clone(), 42), clock)
}

fn engine() -> Engine {
    engine_at(SEPT_1).0
}

fn booking(technician_id: &str, appliance_type: &str, start: Ms, minutes: u32) -> NewAppointment {
    NewAppointment {
        customer_id: "CUST001".into(),
        technician_id: technician_id.into(),
        appliance_type: appliance_type.into(),
        issue_description: "Making a loud grinding noise".into(),
        scheduled_datetime: start,
        estimated_duration: minutes,
        claim_id: None,
    }
}

fn conflict_of(err: EngineError) -> ConflictRejection {
    match err {
        EngineError::Conflict(rejection) => *rejection,
        other => panic!("expected conflict, got {other:?}"),
    }
}

// ── Booking scenarios ────────────────────────────────────

#[tokio::test]
async fn overlapping_booking_is_rejected_with_alternatives() {
    let engine = engine();
    let err = engine
        .create_appointment(booking("TECH001", "refrigerator", SEPT_5_8AM + HOUR_MS, 60))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Scheduling conflict detected");
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let rejection = conflict_of(err);
    assert!(!rejection.rescheduling);
    assert_eq!(rejection.conflict.appointment_id, "APPT001");
    assert_eq!(rejection.conflict.existing_duration_minutes(), 120);
    assert_eq!(
        rejection.conflict.overlap,
        Span::new(SEPT_5_8AM + HOUR_MS, SEPT_5_8AM + 2 * HOUR_MS)
    );
    let first_alt = SEPT_5_8AM + HOUR_MS - 3 * DAY_MS;
    let times: Vec<Ms> = rejection.alternatives.iter().map(|a| a.datetime).collect();
    assert_eq!(
        times,
        vec![
            first_alt,
            first_alt + HOUR_MS,
            first_alt + 2 * HOUR_MS,
            first_alt - HOUR_MS,
            first_alt - 2 * HOUR_MS,
        ]
    );
    assert_eq!(engine.list_appointments(None, &StatusFilter::All).len(), 2);
}

#[tokio::test]
async fn booking_after_existing_window_succeeds() {
    let engine = engine();
    let appointment = engine
        .create_appointment(booking("TECH001", "Refrigerator", SEPT_5_8AM + 2 * HOUR_MS, 60))
        .await
        .unwrap();
    assert_eq!(appointment.id, "APPT003");
    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(appointment.created_at, SEPT_1);
    assert_eq!(
        appointment.notes.as_deref(),
        Some("Appointment created for Refrigerator repair")
    );
    assert_eq!(
        appointment.service_details.get("priority"),
        Some(&serde_json::json!("medium"))
    );
    assert_eq!(engine.appointment("APPT003").unwrap(), appointment);

    let next = engine
        .create_appointment(booking("TECH001", "dishwasher", SEPT_5_8AM + 4 * HOUR_MS, 30))
        .await
        .unwrap();
    assert_eq!(next.id, "APPT004");
}

#[tokio::test]
async fn booking_validation_errors() {
    let engine = engine();

    let err = engine
        .create_appointment(booking("TECH001", "oven", SEPT_5_8AM + 3 * HOUR_MS, 60))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotSpecialized { .. }));
    assert_eq!(err.kind(), ErrorKind::BusinessRule);

    let err = engine
        .create_appointment(booking("TECH999", "oven", SEPT_5_8AM, 60))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Technician not found");

    let err = engine
        .create_appointment(booking("TECH001", "refrigerator", SEPT_1 - HOUR_MS, 60))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InPast { .. }));

    let err = engine
        .create_appointment(booking("TECH001", "refrigerator", SEPT_5_8AM + 3 * HOUR_MS, 0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let mut short = booking("TECH001", "refrigerator", SEPT_5_8AM + 3 * HOUR_MS, 60);
    short.issue_description = "bad".into();
    assert!(engine.create_appointment(short).await.is_err());
}

#[tokio::test]
async fn concurrent_creates_for_one_window_book_once() {
    let engine = Arc::new(engine());
    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_appointment(booking("TECH001", "dishwasher", SEPT_5_8AM + 5 * HOUR_MS, 60))
                .await
        }));
    }
    let mut booked = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => booked += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(booked, 1);
    assert_eq!(conflicts, 15);
}

// ── Cancel / reschedule ──────────────────────────────────

#[tokio::test]
async fn cancelling_closed_appointment_is_refused() {
    let engine = engine();
    let err = engine
        .cancel_appointment("APPT002", DEFAULT_CANCEL_REASON)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot cancel appointment");
    assert!(matches!(
        err,
        EngineError::AlreadyClosed {
            action: ClosedAction::Cancel,
            status: AppointmentStatus::Completed
        }
    ));
    assert_eq!(
        engine.appointment("APPT002").unwrap().status,
        AppointmentStatus::Completed
    );
}

#[tokio::test]
async fn cancel_frees_the_window() {
    let engine = engine();
    let cancelled = engine
        .cancel_appointment("APPT001", "Customer traveling")
        .await
        .unwrap();
    assert_eq!(cancelled.previous_status, AppointmentStatus::Scheduled);
    let appointment = cancelled.appointment;
    assert_eq!(appointment.status, AppointmentStatus::Cancelled);
    assert_eq!(
        appointment.notes.as_deref(),
        Some("Customer prefers morning appointments | Cancelled: Customer traveling")
    );
    assert_eq!(
        appointment.service_details.get("cancellation_reason"),
        Some(&serde_json::json!("Customer traveling"))
    );
    assert_eq!(
        appointment.service_details.get("cancelled_at"),
        Some(&serde_json::json!("2025-09-01T00:00:00"))
    );

    engine
        .create_appointment(booking("TECH001", "refrigerator", SEPT_5_8AM, 120))
        .await
        .unwrap();

    let err = engine
        .reschedule_appointment("APPT001", SEPT_5_8AM + DAY_MS)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Cannot reschedule appointment");
}

#[tokio::test]
async fn reschedule_may_overlap_its_own_window() {
    let engine = engine();
    let moved = engine
        .reschedule_appointment("APPT001", SEPT_5_8AM + HOUR_MS)
        .await
        .unwrap();
    assert_eq!(moved.previous_datetime, SEPT_5_8AM);
    assert_eq!(moved.appointment.scheduled_datetime, SEPT_5_8AM + HOUR_MS);
    assert_eq!(
        moved.appointment.notes.as_deref(),
        Some("Customer prefers morning appointments | Rescheduled from 2025-09-05T08:00:00")
    );

    // The old 08:00 start is free again.
    engine
        .create_appointment(booking("TECH001", "dishwasher", SEPT_5_8AM, 60))
        .await
        .unwrap();
}

#[tokio::test]
async fn reschedule_into_busy_window_is_rejected() {
    let engine = engine();
    engine
        .create_appointment(booking("TECH001", "dishwasher", SEPT_5_8AM + 4 * HOUR_MS, 60))
        .await
        .unwrap();
    let err = engine
        .reschedule_appointment("APPT001", SEPT_5_8AM + 3 * HOUR_MS + 30 * MINUTE_MS)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Scheduling conflict detected for new time");
    let rejection = conflict_of(err);
    assert!(rejection.rescheduling);
    assert_eq!(rejection.conflict.appointment_id, "APPT003");
    assert_eq!(
        engine.appointment("APPT001").unwrap().scheduled_datetime,
        SEPT_5_8AM
    );

    let err = engine
        .reschedule_appointment("APPT001", SEPT_1 - DAY_MS)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InPast { .. }));
    let err = engine
        .reschedule_appointment("APPT404", SEPT_5_8AM)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Appointment not found");
}

// ── Update ───────────────────────────────────────────────

#[tokio::test]
async fn update_changes_fields_and_merges_details() {
    let engine = engine();
    let mut details = serde_json::Map::new();
    details.insert("parts_needed".into(), serde_json::json!(["door gasket"]));
    details.insert("technician_note".into(), serde_json::json!("bring ladder"));
    let change = engine
        .update_appointment(
            "APPT001",
            AppointmentUpdate {
                status: Some(AppointmentStatus::Confirmed),
                estimated_duration: Some(150),
                service_details: Some(details),
                ..AppointmentUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(change.before.status, AppointmentStatus::Scheduled);
    assert_eq!(change.after.status, AppointmentStatus::Confirmed);
    assert_eq!(change.after.estimated_duration, 150);
    let details = &change.after.service_details;
    assert_eq!(details.get("priority"), Some(&serde_json::json!("high")));
    assert_eq!(details.get("parts_needed"), Some(&serde_json::json!(["door gasket"])));

    // The longer visit now blocks 10:00.
    let err = engine
        .create_appointment(booking("TECH001", "dishwasher", SEPT_5_8AM + 2 * HOUR_MS, 30))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(_)));
}

#[tokio::test]
async fn reassignment_moves_the_visit() {
    let engine = engine();
    let change = engine
        .update_appointment(
            "APPT001",
            AppointmentUpdate {
                technician_id: Some("TECH002".into()),
                ..AppointmentUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(change.before.technician_id, "TECH001");
    assert_eq!(change.after.technician_id, "TECH002");

    engine
        .create_appointment(booking("TECH001", "refrigerator", SEPT_5_8AM, 60))
        .await
        .unwrap();
    let err = engine
        .create_appointment(booking("TECH002", "washing_machine", SEPT_5_8AM, 60))
        .await
        .unwrap_err();
    assert_eq!(conflict_of(err).conflict.appointment_id, "APPT001");
}

#[tokio::test]
async fn update_unknown_appointment() {
    let engine = engine();
    let err = engine
        .update_appointment("APPT404", AppointmentUpdate::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotFound {
            kind: RecordKind::Appointment,
            ..
        }
    ));
}

// ── Queries ──────────────────────────────────────────────

#[tokio::test]
async fn appointment_lists_filter_and_sort() {
    let engine = engine();
    engine
        .create_appointment(booking("TECH001", "dishwasher", SEPT_5_8AM + DAY_MS, 60))
        .await
        .unwrap();

    let all = engine.list_appointments(None, &StatusFilter::All);
    let ids: Vec<&str> = all.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, ["APPT003", "APPT001", "APPT002"]);

    let active = engine.list_appointments(None, &StatusFilter::Active);
    assert_eq!(active.len(), 2);
    let completed = engine.list_appointments(None, &StatusFilter::Completed);
    assert_eq!(completed[0].id, "APPT002");
    let mine = engine.list_appointments(Some("CUST002"), &StatusFilter::All);
    assert_eq!(mine.len(), 1);
    let exact = engine.list_appointments(None, &StatusFilter::parse("scheduled"));
    assert_eq!(exact.len(), 2);

    let details = engine.appointment_details("APPT001").unwrap();
    assert_eq!(details.technician.unwrap().name, "Mike Johnson");
}

#[tokio::test]
async fn availability_counts_only_free_qualified_hours() {
    let engine = engine();
    let result = engine
        .available_slots(&SlotQuery {
            appliance_type: "refrigerator".into(),
            range_start: SEPT_5_8AM - 2 * HOUR_MS,
            range_end: SEPT_5_8AM + 4 * HOUR_MS,
            duration_minutes: 60,
        })
        .await
        .unwrap();
    // TECH003 is off duty; TECH001 is booked 08:00-10:00.
    assert_eq!(result.qualified_technicians, 1);
    let times: Vec<Ms> = result.slots.iter().map(|s| s.datetime).collect();
    assert_eq!(
        times,
        vec![
            SEPT_5_8AM - 2 * HOUR_MS,
            SEPT_5_8AM - HOUR_MS,
            SEPT_5_8AM + 2 * HOUR_MS,
            SEPT_5_8AM + 3 * HOUR_MS,
        ]
    );
    assert_eq!(result.total_slots, 4);

    let washers = engine
        .available_slots(&SlotQuery {
            appliance_type: "washing_machine".into(),
            range_start: SEPT_5_8AM,
            range_end: SEPT_5_8AM + 2 * HOUR_MS,
            duration_minutes: DEFAULT_DURATION_MINUTES,
        })
        .await
        .unwrap();
    assert_eq!(washers.qualified_technicians, 2);
    assert!(washers.slots.iter().all(|s| s.technician_id == "TECH002"));
    assert_eq!(washers.slots.len(), 2);
}

#[tokio::test]
async fn availability_without_qualified_technicians() {
    let engine = engine();
    let err = engine
        .available_slots(&SlotQuery {
            appliance_type: "hot_tub".into(),
            range_start: SEPT_5_8AM,
            range_end: SEPT_5_8AM + DAY_MS,
            duration_minutes: 60,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No technicians available"));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = engine
        .available_slots(&SlotQuery {
            appliance_type: "refrigerator".into(),
            range_start: SEPT_5_8AM,
            range_end: SEPT_5_8AM + MAX_SEARCH_WINDOW_MS + HOUR_MS,
            duration_minutes: 60,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Limit);
}

#[tokio::test]
async fn empty_or_inverted_window_has_no_slots() {
    let engine = engine();
    let empty = engine
        .available_slots(&SlotQuery {
            appliance_type: "refrigerator".into(),
            range_start: SEPT_5_8AM,
            range_end: SEPT_5_8AM,
            duration_minutes: 60,
        })
        .await
        .unwrap();
    assert_eq!(empty.total_slots, 0);
    assert!(empty.slots.is_empty());
    assert_eq!(empty.qualified_technicians, 1);

    let inverted = engine
        .available_slots(&SlotQuery {
            appliance_type: "refrigerator".into(),
            range_start: SEPT_5_8AM + DAY_MS,
            range_end: SEPT_5_8AM,
            duration_minutes: 60,
        })
        .await
        .unwrap();
    assert_eq!(inverted.total_slots, 0);

    let err = engine
        .available_slots(&SlotQuery {
            appliance_type: "hot_tub".into(),
            range_start: SEPT_5_8AM + DAY_MS,
            range_end: SEPT_5_8AM,
            duration_minutes: 60,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("No technicians available"));

    // Too wide, but nobody services the appliance: the missing technician wins.
    let err = engine
        .available_slots(&SlotQuery {
            appliance_type: "hot_tub".into(),
            range_start: SEPT_5_8AM,
            range_end: SEPT_5_8AM + MAX_SEARCH_WINDOW_MS + HOUR_MS,
            duration_minutes: 60,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn alternatives_and_free_windows() {
    let engine = engine();
    let alternatives = engine
        .alternative_slots("TECH001", SEPT_5_8AM, 120)
        .await
        .unwrap();
    assert_eq!(alternatives.len(), MAX_ALTERNATIVES);
    assert_eq!(alternatives[0].datetime, SEPT_5_8AM - 3 * DAY_MS);

    let untouched = engine
        .alternative_slots("TECH003", SEPT_5_8AM, 60)
        .await
        .unwrap();
    assert_eq!(untouched.len(), MAX_ALTERNATIVES);
    assert!(engine.alternative_slots("TECH404", SEPT_5_8AM, 60).await.is_err());

    let windows = engine
        .technician_free_windows("TECH001", SEPT_5_8AM - HOUR_MS, SEPT_5_8AM + 4 * HOUR_MS, None)
        .await
        .unwrap();
    assert_eq!(
        windows,
        vec![
            Span::new(SEPT_5_8AM - HOUR_MS, SEPT_5_8AM),
            Span::new(SEPT_5_8AM + 2 * HOUR_MS, SEPT_5_8AM + 4 * HOUR_MS),
        ]
    );
}

// ── Customers and claims ─────────────────────────────────

#[tokio::test]
async fn coverage_check_is_case_insensitive_and_repeatable() {
    let engine = engine();
    for _ in 0..2 {
        let coverage = engine.check_coverage("CUST001", "REFRIGERATOR").unwrap();
        assert!(coverage.is_covered);
        assert_eq!(coverage.customer.policy_number, "POL-2024-001");
    }
    assert!(!engine.check_coverage("CUST001", "oven").unwrap().is_covered);
    assert_eq!(
        engine.check_coverage("CUST404", "oven").unwrap_err().to_string(),
        "Customer not found"
    );
    let ids: Vec<String> = engine.list_customers().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, ["CUST001", "CUST002", "CUST003"]);
}

#[tokio::test]
async fn claim_lifecycle() {
    let (engine, clock) = engine_at(SEPT_1);
    let claim = engine
        .create_claim(NewClaim {
            customer_id: "CUST001".into(),
            appliance_type: "dishwasher".into(),
            issue_description: "Leaking water onto the floor".into(),
            urgency_level: UrgencyLevel::Emergency,
        })
        .await
        .unwrap();
    assert_eq!(claim.id, "CLAIM003");
    assert_eq!(claim.status, ClaimStatus::Submitted);
    assert_eq!(claim.notes.as_deref(), Some("Claim created for dishwasher issue"));

    clock.advance(HOUR_MS);
    let approved = engine
        .update_claim_status("CLAIM003", ClaimStatus::Approved, Some("Adjuster approved"))
        .await
        .unwrap();
    assert_eq!(approved.previous_status, ClaimStatus::Submitted);
    assert_eq!(approved.claim.approved_at, Some(SEPT_1 + HOUR_MS));
    assert_eq!(
        approved.claim.notes.as_deref(),
        Some("Claim created for dishwasher issue | Status update: Adjuster approved")
    );

    clock.advance(HOUR_MS);
    let again = engine
        .update_claim_status("CLAIM003", ClaimStatus::Approved, None)
        .await
        .unwrap();
    assert_eq!(again.claim.approved_at, Some(SEPT_1 + HOUR_MS));

    let history = engine.claim_history("CUST001", &StatusFilter::Active).unwrap();
    let ids: Vec<&str> = history.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["CLAIM003", "CLAIM001"]);
    assert_eq!(engine.list_claims(&StatusFilter::Completed).len(), 1);
    assert!(engine.claim_history("CUST404", &StatusFilter::All).is_err());
}

#[tokio::test]
async fn claim_for_uncovered_appliance_is_refused() {
    let engine = engine();
    let err = engine
        .create_claim(NewClaim {
            customer_id: "CUST003".into(),
            appliance_type: "dryer".into(),
            issue_description: "Not heating at all".into(),
            urgency_level: UrgencyLevel::Low,
        })
        .await
        .unwrap_err();
    match err {
        EngineError::NotCovered {
            covered_appliances, ..
        } => assert_eq!(covered_appliances, ["refrigerator", "microwave"]),
        other => panic!("expected NotCovered, got {other:?}"),
    }
    assert_eq!(engine.list_claims(&StatusFilter::All).len(), 2);
}

// ── Technicians ──────────────────────────────────────────

#[tokio::test]
async fn en_route_status_sets_arrival_window() {
    let (engine, clock) = engine_at(SEPT_1);
    let change = engine
        .update_technician_status("TECH001", TechnicianStatus::EnRoute, None, Some("APPT001"))
        .await
        .unwrap();
    assert_eq!(change.previous_status, TechnicianStatus::Available);
    let arrival = change.technician.estimated_arrival.unwrap();
    assert!((SEPT_1 + 30 * MINUTE_MS..=SEPT_1 + 60 * MINUTE_MS).contains(&arrival));
    assert_eq!(change.technician.current_appointment_id.as_deref(), Some("APPT001"));

    let report = engine.technician_location("TECH001", None).await.unwrap();
    assert!(!report.overdue);
    assert_eq!(report.eta_minutes, Some((arrival - SEPT_1) / MINUTE_MS));

    clock.advance(2 * HOUR_MS);
    let late = engine.technician_location("TECH001", None).await.unwrap();
    assert!(late.overdue);
    assert_eq!(late.eta_minutes, Some(0));

    let back = engine
        .update_technician_status("TECH001", TechnicianStatus::Available, Some((41.9, -87.7)), None)
        .await
        .unwrap();
    assert_eq!(back.technician.estimated_arrival, None);
    assert_eq!(back.technician.current_appointment_id, None);
    assert_eq!(back.technician.current_location, (41.9, -87.7));
}

#[tokio::test]
async fn bad_coordinates_are_rejected() {
    let engine = engine();
    let err = engine
        .update_technician_status("TECH001", TechnicianStatus::Busy, Some((123.0, 0.0)), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert!(engine.technician_route("TECH001", (0.0, 200.0)).is_err());
}

#[tokio::test]
async fn location_drift_is_small_when_not_moving() {
    let engine = engine();
    let before = engine.technician("TECH002").unwrap().current_location;
    let report = engine.technician_location("TECH002", None).await.unwrap();
    let after = report.technician.current_location;
    assert!((after.0 - before.0).abs() <= 0.001 + 1e-9);
    assert_eq!(engine.technician("TECH002").unwrap().current_location, after);
    assert_eq!(report.eta_minutes, None);
}

#[test]
fn route_to_denver() {
    let engine = engine();
    let route = engine.technician_route("TECH001", (39.7392, -104.9903)).unwrap();
    assert!((route.distance_miles - 915.0).abs() < 10.0);
    assert_eq!(route.waypoints.len(), 4);
    assert!(route.eta_minutes >= crate::geo::MIN_ETA_MINUTES);
    assert_eq!(route.estimated_arrival, SEPT_1 + route.eta_minutes * MINUTE_MS);
}

#[test]
fn available_technicians_match_any_specialty() {
    let engine = engine();
    let found = engine.available_technicians(SEPT_5_8AM, &["Refrigerator".to_string(), "oven".to_string()]);
    assert_eq!(found.len(), 1);
    let first = &found[0];
    assert_eq!(first.technician.id, "TECH001");
    assert!((2.0..=15.0).contains(&first.distance_miles));
    assert_eq!(first.estimated_arrival, SEPT_5_8AM + first.eta_minutes * MINUTE_MS);

    assert!(engine.available_technicians(SEPT_5_8AM, &["dryer".to_string()]).is_empty());
}

#[tokio::test]
async fn status_notice_is_broadcast() {
    let engine = engine();
    let mut rx = engine.notify.subscribe("TECH001");
    let notice = engine
        .notify_status_change("TECH001", "APPT001", None)
        .unwrap();
    assert_eq!(notice.message, "Technician Mike Johnson has completed the service call.");
    assert_eq!(notice.current_location, None);
    assert_eq!(rx.recv().await.unwrap(), Notice::Status(notice));

    let custom = engine
        .notify_status_change("TECH001", "APPT001", Some("Running 10 minutes late"))
        .unwrap();
    assert_eq!(custom.message, "Running 10 minutes late");
}

#[tokio::test]
async fn mutations_are_broadcast_on_technician_channel() {
    let engine = engine();
    let mut rx = engine.notify.subscribe("TECH001");
    engine
        .cancel_appointment("APPT001", DEFAULT_CANCEL_REASON)
        .await
        .unwrap();
    match rx.recv().await.unwrap() {
        Notice::Recorded(Event::AppointmentCancelled { appointment }) => {
            assert_eq!(appointment.id, "APPT001")
        }
        other => panic!("unexpected notice {other:?}"),
    }
}

// ── WAL ──────────────────────────────────────────────────

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("repairdesk_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn wal_engine(path: &Path) -> Engine {
    let options = EngineOptions {
        wal_path: Some(path.to_path_buf()),
        rng_seed: Some(7),
        clock: Arc::new(FixedClock::new(SEPT_1)),
    };
    Engine::new(sample_fixtures(), options, Arc::new(NotifyHub::new())).unwrap()
}

#[tokio::test]
async fn wal_replay_restores_mutations() {
    let path = test_wal_path("replay.wal");
    {
        let engine = wal_engine(&path);
        assert!(engine.has_wal());
        engine
            .create_appointment(booking("TECH001", "dishwasher", SEPT_5_8AM + 3 * HOUR_MS, 60))
            .await
            .unwrap();
        engine
            .cancel_appointment("APPT001", DEFAULT_CANCEL_REASON)
            .await
            .unwrap();
        engine
            .update_appointment(
                "APPT003",
                AppointmentUpdate {
                    technician_id: Some("TECH002".into()),
                    ..AppointmentUpdate::default()
                },
            )
            .await
            .unwrap();
        engine
            .update_technician_status("TECH003", TechnicianStatus::Available, None, None)
            .await
            .unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 4);
    }

    let engine = wal_engine(&path);
    assert_eq!(
        engine.appointment("APPT001").unwrap().status,
        AppointmentStatus::Cancelled
    );
    assert_eq!(engine.appointment("APPT003").unwrap().technician_id, "TECH002");
    assert_eq!(
        engine.technician("TECH003").unwrap().status,
        TechnicianStatus::Available
    );

    // TECH001 lost both visits; TECH002 holds the reassigned one.
    engine
        .create_appointment(booking("TECH001", "refrigerator", SEPT_5_8AM, 240))
        .await
        .unwrap();
    let err = engine
        .create_appointment(booking("TECH002", "dishwasher", SEPT_5_8AM + 3 * HOUR_MS, 30))
        .await
        .unwrap_err();
    assert_eq!(conflict_of(err).conflict.appointment_id, "APPT003");
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn replayed_engine_continues_id_sequence() {
    let path = test_wal_path("sequence.wal");
    {
        let engine = wal_engine(&path);
        engine
            .create_appointment(booking("TECH001", "dishwasher", SEPT_5_8AM + 3 * HOUR_MS, 60))
            .await
            .unwrap();
    }
    let engine = wal_engine(&path);
    let next = engine
        .create_appointment(booking("TECH001", "dishwasher", SEPT_5_8AM + 5 * HOUR_MS, 60))
        .await
        .unwrap();
    assert_eq!(next.id, "APPT004");
    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    {
        let engine = wal_engine(&path);
        for hour in 0..5 {
            engine
                .create_appointment(booking("TECH001", "dishwasher", SEPT_5_8AM + DAY_MS + hour * HOUR_MS, 60))
                .await
                .unwrap();
        }
        engine
            .update_claim_status("CLAIM001", ClaimStatus::Completed, Some("Fixed"))
            .await
            .unwrap();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        engine
            .cancel_appointment("APPT004", DEFAULT_CANCEL_REASON)
            .await
            .unwrap();
    }

    let engine = wal_engine(&path);
    assert_eq!(engine.list_appointments(None, &StatusFilter::All).len(), 7);
    assert_eq!(
        engine.appointment("APPT004").unwrap().status,
        AppointmentStatus::Cancelled
    );
    assert_eq!(engine.claim("CLAIM001").unwrap().status, ClaimStatus::Completed);
    let _ = std::fs::remove_file(&path);
}

#[test]
fn in_memory_engine_has_no_wal() {
    let engine = engine();
    assert!(!engine.has_wal());
}

#[test]
fn id_sequence_ignores_foreign_ids() {
    let ids = vec!["APPT007".to_string(), "APPTX".to_string(), "legacy-1".to_string()];
    assert_eq!(max_sequence(&ids, APPOINTMENT_ID_PREFIX), 7);
    assert_eq!(max_sequence(&[], CLAIM_ID_PREFIX), 0);
}

#[test]
fn datetimes_from_front_ends_match_constants() {
    assert_eq!(parse_datetime("2025-09-05T08:00:00").unwrap(), SEPT_5_8AM);
    assert_eq!(parse_datetime("2025-09-01T00:00:00").unwrap(), SEPT_1);
}
