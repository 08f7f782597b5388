//! End-to-end tracking scenarios: optimize, activate, execute, observe.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};

use ruteo::config::Config;
use ruteo::distance::DistanceService;
use ruteo::domain::{
    Case, CaseStatus, CareType, Location, Patient, Personnel, Priority, RouteStatus, TimeWindow,
    TimeWindowType, Vehicle, VehicleStatus, VisitStatus,
};
use ruteo::optimizer::OptimizationService;
use ruteo::store::Store;
use ruteo::tracking::{DelayDetector, EtaCalculator, LocationTracker, RouteTracker};

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()
}

struct World {
    store: Arc<Store>,
    tracker: RouteTracker,
    locations: Arc<LocationTracker>,
    eta: Arc<EtaCalculator>,
    delays: DelayDetector,
    route_id: i64,
    visit_id: i64,
    vehicle_id: i64,
}

/// Seeds one case, optimizes it into a route and activates the route.
async fn world() -> World {
    let store = Arc::new(Store::new());
    let distance = Arc::new(DistanceService::new(&Config::default(), Arc::clone(&store)));

    let care_type = store.insert_care_type(CareType {
        id: 0,
        name: "Curación simple".to_string(),
        estimated_duration_minutes: 30,
        required_skills: ["nurse".to_string()].into_iter().collect(),
    });
    let patient = store
        .insert_patient(Patient {
            id: 0,
            name: "María Pérez".to_string(),
            rut: Some("12.345.678-5".to_string()),
            phone: None,
            email: None,
            home_location: Location::new(-33.4372, -70.6506).unwrap(),
            address: "Av. Italia 850".to_string(),
        })
        .unwrap();
    store.insert_personnel(Personnel {
        id: 0,
        name: "Carla Soto".to_string(),
        skills: ["nurse".to_string()].into_iter().collect(),
        work_start: t(8, 0),
        work_end: t(17, 0),
        start_location: None,
        is_active: true,
    });
    let vehicle = store
        .insert_vehicle(Vehicle {
            id: 0,
            identifier: "AMB-01".to_string(),
            capacity_personnel: 3,
            base_location: Location::new(-33.4489, -70.6693).unwrap(),
            status: VehicleStatus::Available,
            resources: Default::default(),
            is_active: true,
        })
        .unwrap();
    let case = store.insert_case(Case {
        id: 0,
        patient_id: patient.id,
        care_type_id: care_type.id,
        scheduled_date: date(),
        time_window_type: TimeWindowType::Am,
        time_window: TimeWindow::new(t(8, 0), t(12, 0)).unwrap(),
        location: patient.home_location,
        priority: Priority::High,
        status: CaseStatus::Pending,
        estimated_duration_minutes: 30,
        notes: None,
    });

    let optimizer = OptimizationService::new(Arc::clone(&store), Arc::clone(&distance));
    let outcome = optimizer
        .optimize_routes(&[case.id], &[vehicle.id], date(), false, 1)
        .await
        .unwrap();
    assert!(outcome.result.success);
    let route_id = outcome.route_ids[0];

    store
        .with_route_mut(route_id, |r| r.status = RouteStatus::Active)
        .unwrap();
    let visit_id = store.visits_of_route(route_id)[0].id;

    let tracker = RouteTracker::new(Arc::clone(&store));
    let locations = Arc::new(LocationTracker::new(Arc::clone(&store)));
    let eta = Arc::new(EtaCalculator::new(
        Arc::clone(&store),
        distance,
        Arc::clone(&locations),
    ));
    let delays = DelayDetector::new(Arc::clone(&store), Arc::clone(&eta));

    World {
        store,
        tracker,
        locations,
        eta,
        delays,
        route_id,
        visit_id,
        vehicle_id: vehicle.id,
    }
}

/// Scenario: a pending visit accepts `en_route`, rejects `completed`, and the
/// full lifecycle drives the route from active to completed.
#[tokio::test]
async fn visit_state_machine_drives_route_lifecycle() {
    let w = world().await;

    // Jumping straight to completed is rejected.
    let err = w
        .tracker
        .update_visit_status(w.visit_id, VisitStatus::Completed, None)
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_input");

    // pending -> en_route moves the route to in_progress.
    w.tracker
        .update_visit_status(w.visit_id, VisitStatus::EnRoute, None)
        .unwrap();
    assert_eq!(
        w.store.route(w.route_id).unwrap().status,
        RouteStatus::InProgress
    );

    w.tracker
        .update_visit_status(w.visit_id, VisitStatus::Arrived, None)
        .unwrap();
    w.tracker
        .update_visit_status(w.visit_id, VisitStatus::InProgress, None)
        .unwrap();
    w.tracker
        .update_visit_status(w.visit_id, VisitStatus::Completed, None)
        .unwrap();

    // Sole visit terminal: the route completes and the case mirrors.
    let route = w.store.route(w.route_id).unwrap();
    assert_eq!(route.status, RouteStatus::Completed);

    let visit = w.store.visit(w.visit_id).unwrap();
    assert_eq!(
        w.store.case(visit.case_id).unwrap().status,
        CaseStatus::Completed
    );
    assert!(visit.actual_arrival.unwrap() <= visit.actual_departure.unwrap());

    let progress = w.tracker.progress(w.route_id).unwrap();
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.completion_percentage, 100.0);
}

/// GPS ingestion feeds the ETA projection; the projection carries the traffic
/// buffer for the sample's hour.
#[tokio::test]
async fn location_sample_yields_buffered_eta() {
    let w = world().await;

    // No samples yet: no ETA.
    assert!(w
        .eta
        .eta(w.visit_id, w.vehicle_id, true)
        .await
        .unwrap()
        .is_none());

    let ts = date().and_time(t(8, 30)).and_utc();
    w.locations
        .record(w.vehicle_id, -33.4489, -70.6693, Some(35.0), Some(90.0), Some(5.0), Some(ts))
        .unwrap();

    let details = w
        .eta
        .eta_details(w.visit_id, w.vehicle_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(details.traffic_period, "rush_hour_morning");
    assert_eq!(details.traffic_multiplier, 1.30);
    assert!(details.eta > ts);
    assert!(details.distance_km > 0.0);
}

/// A vehicle transmitting long after the planned arrival produces a delay
/// alert and a time-window violation.
#[tokio::test]
async fn late_vehicle_produces_alert_and_window_violation() {
    let w = world().await;

    // Planned arrival is early morning; the sample is mid-afternoon.
    let ts = date().and_time(t(14, 0)).and_utc();
    w.locations
        .record(w.vehicle_id, -33.4489, -70.6693, None, None, None, Some(ts))
        .unwrap();

    let alerts = w.delays.detect_route(w.route_id).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].delay_minutes > 30.0);
    assert!(alerts[0].message.contains("Retraso"));

    let violations = w.delays.time_window_violations(w.route_id).await.unwrap();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].severity, "critical");
    assert!(violations[0].current_eta > violations[0].time_window_end);
}

/// Cancelling mid-execution cascades to the open visit and its case.
#[tokio::test]
async fn cancel_route_mid_execution() {
    let w = world().await;

    w.tracker
        .update_visit_status(w.visit_id, VisitStatus::EnRoute, None)
        .unwrap();
    let route = w
        .tracker
        .cancel_route(w.route_id, Some("emergencia mecánica"))
        .unwrap();
    assert_eq!(route.status, RouteStatus::Cancelled);

    let visit = w.store.visit(w.visit_id).unwrap();
    assert_eq!(visit.status, VisitStatus::Cancelled);
    assert_eq!(
        w.store.case(visit.case_id).unwrap().status,
        CaseStatus::Cancelled
    );
}

/// Location history honors ordering, bounds and retention cleanup.
#[tokio::test]
async fn location_history_and_cleanup() {
    let w = world().await;
    let base = Utc::now();

    for i in 0..5 {
        w.locations
            .record(
                w.vehicle_id,
                -33.4489,
                -70.6693,
                None,
                None,
                None,
                Some(base - chrono::TimeDelta::minutes(i)),
            )
            .unwrap();
    }

    let history = w.locations.history(w.vehicle_id, None, None, 3).unwrap();
    assert_eq!(history.len(), 3);
    assert!(history
        .windows(2)
        .all(|pair| pair[0].timestamp >= pair[1].timestamp));

    let current = w.locations.current(w.vehicle_id).unwrap().unwrap();
    assert_eq!(current.timestamp, base);

    assert_eq!(w.locations.cleanup(Some(0)), 5);
}
