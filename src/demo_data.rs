//! Demo data: a small Santiago de Chile scenario for local runs and tests.

use chrono::{NaiveDate, NaiveTime, TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::{
    Case, CaseStatus, CareType, Location, Patient, Personnel, Priority, TimeWindow,
    TimeWindowType, Vehicle, VehicleStatus,
};
use crate::store::Store;

/// Rough bounding box over central Santiago.
const LAT_RANGE: (f64, f64) = (-33.50, -33.40);
const LON_RANGE: (f64, f64) = (-70.70, -70.58);

pub struct DemoIds {
    pub case_ids: Vec<i64>,
    pub vehicle_ids: Vec<i64>,
}

/// Seeds skills, care types, patients, personnel, vehicles and tomorrow's
/// cases. Deterministic for a given seed.
pub fn seed_santiago(store: &Store, seed: u64) -> DemoIds {
    let mut rng = StdRng::seed_from_u64(seed);
    let tomorrow = Utc::now().date_naive() + TimeDelta::days(1);

    for name in ["nurse", "physician", "wound_care", "kinesiology"] {
        store.insert_skill(name);
    }

    let care_types = [
        ("Curación simple", 30, vec!["nurse"]),
        ("Curación avanzada", 45, vec!["nurse", "wound_care"]),
        ("Control médico", 40, vec!["physician"]),
        ("Kinesioterapia motora", 60, vec!["kinesiology"]),
    ]
    .map(|(name, minutes, skills)| {
        store.insert_care_type(CareType {
            id: 0,
            name: name.to_string(),
            estimated_duration_minutes: minutes,
            required_skills: skills.into_iter().map(String::from).collect(),
        })
    });

    let personnel_specs = [
        ("Carla Soto", vec!["nurse", "wound_care"]),
        ("Jorge Díaz", vec!["nurse"]),
        ("Valentina Rojas", vec!["physician"]),
        ("Matías Fuentes", vec!["kinesiology"]),
        ("Francisca Lagos", vec!["nurse", "kinesiology"]),
    ];
    for (name, skills) in personnel_specs {
        store.insert_personnel(Personnel {
            id: 0,
            name: name.to_string(),
            skills: skills.into_iter().map(String::from).collect(),
            work_start: NaiveTime::from_hms_opt(8, 0, 0).expect("valid time"),
            work_end: NaiveTime::from_hms_opt(17, 0, 0).expect("valid time"),
            start_location: None,
            is_active: true,
        });
    }

    let bases = [(-33.4489, -70.6693), (-33.4569, -70.6483)];
    let vehicle_ids: Vec<i64> = bases
        .iter()
        .enumerate()
        .map(|(i, &(lat, lon))| {
            store
                .insert_vehicle(Vehicle {
                    id: 0,
                    identifier: format!("AMB-{:02}", i + 1),
                    capacity_personnel: 3,
                    base_location: Location::new(lat, lon).expect("valid base"),
                    status: VehicleStatus::Available,
                    resources: ["gps".to_string()].into_iter().collect(),
                    is_active: true,
                })
                .expect("unique identifier")
                .id
        })
        .collect();

    let patient_names = [
        "María Pérez",
        "Luis González",
        "Ana Muñoz",
        "Pedro Rodríguez",
        "Carmen Contreras",
        "José Sepúlveda",
        "Rosa Araya",
        "Manuel Tapia",
    ];

    let mut case_ids = Vec::new();
    for (i, name) in patient_names.iter().enumerate() {
        let lat = rng.gen_range(LAT_RANGE.0..LAT_RANGE.1);
        let lon = rng.gen_range(LON_RANGE.0..LON_RANGE.1);
        let home = Location::new(lat, lon).expect("in-range coordinates");

        let patient = store
            .insert_patient(Patient {
                id: 0,
                name: name.to_string(),
                rut: None,
                phone: Some(format!("+5691234{:04}", i)),
                email: None,
                home_location: home,
                address: format!("Calle {} #{}", i + 1, 100 + i * 7),
            })
            .expect("valid patient");

        let care_type = &care_types[i % care_types.len()];
        let (window_type, window) = if i % 2 == 0 {
            (
                TimeWindowType::Am,
                TimeWindow::new(
                    NaiveTime::from_hms_opt(8, 0, 0).expect("valid time"),
                    NaiveTime::from_hms_opt(13, 0, 0).expect("valid time"),
                )
                .expect("valid window"),
            )
        } else {
            (
                TimeWindowType::Pm,
                TimeWindow::new(
                    NaiveTime::from_hms_opt(12, 0, 0).expect("valid time"),
                    NaiveTime::from_hms_opt(17, 0, 0).expect("valid time"),
                )
                .expect("valid window"),
            )
        };

        let case = store.insert_case(Case {
            id: 0,
            patient_id: patient.id,
            care_type_id: care_type.id,
            scheduled_date: tomorrow,
            time_window_type: window_type,
            time_window: window,
            location: home,
            priority: match i % 4 {
                0 => Priority::Low,
                1 => Priority::Medium,
                2 => Priority::High,
                _ => Priority::Urgent,
            },
            status: CaseStatus::Pending,
            estimated_duration_minutes: care_type.estimated_duration_minutes,
            notes: None,
        });
        case_ids.push(case.id);
    }

    DemoIds {
        case_ids,
        vehicle_ids,
    }
}

pub fn demo_date() -> NaiveDate {
    Utc::now().date_naive() + TimeDelta::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_is_deterministic_and_complete() {
        let store_a = Store::new();
        let a = seed_santiago(&store_a, 7);
        let store_b = Store::new();
        let b = seed_santiago(&store_b, 7);

        assert_eq!(a.case_ids.len(), 8);
        assert_eq!(a.vehicle_ids.len(), 2);
        assert_eq!(a.case_ids, b.case_ids);
        assert_eq!(store_a.active_personnel().len(), 5);
    }
}
