//! Personnel–vehicle pre-assignment and team selection.
//!
//! Rare skills clustered in one vehicle starve the others, so personnel are
//! spread across vehicles by a balanced round-robin that places multi-skilled
//! people first.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::warn;

use crate::domain::{PersonnelId, VehicleId};
use crate::optimizer::types::{Case, Personnel, Vehicle};

/// Distributes personnel across vehicles maximizing per-vehicle skill
/// diversity. Each vehicle receives at most `capacity` people; personnel who
/// fit nowhere are dropped with a warning.
pub fn assign_personnel_to_vehicles(
    vehicles: &[Vehicle],
    personnel: &[Personnel],
) -> HashMap<VehicleId, Vec<Personnel>> {
    let mut assignments: HashMap<VehicleId, Vec<Personnel>> =
        vehicles.iter().map(|v| (v.id, Vec::new())).collect();
    if vehicles.is_empty() {
        return assignments;
    }

    // Multi-skilled people first; ties broken by id for determinism.
    let mut by_diversity: Vec<&Personnel> = personnel.iter().collect();
    by_diversity.sort_by_key(|p| (std::cmp::Reverse(p.skills.len()), p.id));

    // Stable vehicle order by id — never by capacity.
    let mut sorted_vehicles: Vec<&Vehicle> = vehicles.iter().collect();
    sorted_vehicles.sort_by_key(|v| v.id);

    let mut assigned_ids: HashSet<PersonnelId> = HashSet::new();
    let mut cursor = 0usize;

    for person in by_diversity {
        if assigned_ids.contains(&person.id) {
            continue;
        }

        let mut attempts = 0;
        while attempts < sorted_vehicles.len() {
            let vehicle = sorted_vehicles[cursor % sorted_vehicles.len()];
            let slot = assignments.get_mut(&vehicle.id).expect("seeded above");

            if slot.len() < vehicle.capacity as usize {
                slot.push(person.clone());
                assigned_ids.insert(person.id);
                // Advance so the next person lands on the next vehicle.
                cursor += 1;
                break;
            }

            cursor += 1;
            attempts += 1;
        }

        if !assigned_ids.contains(&person.id) {
            warn!(
                personnel_id = person.id,
                name = %person.name,
                "personnel could not be assigned, all vehicles at capacity"
            );
        }
    }

    assignments
}

/// Vehicle indices (into `vehicles`) whose assigned team covers the case's
/// required skills.
pub fn allowed_vehicles_for_case(
    case: &Case,
    vehicles: &[Vehicle],
    assignments: &HashMap<VehicleId, Vec<Personnel>>,
) -> Vec<usize> {
    vehicles
        .iter()
        .enumerate()
        .filter(|(_, vehicle)| {
            let team_skills: BTreeSet<&String> = assignments
                .get(&vehicle.id)
                .map(|team| team.iter().flat_map(|p| p.skills.iter()).collect())
                .unwrap_or_default();
            case.required_skills.iter().all(|s| team_skills.contains(s))
        })
        .map(|(i, _)| i)
        .collect()
}

/// Greedy set cover: the minimal personnel subset whose pooled skills cover
/// every requirement across the given cases, bounded by vehicle capacity.
pub fn select_optimal_personnel(
    available: &[Personnel],
    cases: &[Case],
    vehicle_capacity: u32,
) -> Vec<Personnel> {
    if cases.is_empty() {
        return Vec::new();
    }

    let mut uncovered: BTreeSet<String> = cases
        .iter()
        .flat_map(|c| c.required_skills.iter().cloned())
        .collect();
    if uncovered.is_empty() {
        return Vec::new();
    }

    let mut selected: Vec<Personnel> = Vec::new();

    while !uncovered.is_empty() && selected.len() < vehicle_capacity as usize {
        let best = available
            .iter()
            .filter(|p| !selected.iter().any(|s| s.id == p.id))
            .map(|p| (p, p.skills.intersection(&uncovered).count()))
            .filter(|(_, coverage)| *coverage > 0)
            .max_by_key(|(p, coverage)| (*coverage, std::cmp::Reverse(p.id)));

        match best {
            Some((person, _)) => {
                for skill in &person.skills {
                    uncovered.remove(skill);
                }
                selected.push(person.clone());
            }
            // Remaining skills are uncoverable with this roster.
            None => break,
        }
    }

    selected
}
