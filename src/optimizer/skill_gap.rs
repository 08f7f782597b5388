//! Skill-gap analysis: why cases went unassigned and what hiring one person
//! per blocking skill would recover. Advisory output; it never blocks route
//! creation.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::domain::{CaseId, Priority};
use crate::optimizer::types::Case;

#[derive(Debug, Clone, Serialize)]
pub struct UnassignedCaseDetail {
    pub case_id: CaseId,
    pub case_name: String,
    pub required_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillDemand {
    pub skill: String,
    pub demand_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillGapSummary {
    pub total_cases_requested: usize,
    pub total_cases_assigned: usize,
    pub total_cases_unassigned: usize,
    pub assignment_rate_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkillGapAnalysis {
    /// skill → unassigned case ids naming it among their missing skills.
    pub unassigned_cases_by_skill: BTreeMap<String, Vec<CaseId>>,
    pub unassigned_case_details: Vec<UnassignedCaseDetail>,
    /// Ranked by demand count descending, ties by name.
    pub most_demanded_skills: Vec<SkillDemand>,
    /// skill → percentage of cases requiring it that were assigned.
    pub skill_coverage_percentage: BTreeMap<String, f64>,
    /// skill → unassigned cases recovered by hiring one person with it.
    pub hiring_impact_simulation: BTreeMap<String, usize>,
    pub summary: SkillGapSummary,
}

/// Computes the analysis from the run's case sets and the pooled skills of
/// every vehicle team.
pub fn analyze(
    all_cases: &[Case],
    unassigned_cases: &[Case],
    assigned_case_ids: &HashSet<CaseId>,
    available_skills: &BTreeSet<String>,
) -> SkillGapAnalysis {
    let total_requested = all_cases.len();
    let total_assigned = assigned_case_ids.len();
    let total_unassigned = unassigned_cases.len();
    let assignment_rate = if total_requested > 0 {
        total_assigned as f64 / total_requested as f64 * 100.0
    } else {
        0.0
    };

    let summary = SkillGapSummary {
        total_cases_requested: total_requested,
        total_cases_assigned: total_assigned,
        total_cases_unassigned: total_unassigned,
        assignment_rate_percentage: assignment_rate,
    };

    let mut analysis = SkillGapAnalysis {
        unassigned_cases_by_skill: BTreeMap::new(),
        unassigned_case_details: Vec::new(),
        most_demanded_skills: Vec::new(),
        skill_coverage_percentage: BTreeMap::new(),
        hiring_impact_simulation: BTreeMap::new(),
        summary,
    };

    if unassigned_cases.is_empty() {
        return analysis;
    }

    // Missing skills per unassigned case, plus demand counts.
    let mut demand: BTreeMap<String, usize> = BTreeMap::new();
    for case in unassigned_cases {
        let missing: Vec<String> = case
            .required_skills
            .difference(available_skills)
            .cloned()
            .collect();

        for skill in &missing {
            *demand.entry(skill.clone()).or_default() += 1;
            analysis
                .unassigned_cases_by_skill
                .entry(skill.clone())
                .or_default()
                .push(case.id);
        }

        analysis.unassigned_case_details.push(UnassignedCaseDetail {
            case_id: case.id,
            case_name: case.patient_name.clone(),
            required_skills: case.required_skills.iter().cloned().collect(),
            missing_skills: missing,
            priority: case.priority,
        });
    }

    // Hiring priority: count descending, name ascending.
    let mut ranked: Vec<(String, usize)> = demand.clone().into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    analysis.most_demanded_skills = ranked
        .into_iter()
        .map(|(skill, demand_count)| SkillDemand { skill, demand_count })
        .collect();

    // Coverage percentage per skill across all requested cases.
    for case in all_cases {
        for skill in &case.required_skills {
            if analysis.skill_coverage_percentage.contains_key(skill) {
                continue;
            }
            let requiring: Vec<&Case> = all_cases
                .iter()
                .filter(|c| c.required_skills.contains(skill))
                .collect();
            let assigned = requiring
                .iter()
                .filter(|c| assigned_case_ids.contains(&c.id))
                .count();
            let coverage = if requiring.is_empty() {
                0.0
            } else {
                assigned as f64 / requiring.len() as f64 * 100.0
            };
            analysis
                .skill_coverage_percentage
                .insert(skill.clone(), (coverage * 100.0).round() / 100.0);
        }
    }

    // Hiring impact: cases where this skill is the only thing still missing.
    for skill in demand.keys() {
        let recovered = unassigned_cases
            .iter()
            .filter(|case| {
                let missing: BTreeSet<&String> = case
                    .required_skills
                    .difference(available_skills)
                    .collect();
                missing.contains(skill) && missing.len() == 1
            })
            .count();
        analysis
            .hiring_impact_simulation
            .insert(skill.clone(), recovered);
    }

    analysis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, TimeWindow};
    use chrono::NaiveTime;

    fn case(id: CaseId, skills: &[&str]) -> Case {
        Case {
            id,
            patient_id: id,
            patient_name: format!("Paciente {id}"),
            location: Location::new(-33.45, -70.66).unwrap(),
            required_skills: skills.iter().map(|s| s.to_string()).collect(),
            time_window: TimeWindow::new(
                NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            )
            .unwrap(),
            priority: Priority::Medium,
            estimated_duration_minutes: 30,
        }
    }

    #[test]
    fn empty_unassigned_yields_clean_summary() {
        let cases = vec![case(1, &["nurse"])];
        let assigned: HashSet<CaseId> = [1].into_iter().collect();
        let skills: BTreeSet<String> = ["nurse".to_string()].into_iter().collect();
        let analysis = analyze(&cases, &[], &assigned, &skills);
        assert_eq!(analysis.summary.assignment_rate_percentage, 100.0);
        assert!(analysis.most_demanded_skills.is_empty());
    }

    #[test]
    fn physician_gap_is_detected() {
        let cases = vec![case(1, &["nurse"]), case(2, &["nurse"]), case(3, &["physician"])];
        let assigned: HashSet<CaseId> = [1, 2].into_iter().collect();
        let unassigned = vec![case(3, &["physician"])];
        let skills: BTreeSet<String> = ["nurse".to_string()].into_iter().collect();

        let analysis = analyze(&cases, &unassigned, &assigned, &skills);

        assert_eq!(analysis.most_demanded_skills[0].skill, "physician");
        assert_eq!(analysis.most_demanded_skills[0].demand_count, 1);
        assert_eq!(analysis.hiring_impact_simulation["physician"], 1);
        assert_eq!(analysis.skill_coverage_percentage["nurse"], 100.0);
        assert_eq!(analysis.skill_coverage_percentage["physician"], 0.0);
        assert!((analysis.summary.assignment_rate_percentage - 66.67).abs() < 0.35);
    }

    #[test]
    fn hiring_impact_ignores_multi_skill_gaps() {
        // Case 1 misses only "physician"; case 2 misses both "physician" and
        // "radiology", so hiring one physician recovers just one case.
        let cases = vec![case(1, &["physician"]), case(2, &["physician", "radiology"])];
        let unassigned = cases.clone();
        let assigned = HashSet::new();
        let skills: BTreeSet<String> = ["nurse".to_string()].into_iter().collect();

        let analysis = analyze(&cases, &unassigned, &assigned, &skills);
        assert_eq!(analysis.hiring_impact_simulation["physician"], 1);
        assert_eq!(analysis.hiring_impact_simulation["radiology"], 0);
    }

    #[test]
    fn demand_ranking_breaks_ties_by_name() {
        let cases = vec![case(1, &["b_skill"]), case(2, &["a_skill"])];
        let unassigned = cases.clone();
        let assigned = HashSet::new();
        let skills = BTreeSet::new();

        let analysis = analyze(&cases, &unassigned, &assigned, &skills);
        assert_eq!(analysis.most_demanded_skills[0].skill, "a_skill");
        assert_eq!(analysis.most_demanded_skills[1].skill, "b_skill");
    }
}
