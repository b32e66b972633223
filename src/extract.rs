//! Reading assignment decisions back out of a solved model.

use tracing::{debug, info, warn};

use crate::error::{OptimizeError, Result};
use crate::input::NormalizedInput;
use crate::model::Model;
use crate::solver::{SolveOutcome, SolveStatus};

/// Cluster `cluster` commits to `device`, supplied by `policy`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDecision {
    pub cluster: String,
    pub device: String,
    pub policy: String,
}

/// App `app` runs on `cluster` under `device`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppDecision {
    pub app: String,
    pub cluster: String,
    pub device: String,
    pub placement_ref: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub status: SolveStatus,
    pub objective_value: Option<f64>,
    /// Ordered by cluster name.
    pub clusters: Vec<ClusterDecision>,
    /// Ordered by app name. Apps left unplaced are absent.
    pub apps: Vec<AppDecision>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    /// Values are accepted as binary when within `tolerance` of 0 or 1. This
    /// absorbs floating-point noise from the solver; anything further away
    /// is an [`OptimizeError::IntegralityViolation`].
    pub tolerance: f64,
    /// Report clusters that commit to a device but host no app. Such
    /// commitments do not change the objective, so which device the solver
    /// picks for them is arbitrary; when off they are dropped.
    pub keep_idle_commitments: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            tolerance: 1e-6,
            keep_idle_commitments: true,
        }
    }
}

/// Turn a solver outcome into decisions.
pub fn extract(
    model: &Model,
    input: &NormalizedInput,
    outcome: &SolveOutcome,
    options: ExtractOptions,
) -> Result<Extraction> {
    let tolerance = options.tolerance;
    if !outcome.status.is_optimal() {
        info!(status = ?outcome.status, detail = ?outcome.detail, "no optimal solution");
        return Ok(Extraction {
            status: outcome.status,
            objective_value: None,
            clusters: Vec::new(),
            apps: Vec::new(),
        });
    }

    let values = binary_values(model, outcome, tolerance)?;
    for constraint in model.constraints() {
        if !constraint.is_satisfied(&values, tolerance) {
            return Err(OptimizeError::ConstraintViolation {
                constraint: constraint.name.clone(),
            });
        }
    }

    let apps = create_app_decisions(model, input, &values);
    let mut clusters = create_cluster_decisions(model, input, &values);
    if !options.keep_idle_commitments {
        clusters.retain(|c| {
            let busy = apps.iter().any(|a| a.cluster == c.cluster);
            if !busy {
                debug!(cluster = %c.cluster, device = %c.device, "dropping idle device commitment");
            }
            busy
        });
    }

    let objective_value: f64 = apps
        .iter()
        .filter_map(|d| input.score(&d.app, &d.cluster, &d.device))
        .sum();
    if let Some(reported) = outcome.objective_value {
        if (reported - objective_value).abs() > tolerance * model.objective().len().max(1) as f64 {
            warn!(reported, objective_value, "solver objective differs from extracted decisions");
        } else {
            debug!(reported, objective_value, "solver objective confirmed");
        }
    }

    info!(
        objective_value,
        clusters = clusters.len(),
        apps = apps.len(),
        unplaced = input.apps.len() - apps.len(),
        "extracted decisions"
    );
    Ok(Extraction {
        status: SolveStatus::Optimal,
        objective_value: Some(objective_value),
        clusters,
        apps,
    })
}

/// Snap each value to exactly 0 or 1.
fn binary_values(model: &Model, outcome: &SolveOutcome, tolerance: f64) -> Result<Vec<f64>> {
    if outcome.values.len() != model.variables().len() {
        return Err(OptimizeError::SolutionShape {
            expected: model.variables().len(),
            actual: outcome.values.len(),
        });
    }
    outcome
        .values
        .iter()
        .zip(model.variables())
        .map(|(&value, key)| {
            if value.abs() <= tolerance {
                Ok(0.0)
            } else if (value - 1.0).abs() <= tolerance {
                Ok(1.0)
            } else {
                Err(OptimizeError::IntegralityViolation {
                    variable: key.to_string(),
                    value,
                })
            }
        })
        .collect()
}

fn create_cluster_decisions(
    model: &Model,
    input: &NormalizedInput,
    values: &[f64],
) -> Vec<ClusterDecision> {
    model
        .commit_vars()
        .iter()
        .filter(|&(_, &y)| values[y.index()] == 1.0)
        .filter_map(|((cluster, device), _)| {
            input.offering(cluster, device).map(|offering| ClusterDecision {
                cluster: cluster.clone(),
                device: device.clone(),
                policy: offering.policy.clone(),
            })
        })
        .collect()
}

fn create_app_decisions(
    model: &Model,
    input: &NormalizedInput,
    values: &[f64],
) -> Vec<AppDecision> {
    model
        .run_vars()
        .iter()
        .filter(|&(_, &z)| values[z.index()] == 1.0)
        .filter_map(|((app, cluster, device), _)| {
            input.apps.get(app).map(|spec| AppDecision {
                app: app.clone(),
                cluster: cluster.clone(),
                device: device.clone(),
                placement_ref: spec.placement_ref.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build_model;
    use crate::model::tests::input;
    use crate::model::VarKey;

    fn two_by_two() -> NormalizedInput {
        input(
            &[("App1", 10), ("App2", 15)],
            &[("ClusterA", "gpu-large", 20), ("ClusterB", "gpu-large", 20)],
            &[
                ("App1", "ClusterA", "gpu-large", 80.0),
                ("App1", "ClusterB", "gpu-large", 40.0),
                ("App2", "ClusterA", "gpu-large", 50.0),
                ("App2", "ClusterB", "gpu-large", 90.0),
            ],
        )
    }

    /// Values for the assignment App1→ClusterA, App2→ClusterB.
    fn crossed_assignment(model: &Model) -> Vec<f64> {
        model
            .variables()
            .iter()
            .map(|key| {
                let on = match key {
                    VarKey::Commit { .. } => true,
                    VarKey::Assign { app, cluster } | VarKey::Run { app, cluster, .. } => {
                        (app == "App1" && cluster == "ClusterA")
                            || (app == "App2" && cluster == "ClusterB")
                    }
                };
                if on { 1.0 } else { 0.0 }
            })
            .collect()
    }

    #[test]
    fn extracts_decisions_and_objective() {
        let input = two_by_two();
        let model = build_model(&input).unwrap();
        let values: Vec<f64> = crossed_assignment(&model)
            .into_iter()
            .map(|v| if v == 1.0 { 1.0 - 1e-9 } else { 1e-9 })
            .collect();
        let outcome = SolveOutcome::optimal(values, 170.0);

        let extraction = extract(&model, &input, &outcome, ExtractOptions::default()).unwrap();
        assert_eq!(extraction.status, SolveStatus::Optimal);
        assert_eq!(extraction.objective_value, Some(170.0));
        assert_eq!(
            extraction.clusters,
            vec![
                ClusterDecision {
                    cluster: "ClusterA".to_string(),
                    device: "gpu-large".to_string(),
                    policy: "gpu-large-ClusterA".to_string(),
                },
                ClusterDecision {
                    cluster: "ClusterB".to_string(),
                    device: "gpu-large".to_string(),
                    policy: "gpu-large-ClusterB".to_string(),
                },
            ]
        );
        let placed: Vec<(&str, &str)> = extraction
            .apps
            .iter()
            .map(|d| (d.app.as_str(), d.cluster.as_str()))
            .collect();
        assert_eq!(placed, [("App1", "ClusterA"), ("App2", "ClusterB")]);
        assert_eq!(extraction.apps[0].placement_ref, "App1-placement");
    }

    #[test]
    fn fractional_value_is_an_integrality_violation() {
        let input = two_by_two();
        let model = build_model(&input).unwrap();
        let mut values = crossed_assignment(&model);
        values[0] = 0.5;

        let err = extract(&model, &input, &SolveOutcome::optimal(values, 0.0), ExtractOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            OptimizeError::IntegralityViolation { ref variable, value } if variable == "y[ClusterA,gpu-large]" && value == 0.5
        ));
    }

    #[test]
    fn inconsistent_solution_is_rejected() {
        let input = two_by_two();
        let model = build_model(&input).unwrap();
        // every variable at 1 places both apps everywhere
        let values = vec![1.0; model.variables().len()];

        let err = extract(&model, &input, &SolveOutcome::optimal(values, 0.0), ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, OptimizeError::ConstraintViolation { .. }));
    }

    #[test]
    fn wrong_value_count_is_rejected() {
        let input = two_by_two();
        let model = build_model(&input).unwrap();
        let err = extract(&model, &input, &SolveOutcome::optimal(vec![0.0], 0.0), ExtractOptions::default()).unwrap_err();
        assert!(matches!(err, OptimizeError::SolutionShape { actual: 1, .. }));
    }

    #[test]
    fn non_optimal_status_yields_no_decisions() {
        let input = two_by_two();
        let model = build_model(&input).unwrap();
        for status in [SolveStatus::Infeasible, SolveStatus::Unbounded, SolveStatus::Error] {
            let outcome = SolveOutcome::non_optimal(status, None);
            let extraction = extract(&model, &input, &outcome, ExtractOptions::default()).unwrap();
            assert_eq!(extraction.status, status);
            assert_eq!(extraction.objective_value, None);
            assert!(extraction.clusters.is_empty());
            assert!(extraction.apps.is_empty());
        }
    }

    #[test]
    fn all_zero_solution_leaves_everything_unplaced() {
        let input = two_by_two();
        let model = build_model(&input).unwrap();
        let values = vec![0.0; model.variables().len()];
        let extraction = extract(&model, &input, &SolveOutcome::optimal(values, 0.0), ExtractOptions::default()).unwrap();
        assert_eq!(extraction.objective_value, Some(0.0));
        assert!(extraction.apps.is_empty());
    }

    #[test]
    fn idle_commitments_are_kept_unless_dropping_is_requested() {
        let input = two_by_two();
        let model = build_model(&input).unwrap();
        let values: Vec<f64> = model
            .variables()
            .iter()
            .map(|key| match key {
                VarKey::Commit { .. } => 1.0,
                _ => 0.0,
            })
            .collect();
        let outcome = SolveOutcome::optimal(values, 0.0);

        let extraction = extract(&model, &input, &outcome, ExtractOptions::default()).unwrap();
        let committed: Vec<&str> = extraction.clusters.iter().map(|c| c.cluster.as_str()).collect();
        assert_eq!(committed, ["ClusterA", "ClusterB"]);
        assert!(extraction.apps.is_empty());

        let options = ExtractOptions {
            keep_idle_commitments: false,
            ..ExtractOptions::default()
        };
        let extraction = extract(&model, &input, &outcome, options).unwrap();
        assert!(extraction.clusters.is_empty());
    }
}
