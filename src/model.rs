//! The assignment model as plain data: binary variables, linear constraints
//! and a maximization objective.
//!
//! Variables:
//! - `x[a,c]`   app `a` is placed on cluster `c`
//! - `y[c,d]`   cluster `c` commits to device type `d`
//! - `z[a,c,d]` app `a` runs on cluster `c` configured for device `d` (= x ∧ y)
//!
//! `y` exists only for offered (cluster, device) pairs, `z` only where `y`
//! exists and `x` only where the cluster offers at least one device.
//! Everything is enumerated in lexical order, so identical inputs give
//! identical models.

use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::error::{OptimizeError, Result};
use crate::input::NormalizedInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(usize);

impl VarId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum VarKey {
    Assign { app: String, cluster: String },
    Commit { cluster: String, device: String },
    Run { app: String, cluster: String, device: String },
}

impl fmt::Display for VarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarKey::Assign { app, cluster } => write!(f, "x[{app},{cluster}]"),
            VarKey::Commit { cluster, device } => write!(f, "y[{cluster},{device}]"),
            VarKey::Run { app, cluster, device } => write!(f, "z[{app},{cluster},{device}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Term {
    pub var: VarId,
    pub coefficient: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Le,
    Ge,
    Eq,
}

/// `Σ terms (sense) rhs`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearConstraint {
    pub name: String,
    pub terms: Vec<Term>,
    pub sense: Sense,
    pub rhs: f64,
}

impl LinearConstraint {
    pub fn lhs(&self, values: &[f64]) -> f64 {
        self.terms
            .iter()
            .map(|t| t.coefficient * values[t.var.index()])
            .sum()
    }

    pub fn is_satisfied(&self, values: &[f64], tolerance: f64) -> bool {
        let lhs = self.lhs(values);
        match self.sense {
            Sense::Le => lhs <= self.rhs + tolerance,
            Sense::Ge => lhs >= self.rhs - tolerance,
            Sense::Eq => (lhs - self.rhs).abs() <= tolerance,
        }
    }
}

type PairMap = BTreeMap<(String, String), VarId>;
type TripleMap = BTreeMap<(String, String, String), VarId>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    variables: Vec<VarKey>,
    assign: PairMap,
    commit: PairMap,
    run: TripleMap,
    constraints: Vec<LinearConstraint>,
    objective: Vec<Term>,
}

impl Model {
    pub fn variables(&self) -> &[VarKey] {
        &self.variables
    }

    pub fn constraints(&self) -> &[LinearConstraint] {
        &self.constraints
    }

    /// Maximized.
    pub fn objective(&self) -> &[Term] {
        &self.objective
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// x variables keyed by (app, cluster)
    pub fn assign_vars(&self) -> &PairMap {
        &self.assign
    }

    /// y variables keyed by (cluster, device)
    pub fn commit_vars(&self) -> &PairMap {
        &self.commit
    }

    /// z variables keyed by (app, cluster, device)
    pub fn run_vars(&self) -> &TripleMap {
        &self.run
    }

    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective
            .iter()
            .map(|t| t.coefficient * values[t.var.index()])
            .sum()
    }

    fn add_variable(&mut self, key: VarKey) -> VarId {
        let id = VarId(self.variables.len());
        self.variables.push(key);
        id
    }

    fn add_constraint(&mut self, name: String, terms: Vec<Term>, sense: Sense, rhs: f64) {
        self.constraints.push(LinearConstraint {
            name,
            terms,
            sense,
            rhs,
        });
    }
}

fn term(var: VarId, coefficient: f64) -> Term {
    Term { var, coefficient }
}

/// Build the model, failing before any solving if an objective term would
/// lack a preference score.
pub fn build_model(input: &NormalizedInput) -> Result<Model> {
    let mut model = Model::default();

    init_variables(&mut model, input);
    create_objective_function(&mut model, input)?;

    constrain_one_device_per_cluster(&mut model);
    constrain_one_cluster_per_app(&mut model);
    constrain_capacities(&mut model, input);
    constrain_run_links(&mut model);
    constrain_assign_equals_runs(&mut model);

    debug!(
        variables = model.variables.len(),
        constraints = model.constraints.len(),
        objective_terms = model.objective.len(),
        "built assignment model"
    );
    Ok(model)
}

fn init_variables(model: &mut Model, input: &NormalizedInput) {
    for (cluster, device, _) in input.offerings() {
        let id = model.add_variable(VarKey::Commit {
            cluster: cluster.to_string(),
            device: device.to_string(),
        });
        model.commit.insert((cluster.to_string(), device.to_string()), id);
    }

    for app in input.apps.keys() {
        for (cluster, offerings) in &input.clusters {
            if offerings.is_empty() {
                continue;
            }
            let id = model.add_variable(VarKey::Assign {
                app: app.clone(),
                cluster: cluster.clone(),
            });
            model.assign.insert((app.clone(), cluster.clone()), id);

            for device in offerings.keys() {
                let id = model.add_variable(VarKey::Run {
                    app: app.clone(),
                    cluster: cluster.clone(),
                    device: device.clone(),
                });
                model.run.insert((app.clone(), cluster.clone(), device.clone()), id);
            }
        }
    }
}

fn create_objective_function(model: &mut Model, input: &NormalizedInput) -> Result<()> {
    let mut objective = Vec::with_capacity(model.run.len());
    for ((app, cluster, device), &z) in &model.run {
        let score = input.score(app, cluster, device).ok_or_else(|| {
            OptimizeError::IncompleteObjective {
                app: app.clone(),
                cluster: cluster.clone(),
                device: device.clone(),
            }
        })?;
        objective.push(term(z, score));
    }
    model.objective = objective;
    Ok(())
}

/// Σ_d y[c,d] ≤ 1
fn constrain_one_device_per_cluster(model: &mut Model) {
    let mut by_cluster: BTreeMap<String, Vec<Term>> = BTreeMap::new();
    for ((cluster, _), &y) in &model.commit {
        by_cluster.entry(cluster.clone()).or_default().push(term(y, 1.0));
    }
    for (cluster, terms) in by_cluster {
        model.add_constraint(format!("one_device_{cluster}"), terms, Sense::Le, 1.0);
    }
}

/// Σ_c x[a,c] ≤ 1
fn constrain_one_cluster_per_app(model: &mut Model) {
    let mut by_app: BTreeMap<String, Vec<Term>> = BTreeMap::new();
    for ((app, _), &x) in &model.assign {
        by_app.entry(app.clone()).or_default().push(term(x, 1.0));
    }
    for (app, terms) in by_app {
        model.add_constraint(format!("one_cluster_{app}"), terms, Sense::Le, 1.0);
    }
}

/// Σ_a request[a]·z[a,c,d] − capacity[c,d]·y[c,d] ≤ 0
fn constrain_capacities(model: &mut Model, input: &NormalizedInput) {
    for (cluster, device, offering) in input.offerings() {
        let key = (cluster.to_string(), device.to_string());
        let y = model.commit[&key];
        let mut terms: Vec<Term> = input
            .apps
            .values()
            .filter_map(|app| {
                model
                    .run
                    .get(&(app.name.clone(), key.0.clone(), key.1.clone()))
                    .map(|&z| term(z, app.request as f64))
            })
            .collect();
        terms.push(term(y, -(offering.capacity as f64)));
        model.add_constraint(format!("capacity_{cluster}_{device}"), terms, Sense::Le, 0.0);
    }
}

/// z ≤ x, z ≤ y, z ≥ x + y − 1
fn constrain_run_links(model: &mut Model) {
    let links: Vec<_> = model
        .run
        .iter()
        .map(|((app, cluster, device), &z)| {
            let x = model.assign[&(app.clone(), cluster.clone())];
            let y = model.commit[&(cluster.clone(), device.clone())];
            (format!("{app}_{cluster}_{device}"), z, x, y)
        })
        .collect();

    for (suffix, z, x, y) in links {
        model.add_constraint(
            format!("z_le_x_{suffix}"),
            vec![term(z, 1.0), term(x, -1.0)],
            Sense::Le,
            0.0,
        );
        model.add_constraint(
            format!("z_le_y_{suffix}"),
            vec![term(z, 1.0), term(y, -1.0)],
            Sense::Le,
            0.0,
        );
        model.add_constraint(
            format!("z_ge_x_y_{suffix}"),
            vec![term(z, 1.0), term(x, -1.0), term(y, -1.0)],
            Sense::Ge,
            -1.0,
        );
    }
}

/// x[a,c] − Σ_d z[a,c,d] = 0
fn constrain_assign_equals_runs(model: &mut Model) {
    let mut by_pair: BTreeMap<(String, String), Vec<Term>> = BTreeMap::new();
    for ((app, cluster, _), &z) in &model.run {
        by_pair
            .entry((app.clone(), cluster.clone()))
            .or_default()
            .push(term(z, -1.0));
    }
    for ((app, cluster), mut terms) in by_pair {
        let x = model.assign[&(app.clone(), cluster.clone())];
        terms.insert(0, term(x, 1.0));
        model.add_constraint(format!("x_eq_sum_z_{app}_{cluster}"), terms, Sense::Eq, 0.0);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::input::{App, Offering};

    pub(crate) fn input(
        apps: &[(&str, u64)],
        offerings: &[(&str, &str, u64)],
        scores: &[(&str, &str, &str, f64)],
    ) -> NormalizedInput {
        let mut input = NormalizedInput::default();
        for &(name, request) in apps {
            input
                .insert_app(App {
                    name: name.to_string(),
                    workload: format!("{name}-workload"),
                    request,
                    placement_ref: format!("{name}-placement"),
                })
                .unwrap();
        }
        for &(cluster, device, capacity) in offerings {
            let offering = Offering {
                policy: format!("{device}-{cluster}"),
                capacity,
            };
            input.insert_offering(cluster, device, offering).unwrap();
        }
        for &(app, cluster, device, score) in scores {
            input.insert_score(app, cluster, device, score);
        }
        input
    }

    #[test]
    fn creates_variables_only_for_offered_pairs() {
        let input = input(
            &[("App1", 10)],
            &[("ClusterA", "gpu", 20), ("ClusterA", "cpu", 64), ("ClusterB", "cpu", 32)],
            &[
                ("App1", "ClusterA", "gpu", 1.0),
                ("App1", "ClusterA", "cpu", 2.0),
                ("App1", "ClusterB", "cpu", 3.0),
            ],
        );
        let model = build_model(&input).unwrap();

        assert_eq!(model.commit_vars().len(), 3);
        assert_eq!(model.assign_vars().len(), 2);
        assert_eq!(model.run_vars().len(), 3);
        assert!(!model.run_vars().contains_key(&(
            "App1".to_string(),
            "ClusterB".to_string(),
            "gpu".to_string()
        )));
        // 2 one-device, 1 one-cluster, 3 capacity, 9 link, 2 consistency
        assert_eq!(model.constraints().len(), 17);
    }

    #[test]
    fn clusters_without_offerings_get_no_variables() {
        let mut input = input(&[("App1", 1)], &[], &[]);
        input.insert_cluster("Empty").unwrap();
        let model = build_model(&input).unwrap();
        assert!(model.is_empty());
    }

    #[test]
    fn missing_score_fails_before_solving() {
        let input = input(
            &[("App1", 10), ("App2", 5)],
            &[("ClusterA", "gpu", 20)],
            &[("App1", "ClusterA", "gpu", 80.0)],
        );
        let err = build_model(&input).unwrap_err();
        assert!(matches!(
            err,
            OptimizeError::IncompleteObjective { ref app, .. } if app == "App2"
        ));
    }

    #[test]
    fn capacity_constraint_weights_requests() {
        let input = input(
            &[("App1", 10), ("App2", 15)],
            &[("ClusterA", "gpu", 20)],
            &[("App1", "ClusterA", "gpu", 1.0), ("App2", "ClusterA", "gpu", 1.0)],
        );
        let model = build_model(&input).unwrap();
        let capacity = model
            .constraints()
            .iter()
            .find(|c| c.name == "capacity_ClusterA_gpu")
            .unwrap();
        let coefficients: Vec<f64> = capacity.terms.iter().map(|t| t.coefficient).collect();
        assert_eq!(coefficients, [10.0, 15.0, -20.0]);
        assert_eq!(capacity.sense, Sense::Le);

        // both apps on the cluster overflow it
        let mut values = vec![1.0; model.variables().len()];
        assert!(!capacity.is_satisfied(&values, 1e-6));
        let z2 = model.run_vars()[&("App2".to_string(), "ClusterA".to_string(), "gpu".to_string())];
        values[z2.index()] = 0.0;
        assert!(capacity.is_satisfied(&values, 1e-6));
    }

    #[test]
    fn identical_inputs_build_identical_models() {
        let build = || {
            build_model(&input(
                &[("b", 1), ("a", 2)],
                &[("c2", "d1", 5), ("c1", "d2", 5), ("c1", "d1", 5)],
                &[
                    ("a", "c1", "d1", 1.0),
                    ("a", "c1", "d2", 2.0),
                    ("a", "c2", "d1", 3.0),
                    ("b", "c1", "d1", 4.0),
                    ("b", "c1", "d2", 5.0),
                    ("b", "c2", "d1", 6.0),
                ],
            ))
            .unwrap()
        };
        let model = build();
        assert_eq!(model, build());
        assert_eq!(model.variables()[0].to_string(), "y[c1,d1]");
    }
}
