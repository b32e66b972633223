//! The solving contract and its `good_lp` backend.

use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution as LpSolution, SolverModel, Variable,
    variable, variables,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{Model, Sense, Term};

#[cfg(not(any(feature = "microlp", feature = "cbc")))]
compile_error!("enable one solver backend feature: `microlp` or `cbc`");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
    Error,
}

impl SolveStatus {
    pub fn is_optimal(self) -> bool {
        self == SolveStatus::Optimal
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub status: SolveStatus,
    /// One value per model variable, indexed by [`VarId`](crate::model::VarId).
    /// Empty unless `status` is `Optimal`.
    pub values: Vec<f64>,
    pub objective_value: Option<f64>,
    /// Backend message accompanying an `Error` status.
    pub detail: Option<String>,
}

impl SolveOutcome {
    pub fn optimal(values: Vec<f64>, objective_value: f64) -> Self {
        SolveOutcome {
            status: SolveStatus::Optimal,
            values,
            objective_value: Some(objective_value),
            detail: None,
        }
    }

    pub fn non_optimal(status: SolveStatus, detail: Option<String>) -> Self {
        SolveOutcome {
            status,
            values: Vec::new(),
            objective_value: None,
            detail,
        }
    }
}

/// An external MILP solver. Every variable of the model is binary.
///
/// Implementations must be callable from concurrent runs or serialize
/// internally.
pub trait Solver {
    fn solve(&self, model: &Model) -> SolveOutcome;
}

impl<S: Solver + ?Sized> Solver for &S {
    fn solve(&self, model: &Model) -> SolveOutcome {
        (**self).solve(model)
    }
}

/// Solves through `good_lp`, using CBC with the `cbc` feature and the
/// pure-Rust microlp backend otherwise.
#[derive(Debug, Clone, Default)]
pub struct GoodLpSolver {
    pub log: bool,
}

impl GoodLpSolver {
    pub fn new(log: bool) -> Self {
        GoodLpSolver { log }
    }
}

impl Solver for GoodLpSolver {
    fn solve(&self, model: &Model) -> SolveOutcome {
        if model.is_empty() {
            debug!("empty model, nothing to solve");
            return SolveOutcome::optimal(Vec::new(), 0.0);
        }

        let (problem_vars, handles) = init_variables(model);
        let objective = create_expression(model.objective(), &handles);
        let lp = create_model(problem_vars, objective, self.log);
        let lp = model.constraints().iter().fold(lp, |m, c| {
            let lhs = create_expression(&c.terms, &handles);
            let constraint = match c.sense {
                Sense::Le => lhs.leq(c.rhs),
                Sense::Ge => lhs.geq(c.rhs),
                Sense::Eq => lhs.eq(c.rhs),
            };
            m.with(constraint)
        });

        match lp.solve() {
            Ok(solution) => {
                let values: Vec<f64> = handles.iter().map(|&v| solution.value(v)).collect();
                let objective_value = model.objective_value(&values);
                SolveOutcome::optimal(values, objective_value)
            }
            Err(ResolutionError::Infeasible) => {
                SolveOutcome::non_optimal(SolveStatus::Infeasible, None)
            }
            Err(ResolutionError::Unbounded) => {
                SolveOutcome::non_optimal(SolveStatus::Unbounded, None)
            }
            Err(e) => {
                warn!(error = %e, "solver failed");
                SolveOutcome::non_optimal(SolveStatus::Error, Some(e.to_string()))
            }
        }
    }
}

/// One binary good_lp variable per model variable, in `VarId` order.
fn init_variables(model: &Model) -> (ProblemVariables, Vec<Variable>) {
    let mut problem_vars = variables!();
    let handles = model
        .variables()
        .iter()
        .map(|key| problem_vars.add(variable().binary().name(key.to_string())))
        .collect();
    (problem_vars, handles)
}

fn create_expression(terms: &[Term], handles: &[Variable]) -> Expression {
    terms.iter().fold(Expression::from(0.0), |sum, t| {
        sum + handles[t.var.index()] * t.coefficient
    })
}

#[cfg(feature = "cbc")]
fn create_model(
    variables: ProblemVariables,
    objective: Expression,
    log: bool,
) -> impl SolverModel<Error = ResolutionError> {
    use good_lp::solvers::coin_cbc::coin_cbc;

    let mut model = variables.maximise(objective).using(coin_cbc);
    if !log {
        model.set_parameter("loglevel", "0");
    }
    model
}

#[cfg(all(feature = "microlp", not(feature = "cbc")))]
fn create_model(
    variables: ProblemVariables,
    objective: Expression,
    _log: bool,
) -> impl SolverModel<Error = ResolutionError> {
    use good_lp::solvers::microlp::microlp;

    variables.maximise(objective).using(microlp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build_model;
    use crate::model::tests::input;

    #[test]
    fn solves_single_cluster_knapsack() {
        let input = input(
            &[("App1", 10), ("App2", 15), ("App3", 5)],
            &[("ClusterA", "gpu", 20)],
            &[
                ("App1", "ClusterA", "gpu", 10.0),
                ("App2", "ClusterA", "gpu", 30.0),
                ("App3", "ClusterA", "gpu", 15.0),
            ],
        );
        let model = build_model(&input).unwrap();
        let outcome = GoodLpSolver::default().solve(&model);

        assert_eq!(outcome.status, SolveStatus::Optimal);
        assert_eq!(outcome.values.len(), model.variables().len());
        // App2 + App3 = 20 units, score 45
        assert!((outcome.objective_value.unwrap() - 45.0).abs() < 1e-6);
    }

    #[test]
    fn empty_model_is_trivially_optimal() {
        let outcome = GoodLpSolver::default().solve(&Model::default());
        assert_eq!(outcome, SolveOutcome::optimal(Vec::new(), 0.0));
    }
}
