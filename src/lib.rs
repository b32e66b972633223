//! Device-aware workload placement.
//!
//! Given clusters, the device types they can commit to, workloads requesting
//! capacity and preference scores for (app, cluster, device) triples, choose
//! one device per cluster and at most one cluster per app so that the total
//! preference is maximal and no committed device is over capacity.
//!
//! The run is a one-way pipeline:
//!
//! ```text
//! request + references ─assemble─▶ NormalizedInput ─build_model─▶ Model
//!   ─Solver::solve─▶ SolveOutcome ─extract─▶ Extraction ─render─▶ documents
//! ```

pub mod apply;
pub mod config;
pub mod error;
pub mod extract;
pub mod input;
pub mod model;
pub mod reference;
pub mod render;
pub mod solver;
pub mod types;

pub use apply::{ApplyOutcome, ApplyResult, DirectorySink, DocumentSink, apply_documents};
pub use config::OptimizerConfig;
pub use error::{OptimizeError, Result};
pub use extract::{AppDecision, ClusterDecision, ExtractOptions, Extraction, extract};
pub use input::{NormalizedInput, ScoreNameFormat, assemble};
pub use model::{Model, build_model};
pub use reference::ReferenceData;
pub use render::{Decision, RenderFailure, RenderedDocument, Renderer, YamlRenderer};
pub use solver::{GoodLpSolver, SolveOutcome, SolveStatus, Solver};
pub use types::{OptimizationRequest, OptimizationResponse};

use tracing::info;

/// Runs optimization requests against a solver and a renderer.
///
/// Holds no per-run state: every [`Optimizer::run`] builds its own input,
/// model and decisions, so one optimizer may serve concurrent requests if
/// its solver and renderer allow it.
#[derive(Debug, Clone)]
pub struct Optimizer<S, R = YamlRenderer> {
    solver: S,
    renderer: R,
    config: OptimizerConfig,
}

impl<S: Solver> Optimizer<S> {
    pub fn new(solver: S, config: OptimizerConfig) -> Self {
        Optimizer::with_renderer(solver, YamlRenderer, config)
    }
}

impl<S: Solver, R: Renderer> Optimizer<S, R> {
    pub fn with_renderer(solver: S, renderer: R, config: OptimizerConfig) -> Self {
        Optimizer {
            solver,
            renderer,
            config,
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn run(
        &self,
        request: &OptimizationRequest,
        references: &ReferenceData,
        run_id: &str,
    ) -> Result<OptimizationReport> {
        let input = assemble(request, references)?;
        let model = build_model(&input)?;

        let outcome = self.solver.solve(&model);
        info!(status = ?outcome.status, run_id, "solver finished");

        let extraction = extract(&model, &input, &outcome, self.config.extract_options())?;
        let decisions = render::decisions(&extraction, &request.namespace, run_id);
        let (documents, render_failures) = render::render_all(&self.renderer, &decisions);

        Ok(OptimizationReport {
            extraction,
            documents,
            render_failures,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationReport {
    pub extraction: Extraction,
    pub documents: Vec<RenderedDocument>,
    pub render_failures: Vec<RenderFailure>,
}

impl OptimizationReport {
    pub fn status(&self) -> SolveStatus {
        self.extraction.status
    }

    /// Create the placement documents through `sink`. Nothing is applied
    /// unless the run was optimal.
    pub fn apply<D: DocumentSink + ?Sized>(&self, sink: &D) -> Vec<ApplyResult> {
        if !self.status().is_optimal() {
            return Vec::new();
        }
        apply_documents(sink, &self.documents)
    }

    pub fn to_response(&self, separator: &str, applied: Vec<ApplyResult>) -> OptimizationResponse {
        OptimizationResponse {
            status: self.extraction.status,
            objective_value: self.extraction.objective_value,
            output: render::join_documents(&self.documents, separator),
            applied,
        }
    }
}
