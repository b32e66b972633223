//! Turning decisions into declarative placement documents.
//!
//! Every committed cluster yields a `Placement` selecting it plus a
//! `PlacementBinding` tying that placement to the chosen policy. Every placed
//! app yields a `Placement` named after the workload's placement ref.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::Result;
use crate::extract::Extraction;

const PLACEMENT_API_VERSION: &str = "cluster.open-cluster-management.io/v1beta1";
const PLACEMENT_API_GROUP: &str = "cluster.open-cluster-management.io";
const BINDING_API_VERSION: &str = "policy.open-cluster-management.io/v1";
const POLICY_API_GROUP: &str = "policy.open-cluster-management.io";
const CLUSTER_NAME_LABEL: &str = "name";

pub const PLACEMENT_KIND: &str = "Placement";
pub const BINDING_KIND: &str = "PlacementBinding";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    ClusterPlacement {
        name: String,
        namespace: String,
        cluster: String,
    },
    PolicyBinding {
        name: String,
        namespace: String,
        placement: String,
        policy: String,
    },
    WorkloadPlacement {
        name: String,
        namespace: String,
        cluster: String,
        app: String,
    },
}

impl Decision {
    pub fn name(&self) -> &str {
        match self {
            Decision::ClusterPlacement { name, .. }
            | Decision::PolicyBinding { name, .. }
            | Decision::WorkloadPlacement { name, .. } => name,
        }
    }
}

/// Expand extracted decisions into render order: cluster placements, then
/// bindings, then workload placements. `run_id` keeps names unique across
/// runs.
pub fn decisions(extraction: &Extraction, namespace: &str, run_id: &str) -> Vec<Decision> {
    let placement_name = |cluster: &str| format!("placement-{cluster}-{run_id}");

    let placements = extraction.clusters.iter().map(|d| Decision::ClusterPlacement {
        name: placement_name(&d.cluster),
        namespace: namespace.to_string(),
        cluster: d.cluster.clone(),
    });
    let bindings = extraction.clusters.iter().map(|d| Decision::PolicyBinding {
        name: format!("binding-{}-{run_id}", d.cluster),
        namespace: namespace.to_string(),
        placement: placement_name(&d.cluster),
        policy: d.policy.clone(),
    });
    let workloads = extraction.apps.iter().map(|d| Decision::WorkloadPlacement {
        name: d.placement_ref.clone(),
        namespace: namespace.to_string(),
        cluster: d.cluster.clone(),
        app: d.app.clone(),
    });

    placements.chain(bindings).chain(workloads).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderFailure {
    pub decision: Decision,
    pub reason: String,
}

pub trait Renderer {
    fn render(&self, decision: &Decision) -> Result<RenderedDocument>;
}

/// Render each decision independently; a failure is recorded against its
/// decision and the rest are still rendered.
pub fn render_all<R: Renderer + ?Sized>(
    renderer: &R,
    decisions: &[Decision],
) -> (Vec<RenderedDocument>, Vec<RenderFailure>) {
    let mut documents = Vec::with_capacity(decisions.len());
    let mut failures = Vec::new();
    for decision in decisions {
        match renderer.render(decision) {
            Ok(document) => documents.push(document),
            Err(e) => {
                warn!(decision = decision.name(), error = %e, "failed to render decision");
                failures.push(RenderFailure {
                    decision: decision.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }
    (documents, failures)
}

/// Renders Open Cluster Management `Placement` / `PlacementBinding` YAML.
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlRenderer;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlacementDoc<'a> {
    api_version: &'a str,
    kind: &'a str,
    metadata: Metadata<'a>,
    spec: PlacementSpec<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BindingDoc<'a> {
    api_version: &'a str,
    kind: &'a str,
    metadata: Metadata<'a>,
    placement_ref: TypedRef<'a>,
    subjects: Vec<TypedRef<'a>>,
}

#[derive(Serialize)]
struct Metadata<'a> {
    name: &'a str,
    namespace: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<&'a str, &'a str>,
}

#[derive(Serialize)]
struct PlacementSpec<'a> {
    predicates: Vec<Predicate<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Predicate<'a> {
    required_cluster_selector: ClusterSelector<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ClusterSelector<'a> {
    label_selector: LabelSelector<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelSelector<'a> {
    match_expressions: Vec<MatchExpression<'a>>,
}

#[derive(Serialize)]
struct MatchExpression<'a> {
    key: &'a str,
    operator: &'a str,
    values: Vec<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TypedRef<'a> {
    api_group: &'a str,
    kind: &'a str,
    name: &'a str,
}

fn placement<'a>(name: &'a str, namespace: &'a str, cluster: &'a str, app: Option<&'a str>) -> PlacementDoc<'a> {
    PlacementDoc {
        api_version: PLACEMENT_API_VERSION,
        kind: PLACEMENT_KIND,
        metadata: Metadata {
            name,
            namespace,
            labels: app.into_iter().map(|app| ("app", app)).collect(),
        },
        spec: PlacementSpec {
            predicates: vec![Predicate {
                required_cluster_selector: ClusterSelector {
                    label_selector: LabelSelector {
                        match_expressions: vec![MatchExpression {
                            key: CLUSTER_NAME_LABEL,
                            operator: "In",
                            values: vec![cluster],
                        }],
                    },
                },
            }],
        },
    }
}

impl Renderer for YamlRenderer {
    fn render(&self, decision: &Decision) -> Result<RenderedDocument> {
        let (kind, name, namespace, body) = match decision {
            Decision::ClusterPlacement {
                name,
                namespace,
                cluster,
            } => {
                let doc = placement(name, namespace, cluster, None);
                (PLACEMENT_KIND, name, namespace, serde_yaml::to_string(&doc)?)
            }
            Decision::WorkloadPlacement {
                name,
                namespace,
                cluster,
                app,
            } => {
                let doc = placement(name, namespace, cluster, Some(app.as_str()));
                (PLACEMENT_KIND, name, namespace, serde_yaml::to_string(&doc)?)
            }
            Decision::PolicyBinding {
                name,
                namespace,
                placement,
                policy,
            } => {
                let doc = BindingDoc {
                    api_version: BINDING_API_VERSION,
                    kind: BINDING_KIND,
                    metadata: Metadata {
                        name,
                        namespace,
                        labels: BTreeMap::new(),
                    },
                    placement_ref: TypedRef {
                        api_group: PLACEMENT_API_GROUP,
                        kind: PLACEMENT_KIND,
                        name: placement,
                    },
                    subjects: vec![TypedRef {
                        api_group: POLICY_API_GROUP,
                        kind: "Policy",
                        name: policy,
                    }],
                };
                (BINDING_KIND, name, namespace, serde_yaml::to_string(&doc)?)
            }
        };
        Ok(RenderedDocument {
            kind: kind.to_string(),
            name: name.clone(),
            namespace: namespace.clone(),
            body: body.trim_end().to_string(),
        })
    }
}

/// Concatenate rendered documents into one multi-document stream.
pub fn join_documents(documents: &[RenderedDocument], separator: &str) -> String {
    documents
        .iter()
        .map(|d| d.body.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}
