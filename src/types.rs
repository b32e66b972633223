use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{OptimizeError, Result};
use crate::solver::SolveStatus;

pub const SUPPLY_AMOUNT_LABEL: &str = "resource-supply-amount";
pub const SUPPLY_DEVICE_LABEL: &str = "resource-supply-device";
pub const APP_LABEL: &str = "app";
pub const REQUEST_AMOUNT_LABEL: &str = "resource-request-amount";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub namespace: String,
    pub clusters: Vec<ClusterRequest>,
    #[serde(rename = "targetWorkloads")]
    pub target_workloads: Vec<NamedRef>,
    pub preference: Preference,
}

impl OptimizationRequest {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(OptimizeError::InvalidRequest)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub name: String,
    #[serde(rename = "availablePolicies", default)]
    pub available_policies: Vec<NamedRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedRef {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    #[serde(rename = "scoreSeriesName", alias = "addonPlacementScore")]
    pub score_series_name: String,
    #[serde(rename = "scoreNameFormat", alias = "scoreDimensionFormat")]
    pub score_name_format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A reference document as stored by the control plane, dispatched on `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ReferenceDocument {
    Policy(PolicyRecord),
    ManifestWorkReplicaSet(WorkloadRecord),
    AddonPlacementScore(ScoreRecord),
}

impl ReferenceDocument {
    pub const KINDS: [&'static str; 3] =
        ["Policy", "ManifestWorkReplicaSet", "AddonPlacementScore"];
}

/// A device offering: a policy whose labels describe the capacity it supplies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub metadata: ObjectMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadRecord {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WorkloadSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadSpec {
    #[serde(rename = "placementRefs", default)]
    pub placement_refs: Vec<NamedRef>,
}

/// Per-cluster score series. `metadata.namespace` names the cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: ScoreStatus,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreStatus {
    #[serde(default)]
    pub scores: Vec<ScoreSample>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSample {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResponse {
    pub status: SolveStatus,
    pub objective_value: Option<f64>,
    pub output: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applied: Vec<crate::apply::ApplyResult>,
}
