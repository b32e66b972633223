//! Normalization of a request and its reference data into the typed sets the
//! model is built from.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::error::{OptimizeError, Result};
use crate::reference::ReferenceData;
use crate::types::{
    APP_LABEL, ObjectMeta, OptimizationRequest, REQUEST_AMOUNT_LABEL, SUPPLY_AMOUNT_LABEL,
    SUPPLY_DEVICE_LABEL,
};

/// (app, cluster, device)
pub type ScoreKey = (String, String, String);

#[derive(Debug, Clone, PartialEq)]
pub struct App {
    pub name: String,
    pub workload: String,
    pub request: u64,
    pub placement_ref: String,
}

/// What a cluster supplies for one device type, and the policy that supplies it.
#[derive(Debug, Clone, PartialEq)]
pub struct Offering {
    pub policy: String,
    pub capacity: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedInput {
    pub apps: BTreeMap<String, App>,
    /// cluster → device → offering. Clusters offering nothing are kept.
    pub clusters: BTreeMap<String, BTreeMap<String, Offering>>,
    pub devices: BTreeSet<String>,
    pub scores: BTreeMap<ScoreKey, f64>,
}

impl NormalizedInput {
    pub fn insert_app(&mut self, app: App) -> Result<()> {
        if app.request == 0 {
            return Err(OptimizeError::InvalidReference {
                kind: "workload",
                name: app.workload,
                reason: "resource request must be positive".to_string(),
            });
        }
        if let Some(existing) = self.apps.get(&app.name) {
            return Err(OptimizeError::InvalidReference {
                kind: "workload",
                name: app.workload,
                reason: format!("app {} is already requested by {}", app.name, existing.workload),
            });
        }
        self.apps.insert(app.name.clone(), app);
        Ok(())
    }

    pub fn insert_cluster(&mut self, cluster: &str) -> Result<()> {
        if self.clusters.contains_key(cluster) {
            return Err(OptimizeError::InvalidReference {
                kind: "cluster",
                name: cluster.to_string(),
                reason: "listed more than once".to_string(),
            });
        }
        self.clusters.insert(cluster.to_string(), BTreeMap::new());
        Ok(())
    }

    pub fn insert_offering(&mut self, cluster: &str, device: &str, offering: Offering) -> Result<()> {
        let offerings = self.clusters.entry(cluster.to_string()).or_default();
        if let Some(existing) = offerings.get(device) {
            return Err(OptimizeError::InvalidReference {
                kind: "policy",
                name: offering.policy,
                reason: format!(
                    "cluster {cluster} already offers device {device} through {}",
                    existing.policy
                ),
            });
        }
        offerings.insert(device.to_string(), offering);
        self.devices.insert(device.to_string());
        Ok(())
    }

    pub fn insert_score(&mut self, app: &str, cluster: &str, device: &str, score: f64) {
        let key = (app.to_string(), cluster.to_string(), device.to_string());
        if let Some(previous) = self.scores.insert(key, score) {
            warn!(app, cluster, device, previous, score, "duplicate preference score, keeping the last");
        }
    }

    pub fn offering(&self, cluster: &str, device: &str) -> Option<&Offering> {
        self.clusters.get(cluster).and_then(|offerings| offerings.get(device))
    }

    pub fn score(&self, app: &str, cluster: &str, device: &str) -> Option<f64> {
        self.scores
            .get(&(app.to_string(), cluster.to_string(), device.to_string()))
            .copied()
    }

    /// Every offered (cluster, device) pair in lexical order.
    pub fn offerings(&self) -> impl Iterator<Item = (&str, &str, &Offering)> {
        self.clusters.iter().flat_map(|(cluster, offerings)| {
            offerings
                .iter()
                .map(move |(device, offering)| (cluster.as_str(), device.as_str(), offering))
        })
    }
}

/// A score name template such as `${app}-${device}`.
///
/// Placeholders match non-greedily and the whole name must match.
/// Placeholders other than `app` and `device` are matched but ignored.
#[derive(Debug, Clone)]
pub struct ScoreNameFormat {
    format: String,
    pattern: Regex,
}

impl ScoreNameFormat {
    pub fn parse(format: &str) -> Result<Self> {
        let invalid = |reason: String| OptimizeError::InvalidScoreFormat {
            format: format.to_string(),
            reason,
        };

        let mut pattern = String::from("^");
        let mut placeholders = BTreeSet::new();
        let mut rest = format;
        while let Some(start) = rest.find("${") {
            pattern.push_str(&regex::escape(&rest[..start]));
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(invalid("unterminated placeholder".to_string()));
            };
            let name = &after[..end];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(invalid(format!("invalid placeholder name {name:?}")));
            }
            if !placeholders.insert(name) {
                return Err(invalid(format!("placeholder {name} used more than once")));
            }
            pattern.push_str(&format!("(?P<{name}>.+?)"));
            rest = &after[end + 1..];
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        for required in ["app", "device"] {
            if !placeholders.contains(required) {
                return Err(invalid(format!("missing ${{{required}}} placeholder")));
            }
        }

        let pattern = Regex::new(&pattern).map_err(|e| invalid(e.to_string()))?;
        Ok(ScoreNameFormat {
            format: format.to_string(),
            pattern,
        })
    }

    /// Extract `(app, device)` from a score name, if it matches.
    pub fn parse_name<'a>(&self, name: &'a str) -> Option<(&'a str, &'a str)> {
        let captures = self.pattern.captures(name)?;
        let app = captures.name("app")?.as_str();
        let device = captures.name("device")?.as_str();
        Some((app, device))
    }

    pub fn as_str(&self) -> &str {
        &self.format
    }
}

/// Resolve every cluster and workload named in the request against the
/// reference data and collect capacities, requests and preference scores.
///
/// Any name without a reference record aborts the whole run.
pub fn assemble(request: &OptimizationRequest, references: &ReferenceData) -> Result<NormalizedInput> {
    let format = ScoreNameFormat::parse(&request.preference.score_name_format)?;
    let mut input = NormalizedInput::default();

    for cluster in &request.clusters {
        input.insert_cluster(&cluster.name)?;
        for policy_ref in &cluster.available_policies {
            let policy = references.policy(&policy_ref.name)?;
            let device = label(&policy.metadata, "policy", SUPPLY_DEVICE_LABEL)?;
            let capacity = amount(&policy.metadata, "policy", SUPPLY_AMOUNT_LABEL)?;
            let offering = Offering {
                policy: policy_ref.name.clone(),
                capacity,
            };
            input.insert_offering(&cluster.name, device, offering)?;
        }
    }

    for workload_ref in &request.target_workloads {
        let workload = references.workload(&workload_ref.name)?;
        let app = label(&workload.metadata, "workload", APP_LABEL)?;
        let request_amount = amount(&workload.metadata, "workload", REQUEST_AMOUNT_LABEL)?;
        let placement_ref = workload
            .spec
            .placement_refs
            .first()
            .ok_or_else(|| OptimizeError::InvalidReference {
                kind: "workload",
                name: workload_ref.name.clone(),
                reason: "no placement ref".to_string(),
            })?;
        input.insert_app(App {
            name: app.to_string(),
            workload: workload_ref.name.clone(),
            request: request_amount,
            placement_ref: placement_ref.name.clone(),
        })?;
    }

    let series = &request.preference.score_series_name;
    let cluster_names: Vec<String> = input.clusters.keys().cloned().collect();
    let mut unparsable = 0usize;
    for cluster in &cluster_names {
        if input.clusters[cluster].is_empty() {
            debug!(cluster = %cluster, "cluster offers no device, skipping scores");
            continue;
        }
        for sample in references.score_samples(cluster, series)? {
            let Some((app, device)) = format.parse_name(&sample.name) else {
                debug!(cluster = %cluster, score = %sample.name, format = format.as_str(), "score name does not match format, skipping");
                unparsable += 1;
                continue;
            };
            if !input.apps.contains_key(app) || input.offering(cluster, device).is_none() {
                debug!(cluster = %cluster, app, device, "score not used by this run");
                continue;
            }
            if !sample.value.is_finite() {
                return Err(OptimizeError::InvalidReference {
                    kind: "score",
                    name: sample.name.clone(),
                    reason: format!("value {} on cluster {cluster} is not finite", sample.value),
                });
            }
            input.insert_score(app, cluster, device, sample.value);
        }
    }

    info!(
        apps = input.apps.len(),
        clusters = input.clusters.len(),
        devices = input.devices.len(),
        scores = input.scores.len(),
        unparsable,
        "assembled optimization input"
    );
    Ok(input)
}

fn label<'a>(metadata: &'a ObjectMeta, kind: &'static str, key: &str) -> Result<&'a str> {
    metadata
        .labels
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| OptimizeError::InvalidReference {
            kind,
            name: metadata.name.clone(),
            reason: format!("missing label {key}"),
        })
}

fn amount(metadata: &ObjectMeta, kind: &'static str, key: &str) -> Result<u64> {
    let value = label(metadata, kind, key)?;
    value
        .trim()
        .parse()
        .map_err(|_| OptimizeError::InvalidReference {
            kind,
            name: metadata.name.clone(),
            reason: format!("label {key}={value:?} is not a non-negative integer"),
        })
}
