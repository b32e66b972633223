//! Name-keyed lookup tables over reference documents.
//!
//! Reference data is a snapshot of the control plane's policies, workloads
//! and per-cluster score series. It is loaded once per run and only read
//! afterwards.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{read_dir, read_to_string};
use std::path::Path;
use tracing::debug;

use crate::error::{OptimizeError, Result};
use crate::types::{PolicyRecord, ReferenceDocument, ScoreRecord, ScoreSample, WorkloadRecord};

/// (cluster, score series) → score record
type ScoreKey = (String, String);

#[derive(Debug, Clone, Default)]
pub struct ReferenceData {
    policies: BTreeMap<String, PolicyRecord>,
    workloads: BTreeMap<String, WorkloadRecord>,
    scores: BTreeMap<ScoreKey, ScoreRecord>,
}

impl ReferenceData {
    pub fn from_documents(documents: impl IntoIterator<Item = ReferenceDocument>) -> Result<Self> {
        let mut data = ReferenceData::default();
        for document in documents {
            data.insert(document)?;
        }
        Ok(data)
    }

    /// Load every `*.yaml` / `*.yml` file under `path` (or `path` itself if it
    /// is a file), in lexical file name order.
    pub fn load(path: &Path) -> Result<Self> {
        let mut files = if path.is_dir() {
            read_dir(path)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<Vec<_>>>()?
                .into_iter()
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .map(|ext| ext == "yaml" || ext == "yml")
                            .unwrap_or(false)
                })
                .collect()
        } else {
            vec![path.to_path_buf()]
        };
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut data = ReferenceData::default();
        for file in &files {
            let yaml = read_to_string(file)?;
            for document in parse_documents(&yaml)? {
                data.insert(document)?;
            }
        }
        debug!(
            files = files.len(),
            policies = data.policies.len(),
            workloads = data.workloads.len(),
            scores = data.scores.len(),
            "loaded reference data"
        );
        Ok(data)
    }

    pub fn insert(&mut self, document: ReferenceDocument) -> Result<()> {
        match document {
            ReferenceDocument::Policy(policy) => {
                let name = policy.metadata.name.clone();
                insert_unique(&mut self.policies, name.clone(), policy, "policy", &name)
            }
            ReferenceDocument::ManifestWorkReplicaSet(workload) => {
                let name = workload.metadata.name.clone();
                insert_unique(&mut self.workloads, name.clone(), workload, "workload", &name)
            }
            ReferenceDocument::AddonPlacementScore(score) => {
                let series = score.metadata.name.clone();
                let Some(cluster) = score.metadata.namespace.clone() else {
                    return Err(OptimizeError::InvalidReference {
                        kind: "score",
                        name: series,
                        reason: "missing cluster namespace".to_string(),
                    });
                };
                let label = format!("{cluster}/{series}");
                insert_unique(&mut self.scores, (cluster, series), score, "score", &label)
            }
        }
    }

    pub fn policy(&self, name: &str) -> Result<&PolicyRecord> {
        self.policies
            .get(name)
            .ok_or_else(|| OptimizeError::MissingReference {
                kind: "policy",
                name: name.to_string(),
            })
    }

    pub fn workload(&self, name: &str) -> Result<&WorkloadRecord> {
        self.workloads
            .get(name)
            .ok_or_else(|| OptimizeError::MissingReference {
                kind: "workload",
                name: name.to_string(),
            })
    }

    pub fn score_samples(&self, cluster: &str, series: &str) -> Result<&[ScoreSample]> {
        self.scores
            .get(&(cluster.to_string(), series.to_string()))
            .map(|record| record.status.scores.as_slice())
            .ok_or_else(|| OptimizeError::MissingReference {
                kind: "score",
                name: format!("{cluster}/{series}"),
            })
    }

    /// Score records ordered by (cluster, series), optionally for one cluster.
    pub fn score_records<'a>(
        &'a self,
        cluster: Option<&'a str>,
    ) -> impl Iterator<Item = &'a ScoreRecord> + 'a {
        self.scores
            .iter()
            .filter(move |((c, _), _)| cluster.is_none_or(|wanted| wanted == c))
            .map(|(_, record)| record)
    }
}

fn insert_unique<K: Ord, V>(
    map: &mut BTreeMap<K, V>,
    key: K,
    value: V,
    kind: &'static str,
    name: &str,
) -> Result<()> {
    if map.contains_key(&key) {
        return Err(OptimizeError::InvalidReference {
            kind,
            name: name.to_string(),
            reason: "defined more than once".to_string(),
        });
    }
    map.insert(key, value);
    Ok(())
}

/// Split a multi-document YAML stream into reference documents, skipping
/// empty documents and kinds the optimizer does not consume.
pub fn parse_documents(yaml: &str) -> Result<Vec<ReferenceDocument>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        match value.get("kind").and_then(|kind| kind.as_str()) {
            Some(kind) if ReferenceDocument::KINDS.contains(&kind) => {
                documents.push(serde_yaml::from_value(value)?);
            }
            kind => debug!(?kind, "skipping unrelated document"),
        }
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;

    const POLICY_AND_SCORE: &str = r#"
apiVersion: policy.open-cluster-management.io/v1
kind: Policy
metadata:
  name: gpu-large-a
  labels:
    resource-supply-kind: gpu
    resource-supply-amount: "20"
    resource-supply-device: gpu-large
---
apiVersion: cluster.open-cluster-management.io/v1alpha1
kind: AddonPlacementScore
metadata:
  name: perf
  namespace: ClusterA
status:
  scores:
    - name: App1-gpu-large
      value: 80
---
kind: ConfigMap
metadata:
  name: unrelated
"#;

    #[test]
    fn parses_known_kinds_and_skips_others() {
        let documents = parse_documents(POLICY_AND_SCORE).unwrap();
        assert_eq!(documents.len(), 2);

        let data = ReferenceData::from_documents(documents).unwrap();
        assert_eq!(
            data.policy("gpu-large-a").unwrap().metadata.labels["resource-supply-device"],
            "gpu-large"
        );
        let samples = data.score_samples("ClusterA", "perf").unwrap();
        assert_eq!(samples[0].name, "App1-gpu-large");
        assert_eq!(samples[0].value, 80.0);
    }

    #[test]
    fn missing_records_are_missing_references() {
        let data = ReferenceData::default();
        assert!(matches!(
            data.workload("train-job"),
            Err(OptimizeError::MissingReference { kind: "workload", .. })
        ));
        assert!(matches!(
            data.score_samples("ClusterA", "perf"),
            Err(OptimizeError::MissingReference { kind: "score", .. })
        ));
    }

    #[test]
    fn rejects_duplicate_records() {
        let mut documents = parse_documents(POLICY_AND_SCORE).unwrap();
        documents.extend(parse_documents(POLICY_AND_SCORE).unwrap());
        assert!(matches!(
            ReferenceData::from_documents(documents),
            Err(OptimizeError::InvalidReference { kind: "policy", .. })
        ));
    }

    #[test]
    fn loads_yaml_files_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("a.yaml"), POLICY_AND_SCORE).unwrap();
        write(dir.path().join("notes.txt"), "kind: Policy").unwrap();

        let data = ReferenceData::load(dir.path()).unwrap();
        assert!(data.policy("gpu-large-a").is_ok());
        assert_eq!(data.score_records(Some("ClusterA")).count(), 1);
        assert_eq!(data.score_records(Some("ClusterB")).count(), 0);
    }
}
