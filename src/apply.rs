//! Submitting rendered placement documents as create operations.

use serde::{Deserialize, Serialize};
use std::fs::{OpenOptions, create_dir_all};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::render::{BINDING_KIND, PLACEMENT_KIND, RenderedDocument};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum ApplyOutcome {
    Created,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    #[serde(flatten)]
    pub outcome: ApplyOutcome,
}

/// Somewhere documents can be created, one at a time.
pub trait DocumentSink {
    fn create(&self, document: &RenderedDocument) -> Result<(), String>;
}

/// Create every `Placement` and `PlacementBinding`. A rejected document does
/// not stop the others.
pub fn apply_documents<S: DocumentSink + ?Sized>(
    sink: &S,
    documents: &[RenderedDocument],
) -> Vec<ApplyResult> {
    let results: Vec<ApplyResult> = documents
        .iter()
        .filter(|d| d.kind == PLACEMENT_KIND || d.kind == BINDING_KIND)
        .map(|document| {
            let outcome = match sink.create(document) {
                Ok(()) => ApplyOutcome::Created,
                Err(reason) => {
                    warn!(kind = %document.kind, name = %document.name, %reason, "failed to create document");
                    ApplyOutcome::Failed(reason)
                }
            };
            ApplyResult {
                kind: document.kind.clone(),
                name: document.name.clone(),
                namespace: document.namespace.clone(),
                outcome,
            }
        })
        .collect();

    let failed = results
        .iter()
        .filter(|r| matches!(r.outcome, ApplyOutcome::Failed(_)))
        .count();
    info!(created = results.len() - failed, failed, "applied placement documents");
    results
}

/// Writes each document to `<root>/<namespace>/<kind>-<name>.yaml`, refusing
/// to replace an existing file.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DirectorySink { root: root.into() }
    }

    pub fn path_for(&self, document: &RenderedDocument) -> PathBuf {
        self.root.join(&document.namespace).join(format!(
            "{}-{}.yaml",
            document.kind.to_lowercase(),
            document.name
        ))
    }
}

impl DocumentSink for DirectorySink {
    fn create(&self, document: &RenderedDocument) -> Result<(), String> {
        let path = self.path_for(document);
        if let Some(parent) = path.parent() {
            create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => format!("{} already exists", path.display()),
                _ => e.to_string(),
            })?;
        writeln!(file, "{}", document.body).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn document(kind: &str, name: &str) -> RenderedDocument {
        RenderedDocument {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: "default".to_string(),
            body: format!("kind: {kind}\nmetadata:\n  name: {name}"),
        }
    }

    struct RejectingSink {
        reject: &'static str,
        created: RefCell<Vec<String>>,
    }

    impl DocumentSink for RejectingSink {
        fn create(&self, document: &RenderedDocument) -> Result<(), String> {
            if document.name == self.reject {
                return Err("admission webhook denied the request".to_string());
            }
            self.created.borrow_mut().push(document.name.clone());
            Ok(())
        }
    }

    #[test]
    fn one_rejection_does_not_abort_the_rest() {
        let sink = RejectingSink {
            reject: "b",
            created: RefCell::new(Vec::new()),
        };
        let documents = [
            document("Placement", "a"),
            document("PlacementBinding", "b"),
            document("ConfigMap", "ignored"),
            document("Placement", "c"),
        ];
        let results = apply_documents(&sink, &documents);

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].outcome, ApplyOutcome::Created);
        assert!(matches!(results[1].outcome, ApplyOutcome::Failed(_)));
        assert_eq!(results[2].outcome, ApplyOutcome::Created);
        assert_eq!(*sink.created.borrow(), ["a", "c"]);
    }

    #[test]
    fn directory_sink_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path());
        let placement = document("Placement", "app1-placement");

        sink.create(&placement).unwrap();
        let written = std::fs::read_to_string(sink.path_for(&placement)).unwrap();
        assert!(written.contains("name: app1-placement"));
        assert!(sink.path_for(&placement).ends_with("default/placement-app1-placement.yaml"));

        let err = sink.create(&placement).unwrap_err();
        assert!(err.contains("already exists"));
    }
}
