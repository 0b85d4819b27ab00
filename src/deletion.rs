// # Deletion workflow
//
// Two paths, selected by capability level at invocation time. Direct
// deletion removes files itself and reconciles the store afterwards,
// swallowing per-item failures; consent-gated deletion bundles the whole
// batch into one OS prompt and resumes through the correlator.

use crate::capability::CapabilityLevel;
use crate::consent::{ConsentKind, ConsentRequest, ConsentRequester, Correlator};
use crate::dispatcher::Replier;
use crate::store::{MediaStore, Selection, StoreValue, Table};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// One song in a deletion batch. The path is optional; items without one
/// cannot be removed directly and are skipped on the direct path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionItem {
    pub id: i64,
    #[serde(default)]
    pub filesystem_path: Option<String>,
}

pub struct DeletionWorkflow {
    store: Arc<dyn MediaStore>,
    correlator: Arc<Correlator>,
    requester: Arc<dyn ConsentRequester>,
    capability: CapabilityLevel,
    runtime: tokio::runtime::Handle,
}

impl DeletionWorkflow {
    pub fn new(
        store: Arc<dyn MediaStore>,
        correlator: Arc<Correlator>,
        requester: Arc<dyn ConsentRequester>,
        capability: CapabilityLevel,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        DeletionWorkflow {
            store,
            correlator,
            requester,
            capability,
            runtime,
        }
    }

    /// Starts the batch on a background worker; fire-and-forget from the
    /// dispatcher's point of view.
    pub fn run(&self, items: Vec<DeletionItem>, replier: Replier) {
        if self.capability.requires_deletion_consent() {
            let correlator = Arc::clone(&self.correlator);
            let requester = Arc::clone(&self.requester);
            self.runtime.spawn(async move {
                let request = ConsentRequest::BulkDeletion {
                    song_ids: items.iter().map(|item| item.id).collect(),
                };
                if !correlator.begin(ConsentKind::BulkDeletion, replier).await {
                    return;
                }
                if let Err(error) = requester.issue(request).await {
                    correlator.fail_pending(error.into()).await;
                }
            });
        } else {
            let store = Arc::clone(&self.store);
            self.runtime.spawn(delete_directly(store, items, replier));
        }
    }
}

/// Direct path: remove each file that has a path and still exists, then
/// reconcile the store over the paths actually removed. Per-item failures
/// are logged and swallowed; the batch resolves with success.
async fn delete_directly(store: Arc<dyn MediaStore>, items: Vec<DeletionItem>, replier: Replier) {
    let mut removed: Vec<StoreValue> = Vec::with_capacity(items.len());
    for item in &items {
        let Some(path) = &item.filesystem_path else {
            warn!(id = item.id, "file without path not deleted");
            continue;
        };
        if tokio::fs::metadata(path).await.is_err() {
            info!(id = item.id, path, "file already absent, skipping");
            continue;
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => removed.push(StoreValue::Text(path.clone())),
            Err(error) => warn!(id = item.id, path, "file not deleted: {error}"),
        }
    }

    if !removed.is_empty() {
        if let Err(error) = store
            .delete(Table::Songs, &Selection::In("filesystem_path", removed))
            .await
        {
            replier.fail(error.into());
            return;
        }
    }
    store.notify_change(Table::Songs);
    replier.succeed(Value::Bool(true));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::Outcome;
    use crate::test_support::{replier_pair, rows, MemoryStore, RecordingConsentRequester};
    use std::io::Write;

    fn workflow(
        store: &MemoryStore,
        requester: Arc<RecordingConsentRequester>,
        capability: CapabilityLevel,
    ) -> (DeletionWorkflow, Arc<Correlator>) {
        let correlator = Arc::new(Correlator::new());
        let workflow = DeletionWorkflow::new(
            store.shared(),
            Arc::clone(&correlator),
            requester,
            capability,
            tokio::runtime::Handle::current(),
        );
        (workflow, correlator)
    }

    fn temp_song(dir: &tempfile::TempDir, name: &str) -> String {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"flac").unwrap();
        path.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn direct_path_deletes_files_and_reconciles_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let first = temp_song(&dir, "a.flac");
        let second = temp_song(&dir, "b.flac");

        let store = MemoryStore::new();
        store.push_row(Table::Songs, rows::song(1, "A", Some(&first)));
        store.push_row(Table::Songs, rows::song(2, "B", Some(&second)));
        store.push_row(Table::Songs, rows::song(3, "C", None));

        let requester = Arc::new(RecordingConsentRequester::new());
        let (workflow, _) = workflow(&store, requester, CapabilityLevel::Legacy);
        let (replier, mut completions) = replier_pair(1);

        let items = vec![
            DeletionItem { id: 1, filesystem_path: Some(first.clone()) },
            DeletionItem { id: 2, filesystem_path: Some(second.clone()) },
            DeletionItem { id: 3, filesystem_path: None },
        ];
        workflow.run(items, replier);

        let completion = completions.recv().await.unwrap();
        assert!(matches!(completion.outcome, Outcome::Success(Value::Bool(true))));
        assert!(!std::path::Path::new(&first).exists());
        assert!(!std::path::Path::new(&second).exists());
        // Exactly the two removed paths were reconciled; the pathless
        // item was skipped silently.
        assert_eq!(store.deleted_song_paths(), vec![first, second]);
        assert_eq!(store.notifications(), vec![Table::Songs]);
    }

    #[tokio::test]
    async fn direct_path_resolves_success_when_every_item_is_skipped() {
        let store = MemoryStore::new();
        let requester = Arc::new(RecordingConsentRequester::new());
        let (workflow, _) = workflow(&store, requester, CapabilityLevel::Legacy);
        let (replier, mut completions) = replier_pair(1);

        workflow.run(
            vec![DeletionItem { id: 1, filesystem_path: Some("/nonexistent/a.flac".into()) }],
            replier,
        );

        let completion = completions.recv().await.unwrap();
        assert!(matches!(completion.outcome, Outcome::Success(Value::Bool(true))));
        assert!(store.deleted_song_paths().is_empty());
        assert_eq!(store.notifications(), vec![Table::Songs]);
    }

    #[tokio::test]
    async fn consent_path_issues_one_request_and_resumes_on_the_callback() {
        let store = MemoryStore::new();
        let requester = Arc::new(RecordingConsentRequester::new());
        let (workflow, correlator) =
            workflow(&store, Arc::clone(&requester), CapabilityLevel::ConsentManaged);
        let (replier, mut completions) = replier_pair(1);

        workflow.run(
            vec![
                DeletionItem { id: 4, filesystem_path: None },
                DeletionItem { id: 5, filesystem_path: Some("/music/b.flac".into()) },
            ],
            replier,
        );

        // The consent request covers the whole batch by id.
        let issued = requester.wait_for_issue().await;
        assert_eq!(issued, ConsentRequest::BulkDeletion { song_ids: vec![4, 5] });
        // No files or store rows are touched before the user answers.
        assert!(store.deleted_song_paths().is_empty());

        assert!(correlator.resolve(ConsentKind::BulkDeletion, true).await);
        let completion = completions.recv().await.unwrap();
        assert!(matches!(completion.outcome, Outcome::Success(Value::Bool(true))));
    }

    #[tokio::test]
    async fn consent_path_fails_the_call_when_issuance_fails() {
        let store = MemoryStore::new();
        let requester = Arc::new(RecordingConsentRequester::new());
        requester.fail_next("prompt surface unavailable");
        let (workflow, _) =
            workflow(&store, Arc::clone(&requester), CapabilityLevel::ConsentManaged);
        let (replier, mut completions) = replier_pair(1);

        workflow.run(vec![DeletionItem { id: 4, filesystem_path: None }], replier);

        let completion = completions.recv().await.unwrap();
        match completion.outcome {
            Outcome::Failure(failure) => {
                assert_eq!(failure.code, "PLATFORM_CONSENT_ERROR");
                assert!(failure.message.contains("prompt surface unavailable"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }
}
