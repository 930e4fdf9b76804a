//! Cleanup ledger for remote-side objects.
//!
//! Every uploaded file and vector store created during a run is recorded
//! here; the engine drains the ledger in reverse creation order on every exit
//! path. Draining is idempotent and never raises: deletion failures are
//! logged and counted only.

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::api::ApiClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteObject {
    File(String),
    VectorStore(String),
}

impl RemoteObject {
    pub fn id(&self) -> &str {
        match self {
            RemoteObject::File(id) | RemoteObject::VectorStore(id) => id,
        }
    }
}

#[derive(Default)]
pub struct CleanupLedger {
    objects: Mutex<Vec<RemoteObject>>,
}

impl CleanupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, object: RemoteObject) {
        let mut objects = self.objects.lock().await;
        if !objects.contains(&object) {
            objects.push(object);
        }
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }

    /// Delete every recorded object in reverse creation order, best effort.
    /// Returns the number of delete calls submitted. A second drain is a
    /// no-op.
    pub async fn drain(&self, client: &ApiClient) -> usize {
        let objects: Vec<RemoteObject> = {
            let mut guard = self.objects.lock().await;
            std::mem::take(&mut *guard)
        };

        let mut submitted = 0;
        for object in objects.into_iter().rev() {
            submitted += 1;
            let outcome = match &object {
                RemoteObject::File(id) => client.delete_file(id).await,
                RemoteObject::VectorStore(id) => client.delete_vector_store(id).await,
            };
            match outcome {
                Ok(()) => debug!(id = object.id(), "deleted remote object"),
                Err(err) => warn!(id = object.id(), "cleanup delete failed: {err}"),
            }
        }
        submitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_deduplicate() {
        let ledger = CleanupLedger::new();
        ledger.record(RemoteObject::File("file_1".into())).await;
        ledger.record(RemoteObject::File("file_1".into())).await;
        ledger.record(RemoteObject::VectorStore("vs_1".into())).await;
        assert_eq!(ledger.len().await, 2);
    }

    #[tokio::test]
    async fn drain_is_idempotent() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("DELETE"))
            .respond_with(wiremock::ResponseTemplate::new(200))
            .mount(&server)
            .await;
        let client = ApiClient::with_base_url("test-key", server.uri());

        let ledger = CleanupLedger::new();
        ledger.record(RemoteObject::File("file_1".into())).await;
        ledger.record(RemoteObject::VectorStore("vs_1".into())).await;

        assert_eq!(ledger.drain(&client).await, 2);
        assert_eq!(ledger.drain(&client).await, 0);
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn drain_survives_delete_failures() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("DELETE"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let client = ApiClient::with_base_url("test-key", server.uri());

        let ledger = CleanupLedger::new();
        ledger.record(RemoteObject::File("file_1".into())).await;
        // Failure is logged, not raised, and the object is not retried.
        assert_eq!(ledger.drain(&client).await, 1);
        assert!(ledger.is_empty().await);
    }
}
