use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::conversation::ThreadId;
use crate::errors::ApplicationError;
use crate::flows::states::Checkpoint;

/// Durable map from thread id to the thread's latest checkpoint.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, ApplicationError>;
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ApplicationError>;
}

/// Keeps checkpoints as serialized JSON so loads go through the same decode path as a
/// persistent store.
#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    snapshots: Arc<RwLock<HashMap<ThreadId, String>>>,
}

impl InMemoryCheckpointStore {
    pub fn len(&self) -> usize {
        match self.snapshots.read() {
            Ok(snapshots) => snapshots.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, ApplicationError> {
        let raw = match self.snapshots.read() {
            Ok(snapshots) => snapshots.get(thread_id).cloned(),
            Err(poisoned) => poisoned.into_inner().get(thread_id).cloned(),
        };
        raw.map(|json| {
            serde_json::from_str(&json).map_err(|error| {
                ApplicationError::Persistence(format!("corrupt checkpoint for {thread_id}: {error}"))
            })
        })
        .transpose()
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), ApplicationError> {
        let json = serde_json::to_string(checkpoint)
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        match self.snapshots.write() {
            Ok(mut snapshots) => snapshots.insert(checkpoint.thread_id.clone(), json),
            Err(poisoned) => poisoned.into_inner().insert(checkpoint.thread_id.clone(), json),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{CheckpointStore, InMemoryCheckpointStore};
    use crate::domain::conversation::{ConversationState, ThreadId};
    use crate::flows::states::{Checkpoint, CheckpointStatus, Stage};

    fn checkpoint(thread: &str, status: CheckpointStatus) -> Checkpoint {
        Checkpoint {
            thread_id: ThreadId(thread.to_owned()),
            stage: Stage::Approval,
            status,
            state: ConversationState::new(
                ThreadId(thread.to_owned()),
                "+5511000000000",
                "negotiator",
                Decimal::from(40),
            ),
            pending_approval: None,
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips_by_thread() {
        let store = InMemoryCheckpointStore::default();
        store.save(&checkpoint("a", CheckpointStatus::AwaitingApproval)).await.expect("save");
        store.save(&checkpoint("b", CheckpointStatus::AwaitingMessage)).await.expect("save");

        let loaded = store.load(&ThreadId("a".to_owned())).await.expect("load").expect("present");
        assert!(loaded.is_awaiting_approval());
        assert_eq!(store.len(), 2);
        assert!(store.load(&ThreadId("zzz".to_owned())).await.expect("load").is_none());
    }

    #[tokio::test]
    async fn later_save_replaces_earlier_checkpoint() {
        let store = InMemoryCheckpointStore::default();
        store.save(&checkpoint("a", CheckpointStatus::AwaitingApproval)).await.expect("save");
        store.save(&checkpoint("a", CheckpointStatus::Closed)).await.expect("save");

        let loaded = store.load(&ThreadId("a".to_owned())).await.expect("load").expect("present");
        assert_eq!(loaded.status, CheckpointStatus::Closed);
        assert!(loaded.state_for_message().is_err());
    }
}
