//! Serialized read-modify-write access to annotation files and edits.
//!
//! Saves for the same (dataset, episode) run one at a time behind a per-key
//! async mutex, so two annotators saving together never lose an update and
//! consensus is always recomputed from the entries that were written.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use roboqa_core::annotation::{EpisodeAnnotation, EpisodeAnnotationFile};
use roboqa_core::edit::EditModel;
use roboqa_core::types::EpisodeIndex;
use roboqa_core::CoreError;
use roboqa_events::bus::{
    DomainEvent, EventBus, EVENT_ANNOTATION_DELETED, EVENT_ANNOTATION_SAVED, EVENT_ANOMALY_VERIFIED,
    EVENT_EDITS_DELETED, EVENT_EDITS_SAVED,
};
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StorageResult;
use crate::store::{AnnotationStore, EditStore};

type Key = (String, EpisodeIndex);

/// Per-key write locks. An entry lives only while someone holds or awaits it.
type LockMap = StdMutex<HashMap<Key, Arc<Mutex<()>>>>;

pub struct AnnotationService<S> {
    store: Arc<S>,
    locks: LockMap,
    bus: Option<Arc<EventBus>>,
}

impl<S> AnnotationService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: StdMutex::new(HashMap::new()),
            bus: None,
        }
    }

    /// Publish a [`DomainEvent`] after every successful write.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn lock(&self, dataset: &str, episode: EpisodeIndex) -> KeyGuard<'_> {
        let key = (dataset.to_string(), episode);
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        KeyGuard {
            guard: Some(lock.lock_owned().await),
            key,
            locks: &self.locks,
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

/// Holds one key's write lock; drops the map entry when nobody else wants it.
struct KeyGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: Key,
    locks: &'a LockMap,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Holders and waiters all own a clone, taken under the map lock.
        if locks.get(&self.key).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&self.key);
        }
    }
}

impl<S: AnnotationStore> AnnotationService<S> {
    pub async fn get(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Option<EpisodeAnnotationFile>> {
        self.store.get_annotation(dataset, episode).await
    }

    pub async fn list_annotated_episodes(&self, dataset: &str) -> StorageResult<Vec<EpisodeIndex>> {
        self.store.list_annotated_episodes(dataset).await
    }

    /// Add or replace `annotation.annotator_id`'s entry and persist the file.
    pub async fn save_annotation(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
        annotation: EpisodeAnnotation,
    ) -> StorageResult<EpisodeAnnotationFile> {
        let _guard = self.lock(dataset, episode).await;

        let mut file = self
            .store
            .get_annotation(dataset, episode)
            .await?
            .unwrap_or_else(|| EpisodeAnnotationFile::new(dataset, episode));
        let annotator_id = annotation.annotator_id.clone();
        file.upsert(annotation)?;
        self.store.save_annotation(&file).await?;

        tracing::info!(
            dataset,
            episode_index = episode,
            annotator_id = %annotator_id,
            annotators = file.len(),
            has_consensus = file.consensus().is_some(),
            "Annotation saved",
        );
        self.publish(
            DomainEvent::new(EVENT_ANNOTATION_SAVED, dataset, episode).with_payload(json!({
                "annotator_id": annotator_id,
                "consensus": file.consensus(),
            })),
        );
        Ok(file)
    }

    /// Delete one annotator's entry, or the whole file when `annotator_id`
    /// is `None`. Removing the last entry removes the file.
    pub async fn delete_annotation(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
        annotator_id: Option<&str>,
    ) -> StorageResult<bool> {
        let _guard = self.lock(dataset, episode).await;

        let deleted = match annotator_id {
            None => self.store.delete_annotation(dataset, episode).await?,
            Some(annotator) => match self.store.get_annotation(dataset, episode).await? {
                None => false,
                Some(mut file) => {
                    if file.remove(annotator).is_none() {
                        false
                    } else if file.is_empty() {
                        self.store.delete_annotation(dataset, episode).await?
                    } else {
                        self.store.save_annotation(&file).await?;
                        true
                    }
                }
            },
        };

        if deleted {
            tracing::info!(dataset, episode_index = episode, annotator_id = ?annotator_id, "Annotation deleted");
            self.publish(
                DomainEvent::new(EVENT_ANNOTATION_DELETED, dataset, episode)
                    .with_payload(json!({ "annotator_id": annotator_id })),
            );
        }
        Ok(deleted)
    }

    /// Mark one anomaly as verified by a human.
    pub async fn verify_anomaly(
        &self,
        dataset: &str,
        episode: EpisodeIndex,
        annotator_id: &str,
        anomaly_id: &str,
    ) -> StorageResult<EpisodeAnnotationFile> {
        let _guard = self.lock(dataset, episode).await;

        let mut file = self
            .store
            .get_annotation(dataset, episode)
            .await?
            .ok_or_else(|| CoreError::NotFound {
                entity: "annotation file",
                id: format!("{dataset}/{episode}"),
            })?;
        file.verify_anomaly(annotator_id, anomaly_id)?;
        self.store.save_annotation(&file).await?;

        self.publish(
            DomainEvent::new(EVENT_ANOMALY_VERIFIED, dataset, episode)
                .with_payload(json!({ "annotator_id": annotator_id, "anomaly_id": anomaly_id })),
        );
        Ok(file)
    }
}

/// Edit overlays share the per-episode lock with annotations.
impl<S: EditStore> AnnotationService<S> {
    pub async fn get_edits(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<Option<EditModel>> {
        self.store.get_edits(dataset, episode).await
    }

    pub async fn save_edits(&self, edits: &EditModel) -> StorageResult<()> {
        let _guard = self.lock(&edits.dataset, edits.episode_index).await;
        self.store.save_edits(edits).await?;
        self.publish(
            DomainEvent::new(EVENT_EDITS_SAVED, edits.dataset.as_str(), edits.episode_index)
                .with_payload(json!({ "empty": edits.is_empty() })),
        );
        Ok(())
    }

    pub async fn delete_edits(&self, dataset: &str, episode: EpisodeIndex) -> StorageResult<bool> {
        let _guard = self.lock(dataset, episode).await;
        let deleted = self.store.delete_edits(dataset, episode).await?;
        if deleted {
            self.publish(DomainEvent::new(EVENT_EDITS_DELETED, dataset, episode));
        }
        Ok(deleted)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
