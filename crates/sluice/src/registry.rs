//! Directory of live delivery streams.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::arn::PipelineId;
use crate::pipeline::{Pipeline, SourceType};

/// One page of a listing.
#[derive(Debug)]
pub struct ListPage {
    pub pipelines: Vec<Arc<Pipeline>>,
    pub has_next: bool,
}

/// Concurrent map from [`PipelineId`] to live pipeline.
///
/// A single reader/writer lock guards the map; lookups take the read side.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    pipelines: RwLock<HashMap<PipelineId, Arc<Pipeline>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert, replacing any pipeline already registered under the same id.
    /// Returns the replaced pipeline.
    pub fn add(&self, pipeline: Arc<Pipeline>) -> Option<Arc<Pipeline>> {
        self.pipelines
            .write()
            .insert(pipeline.id().clone(), pipeline)
    }

    /// Insert only if the id is free. Hands the pipeline back otherwise.
    pub fn try_add(&self, pipeline: Arc<Pipeline>) -> Result<(), Arc<Pipeline>> {
        match self.pipelines.write().entry(pipeline.id().clone()) {
            Entry::Occupied(_) => Err(pipeline),
            Entry::Vacant(slot) => {
                slot.insert(pipeline);
                Ok(())
            }
        }
    }

    pub fn find(&self, id: &PipelineId) -> Option<Arc<Pipeline>> {
        self.pipelines.read().get(id).cloned()
    }

    /// Remove and return the pipeline registered under `id`.
    pub fn delete(&self, id: &PipelineId) -> Option<Arc<Pipeline>> {
        self.pipelines.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.pipelines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.read().is_empty()
    }

    /// List pipelines in creation order.
    ///
    /// `source_type` filters when set. `exclusive_start` resumes strictly after
    /// the pipeline of that name; an unknown name starts from the beginning.
    pub fn list(
        &self,
        source_type: Option<SourceType>,
        exclusive_start: Option<&str>,
        limit: usize,
    ) -> ListPage {
        let mut pipelines: Vec<Arc<Pipeline>> = self
            .pipelines
            .read()
            .values()
            .filter(|p| source_type.is_none_or(|t| p.source_type() == t))
            .cloned()
            .collect();
        pipelines.sort_by_key(|p| p.creation_order());

        let start = exclusive_start
            .and_then(|name| pipelines.iter().position(|p| p.name() == name))
            .map_or(0, |idx| idx + 1);
        let mut pipelines = pipelines.split_off(start);

        let has_next = pipelines.len() > limit;
        pipelines.truncate(limit);

        ListPage {
            pipelines,
            has_next,
        }
    }
}
