//! Hash table of template pipelines keyed by a subset of their state.
//!
//! Lookups hash the key pipeline on the table's state masks and compare
//! candidates with [`PipelineGraph::equal`]. A miss stores a deep copy of the
//! key pipeline as the entry's *template*, so the entry never keeps user
//! pipelines alive.
//!
//! Entries count how many pipelines outside the cache use them. When the
//! table grows to twice its expected size, unused entries are evicted oldest
//! first before a new one is inserted.

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::errors::Result;
use crate::pipeline::{LayerState, PipelineGraph, PipelineHandle, PipelineState};
use crate::settings::CacheSettings;

new_key_type! {
    pub struct CacheEntryKey;
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Deep copy of the first pipeline that created the entry.
    pub template: PipelineHandle,
    /// Number of non-template pipelines currently sharing the entry.
    pub usage_count: usize,
    /// Value of the unique-template counter when the entry was last used.
    age: usize,
    hash: u64,
}

impl CacheEntry {
    #[must_use]
    pub fn age(&self) -> usize {
        self.age
    }
}

/// Result of [`PipelineHashTable::get`].
#[derive(Debug)]
pub struct TemplateLookup {
    pub entry: CacheEntryKey,
    pub template: PipelineHandle,
    /// `true` when the entry was created by this lookup.
    pub created: bool,
    /// Templates evicted to make room. Already freed from the graph.
    pub pruned: Vec<PipelineHandle>,
}

pub struct PipelineHashTable {
    debug_name: &'static str,
    pipeline_state: PipelineState,
    layer_state: LayerState,
    settings: CacheSettings,

    entries: SlotMap<CacheEntryKey, CacheEntry>,
    buckets: FxHashMap<u64, SmallVec<[CacheEntryKey; 1]>>,

    expected_min_size: usize,
    n_unique_pipelines: usize,
}

impl PipelineHashTable {
    #[must_use]
    pub fn new(
        debug_name: &'static str,
        pipeline_state: PipelineState,
        layer_state: LayerState,
        settings: CacheSettings,
    ) -> Self {
        Self {
            debug_name,
            pipeline_state,
            layer_state,
            settings,
            entries: SlotMap::with_key(),
            buckets: FxHashMap::default(),
            expected_min_size: settings.min_size,
            n_unique_pipelines: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of templates ever created by this table.
    #[must_use]
    pub fn n_unique_pipelines(&self) -> usize {
        self.n_unique_pipelines
    }

    #[must_use]
    pub fn expected_min_size(&self) -> usize {
        self.expected_min_size
    }

    #[must_use]
    pub fn entry(&self, key: CacheEntryKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn entry_mut(&mut self, key: CacheEntryKey) -> Option<&mut CacheEntry> {
        self.entries.get_mut(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (CacheEntryKey, &CacheEntry)> {
        self.entries.iter()
    }

    /// Finds the entry whose template matches `key_pipeline`, creating it
    /// when there is none.
    pub fn get(
        &mut self,
        graph: &mut PipelineGraph,
        key_pipeline: PipelineHandle,
    ) -> Result<TemplateLookup> {
        let hash = graph.hash(key_pipeline, self.pipeline_state, self.layer_state)?;

        if let Some(candidates) = self.buckets.get(&hash) {
            for &key in candidates {
                let Some(entry) = self.entries.get(key) else {
                    continue;
                };
                if graph.equal(
                    entry.template,
                    key_pipeline,
                    self.pipeline_state,
                    self.layer_state,
                )? {
                    let template = entry.template;
                    if let Some(entry) = self.entries.get_mut(key) {
                        entry.age = self.n_unique_pipelines;
                    }
                    log::debug!("{} cache hit for {key_pipeline:?}", self.debug_name);
                    return Ok(TemplateLookup {
                        entry: key,
                        template,
                        created: false,
                        pruned: Vec::new(),
                    });
                }
            }
        }

        if self.n_unique_pipelines == self.settings.unique_warning_threshold {
            log::warn!(
                "Over {} separate {} have been generated which is very unusual, \
                 so something is probably wrong!",
                self.settings.unique_warning_threshold,
                self.debug_name
            );
        }

        let mut pruned = Vec::new();
        if self.settings.prune_unused && self.entries.len() >= self.expected_min_size * 2 {
            pruned = self.prune_old_pipelines();
            for &template in &pruned {
                graph.free_pipeline(template, &mut ())?;
            }
            self.expected_min_size = self.entries.len().max(self.settings.min_size);
        }

        let template = graph.deep_copy(key_pipeline, self.pipeline_state, self.layer_state)?;
        let key = self.entries.insert(CacheEntry {
            template,
            usage_count: 0,
            age: self.n_unique_pipelines,
            hash,
        });
        self.buckets.entry(hash).or_default().push(key);
        self.n_unique_pipelines += 1;

        log::debug!(
            "{} cache miss for {key_pipeline:?}, {} entries",
            self.debug_name,
            self.entries.len()
        );

        Ok(TemplateLookup {
            entry: key,
            template,
            created: true,
            pruned,
        })
    }

    /// Removes unused entries, oldest first, leaving room for one more entry
    /// above the expected minimum size.
    fn prune_old_pipelines(&mut self) -> Vec<PipelineHandle> {
        let mut prunable: Vec<(CacheEntryKey, usize)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.usage_count == 0)
            .map(|(key, entry)| (key, entry.age))
            .collect();
        prunable.sort_by_key(|&(_, age)| age);

        let max_prune_count = (self.entries.len() + 1).saturating_sub(self.expected_min_size);
        let prune_count = max_prune_count.min(prunable.len());

        let mut pruned = Vec::with_capacity(prune_count);
        for &(key, _) in prunable.iter().take(prune_count) {
            let Some(entry) = self.entries.remove(key) else {
                continue;
            };
            if let Some(bucket) = self.buckets.get_mut(&entry.hash) {
                bucket.retain(|k| *k != key);
                if bucket.is_empty() {
                    self.buckets.remove(&entry.hash);
                }
            }
            pruned.push(entry.template);
        }

        log::debug!(
            "Pruned {} unused {} from the cache",
            pruned.len(),
            self.debug_name
        );
        pruned
    }
}
