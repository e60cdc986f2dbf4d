//! Copy-on-write pipeline and layer delta chains.
//!
//! Pipelines and layers live in two [`SlotMap`] arenas owned by
//! [`PipelineGraph`]. Every node points at its parent and only stores the
//! state groups listed in its `differences` mask; everything else is
//! inherited. The node that stores a group for a given pipeline is that
//! pipeline's *authority* for the group.
//!
//! # Layers
//!
//! A pipeline that is an authority for [`PipelineState::LAYERS`] records the
//! number of layers and the layers it owns itself (`layer_differences`). The
//! full layer list is resolved by texture unit: walking up from the authority,
//! the first layer found for each unit slot wins.
//!
//! # Mutation rules
//!
//! - Setting a value equal to the current resolved value is a no-op.
//! - A pipeline with children is copied before it is modified: the children
//!   are reparented to a copy of its current state so they never observe the
//!   change.
//! - A layer with children, or owned by another pipeline, is immutable; the
//!   writer derives its own layer instead.
//! - A difference equal to the parent's resolved value is dropped again.
//!
//! Every mutation reports itself to a [`StateObserver`] *before* the new
//! value is stored.

use std::cell::RefCell;

use rustc_hash::FxHashMap;
use slotmap::{SlotMap, new_key_type};
use smallvec::{SmallVec, smallvec};

use super::combine::LayerCombine;
use super::snippet::{Snippet, SnippetList};
use super::state::{
    AlphaFunc, BlendState, Color, DepthState, Filters, LayerState, PipelineState, Texture,
    TextureComponents, TextureId, TextureType,
};
use crate::errors::{PipelineError, Result};

new_key_type! {
    pub struct PipelineHandle;
    pub struct LayerHandle;
}

/// Layers of a pipeline ordered by texture unit.
pub type LayerList = SmallVec<[LayerHandle; 8]>;

/// Receives change notifications from the graph.
///
/// Layer-driven changes of [`PipelineState::LAYERS`] are reported only
/// through [`layer_pre_change`](Self::layer_pre_change); only changes to the
/// number of layers are reported as pipeline changes.
pub trait StateObserver {
    fn pipeline_pre_change(&mut self, _pipeline: PipelineHandle, _change: PipelineState) {}

    /// `owner` is the pipeline being modified through `layer`.
    fn layer_pre_change(&mut self, _owner: PipelineHandle, _layer: LayerHandle, _change: LayerState) {
    }

    /// The pipeline node has been removed from the graph.
    fn pipeline_destroyed(&mut self, _pipeline: PipelineHandle) {}
}

impl StateObserver for () {}

#[derive(Debug, Clone)]
pub(crate) struct PipelineNode {
    pub(crate) parent: Option<PipelineHandle>,
    pub(crate) children: SmallVec<[PipelineHandle; 4]>,
    pub(crate) differences: PipelineState,
    /// No user handle refers to the node any more; it only lives on while it
    /// has children.
    pub(crate) released: bool,

    pub(crate) color: Color,
    pub(crate) blend: BlendState,
    pub(crate) depth: DepthState,
    pub(crate) alpha_func: AlphaFunc,
    pub(crate) alpha_func_reference: f32,
    pub(crate) point_size: f32,
    pub(crate) n_layers: usize,
    pub(crate) layer_differences: SmallVec<[LayerHandle; 4]>,
    pub(crate) snippets: SnippetList,
}

impl PipelineNode {
    fn root() -> Self {
        Self {
            parent: None,
            children: SmallVec::new(),
            differences: PipelineState::all(),
            released: false,
            color: Color::WHITE,
            blend: BlendState::default(),
            depth: DepthState::default(),
            alpha_func: AlphaFunc::Always,
            alpha_func_reference: 0.0,
            point_size: 0.0,
            n_layers: 0,
            layer_differences: SmallVec::new(),
            snippets: SnippetList::new(),
        }
    }

    fn child_of(parent: PipelineHandle) -> Self {
        Self {
            parent: Some(parent),
            differences: PipelineState::empty(),
            ..Self::root()
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LayerNode {
    pub(crate) parent: Option<LayerHandle>,
    pub(crate) owner: Option<PipelineHandle>,
    pub(crate) n_children: usize,
    /// User-facing layer number. Not delta state: derived layers copy it.
    pub(crate) index: u32,
    pub(crate) differences: LayerState,

    pub(crate) unit: usize,
    pub(crate) texture_type: TextureType,
    pub(crate) texture: Option<TextureId>,
    pub(crate) components: TextureComponents,
    pub(crate) filters: Filters,
    pub(crate) combine: LayerCombine,
    pub(crate) combine_constant: Color,
    pub(crate) point_sprite_coords: bool,
    pub(crate) snippets: SnippetList,
}

impl LayerNode {
    fn default_layer() -> Self {
        Self {
            parent: None,
            owner: None,
            n_children: 0,
            index: 0,
            differences: LayerState::all(),
            unit: 0,
            texture_type: TextureType::Texture2D,
            texture: None,
            components: TextureComponents::Rgba,
            filters: Filters::default(),
            combine: LayerCombine::default(),
            combine_constant: Color::TRANSPARENT,
            point_sprite_coords: false,
            snippets: SnippetList::new(),
        }
    }
}

/// Arena of pipelines and layers.
pub struct PipelineGraph {
    pipelines: SlotMap<PipelineHandle, PipelineNode>,
    layers: SlotMap<LayerHandle, LayerNode>,
    root: PipelineHandle,
    default_layer: LayerHandle,

    // (node, state bits) -> authority. Cleared on every mutation.
    pipeline_authorities: RefCell<FxHashMap<(PipelineHandle, u32), PipelineHandle>>,
    layer_authorities: RefCell<FxHashMap<(LayerHandle, u32), LayerHandle>>,
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineGraph {
    #[must_use]
    pub fn new() -> Self {
        let mut pipelines = SlotMap::with_key();
        let root = pipelines.insert(PipelineNode::root());
        let mut layers = SlotMap::with_key();
        let default_layer = layers.insert(LayerNode::default_layer());

        Self {
            pipelines,
            layers,
            root,
            default_layer,
            pipeline_authorities: RefCell::new(FxHashMap::default()),
            layer_authorities: RefCell::new(FxHashMap::default()),
        }
    }

    /// The pipeline holding the default value of every state group.
    #[must_use]
    pub fn root(&self) -> PipelineHandle {
        self.root
    }

    #[must_use]
    pub fn default_layer(&self) -> LayerHandle {
        self.default_layer
    }

    #[must_use]
    pub fn contains(&self, pipeline: PipelineHandle) -> bool {
        self.pipelines
            .get(pipeline)
            .is_some_and(|node| !node.released)
    }

    /// Number of live pipeline nodes, including the root and internal
    /// copy-on-write nodes.
    #[must_use]
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Number of live layer nodes, including the default layer.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub(crate) fn node(&self, pipeline: PipelineHandle) -> Result<&PipelineNode> {
        self.pipelines
            .get(pipeline)
            .ok_or(PipelineError::UnknownPipeline(pipeline))
    }

    pub(crate) fn node_mut(&mut self, pipeline: PipelineHandle) -> Result<&mut PipelineNode> {
        self.pipelines
            .get_mut(pipeline)
            .ok_or(PipelineError::UnknownPipeline(pipeline))
    }

    pub(crate) fn layer_node(&self, layer: LayerHandle) -> Result<&LayerNode> {
        self.layers
            .get(layer)
            .ok_or(PipelineError::UnknownLayer(layer))
    }

    pub(crate) fn layer_node_mut(&mut self, layer: LayerHandle) -> Result<&mut LayerNode> {
        self.layers
            .get_mut(layer)
            .ok_or(PipelineError::UnknownLayer(layer))
    }

    pub(crate) fn invalidate_authorities(&mut self) {
        self.pipeline_authorities.get_mut().clear();
        self.layer_authorities.get_mut().clear();
    }

    // ========================================================================
    // Lifetime
    // ========================================================================

    pub(crate) fn alloc_pipeline(&mut self, parent: PipelineHandle) -> PipelineHandle {
        let handle = self.pipelines.insert(PipelineNode::child_of(parent));
        if let Some(node) = self.pipelines.get_mut(parent) {
            node.children.push(handle);
        }
        handle
    }

    /// Creates a pipeline inheriting every state from the root.
    pub fn new_pipeline(&mut self) -> PipelineHandle {
        let handle = self.alloc_pipeline(self.root);
        self.invalidate_authorities();
        handle
    }

    /// Creates a pipeline inheriting every state from `parent`.
    ///
    /// Later changes to `parent` are not visible through the copy.
    pub fn copy(&mut self, parent: PipelineHandle) -> Result<PipelineHandle> {
        if !self.contains(parent) {
            return Err(PipelineError::UnknownPipeline(parent));
        }
        let handle = self.alloc_pipeline(parent);
        self.invalidate_authorities();
        Ok(handle)
    }

    /// Releases the user's handle to a pipeline.
    ///
    /// The node stays alive, invisible to the user, while other pipelines
    /// still derive from it.
    pub fn free_pipeline(
        &mut self,
        pipeline: PipelineHandle,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        if pipeline == self.root {
            return Err(PipelineError::RootPipeline);
        }
        let node = self.node_mut(pipeline)?;
        if node.released {
            return Err(PipelineError::UnknownPipeline(pipeline));
        }
        node.released = true;
        self.collect_pipeline(pipeline, observer);
        self.invalidate_authorities();
        Ok(())
    }

    /// Removes `pipeline` and then its ancestors for as long as they are
    /// released and childless.
    fn collect_pipeline(&mut self, pipeline: PipelineHandle, observer: &mut dyn StateObserver) {
        let mut current = Some(pipeline);
        while let Some(handle) = current {
            let Some(node) = self.pipelines.get(handle) else {
                return;
            };
            if !node.released || !node.children.is_empty() {
                return;
            }

            let Some(node) = self.pipelines.remove(handle) else {
                return;
            };
            observer.pipeline_destroyed(handle);

            if let Some(parent) = node.parent.and_then(|p| self.pipelines.get_mut(p)) {
                parent.children.retain(|c| *c != handle);
            }
            for layer in node.layer_differences {
                if let Some(layer_node) = self.layers.get_mut(layer) {
                    layer_node.owner = None;
                }
                self.release_layer(layer);
            }

            current = node.parent;
        }
    }

    /// Removes `layer` and then its ancestors for as long as they are
    /// unowned and childless.
    fn release_layer(&mut self, layer: LayerHandle) {
        let mut current = Some(layer);
        while let Some(handle) = current {
            if handle == self.default_layer {
                return;
            }
            let Some(node) = self.layers.get(handle) else {
                return;
            };
            if node.owner.is_some() || node.n_children > 0 {
                return;
            }
            let parent = node.parent;
            self.layers.remove(handle);
            if let Some(parent_node) = parent.and_then(|p| self.layers.get_mut(p)) {
                parent_node.n_children -= 1;
            }
            current = parent;
        }
    }

    pub(crate) fn derive_layer(&mut self, parent: LayerHandle) -> Result<LayerHandle> {
        let parent_node = self.layer_node_mut(parent)?;
        parent_node.n_children += 1;
        let child = LayerNode {
            parent: Some(parent),
            owner: None,
            n_children: 0,
            differences: LayerState::empty(),
            snippets: SnippetList::new(),
            ..parent_node.clone()
        };
        Ok(self.layers.insert(child))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn parent(&self, pipeline: PipelineHandle) -> Result<Option<PipelineHandle>> {
        Ok(self.node(pipeline)?.parent)
    }

    pub fn children(&self, pipeline: PipelineHandle) -> Result<&[PipelineHandle]> {
        Ok(&self.node(pipeline)?.children)
    }

    /// First node, starting at `pipeline` and walking towards the root, that
    /// stores any of the groups in `state`.
    pub fn pipeline_authority(
        &self,
        pipeline: PipelineHandle,
        state: PipelineState,
    ) -> Result<PipelineHandle> {
        let key = (pipeline, state.bits());
        if let Some(&authority) = self.pipeline_authorities.borrow().get(&key) {
            return Ok(authority);
        }

        let mut current = pipeline;
        loop {
            let node = self.node(current)?;
            if node.differences.intersects(state) {
                break;
            }
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        self.pipeline_authorities.borrow_mut().insert(key, current);
        Ok(current)
    }

    /// Layer counterpart of [`pipeline_authority`](Self::pipeline_authority).
    pub fn layer_authority(&self, layer: LayerHandle, state: LayerState) -> Result<LayerHandle> {
        let key = (layer, state.bits());
        if let Some(&authority) = self.layer_authorities.borrow().get(&key) {
            return Ok(authority);
        }

        let mut current = layer;
        loop {
            let node = self.layer_node(current)?;
            if node.differences.intersects(state) {
                break;
            }
            match node.parent {
                Some(parent) => current = parent,
                None => break,
            }
        }

        self.layer_authorities.borrow_mut().insert(key, current);
        Ok(current)
    }

    fn pipeline_value<T: Clone>(
        &self,
        pipeline: PipelineHandle,
        state: PipelineState,
        field: fn(&PipelineNode) -> &T,
    ) -> Result<T> {
        let authority = self.pipeline_authority(pipeline, state)?;
        Ok(field(self.node(authority)?).clone())
    }

    fn layer_value<T: Clone>(
        &self,
        layer: LayerHandle,
        state: LayerState,
        field: fn(&LayerNode) -> &T,
    ) -> Result<T> {
        let authority = self.layer_authority(layer, state)?;
        Ok(field(self.layer_node(authority)?).clone())
    }

    pub fn color(&self, pipeline: PipelineHandle) -> Result<Color> {
        self.pipeline_value(pipeline, PipelineState::COLOR, |n| &n.color)
    }

    pub fn blend(&self, pipeline: PipelineHandle) -> Result<BlendState> {
        self.pipeline_value(pipeline, PipelineState::BLEND, |n| &n.blend)
    }

    pub fn depth(&self, pipeline: PipelineHandle) -> Result<DepthState> {
        self.pipeline_value(pipeline, PipelineState::DEPTH, |n| &n.depth)
    }

    pub fn alpha_func(&self, pipeline: PipelineHandle) -> Result<AlphaFunc> {
        self.pipeline_value(pipeline, PipelineState::ALPHA_FUNC, |n| &n.alpha_func)
    }

    pub fn alpha_func_reference(&self, pipeline: PipelineHandle) -> Result<f32> {
        self.pipeline_value(pipeline, PipelineState::ALPHA_FUNC_REFERENCE, |n| {
            &n.alpha_func_reference
        })
    }

    pub fn point_size(&self, pipeline: PipelineHandle) -> Result<f32> {
        self.pipeline_value(pipeline, PipelineState::POINT_SIZE, |n| &n.point_size)
    }

    /// Pipeline-level snippets (fragment and fragment-globals hooks).
    pub fn snippets(&self, pipeline: PipelineHandle) -> Result<&SnippetList> {
        let authority = self.pipeline_authority(pipeline, PipelineState::FRAGMENT_SNIPPETS)?;
        Ok(&self.node(authority)?.snippets)
    }

    pub fn n_layers(&self, pipeline: PipelineHandle) -> Result<usize> {
        let authority = self.pipeline_authority(pipeline, PipelineState::LAYERS)?;
        Ok(self.node(authority)?.n_layers)
    }

    /// Resolves the layers of `pipeline` ordered by texture unit.
    pub fn layers(&self, pipeline: PipelineHandle) -> Result<LayerList> {
        let authority = self.pipeline_authority(pipeline, PipelineState::LAYERS)?;
        let n_layers = self.node(authority)?.n_layers;
        let mut slots: SmallVec<[Option<LayerHandle>; 8]> = smallvec![None; n_layers];
        let mut filled = 0;

        let mut current = Some(authority);
        while let Some(handle) = current {
            if filled == n_layers {
                break;
            }
            let node = self.node(handle)?;
            if node.differences.contains(PipelineState::LAYERS) {
                for &layer in &node.layer_differences {
                    let unit = self.layer_unit(layer)?;
                    if unit < n_layers && slots[unit].is_none() {
                        slots[unit] = Some(layer);
                        filled += 1;
                    }
                }
            }
            current = node.parent;
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Looks up the layer with the given layer index without creating it.
    pub fn layer(&self, pipeline: PipelineHandle, index: u32) -> Result<Option<LayerHandle>> {
        for layer in self.layers(pipeline)? {
            if self.layer_node(layer)?.index == index {
                return Ok(Some(layer));
            }
        }
        Ok(None)
    }

    pub fn layer_index(&self, layer: LayerHandle) -> Result<u32> {
        Ok(self.layer_node(layer)?.index)
    }

    /// Texture unit of the layer, i.e. its position in the pipeline.
    pub fn layer_unit(&self, layer: LayerHandle) -> Result<usize> {
        self.layer_value(layer, LayerState::UNIT, |n| &n.unit)
    }

    pub fn layer_texture_type(&self, layer: LayerHandle) -> Result<TextureType> {
        self.layer_value(layer, LayerState::TEXTURE_TYPE, |n| &n.texture_type)
    }

    pub fn layer_texture(&self, layer: LayerHandle) -> Result<Option<TextureId>> {
        self.layer_value(layer, LayerState::TEXTURE_DATA, |n| &n.texture)
    }

    pub fn layer_texture_components(&self, layer: LayerHandle) -> Result<TextureComponents> {
        self.layer_value(layer, LayerState::TEXTURE_COMPONENTS, |n| &n.components)
    }

    pub fn layer_filters(&self, layer: LayerHandle) -> Result<Filters> {
        self.layer_value(layer, LayerState::FILTERS, |n| &n.filters)
    }

    pub fn layer_combine(&self, layer: LayerHandle) -> Result<LayerCombine> {
        self.layer_value(layer, LayerState::COMBINE, |n| &n.combine)
    }

    pub fn layer_combine_constant(&self, layer: LayerHandle) -> Result<Color> {
        self.layer_value(layer, LayerState::COMBINE_CONSTANT, |n| &n.combine_constant)
    }

    pub fn layer_point_sprite_coords(&self, layer: LayerHandle) -> Result<bool> {
        self.layer_value(layer, LayerState::POINT_SPRITE_COORDS, |n| {
            &n.point_sprite_coords
        })
    }

    /// Layer-level snippets (layer-fragment and texture-lookup hooks).
    pub fn layer_snippets(&self, layer: LayerHandle) -> Result<&SnippetList> {
        let authority = self.layer_authority(layer, LayerState::FRAGMENT_SNIPPETS)?;
        Ok(&self.layer_node(authority)?.snippets)
    }

    // ========================================================================
    // Change propagation
    // ========================================================================

    /// Prepares `pipeline` for a change of `change`.
    ///
    /// Performs the copy-on-write for its children, notifies the observer
    /// unless the change originates from a layer, and turns the pipeline
    /// into a layers authority when needed.
    fn pipeline_pre_change(
        &mut self,
        pipeline: PipelineHandle,
        change: PipelineState,
        observer: &mut dyn StateObserver,
        from_layer_change: bool,
    ) -> Result<()> {
        if pipeline == self.root {
            return Err(PipelineError::RootPipeline);
        }

        if !self.node(pipeline)?.children.is_empty() {
            self.copy_on_write(pipeline)?;
        }

        if !from_layer_change {
            observer.pipeline_pre_change(pipeline, change);
        }

        if change.contains(PipelineState::LAYERS)
            && !self.node(pipeline)?.differences.contains(PipelineState::LAYERS)
        {
            let n_layers = self.n_layers(pipeline)?;
            let node = self.node_mut(pipeline)?;
            node.n_layers = n_layers;
            node.layer_differences.clear();
            node.differences.insert(PipelineState::LAYERS);
        }

        self.invalidate_authorities();
        Ok(())
    }

    /// Moves the children of `pipeline` under a new node holding a copy of
    /// its current differences.
    fn copy_on_write(&mut self, pipeline: PipelineHandle) -> Result<()> {
        let node = self.node(pipeline)?.clone();
        let Some(parent) = node.parent else {
            return Err(PipelineError::RootPipeline);
        };

        let authority = self.alloc_pipeline(parent);
        let mut layer_differences = SmallVec::new();
        for &layer in &node.layer_differences {
            let derived = self.derive_layer(layer)?;
            self.layer_node_mut(derived)?.owner = Some(authority);
            layer_differences.push(derived);
        }

        for &child in &node.children {
            self.node_mut(child)?.parent = Some(authority);
        }

        let copy = self.node_mut(authority)?;
        *copy = PipelineNode {
            parent: Some(parent),
            children: node.children,
            released: true,
            layer_differences,
            ..node
        };

        self.node_mut(pipeline)?.children.clear();
        log::trace!("copy-on-write of {pipeline:?} into {authority:?}");
        self.invalidate_authorities();
        Ok(())
    }

    /// Returns a layer that `pipeline` may modify in place, deriving one
    /// when `layer` is shared.
    fn layer_pre_change(
        &mut self,
        pipeline: PipelineHandle,
        layer: LayerHandle,
        change: LayerState,
        observer: &mut dyn StateObserver,
    ) -> Result<LayerHandle> {
        self.pipeline_pre_change(pipeline, PipelineState::LAYERS, observer, true)?;

        let node = self.layer_node(layer)?;
        if node.n_children > 0 || node.owner != Some(pipeline) {
            let owned = node.owner == Some(pipeline);
            let derived = self.derive_layer(layer)?;
            if owned {
                self.remove_layer_difference(pipeline, layer, false, observer)?;
            }
            self.add_layer_difference(pipeline, derived, false, observer)?;
            observer.layer_pre_change(pipeline, derived, change);
            return Ok(derived);
        }

        observer.layer_pre_change(pipeline, layer, change);
        Ok(layer)
    }

    fn add_layer_difference(
        &mut self,
        pipeline: PipelineHandle,
        layer: LayerHandle,
        inc_n_layers: bool,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.pipeline_pre_change(pipeline, PipelineState::LAYERS, observer, !inc_n_layers)?;
        self.layer_node_mut(layer)?.owner = Some(pipeline);
        let node = self.node_mut(pipeline)?;
        node.layer_differences.push(layer);
        if inc_n_layers {
            node.n_layers += 1;
        }
        self.invalidate_authorities();
        Ok(())
    }

    fn remove_layer_difference(
        &mut self,
        pipeline: PipelineHandle,
        layer: LayerHandle,
        dec_n_layers: bool,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.pipeline_pre_change(pipeline, PipelineState::LAYERS, observer, !dec_n_layers)?;
        let node = self.node_mut(pipeline)?;
        node.layer_differences.retain(|l| *l != layer);
        if dec_n_layers {
            node.n_layers = node.n_layers.saturating_sub(1);
        }
        let layer_node = self.layer_node_mut(layer)?;
        if layer_node.owner == Some(pipeline) {
            layer_node.owner = None;
            self.release_layer(layer);
        }
        self.invalidate_authorities();
        Ok(())
    }

    fn set_pipeline_value<T: PartialEq>(
        &mut self,
        pipeline: PipelineHandle,
        state: PipelineState,
        value: T,
        field: fn(&mut PipelineNode) -> &mut T,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        let authority = self.pipeline_authority(pipeline, state)?;
        if *field(self.node_mut(authority)?) == value {
            return Ok(());
        }

        self.pipeline_pre_change(pipeline, state, observer, false)?;

        let matches_parent = match self.node(pipeline)?.parent {
            Some(parent) => {
                let parent_authority = self.pipeline_authority(parent, state)?;
                *field(self.node_mut(parent_authority)?) == value
            }
            None => false,
        };

        let node = self.node_mut(pipeline)?;
        *field(node) = value;
        node.differences.set(state, !matches_parent);
        self.invalidate_authorities();
        Ok(())
    }

    fn write_layer_value<T: PartialEq>(
        &mut self,
        pipeline: PipelineHandle,
        layer: LayerHandle,
        state: LayerState,
        value: T,
        field: fn(&mut LayerNode) -> &mut T,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        let authority = self.layer_authority(layer, state)?;
        if *field(self.layer_node_mut(authority)?) == value {
            return Ok(());
        }

        let layer = self.layer_pre_change(pipeline, layer, state, observer)?;

        let matches_parent = match self.layer_node(layer)?.parent {
            Some(parent) => {
                let parent_authority = self.layer_authority(parent, state)?;
                *field(self.layer_node_mut(parent_authority)?) == value
            }
            None => false,
        };

        let node = self.layer_node_mut(layer)?;
        *field(node) = value;
        node.differences.set(state, !matches_parent);
        self.invalidate_authorities();
        Ok(())
    }

    fn set_layer_value<T: PartialEq>(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        state: LayerState,
        value: T,
        field: fn(&mut LayerNode) -> &mut T,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        let layer = self.ensure_layer(pipeline, index, observer)?;
        self.write_layer_value(pipeline, layer, state, value, field, observer)
    }

    // ========================================================================
    // Pipeline setters
    // ========================================================================

    pub fn set_color(
        &mut self,
        pipeline: PipelineHandle,
        color: Color,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_pipeline_value(pipeline, PipelineState::COLOR, color, |n| &mut n.color, observer)
    }

    pub fn set_blend(
        &mut self,
        pipeline: PipelineHandle,
        blend: BlendState,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_pipeline_value(pipeline, PipelineState::BLEND, blend, |n| &mut n.blend, observer)
    }

    pub fn set_depth(
        &mut self,
        pipeline: PipelineHandle,
        depth: DepthState,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_pipeline_value(pipeline, PipelineState::DEPTH, depth, |n| &mut n.depth, observer)
    }

    pub fn set_alpha_func(
        &mut self,
        pipeline: PipelineHandle,
        func: AlphaFunc,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_pipeline_value(
            pipeline,
            PipelineState::ALPHA_FUNC,
            func,
            |n| &mut n.alpha_func,
            observer,
        )
    }

    pub fn set_alpha_func_reference(
        &mut self,
        pipeline: PipelineHandle,
        reference: f32,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_pipeline_value(
            pipeline,
            PipelineState::ALPHA_FUNC_REFERENCE,
            reference,
            |n| &mut n.alpha_func_reference,
            observer,
        )
    }

    /// Sets the alpha test function and its reference value.
    pub fn set_alpha_test(
        &mut self,
        pipeline: PipelineHandle,
        func: AlphaFunc,
        reference: f32,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_alpha_func(pipeline, func, observer)?;
        self.set_alpha_func_reference(pipeline, reference, observer)
    }

    pub fn set_point_size(
        &mut self,
        pipeline: PipelineHandle,
        size: f32,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_pipeline_value(
            pipeline,
            PipelineState::POINT_SIZE,
            size,
            |n| &mut n.point_size,
            observer,
        )
    }

    /// Appends a fragment or fragment-globals snippet to the pipeline.
    pub fn add_snippet(
        &mut self,
        pipeline: PipelineHandle,
        snippet: Snippet,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        if !snippet.hook().is_pipeline_hook() {
            return Err(PipelineError::SnippetHookMismatch {
                hook: snippet.hook(),
                target: "pipeline",
            });
        }
        let mut snippets = self.snippets(pipeline)?.clone();
        snippets.push(snippet.into());
        self.set_pipeline_value(
            pipeline,
            PipelineState::FRAGMENT_SNIPPETS,
            snippets,
            |n| &mut n.snippets,
            observer,
        )
    }

    // ========================================================================
    // Layer setters
    // ========================================================================

    /// Returns the layer with the given index, adding it with default state
    /// when the pipeline does not have it yet.
    ///
    /// Layers are kept ordered by index: adding a layer moves every layer
    /// with a higher index up by one texture unit.
    pub fn ensure_layer(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        observer: &mut dyn StateObserver,
    ) -> Result<LayerHandle> {
        if let Some(layer) = self.layer(pipeline, index)? {
            return Ok(layer);
        }
        if pipeline == self.root {
            return Err(PipelineError::RootPipeline);
        }

        let mut unit = 0;
        let mut shifted = LayerList::new();
        for layer in self.layers(pipeline)? {
            if self.layer_index(layer)? < index {
                unit += 1;
            } else {
                shifted.push(layer);
            }
        }

        for layer in shifted {
            let next_unit = self.layer_unit(layer)? + 1;
            self.write_layer_value(
                pipeline,
                layer,
                LayerState::UNIT,
                next_unit,
                |n| &mut n.unit,
                observer,
            )?;
        }

        let layer = self.derive_layer(self.default_layer)?;
        let node = self.layer_node_mut(layer)?;
        node.index = index;
        node.unit = unit;
        node.differences.set(LayerState::UNIT, unit != 0);

        self.add_layer_difference(pipeline, layer, true, observer)?;
        Ok(layer)
    }

    /// Removes the layer with the given index. Missing layers are ignored.
    pub fn remove_layer(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        let Some(layer) = self.layer(pipeline, index)? else {
            return Ok(());
        };
        if pipeline == self.root {
            return Err(PipelineError::RootPipeline);
        }

        let removed_unit = self.layer_unit(layer)?;
        let mut shifted = LayerList::new();
        for other in self.layers(pipeline)? {
            if self.layer_unit(other)? > removed_unit {
                shifted.push(other);
            }
        }

        for other in shifted {
            let prev_unit = self.layer_unit(other)? - 1;
            self.write_layer_value(
                pipeline,
                other,
                LayerState::UNIT,
                prev_unit,
                |n| &mut n.unit,
                observer,
            )?;
        }

        self.remove_layer_difference(pipeline, layer, true, observer)
    }

    /// Binds a texture to the layer, updating its type and components.
    pub fn set_layer_texture(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        texture: Option<Texture>,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        if let Some(texture) = texture {
            self.set_layer_texture_type(pipeline, index, texture.ty, observer)?;
            self.set_layer_value(
                pipeline,
                index,
                LayerState::TEXTURE_COMPONENTS,
                texture.components,
                |n| &mut n.components,
                observer,
            )?;
        }
        self.set_layer_value(
            pipeline,
            index,
            LayerState::TEXTURE_DATA,
            texture.map(|t| t.id),
            |n| &mut n.texture,
            observer,
        )
    }

    /// Sets the sampler target without binding a texture.
    pub fn set_layer_texture_type(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        ty: TextureType,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_layer_value(
            pipeline,
            index,
            LayerState::TEXTURE_TYPE,
            ty,
            |n| &mut n.texture_type,
            observer,
        )
    }

    pub fn set_layer_filters(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        filters: Filters,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_layer_value(
            pipeline,
            index,
            LayerState::FILTERS,
            filters,
            |n| &mut n.filters,
            observer,
        )
    }

    pub fn set_layer_combine(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        combine: LayerCombine,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_layer_value(
            pipeline,
            index,
            LayerState::COMBINE,
            combine,
            |n| &mut n.combine,
            observer,
        )
    }

    /// Parses `description` (see [`LayerCombine::parse`]) and applies it.
    pub fn set_layer_combine_string(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        description: &str,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        let combine = LayerCombine::parse(description)?;
        self.set_layer_combine(pipeline, index, combine, observer)
    }

    pub fn set_layer_combine_constant(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        constant: Color,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_layer_value(
            pipeline,
            index,
            LayerState::COMBINE_CONSTANT,
            constant,
            |n| &mut n.combine_constant,
            observer,
        )
    }

    /// Replaces the layer's texture coordinates with the point sprite
    /// coordinate.
    pub fn set_layer_point_sprite_coords(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        enable: bool,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        self.set_layer_value(
            pipeline,
            index,
            LayerState::POINT_SPRITE_COORDS,
            enable,
            |n| &mut n.point_sprite_coords,
            observer,
        )
    }

    /// Appends a layer-fragment or texture-lookup snippet to the layer.
    pub fn add_layer_snippet(
        &mut self,
        pipeline: PipelineHandle,
        index: u32,
        snippet: Snippet,
        observer: &mut dyn StateObserver,
    ) -> Result<()> {
        if snippet.hook().is_pipeline_hook() {
            return Err(PipelineError::SnippetHookMismatch {
                hook: snippet.hook(),
                target: "layer",
            });
        }
        let layer = self.ensure_layer(pipeline, index, observer)?;
        let mut snippets = self.layer_snippets(layer)?.clone();
        snippets.push(snippet.into());
        self.write_layer_value(
            pipeline,
            layer,
            LayerState::FRAGMENT_SNIPPETS,
            snippets,
            |n| &mut n.snippets,
            observer,
        )
    }
}
