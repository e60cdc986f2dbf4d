//! Structural comparison, hashing and copying restricted to state masks.
//!
//! The program cache and the authority search only care about the state that
//! influences code generation, so every operation here takes the pipeline
//! and layer state groups to look at.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use super::graph::{LayerHandle, PipelineGraph, PipelineHandle};
use super::state::{LayerState, PipelineState};
use crate::errors::Result;

impl PipelineGraph {
    fn pipeline_group_equal(
        &self,
        a: PipelineHandle,
        b: PipelineHandle,
        group: PipelineState,
    ) -> Result<bool> {
        let a = self.pipeline_authority(a, group)?;
        let b = self.pipeline_authority(b, group)?;
        if a == b {
            return Ok(true);
        }
        let (a, b) = (self.node(a)?, self.node(b)?);

        Ok(if group == PipelineState::COLOR {
            a.color == b.color
        } else if group == PipelineState::BLEND {
            a.blend == b.blend
        } else if group == PipelineState::DEPTH {
            a.depth == b.depth
        } else if group == PipelineState::ALPHA_FUNC {
            a.alpha_func == b.alpha_func
        } else if group == PipelineState::ALPHA_FUNC_REFERENCE {
            a.alpha_func_reference.to_bits() == b.alpha_func_reference.to_bits()
        } else if group == PipelineState::POINT_SIZE {
            a.point_size.to_bits() == b.point_size.to_bits()
        } else if group == PipelineState::FRAGMENT_SNIPPETS {
            a.snippets == b.snippets
        } else {
            true
        })
    }

    fn layer_group_equal(&self, a: LayerHandle, b: LayerHandle, group: LayerState) -> Result<bool> {
        // The layer index is baked into generated names together with the unit.
        if group == LayerState::UNIT && self.layer_index(a)? != self.layer_index(b)? {
            return Ok(false);
        }

        let a = self.layer_authority(a, group)?;
        let b = self.layer_authority(b, group)?;
        if a == b {
            return Ok(true);
        }
        let (a, b) = (self.layer_node(a)?, self.layer_node(b)?);

        Ok(if group == LayerState::UNIT {
            a.unit == b.unit
        } else if group == LayerState::TEXTURE_TYPE {
            a.texture_type == b.texture_type
        } else if group == LayerState::TEXTURE_DATA {
            a.texture == b.texture
        } else if group == LayerState::TEXTURE_COMPONENTS {
            a.components == b.components
        } else if group == LayerState::FILTERS {
            a.filters == b.filters
        } else if group == LayerState::COMBINE {
            a.combine == b.combine
        } else if group == LayerState::COMBINE_CONSTANT {
            a.combine_constant == b.combine_constant
        } else if group == LayerState::POINT_SPRITE_COORDS {
            a.point_sprite_coords == b.point_sprite_coords
        } else if group == LayerState::FRAGMENT_SNIPPETS {
            a.snippets == b.snippets
        } else {
            true
        })
    }

    /// Compares two layers on the groups in `state`.
    pub fn layer_equal(&self, a: LayerHandle, b: LayerHandle, state: LayerState) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        for group in state.iter() {
            if !self.layer_group_equal(a, b, group)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Compares two pipelines on the groups in `pipeline_state`. When that
    /// includes [`PipelineState::LAYERS`], the layer lists must have the same
    /// length and each pair of layers must agree on `layer_state`.
    pub fn equal(
        &self,
        a: PipelineHandle,
        b: PipelineHandle,
        pipeline_state: PipelineState,
        layer_state: LayerState,
    ) -> Result<bool> {
        if a == b {
            return Ok(true);
        }

        for group in pipeline_state.difference(PipelineState::LAYERS).iter() {
            if !self.pipeline_group_equal(a, b, group)? {
                return Ok(false);
            }
        }

        if pipeline_state.contains(PipelineState::LAYERS) {
            if self.pipeline_authority(a, PipelineState::LAYERS)?
                == self.pipeline_authority(b, PipelineState::LAYERS)?
            {
                return Ok(true);
            }
            let a_layers = self.layers(a)?;
            let b_layers = self.layers(b)?;
            if a_layers.len() != b_layers.len() {
                return Ok(false);
            }
            for (&la, &lb) in a_layers.iter().zip(b_layers.iter()) {
                if !self.layer_equal(la, lb, layer_state)? {
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    fn hash_layer(&self, layer: LayerHandle, state: LayerState, hasher: &mut FxHasher) -> Result<()> {
        for group in state.iter() {
            let authority = self.layer_authority(layer, group)?;
            let node = self.layer_node(authority)?;
            group.bits().hash(hasher);
            if group == LayerState::UNIT {
                node.unit.hash(hasher);
                self.layer_index(layer)?.hash(hasher);
            } else if group == LayerState::TEXTURE_TYPE {
                node.texture_type.hash(hasher);
            } else if group == LayerState::TEXTURE_DATA {
                node.texture.hash(hasher);
            } else if group == LayerState::TEXTURE_COMPONENTS {
                node.components.hash(hasher);
            } else if group == LayerState::FILTERS {
                node.filters.hash(hasher);
            } else if group == LayerState::COMBINE {
                node.combine.hash(hasher);
            } else if group == LayerState::COMBINE_CONSTANT {
                node.combine_constant.hash(hasher);
            } else if group == LayerState::POINT_SPRITE_COORDS {
                node.point_sprite_coords.hash(hasher);
            } else if group == LayerState::FRAGMENT_SNIPPETS {
                node.snippets.hash(hasher);
            }
        }
        Ok(())
    }

    /// Hash consistent with [`equal`](Self::equal) for the same masks.
    pub fn hash(
        &self,
        pipeline: PipelineHandle,
        pipeline_state: PipelineState,
        layer_state: LayerState,
    ) -> Result<u64> {
        let mut hasher = FxHasher::default();

        for group in pipeline_state.iter() {
            group.bits().hash(&mut hasher);
            if group == PipelineState::LAYERS {
                let layers = self.layers(pipeline)?;
                layers.len().hash(&mut hasher);
                for layer in layers {
                    self.hash_layer(layer, layer_state, &mut hasher)?;
                }
                continue;
            }

            let authority = self.pipeline_authority(pipeline, group)?;
            let node = self.node(authority)?;
            if group == PipelineState::COLOR {
                node.color.hash(&mut hasher);
            } else if group == PipelineState::BLEND {
                node.blend.hash(&mut hasher);
            } else if group == PipelineState::DEPTH {
                node.depth.hash(&mut hasher);
            } else if group == PipelineState::ALPHA_FUNC {
                node.alpha_func.hash(&mut hasher);
            } else if group == PipelineState::ALPHA_FUNC_REFERENCE {
                node.alpha_func_reference.to_bits().hash(&mut hasher);
            } else if group == PipelineState::POINT_SIZE {
                node.point_size.to_bits().hash(&mut hasher);
            } else if group == PipelineState::FRAGMENT_SNIPPETS {
                node.snippets.hash(&mut hasher);
            }
        }

        Ok(hasher.finish())
    }

    /// Creates a new child of the root holding only the requested state of
    /// `pipeline`. Used for program cache templates, which must not keep the
    /// user's pipelines alive.
    pub fn deep_copy(
        &mut self,
        pipeline: PipelineHandle,
        pipeline_state: PipelineState,
        layer_state: LayerState,
    ) -> Result<PipelineHandle> {
        let root = self.root();
        let copy = self.alloc_pipeline(root);

        for group in pipeline_state.difference(PipelineState::LAYERS).iter() {
            let source = self.node(self.pipeline_authority(pipeline, group)?)?.clone();
            let node = self.node_mut(copy)?;
            if group == PipelineState::COLOR {
                node.color = source.color;
            } else if group == PipelineState::BLEND {
                node.blend = source.blend;
            } else if group == PipelineState::DEPTH {
                node.depth = source.depth;
            } else if group == PipelineState::ALPHA_FUNC {
                node.alpha_func = source.alpha_func;
            } else if group == PipelineState::ALPHA_FUNC_REFERENCE {
                node.alpha_func_reference = source.alpha_func_reference;
            } else if group == PipelineState::POINT_SIZE {
                node.point_size = source.point_size;
            } else if group == PipelineState::FRAGMENT_SNIPPETS {
                node.snippets = source.snippets;
            }
            node.differences.insert(group);
        }

        if pipeline_state.contains(PipelineState::LAYERS) {
            let mut copied = Vec::new();
            for layer in self.layers(pipeline)? {
                let mut values = self.layer_node(layer)?.clone();
                for group in layer_state.iter() {
                    let source = self.layer_node(self.layer_authority(layer, group)?)?;
                    if group == LayerState::UNIT {
                        values.unit = source.unit;
                    } else if group == LayerState::TEXTURE_TYPE {
                        values.texture_type = source.texture_type;
                    } else if group == LayerState::TEXTURE_DATA {
                        values.texture = source.texture;
                    } else if group == LayerState::TEXTURE_COMPONENTS {
                        values.components = source.components;
                    } else if group == LayerState::FILTERS {
                        values.filters = source.filters;
                    } else if group == LayerState::COMBINE {
                        values.combine = source.combine;
                    } else if group == LayerState::COMBINE_CONSTANT {
                        values.combine_constant = source.combine_constant;
                    } else if group == LayerState::POINT_SPRITE_COORDS {
                        values.point_sprite_coords = source.point_sprite_coords;
                    } else if group == LayerState::FRAGMENT_SNIPPETS {
                        values.snippets = source.snippets.clone();
                    }
                }
                // Units are needed to resolve the layer list whatever the mask.
                values.unit = self.layer_unit(layer)?;
                copied.push((values, layer_state | LayerState::UNIT));
            }

            let default_layer = self.default_layer();
            let mut owned = smallvec::SmallVec::new();
            for (values, differences) in copied {
                let layer = self.derive_layer(default_layer)?;
                let node = self.layer_node_mut(layer)?;
                node.index = values.index;
                node.unit = values.unit;
                node.texture_type = values.texture_type;
                node.texture = values.texture;
                node.components = values.components;
                node.filters = values.filters;
                node.combine = values.combine;
                node.combine_constant = values.combine_constant;
                node.point_sprite_coords = values.point_sprite_coords;
                node.snippets = values.snippets;
                node.differences = differences;
                node.owner = Some(copy);
                owned.push(layer);
            }

            let node = self.node_mut(copy)?;
            node.n_layers = owned.len();
            node.layer_differences = owned;
            node.differences.insert(PipelineState::LAYERS);
        }

        self.invalidate_authorities();
        Ok(copy)
    }

    /// Finds the oldest ancestor of `pipeline` that agrees with it on every
    /// group of `pipeline_state` and, per layer, on `layer_state`.
    ///
    /// Only ancestors that are authorities for the masked state are
    /// candidates; generated code can be attached to the result and shared by
    /// all of its equivalent descendants.
    pub fn find_equivalent_parent(
        &self,
        pipeline: PipelineHandle,
        pipeline_state: PipelineState,
        layer_state: LayerState,
    ) -> Result<PipelineHandle> {
        let mask = pipeline_state | PipelineState::LAYERS;

        let mut authority0 = self.pipeline_authority(pipeline, mask)?;
        let Some(parent) = self.parent(authority0)? else {
            return Ok(authority0);
        };
        let mut authority1 = self.pipeline_authority(parent, mask)?;

        loop {
            if !self.equal(authority0, authority1, mask, layer_state)? {
                return Ok(authority0);
            }
            let Some(parent) = self.parent(authority1)? else {
                return Ok(authority1);
            };
            authority0 = authority1;
            authority1 = self.pipeline_authority(parent, mask)?;
        }
    }
}
