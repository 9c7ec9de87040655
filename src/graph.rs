//! Registry of coordinate systems connected by transformations,
//! from which the transformation between any two connected systems can be looked up.
use log::debug;
use ordered_float::OrderedFloat;
use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, PoisonError, RwLock},
};

use petgraph::algo::astar;
use petgraph::prelude::*;

use crate::{Identity, TransformError, TransformResult, Transformation, concatenate};

#[derive(Debug, Clone)]
struct Edge {
    transform: Arc<dyn Transformation>,
    cost: OrderedFloat<f64>,
}

impl Edge {
    fn new(transform: Arc<dyn Transformation>, cost: f64) -> Self {
        Self {
            transform,
            cost: OrderedFloat(cost),
        }
    }
}

type PathCache = HashMap<(NodeIndex, NodeIndex), Option<Arc<dyn Transformation>>>;

/// Directed graph whose nodes are coordinate systems (identified by `C`)
/// and whose edges are transformations between them.
///
/// Lookups compose the cheapest chain of edges with [concatenate],
/// so linear legs collapse into a single matrix.
/// Results are cached until the graph is next modified.
#[derive(Debug)]
pub struct TransformGraph<C: Hash + Eq + Clone> {
    graph: StableDiGraph<C, Edge>,
    coord_systems: HashMap<C, NodeInfo>,
    path_cache: RwLock<PathCache>,
}

impl<C: Hash + Eq + Clone> Default for TransformGraph<C> {
    fn default() -> Self {
        Self {
            graph: StableDiGraph::default(),
            coord_systems: HashMap::default(),
            path_cache: RwLock::default(),
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct NodeInfo {
    idx: NodeIndex,
    ndim: usize,
}

impl<C: Hash + Eq + Clone> TransformGraph<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dimensionality of a known coordinate system.
    pub fn ndim(&self, coord_system: &C) -> Option<usize> {
        self.coord_systems.get(coord_system).map(|n| n.ndim)
    }

    pub fn contains(&self, coord_system: &C) -> bool {
        self.coord_systems.contains_key(coord_system)
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn ensure_coord_system(
        &mut self,
        node: C,
        argument: &'static str,
        ndim: usize,
    ) -> TransformResult<NodeIndex> {
        if let Some(n) = self.coord_systems.get(&node) {
            if n.ndim != ndim {
                return Err(TransformError::MismatchedDimension {
                    argument,
                    expected: n.ndim,
                    actual: ndim,
                });
            }
            Ok(n.idx)
        } else {
            let idx = self.graph.add_node(node.clone());
            self.coord_systems.insert(node, NodeInfo { idx, ndim });
            Ok(idx)
        }
    }

    /// Returns whether the inverse edge was added.
    ///
    /// Fails if the transform's dimensionality is inconsistent
    /// with coordinate systems already in the graph.
    /// A transform which cannot be inverted is still added in the forward direction.
    pub fn add_edge(
        &mut self,
        src: impl Into<C>,
        tgt: impl Into<C>,
        t: Arc<dyn Transformation>,
        weight: f64,
        with_inverse: bool,
    ) -> TransformResult<bool> {
        if weight.is_nan() || weight < 0.0 {
            return Err(TransformError::invalid_argument(format!(
                "Edge weight must be non-negative, got {weight}"
            )));
        }
        let src = src.into();
        let tgt = tgt.into();

        // Validate both ends before touching the graph.
        for (node, argument, ndim) in [
            (&src, "transform input", t.input_ndim()),
            (&tgt, "transform output", t.output_ndim()),
        ] {
            if let Some(n) = self.coord_systems.get(node) {
                if n.ndim != ndim {
                    return Err(TransformError::MismatchedDimension {
                        argument,
                        expected: n.ndim,
                        actual: ndim,
                    });
                }
            }
        }

        self.clear_cache();
        let u = self.ensure_coord_system(src, "transform input", t.input_ndim())?;
        let v = self.ensure_coord_system(tgt, "transform output", t.output_ndim())?;

        let mut added_inverse = false;
        if with_inverse {
            match t.invert() {
                Ok(inverse) => {
                    self.graph.add_edge(v, u, Edge::new(inverse, weight));
                    added_inverse = true;
                }
                Err(e) => debug!("Not adding inverse edge: {e}"),
            }
        }

        self.graph.add_edge(u, v, Edge::new(t, weight));
        Ok(added_inverse)
    }

    fn best_edge(&self, src: NodeIndex, tgt: NodeIndex) -> Option<&Edge> {
        self.graph
            .edges_connecting(src, tgt)
            .min_by_key(|e| e.weight().cost)
            .map(|e| e.weight())
    }

    fn cache_get(
        &self,
        src: NodeIndex,
        tgt: NodeIndex,
    ) -> Option<Option<Arc<dyn Transformation>>> {
        let outer = self
            .path_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        outer.get(&(src, tgt)).cloned()
    }

    fn cache_insert(&self, src: NodeIndex, tgt: NodeIndex, t: Option<Arc<dyn Transformation>>) {
        self.path_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((src, tgt), t);
    }

    fn clear_cache(&mut self) {
        self.path_cache
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The transformation from one coordinate system to another,
    /// along the cheapest path of edges.
    ///
    /// `Ok(None)` if either system is unknown or no path exists.
    pub fn find_path(
        &self,
        from: &C,
        to: &C,
    ) -> TransformResult<Option<Arc<dyn Transformation>>> {
        let Some(start) = self.coord_systems.get(from) else {
            return Ok(None);
        };

        if from == to {
            return Ok(Some(Arc::new(Identity::new(start.ndim))));
        }

        let u = start.idx;
        let Some(v) = self.coord_systems.get(to).map(|n| n.idx) else {
            return Ok(None);
        };

        if let Some(maybe) = self.cache_get(u, v) {
            return Ok(maybe);
        }

        let zero = OrderedFloat(0.0);
        let Some((cost, path)) = astar(&self.graph, u, |n| n == v, |e| e.weight().cost, |_| zero)
        else {
            self.cache_insert(u, v, None);
            return Ok(None);
        };
        debug!("Found path of {} edges with cost {}", path.len() - 1, cost);

        let mut composed: Option<Arc<dyn Transformation>> = None;
        for ab in path.windows(2) {
            let Some(edge) = self.best_edge(ab[0], ab[1]) else {
                continue;
            };
            let next = edge.transform.clone();
            composed = Some(match composed {
                None => next,
                Some(prev) => concatenate(prev, next)?,
            });
        }

        self.cache_insert(u, v, composed.clone());
        Ok(composed)
    }
}
