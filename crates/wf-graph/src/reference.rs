//! The reference graph: typed, validated edges between referencing objects,
//! walked to build an executor's working set. Generic over a `Node` type so
//! this crate never needs to know what a `Step` is; `wf-core` implements
//! [`Node`] for `Arc<dyn Step>`.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::{CircularReferenceError, ExceedsMaximumDepthError, GraphError, MAXIMUM_REFERENCE_DEPTH};

/// Static description of one declared reference attribute on a step type,
/// standing in for the source's attribute-descriptor `Reference`/
/// `ReferenceList`. Step types expose a `&'static [ReferenceFieldSpec]`
/// table; the Instantiator (C7) walks it to know, for an arbitrary JSON
/// config, which keys name other steps before any instance exists to
/// reflect over.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceFieldSpec {
    pub name: &'static str,
    pub list: bool,
    pub optional: bool,
    pub affects_execution_order: bool,
}

/// A node in the reference graph. `id` must be stable for the lifetime of
/// the node (it keys every map this module builds); `edges` enumerates the
/// node's direct references, tagged with the attribute name they came
/// through (used to build a readable [`CircularReferenceError`] path).
pub trait Node: Clone {
    fn id(&self) -> Uuid;
    fn label(&self) -> String;
    /// `for_execution = true` restricts to order-affecting references;
    /// `false` returns every declared reference.
    fn edges(&self, for_execution: bool) -> Vec<(String, Self)>;
}

/// The result of one depth-first walk of the reference graph from a set of
/// roots: the initial working set (reference-less nodes), the reverse
/// (consumer) mapping, and every node reached (including the roots).
pub struct ReverseMapping<N> {
    pub leaves: Vec<N>,
    pub consumers: HashMap<Uuid, Vec<N>>,
    pub all_refs: HashMap<Uuid, N>,
}

/// Walks the reference graph reachable from `roots`, memoizing finished
/// subtrees so shared sub-DAGs are only visited once (linear in graph size).
pub fn reverse_mapping<N: Node>(roots: &[N], for_execution: bool) -> Result<ReverseMapping<N>, GraphError> {
    let mut all_refs = HashMap::new();
    let mut consumers: HashMap<Uuid, Vec<N>> = HashMap::new();
    let mut leaves = Vec::new();
    let mut done = HashSet::new();
    for root in roots {
        let mut parents = Vec::new();
        walk(root, for_execution, &mut parents, &mut done, &mut all_refs, &mut consumers, &mut leaves)?;
    }
    Ok(ReverseMapping { leaves, consumers, all_refs })
}

fn walk<N: Node>(
    node: &N,
    for_execution: bool,
    parents: &mut Vec<Uuid>,
    done: &mut HashSet<Uuid>,
    all_refs: &mut HashMap<Uuid, N>,
    consumers: &mut HashMap<Uuid, Vec<N>>,
    leaves: &mut Vec<N>,
) -> Result<(), GraphError> {
    let id = node.id();
    if parents.contains(&id) {
        return Err(GraphError::Circular(CircularReferenceError::new(node.label())));
    }
    all_refs.entry(id).or_insert_with(|| node.clone());
    if done.contains(&id) {
        return Ok(());
    }
    if parents.len() >= MAXIMUM_REFERENCE_DEPTH {
        return Err(GraphError::TooDeep(ExceedsMaximumDepthError));
    }

    let edges = node.edges(for_execution);
    if edges.is_empty() {
        leaves.push(node.clone());
    }

    parents.push(id);
    for (attribute, child) in &edges {
        consumers.entry(child.id()).or_default().push(node.clone());
        if let Err(mut e) = walk(child, for_execution, parents, done, all_refs, consumers, leaves) {
            if let GraphError::Circular(ref mut circular) = e {
                let is_root = circular.root_label() == node.label();
                circular.add_reference(&node.label(), is_root, vec![attribute.clone()]);
            }
            parents.pop();
            return Err(e);
        }
    }
    parents.pop();
    done.insert(id);
    Ok(())
}

/// The transitive closure of references reachable from `roots`, excluding
/// the roots themselves.
pub fn all_references<N: Node>(roots: &[N], for_execution: bool) -> Result<Vec<N>, GraphError> {
    let mapping = reverse_mapping(roots, for_execution)?;
    let root_ids: HashSet<Uuid> = roots.iter().map(Node::id).collect();
    Ok(mapping.all_refs.into_iter().filter(|(id, _)| !root_ids.contains(id)).map(|(_, n)| n).collect())
}

/// Successive "waves" of nodes that could run in parallel: the leaves
/// first, then each further node once every one of its references has
/// appeared in an earlier wave. Used for visualization only; the executor
/// does not consume this.
pub fn reference_generations<N: Node>(roots: &[N], for_execution: bool) -> Result<Vec<Vec<N>>, GraphError> {
    let mapping = reverse_mapping(roots, for_execution)?;
    let mut universe: HashMap<Uuid, N> = mapping.all_refs;
    for root in roots {
        universe.entry(root.id()).or_insert_with(|| root.clone());
    }

    let mut remaining_edges: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();
    for (id, node) in &universe {
        remaining_edges.insert(*id, node.edges(for_execution).into_iter().map(|(_, c)| c.id()).collect());
    }

    let mut finished: HashSet<Uuid> = HashSet::new();
    let mut remaining: Vec<Uuid> = universe.keys().copied().collect();
    let mut generations = Vec::new();
    while !remaining.is_empty() {
        let mut wave = Vec::new();
        remaining.retain(|id| {
            if remaining_edges[id].iter().all(|r| finished.contains(r)) {
                wave.push(*id);
                false
            } else {
                true
            }
        });
        if wave.is_empty() {
            break; // not reachable in a true DAG; guards against infinite loop on a bug elsewhere
        }
        for id in &wave {
            finished.insert(*id);
        }
        generations.push(wave.into_iter().map(|id| universe[&id].clone()).collect());
    }
    Ok(generations)
}
