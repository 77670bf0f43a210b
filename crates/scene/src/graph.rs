//! Scene graph: an arena of nodes with parent/child links.
//!
//! Nodes live in a [`SlotMap`] and refer to each other by [`NodeKey`].
//! Callers address nodes by [`ObjectId`], which maps to a key in O(1).
//! Iteration follows insertion order regardless of removals: the arena is
//! compacted after every removal so slot order and insertion order agree.

use std::collections::{HashMap, VecDeque};

use glam::{Mat4, Vec3};
use slotmap::{SlotMap, new_key_type};
use thiserror::Error;
use tracing::debug;

use crate::component::{Component, ComponentKind, MeshHandle};
use crate::ids::{IdAllocator, ObjectId};
use crate::light::{DirectionalLight, PointLight};
use crate::transform::Transform;

new_key_type! {
    /// Arena index of a node. Only valid until the next removal.
    pub struct NodeKey;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    #[error("Unknown scene node {0}")]
    UnknownNode(ObjectId),

    #[error("Scene node {0} already exists")]
    DuplicateId(ObjectId),

    #[error("Parenting {child} under {parent} would create a cycle")]
    CycleDetected { child: ObjectId, parent: ObjectId },
}

pub type SceneResult<T> = std::result::Result<T, SceneError>;

/// A named node with a transform, a color and at most one component of
/// each kind.
#[derive(Debug)]
pub struct Node {
    id: ObjectId,
    name: String,
    transform: Transform,
    pub color: Vec3,
    components: Vec<Component>,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
}

impl Node {
    fn new(id: ObjectId, name: String) -> Self {
        Self {
            id,
            name,
            transform: Transform::default(),
            color: Vec3::ONE,
            components: Vec::new(),
            parent: None,
            children: Vec::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    #[inline]
    pub fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Attaches `component`, replacing any existing one of the same kind.
    pub fn insert(&mut self, component: impl Into<Component>) {
        let component = component.into();
        let kind = component.kind();
        match self.components.iter_mut().find(|c| c.kind() == kind) {
            Some(slot) => *slot = component,
            None => self.components.push(component),
        }
    }

    pub fn remove_component(&mut self, kind: ComponentKind) -> Option<Component> {
        let index = self.components.iter().position(|c| c.kind() == kind)?;
        Some(self.components.remove(index))
    }

    pub fn has(&self, kind: ComponentKind) -> bool {
        kind == ComponentKind::Transform || self.components.iter().any(|c| c.kind() == kind)
    }

    pub fn mesh(&self) -> Option<MeshHandle> {
        self.components.iter().find_map(|c| match c {
            Component::Mesh(handle) => Some(*handle),
            _ => None,
        })
    }

    pub fn point_light(&self) -> Option<&PointLight> {
        self.components.iter().find_map(|c| match c {
            Component::PointLight(light) => Some(light),
            _ => None,
        })
    }

    pub fn directional_light(&self) -> Option<&DirectionalLight> {
        self.components.iter().find_map(|c| match c {
            Component::DirectionalLight(light) => Some(light),
            _ => None,
        })
    }
}

/// Owns every node of a scene.
#[derive(Debug, Default)]
pub struct SceneGraph {
    nodes: SlotMap<NodeKey, Node>,
    index: HashMap<ObjectId, NodeKey>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds an empty node, optionally under `parent`.
    pub fn add_node(
        &mut self,
        ids: &mut IdAllocator,
        name: impl Into<String>,
        parent: Option<ObjectId>,
    ) -> SceneResult<ObjectId> {
        let parent_key = parent.map(|p| self.key(p)).transpose()?;

        let id = ids.allocate();
        let key = self.insert_node(Node::new(id, name.into()))?;
        if let Some(parent_key) = parent_key {
            self.link(key, parent_key);
        }
        Ok(id)
    }

    /// Root node carrying a mesh.
    pub fn spawn_mesh(
        &mut self,
        ids: &mut IdAllocator,
        name: impl Into<String>,
        mesh: MeshHandle,
        transform: Transform,
    ) -> SceneResult<ObjectId> {
        self.spawn_root(ids, name, transform, Vec3::ONE, mesh.into())
    }

    /// Root node carrying a point light of `color` at `position`.
    pub fn spawn_point_light(
        &mut self,
        ids: &mut IdAllocator,
        position: Vec3,
        color: Vec3,
        light: PointLight,
    ) -> SceneResult<ObjectId> {
        self.spawn_root(
            ids,
            "point_light",
            Transform::from_translation(position),
            color,
            light.into(),
        )
    }

    /// Root node carrying a directional light of `color` at `position`.
    pub fn spawn_directional_light(
        &mut self,
        ids: &mut IdAllocator,
        position: Vec3,
        color: Vec3,
        light: DirectionalLight,
    ) -> SceneResult<ObjectId> {
        self.spawn_root(
            ids,
            "directional_light",
            Transform::from_translation(position),
            color,
            light.into(),
        )
    }

    fn spawn_root(
        &mut self,
        ids: &mut IdAllocator,
        name: impl Into<String>,
        transform: Transform,
        color: Vec3,
        component: Component,
    ) -> SceneResult<ObjectId> {
        let id = ids.allocate();
        let mut node = Node::new(id, name.into());
        node.transform = transform;
        node.color = color;
        node.insert(component);

        self.insert_node(node)?;
        Ok(id)
    }

    /// Ids from a reset or foreign allocator may collide with live nodes.
    fn insert_node(&mut self, node: Node) -> SceneResult<NodeKey> {
        let id = node.id;
        if self.index.contains_key(&id) {
            return Err(SceneError::DuplicateId(id));
        }
        let key = self.nodes.insert(node);
        self.index.insert(id, key);
        Ok(key)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: ObjectId) -> Option<&Node> {
        self.index.get(&id).and_then(|key| self.nodes.get(*key))
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Node> {
        let key = *self.index.get(&id)?;
        self.nodes.get_mut(key)
    }

    /// Nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Nodes in insertion order, mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    pub fn parent(&self, id: ObjectId) -> SceneResult<Option<ObjectId>> {
        let node = &self.nodes[self.key(id)?];
        Ok(node.parent.map(|key| self.nodes[key].id))
    }

    pub fn children(&self, id: ObjectId) -> SceneResult<Vec<ObjectId>> {
        let node = &self.nodes[self.key(id)?];
        Ok(node.children.iter().map(|key| self.nodes[*key].id).collect())
    }

    /// Reparents `child`, or detaches it to the root with `None`. Fails if
    /// `parent` is `child` itself or one of its descendants.
    pub fn set_parent(&mut self, child: ObjectId, parent: Option<ObjectId>) -> SceneResult<()> {
        let child_key = self.key(child)?;
        let parent_key = parent.map(|p| self.key(p)).transpose()?;

        if let (Some(parent), Some(parent_key)) = (parent, parent_key) {
            let mut cursor = Some(parent_key);
            while let Some(key) = cursor {
                if key == child_key {
                    return Err(SceneError::CycleDetected { child, parent });
                }
                cursor = self.nodes[key].parent;
            }
        }

        self.unlink(child_key);
        if let Some(parent_key) = parent_key {
            self.link(child_key, parent_key);
        }
        Ok(())
    }

    /// First node named `name`, searching breadth-first from the roots.
    pub fn find_by_name(&self, name: &str) -> Option<ObjectId> {
        let mut queue: VecDeque<NodeKey> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(key, _)| key)
            .collect();

        while let Some(key) = queue.pop_front() {
            let node = &self.nodes[key];
            if node.name == name {
                return Some(node.id);
            }
            queue.extend(node.children.iter().copied());
        }
        None
    }

    /// Removes `id` and all of its descendants, returning their ids.
    pub fn remove(&mut self, id: ObjectId) -> SceneResult<Vec<ObjectId>> {
        let key = self.key(id)?;
        self.unlink(key);

        let mut removed = Vec::new();
        let mut stack = vec![key];
        while let Some(key) = stack.pop() {
            if let Some(node) = self.nodes.remove(key) {
                self.index.remove(&node.id);
                removed.push(node.id);
                stack.extend(node.children);
            }
        }
        self.compact();

        debug!("Removed {} scene node(s) under {}", removed.len(), id);
        Ok(removed)
    }

    /// Model matrix composed with every ancestor's.
    pub fn world_matrix(&self, id: ObjectId) -> SceneResult<Mat4> {
        self.compose(id, |t| t.model_matrix())
    }

    /// Normal matrix composed with every ancestor's.
    pub fn world_normal_matrix(&self, id: ObjectId) -> SceneResult<Mat4> {
        self.compose(id, |t| t.normal_matrix())
    }

    /// World model and normal matrices of a node borrowed from this graph.
    pub fn world_transform(&self, node: &Node) -> (Mat4, Mat4) {
        let mut model = node.transform.model_matrix();
        let mut normal = node.transform.normal_matrix();
        let mut cursor = node.parent;
        while let Some(ancestor) = cursor.and_then(|key| self.nodes.get(key)) {
            model = ancestor.transform.model_matrix() * model;
            normal = ancestor.transform.normal_matrix() * normal;
            cursor = ancestor.parent;
        }
        (model, normal)
    }

    /// World-space position of a node borrowed from this graph.
    pub fn world_position(&self, node: &Node) -> Vec3 {
        self.world_transform(node).0.w_axis.truncate()
    }

    fn compose(&self, id: ObjectId, local: impl Fn(&Transform) -> Mat4) -> SceneResult<Mat4> {
        let mut cursor = Some(self.key(id)?);
        let mut matrix = Mat4::IDENTITY;
        while let Some(key) = cursor {
            let node = &self.nodes[key];
            matrix = local(&node.transform) * matrix;
            cursor = node.parent;
        }
        Ok(matrix)
    }

    /// Reinserts every node into a fresh arena in slot order. Removal
    /// leaves free slots that the next insert would reuse, putting a new
    /// node ahead of older ones.
    fn compact(&mut self) {
        let old = std::mem::take(&mut self.nodes);
        let mut remap = HashMap::with_capacity(old.len());
        for (old_key, node) in old {
            remap.insert(old_key, self.nodes.insert(node));
        }

        for node in self.nodes.values_mut() {
            node.parent = node.parent.and_then(|key| remap.get(&key).copied());
            node.children = node
                .children
                .iter()
                .filter_map(|key| remap.get(key).copied())
                .collect();
        }
        for key in self.index.values_mut() {
            if let Some(moved) = remap.get(key) {
                *key = *moved;
            }
        }
    }

    fn key(&self, id: ObjectId) -> SceneResult<NodeKey> {
        self.index
            .get(&id)
            .copied()
            .ok_or(SceneError::UnknownNode(id))
    }

    fn link(&mut self, child: NodeKey, parent: NodeKey) {
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    fn unlink(&mut self, child: NodeKey) {
        if let Some(parent) = self.nodes[child].parent.take()
            && let Some(parent) = self.nodes.get_mut(parent)
        {
            parent.children.retain(|key| *key != child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(names: &[&str]) -> (SceneGraph, IdAllocator, Vec<ObjectId>) {
        let mut graph = SceneGraph::new();
        let mut ids = IdAllocator::new();
        let added = names
            .iter()
            .map(|name| graph.add_node(&mut ids, *name, None).unwrap())
            .collect();
        (graph, ids, added)
    }

    #[test]
    fn test_add_and_get() {
        let (graph, _, added) = graph_with(&["a", "b"]);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.get(added[1]).unwrap().name(), "b");
        assert!(graph.get(ObjectId::from_raw(99)).is_none());
    }

    #[test]
    fn test_add_node_unknown_parent() {
        let mut graph = SceneGraph::new();
        let mut ids = IdAllocator::new();
        let result = graph.add_node(&mut ids, "orphan", Some(ObjectId::from_raw(5)));
        assert_eq!(result, Err(SceneError::UnknownNode(ObjectId::from_raw(5))));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_iteration_order_survives_removal() {
        let (mut graph, mut ids, added) = graph_with(&["a", "b", "c"]);
        graph.remove(added[0]).unwrap();
        // Reuses the freed arena slot but must still iterate last.
        graph.add_node(&mut ids, "d", None).unwrap();

        let names: Vec<&str> = graph.iter().map(|n| n.name()).collect();
        assert_eq!(names, vec!["b", "c", "d"]);
    }

    #[test]
    fn test_links_survive_compaction() {
        let (mut graph, mut ids, added) = graph_with(&["gone", "root"]);
        let child = graph.add_node(&mut ids, "child", Some(added[1])).unwrap();
        graph.remove(added[0]).unwrap();

        let late = graph.add_node(&mut ids, "late", Some(child)).unwrap();
        assert_eq!(graph.children(added[1]).unwrap(), vec![child]);
        assert_eq!(graph.parent(late).unwrap(), Some(child));
        assert_eq!(graph.get(child).unwrap().name(), "child");

        let names: Vec<&str> = graph.iter_mut().map(|n| n.name()).collect();
        assert_eq!(names, vec!["root", "child", "late"]);
    }

    #[test]
    fn test_reused_id_is_rejected() {
        let (mut graph, mut ids, added) = graph_with(&["first"]);
        ids.reset();

        assert_eq!(
            graph.add_node(&mut ids, "second", None),
            Err(SceneError::DuplicateId(added[0]))
        );
        ids.reset();
        assert_eq!(
            graph.spawn_mesh(&mut ids, "cube", MeshHandle(0), Transform::default()),
            Err(SceneError::DuplicateId(added[0]))
        );
        assert_eq!(graph.len(), 1);

        graph.remove(added[0]).unwrap();
        assert!(graph.is_empty());
        assert_eq!(graph.iter().count(), 0);
    }

    #[test]
    fn test_iter_mut_updates_translation() {
        let (mut graph, _, added) = graph_with(&["a", "b"]);
        for node in graph.iter_mut() {
            node.transform_mut().translation.y += 1.0;
        }
        assert_eq!(graph.get(added[1]).unwrap().transform().translation.y, 1.0);
    }

    #[test]
    fn test_components_replace_same_kind() {
        let (mut graph, _, added) = graph_with(&["a"]);
        let node = graph.get_mut(added[0]).unwrap();
        node.insert(MeshHandle(1));
        node.insert(MeshHandle(2));
        node.insert(PointLight::default());

        assert_eq!(node.components().len(), 2);
        assert_eq!(node.mesh(), Some(MeshHandle(2)));
        assert!(node.has(ComponentKind::PointLight));
        assert!(node.has(ComponentKind::Transform));
        assert!(!node.has(ComponentKind::DirectionalLight));

        node.remove_component(ComponentKind::Mesh);
        assert_eq!(node.mesh(), None);
    }

    #[test]
    fn test_spawn_lights() {
        let mut graph = SceneGraph::new();
        let mut ids = IdAllocator::new();
        let point = graph
            .spawn_point_light(&mut ids, Vec3::X, Vec3::Z, PointLight::default())
            .unwrap();
        let sun = graph
            .spawn_directional_light(&mut ids, Vec3::Y, Vec3::ONE, DirectionalLight::new(0.5, 90.0))
            .unwrap();

        let point = graph.get(point).unwrap();
        assert_eq!(point.color, Vec3::Z);
        assert_eq!(point.transform().translation, Vec3::X);
        assert!(point.point_light().is_some());
        assert_eq!(graph.get(sun).unwrap().directional_light().unwrap().fov_degrees, 90.0);
    }

    #[test]
    fn test_set_parent_and_children() {
        let (mut graph, _, added) = graph_with(&["root", "child"]);
        graph.set_parent(added[1], Some(added[0])).unwrap();
        assert_eq!(graph.children(added[0]).unwrap(), vec![added[1]]);
        assert_eq!(graph.parent(added[1]).unwrap(), Some(added[0]));

        graph.set_parent(added[1], None).unwrap();
        assert!(graph.children(added[0]).unwrap().is_empty());
    }

    #[test]
    fn test_set_parent_rejects_cycles() {
        let (mut graph, _, added) = graph_with(&["a", "b", "c"]);
        graph.set_parent(added[1], Some(added[0])).unwrap();
        graph.set_parent(added[2], Some(added[1])).unwrap();

        assert_eq!(
            graph.set_parent(added[0], Some(added[2])),
            Err(SceneError::CycleDetected {
                child: added[0],
                parent: added[2]
            })
        );
        assert!(graph.set_parent(added[0], Some(added[0])).is_err());
        assert_eq!(graph.parent(added[0]).unwrap(), None);
    }

    #[test]
    fn test_find_by_name_is_breadth_first() {
        let (mut graph, mut ids, added) = graph_with(&["root"]);
        let deep_parent = graph.add_node(&mut ids, "mid", Some(added[0])).unwrap();
        let deep = graph.add_node(&mut ids, "target", Some(deep_parent)).unwrap();
        let shallow = graph.add_node(&mut ids, "target", None).unwrap();

        assert_eq!(graph.find_by_name("target"), Some(shallow));
        graph.remove(shallow).unwrap();
        assert_eq!(graph.find_by_name("target"), Some(deep));
        assert_eq!(graph.find_by_name("missing"), None);
    }

    #[test]
    fn test_remove_subtree() {
        let (mut graph, mut ids, added) = graph_with(&["root", "keep"]);
        let child = graph.add_node(&mut ids, "child", Some(added[0])).unwrap();
        let grandchild = graph.add_node(&mut ids, "grandchild", Some(child)).unwrap();

        let mut removed = graph.remove(child).unwrap();
        removed.sort();
        assert_eq!(removed, vec![child, grandchild]);
        assert!(!graph.contains(grandchild));
        assert!(graph.children(added[0]).unwrap().is_empty());
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.remove(child), Err(SceneError::UnknownNode(child)));
    }

    #[test]
    fn test_world_matrix_walks_parents() {
        let (mut graph, mut ids, added) = graph_with(&["root"]);
        let child = graph.add_node(&mut ids, "child", Some(added[0])).unwrap();

        graph.get_mut(added[0]).unwrap().set_transform(
            Transform::from_translation(Vec3::new(0.0, 0.0, 10.0)).with_scale(Vec3::splat(2.0)),
        );
        graph
            .get_mut(child)
            .unwrap()
            .set_transform(Transform::from_translation(Vec3::X));

        let p = graph.world_matrix(child).unwrap().transform_point3(Vec3::ZERO);
        assert!((p - Vec3::new(2.0, 0.0, 10.0)).length() < 1e-5);

        let n = graph.world_normal_matrix(child).unwrap();
        assert!(n.abs_diff_eq(Mat4::from_scale(Vec3::splat(0.5)), 1e-6));

        let node = graph.get(child).unwrap();
        let (model, normal) = graph.world_transform(node);
        assert_eq!(model, graph.world_matrix(child).unwrap());
        assert_eq!(normal, n);
        assert!((graph.world_position(node) - Vec3::new(2.0, 0.0, 10.0)).length() < 1e-5);
    }
}
