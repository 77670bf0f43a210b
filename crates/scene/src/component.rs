//! Closed set of components a node can carry.

use crate::light::{DirectionalLight, PointLight};

/// Index of a mesh in the renderer's mesh library.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u32);

/// Payload-carrying components. The transform is not listed because every
/// node has one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Component {
    Mesh(MeshHandle),
    PointLight(PointLight),
    DirectionalLight(DirectionalLight),
}

/// Tag used to query for a component without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Transform,
    Mesh,
    PointLight,
    DirectionalLight,
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Mesh(_) => ComponentKind::Mesh,
            Component::PointLight(_) => ComponentKind::PointLight,
            Component::DirectionalLight(_) => ComponentKind::DirectionalLight,
        }
    }
}

impl From<MeshHandle> for Component {
    fn from(handle: MeshHandle) -> Self {
        Component::Mesh(handle)
    }
}

impl From<PointLight> for Component {
    fn from(light: PointLight) -> Self {
        Component::PointLight(light)
    }
}

impl From<DirectionalLight> for Component {
    fn from(light: DirectionalLight) -> Self {
        Component::DirectionalLight(light)
    }
}
