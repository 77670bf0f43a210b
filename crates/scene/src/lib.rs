//! Scene graph and components.
//!
//! This crate provides scene management:
//! - Node arena with parent/child links
//! - Transform and camera math
//! - Mesh and light components

pub mod camera;
pub mod component;
pub mod graph;
pub mod ids;
pub mod light;
pub mod transform;

pub use camera::{Camera, WORLD_UP};
pub use component::{Component, ComponentKind, MeshHandle};
pub use graph::{Node, NodeKey, SceneError, SceneGraph, SceneResult};
pub use ids::{IdAllocator, ObjectId};
pub use light::{DirectionalLight, PointLight};
pub use transform::Transform;
