//! Scene model for Prism.
//! A scene is an ordered list of shapes; a shape is a bag of tagged components with at most
//! one component per kind. Renderers query shapes by capability (`has::<T>()`, `get::<T>()`).

mod camera;
mod component;
pub mod components;
mod ids;
mod registry;
mod scene;
mod shape;

pub use camera::CameraView;
pub use component::{Component, ComponentKind, ComponentType};
pub use components::{
    CameraGroup, CoordinateSystem, Factor, LineSegment, LinesGrid, LinesMesh, MeshData,
    MotionControl, PhysicalBasedMaterial, PointLight, Projection, SkyBox, TransformWrap,
    TrianglesMesh,
};
pub use ids::{MeshId, ShapeId, TextureId};
pub use registry::TypeNameRegistry;
pub use scene::Scene;
pub use shape::Shape;
