//! Concrete component types.

mod camera;
mod light;
mod lines;
mod material;
mod mesh;
mod transform;

pub use camera::{CameraGroup, MotionControl, Projection};
pub use light::PointLight;
pub use lines::{CoordinateSystem, LineSegment, LinesGrid, LinesMesh};
pub use material::{Factor, PhysicalBasedMaterial, SkyBox};
pub use mesh::{MeshData, TrianglesMesh};
pub use transform::TransformWrap;
