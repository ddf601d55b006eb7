use crate::ComponentKind;
use std::collections::HashMap;

/// Display names for component kinds. Created once by the application and passed to
/// whatever prints components (logs, editor panels).
#[derive(Debug, Clone, Default)]
pub struct TypeNameRegistry {
    names: HashMap<ComponentKind, String>,
}

impl TypeNameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for kind in ComponentKind::ALL {
            let name = match kind {
                ComponentKind::TransformWrap => "Transform",
                ComponentKind::TrianglesMesh => "Mesh",
                ComponentKind::PhysicalBasedMaterial => "PBR Material",
                ComponentKind::CoordinateSystem => "Coordinate System",
                ComponentKind::LinesMesh => "Lines",
                ComponentKind::LinesGrid => "Grid",
                ComponentKind::SkyBox => "Sky Box",
                ComponentKind::CameraGroup => "Camera Group",
                ComponentKind::Projection => "Projection",
                ComponentKind::MotionControl => "Motion Control",
                ComponentKind::PointLight => "Point Light",
            };
            registry.register(*kind, name);
        }
        registry
    }

    pub fn register(&mut self, kind: ComponentKind, name: impl Into<String>) {
        self.names.insert(kind, name.into());
    }

    pub fn name(&self, kind: ComponentKind) -> &str {
        self.names.get(&kind).map(String::as_str).unwrap_or("Unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_kind() {
        let registry = TypeNameRegistry::with_defaults();
        for kind in ComponentKind::ALL {
            assert_ne!(registry.name(*kind), "Unknown");
        }
        assert_eq!(TypeNameRegistry::new().name(ComponentKind::SkyBox), "Unknown");
    }
}
