use crate::TextureId;

/// A material input: either a constant or a texture lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Factor<T> {
    Constant(T),
    Texture(TextureId),
}

impl<T: Copy> Factor<T> {
    pub fn constant(&self) -> Option<T> {
        match self {
            Factor::Constant(v) => Some(*v),
            Factor::Texture(_) => None,
        }
    }

    pub fn texture(&self) -> Option<TextureId> {
        match self {
            Factor::Constant(_) => None,
            Factor::Texture(id) => Some(*id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalBasedMaterial {
    pub base_color: Factor<[f32; 4]>,
    pub metallic: Factor<f32>,
    pub roughness: Factor<f32>,
    pub emissive: Factor<[f32; 3]>,
    /// Surfaces flagged here are replaced by the blurred image in post processing.
    pub blur: bool,
    pub visible: bool,
}

impl Default for PhysicalBasedMaterial {
    fn default() -> Self {
        Self {
            base_color: Factor::Constant([1.0, 1.0, 1.0, 1.0]),
            metallic: Factor::Constant(0.0),
            roughness: Factor::Constant(0.5),
            emissive: Factor::Constant([0.0, 0.0, 0.0]),
            blur: false,
            visible: true,
        }
    }
}

impl PhysicalBasedMaterial {
    pub fn with_base_color(mut self, color: [f32; 4]) -> Self {
        self.base_color = Factor::Constant(color);
        self
    }

    pub fn with_metallic_roughness(mut self, metallic: f32, roughness: f32) -> Self {
        self.metallic = Factor::Constant(metallic);
        self.roughness = Factor::Constant(roughness);
        self
    }

    pub fn with_emissive(mut self, emissive: [f32; 3]) -> Self {
        self.emissive = Factor::Constant(emissive);
        self
    }
}

/// Environment cube map drawn behind all geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct SkyBox {
    pub texture: TextureId,
    pub visible: bool,
}

impl SkyBox {
    pub fn new(texture: TextureId) -> Self {
        Self { texture, visible: true }
    }
}
