//! Process-wide identities. Counters only ever increase; ids are never reused.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SHAPE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_MESH_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeId(u64);

impl ShapeId {
    pub fn next() -> Self {
        Self(NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Identity of one `MeshData`; the packer keys mesh locations by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(u64);

impl MeshId {
    pub fn next() -> Self {
        Self(NEXT_MESH_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Handle to a texture registered with the renderer's asset manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_increase_and_never_repeat() {
        let a = MeshId::next();
        let b = MeshId::next();
        assert!(b > a);
        let s = ShapeId::next();
        assert_ne!(s, ShapeId::next());
    }
}
