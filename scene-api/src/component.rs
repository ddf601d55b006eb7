//! Tagged component variant and typed access.

use crate::components::{
    CameraGroup, CoordinateSystem, LineSegment, LinesGrid, LinesMesh, MotionControl,
    PhysicalBasedMaterial, PointLight, Projection, SkyBox, TransformWrap, TrianglesMesh,
};

/// Typed view over one `Component` variant.
pub trait ComponentType: Into<Component> + Sized + 'static {
    const KIND: ComponentKind;
    fn cast(component: &Component) -> Option<&Self>;
    fn cast_mut(component: &mut Component) -> Option<&mut Self>;
    fn take(component: Component) -> Option<Self>;
}

macro_rules! components {
    ($($ty:ident),* $(,)?) => {
        #[derive(Debug, Clone)]
        pub enum Component {
            $($ty($ty),)*
        }

        /// Discriminant of [`Component`]; stable identifier of a component type.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ComponentKind {
            $($ty,)*
        }

        impl ComponentKind {
            pub const ALL: &'static [ComponentKind] = &[$(ComponentKind::$ty,)*];
        }

        impl Component {
            pub fn kind(&self) -> ComponentKind {
                match self {
                    $(Component::$ty(_) => ComponentKind::$ty,)*
                }
            }
        }

        $(
            impl From<$ty> for Component {
                fn from(value: $ty) -> Self {
                    Component::$ty(value)
                }
            }

            impl ComponentType for $ty {
                const KIND: ComponentKind = ComponentKind::$ty;

                fn cast(component: &Component) -> Option<&Self> {
                    match component {
                        Component::$ty(c) => Some(c),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn cast_mut(component: &mut Component) -> Option<&mut Self> {
                    match component {
                        Component::$ty(c) => Some(c),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }

                fn take(component: Component) -> Option<Self> {
                    match component {
                        Component::$ty(c) => Some(c),
                        #[allow(unreachable_patterns)]
                        _ => None,
                    }
                }
            }
        )*
    };
}

components!(
    TransformWrap,
    TrianglesMesh,
    PhysicalBasedMaterial,
    CoordinateSystem,
    LinesMesh,
    LinesGrid,
    SkyBox,
    CameraGroup,
    Projection,
    MotionControl,
    PointLight,
);

impl Component {
    /// Components without a visibility flag are always visible.
    pub fn visible(&self) -> bool {
        match self {
            Component::TrianglesMesh(c) => c.visible,
            Component::PhysicalBasedMaterial(c) => c.visible,
            Component::CoordinateSystem(c) => c.visible,
            Component::LinesMesh(c) => c.visible,
            Component::LinesGrid(c) => c.visible,
            Component::SkyBox(c) => c.visible,
            _ => true,
        }
    }

    /// Line segments of line-producing components.
    pub fn line_segments(&self) -> Option<&[LineSegment]> {
        match self {
            Component::CoordinateSystem(c) => Some(c.segments()),
            Component::LinesMesh(c) => Some(c.segments()),
            Component::LinesGrid(c) => Some(c.segments()),
            _ => None,
        }
    }
}
