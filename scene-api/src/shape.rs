use crate::{Component, ComponentKind, ComponentType, ShapeId, TypeNameRegistry};

/// An entity: stable id, display name and at most one component per kind, kept in
/// insertion order. A clone is a new entity with a fresh [`ShapeId`].
#[derive(Debug)]
pub struct Shape {
    id: ShapeId,
    name: String,
    components: Vec<Component>,
}

impl Clone for Shape {
    fn clone(&self) -> Self {
        Self { id: ShapeId::next(), ..self.duplicate() }
    }
}

impl Shape {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: ShapeId::next(), name: name.into(), components: Vec::new() }
    }

    /// Copy that keeps this shape's id, for cloning a whole scene.
    pub(crate) fn duplicate(&self) -> Self {
        Self { id: self.id, name: self.name.clone(), components: self.components.clone() }
    }

    /// Builder form of [`Shape::insert`].
    pub fn with<T: ComponentType>(mut self, component: T) -> Self {
        self.insert(component);
        self
    }

    pub fn id(&self) -> ShapeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Insert a component. An existing component of the same kind is replaced in place
    /// (its position in the order is kept) and returned.
    pub fn insert<T: ComponentType>(&mut self, component: T) -> Option<T> {
        match self.components.iter_mut().find(|c| c.kind() == T::KIND) {
            Some(slot) => T::take(std::mem::replace(slot, component.into())),
            None => {
                self.components.push(component.into());
                None
            }
        }
    }

    pub fn remove<T: ComponentType>(&mut self) -> Option<T> {
        let index = self.components.iter().position(|c| c.kind() == T::KIND)?;
        T::take(self.components.remove(index))
    }

    pub fn has<T: ComponentType>(&self) -> bool {
        self.has_kind(T::KIND)
    }

    pub fn has_kind(&self, kind: ComponentKind) -> bool {
        self.components.iter().any(|c| c.kind() == kind)
    }

    pub fn get<T: ComponentType>(&self) -> Option<&T> {
        self.components.iter().find_map(T::cast)
    }

    pub fn get_mut<T: ComponentType>(&mut self) -> Option<&mut T> {
        self.components.iter_mut().find_map(T::cast_mut)
    }

    /// The component of kind `T` if present and visible.
    pub fn get_visible<T: ComponentType>(&self) -> Option<&T> {
        self.components
            .iter()
            .find(|c| c.kind() == T::KIND)
            .filter(|c| c.visible())
            .and_then(T::cast)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.iter()
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// "name [Transform, Mesh]" using the registry's display names.
    pub fn describe(&self, registry: &TypeNameRegistry) -> String {
        let kinds: Vec<&str> = self.components.iter().map(|c| registry.name(c.kind())).collect();
        format!("{} [{}]", self.name, kinds.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CoordinateSystem, PointLight, TransformWrap};
    use glam::Vec3;

    #[test]
    fn insert_replaces_same_kind_and_keeps_order() {
        let mut shape = Shape::new("s")
            .with(TransformWrap::from_translation(Vec3::X))
            .with(PointLight::default());
        let previous = shape.insert(TransformWrap::from_translation(Vec3::Y));
        assert_eq!(previous.unwrap().translation(), Vec3::X);
        assert_eq!(shape.len(), 2);
        let kinds: Vec<ComponentKind> = shape.components().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![ComponentKind::TransformWrap, ComponentKind::PointLight]);
        assert_eq!(shape.get::<TransformWrap>().unwrap().translation(), Vec3::Y);
    }

    #[test]
    fn get_visible_skips_hidden_components() {
        let mut axes = CoordinateSystem::new(1.0);
        axes.visible = false;
        let mut shape = Shape::new("axes").with(axes);
        assert!(shape.has::<CoordinateSystem>());
        assert!(shape.get_visible::<CoordinateSystem>().is_none());
        shape.get_mut::<CoordinateSystem>().unwrap().visible = true;
        assert!(shape.get_visible::<CoordinateSystem>().is_some());
        assert!(shape.remove::<CoordinateSystem>().is_some());
        assert!(shape.is_empty());
    }

    #[test]
    fn clone_is_a_new_shape_with_the_same_components() {
        let shape = Shape::new("lamp").with(PointLight::default());
        let copy = shape.clone();
        assert_ne!(copy.id(), shape.id());
        assert_eq!(copy.name(), "lamp");
        assert!(copy.has::<PointLight>());
        assert_eq!(shape.duplicate().id(), shape.id());
    }
}
