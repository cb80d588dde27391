//! Geometry descriptors handed to physics backends, plus the cooking cache
//! shared by every world an engine creates.

use crate::types::{Aabb, Pose};
use glam::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Materials
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SurfaceMaterial {
    pub static_friction: f32,
    pub dynamic_friction: f32,
    pub restitution: f32,
}

impl SurfaceMaterial {
    /// Single friction coefficient for solvers without a static/dynamic split.
    /// The larger of the two, so resting contacts hold as well as they would
    /// under the static value.
    pub fn coulomb_friction(&self) -> f32 {
        self.static_friction.max(self.dynamic_friction)
    }
}

impl Default for SurfaceMaterial {
    fn default() -> Self {
        Self {
            static_friction: 0.5,
            dynamic_friction: 0.5,
            restitution: 0.6,
        }
    }
}

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

/// Identifies one cookable element of a source mesh.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct MeshKey {
    pub mesh_id: u64,
    pub element: usize,
}

impl MeshKey {
    pub fn new(mesh_id: u64, element: usize) -> Self {
        Self { mesh_id, element }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ShapeGeometry {
    Box {
        half_extents: Vec3,
    },
    Sphere {
        radius: f32,
    },
    /// Capsule aligned with the local Y axis.
    Capsule {
        half_height: f32,
        radius: f32,
    },
    ConvexHull {
        key: MeshKey,
        points: Vec<Vec3>,
    },
    TriangleMesh {
        key: MeshKey,
        vertices: Vec<Vec3>,
        indices: Vec<[u32; 3]>,
    },
    /// Geometry the backends cannot represent. Skipped with a logged error.
    Unsupported {
        kind: String,
    },
}

impl ShapeGeometry {
    pub fn kind(&self) -> &str {
        match self {
            ShapeGeometry::Box { .. } => "box",
            ShapeGeometry::Sphere { .. } => "sphere",
            ShapeGeometry::Capsule { .. } => "capsule",
            ShapeGeometry::ConvexHull { .. } => "convex",
            ShapeGeometry::TriangleMesh { .. } => "trimesh",
            ShapeGeometry::Unsupported { kind } => kind,
        }
    }

    /// Bounds in the shape's own frame. `None` for unsupported or empty geometry.
    pub fn local_bounds(&self) -> Option<Aabb> {
        match self {
            ShapeGeometry::Box { half_extents } => {
                Some(Aabb::from_center_extent(Vec3::ZERO, *half_extents))
            }
            ShapeGeometry::Sphere { radius } => {
                Some(Aabb::from_center_extent(Vec3::ZERO, Vec3::splat(*radius)))
            }
            ShapeGeometry::Capsule {
                half_height,
                radius,
            } => Some(Aabb::from_center_extent(
                Vec3::ZERO,
                Vec3::new(*radius, half_height + radius, *radius),
            )),
            ShapeGeometry::ConvexHull { points, .. } => Aabb::from_points(points.iter().copied()),
            ShapeGeometry::TriangleMesh { vertices, .. } => {
                Aabb::from_points(vertices.iter().copied())
            }
            ShapeGeometry::Unsupported { .. } => None,
        }
    }
}

/// One shape of a compound body, placed relative to the body origin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShapeDescriptor {
    pub geometry: ShapeGeometry,
    pub local: Pose,
    pub material: SurfaceMaterial,
}

impl ShapeDescriptor {
    pub fn new(geometry: ShapeGeometry) -> Self {
        Self {
            geometry,
            local: Pose::identity(),
            material: SurfaceMaterial::default(),
        }
    }

    pub fn with_local(mut self, local: Pose) -> Self {
        self.local = local;
        self
    }

    pub fn with_material(mut self, material: SurfaceMaterial) -> Self {
        self.material = material;
        self
    }
}

/// Everything a backend needs to build one body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BodyDescriptor {
    pub shapes: Vec<ShapeDescriptor>,
    pub transform: Pose,
    /// Total mass in kg, split evenly across supported shapes.
    pub mass: f32,
}

impl BodyDescriptor {
    pub fn new(transform: Pose) -> Self {
        Self {
            shapes: Vec::new(),
            transform,
            mass: 1.0,
        }
    }

    pub fn with_shape(mut self, shape: ShapeDescriptor) -> Self {
        self.shapes.push(shape);
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    /// Convenience for the common single-box body.
    pub fn cuboid(transform: Pose, half_extents: Vec3) -> Self {
        Self::new(transform).with_shape(ShapeDescriptor::new(ShapeGeometry::Box { half_extents }))
    }

    pub fn sphere(transform: Pose, radius: f32) -> Self {
        Self::new(transform).with_shape(ShapeDescriptor::new(ShapeGeometry::Sphere { radius }))
    }

    /// Union of every supported shape's bounds in body space.
    pub fn local_bounds(&self) -> Option<Aabb> {
        self.shapes
            .iter()
            .filter_map(|s| s.geometry.local_bounds().map(|b| b.transformed(&s.local)))
            .reduce(|a, b| a.union(&b))
    }
}

// ---------------------------------------------------------------------------
// Cooking cache
// ---------------------------------------------------------------------------

/// Cooked convex hulls and triangle meshes keyed by [`MeshKey`].
///
/// Cooking is expensive and a scene typically instantiates the same mesh
/// many times, so backends created by one engine share one cache. Failed
/// cooks are not cached.
pub struct CookCache<T> {
    entries: RwLock<HashMap<MeshKey, Arc<T>>>,
}

impl<T> CookCache<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_cook<F>(&self, key: MeshKey, cook: F) -> Option<Arc<T>>
    where
        F: FnOnce() -> Option<T>,
    {
        if let Some(hit) = self.entries.read().get(&key) {
            return Some(hit.clone());
        }
        let mut entries = self.entries.write();
        match entries.entry(key) {
            Entry::Occupied(e) => Some(e.get().clone()),
            Entry::Vacant(v) => {
                let cooked = Arc::new(cook()?);
                v.insert(cooked.clone());
                Some(cooked)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl<T> Default for CookCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn friction_folds_to_the_larger_coefficient() {
        let sticky = SurfaceMaterial {
            static_friction: 0.9,
            dynamic_friction: 0.4,
            restitution: 0.0,
        };
        assert_eq!(sticky.coulomb_friction(), 0.9);
        let slick = SurfaceMaterial {
            static_friction: 0.1,
            dynamic_friction: 0.3,
            ..sticky
        };
        assert_eq!(slick.coulomb_friction(), 0.3);
    }

    #[test]
    fn compound_bounds_include_offset_shapes() {
        let body = BodyDescriptor::new(Pose::identity())
            .with_shape(ShapeDescriptor::new(ShapeGeometry::Sphere { radius: 1.0 }))
            .with_shape(
                ShapeDescriptor::new(ShapeGeometry::Box {
                    half_extents: Vec3::splat(0.5),
                })
                .with_local(Pose::from_position(Vec3::new(4.0, 0.0, 0.0))),
            )
            .with_shape(ShapeDescriptor::new(ShapeGeometry::Unsupported {
                kind: "heightfield".into(),
            }));
        let b = body.local_bounds().unwrap();
        assert_eq!(b.min, Vec3::new(-1.0, -1.0, -1.0));
        assert_eq!(b.max, Vec3::new(4.5, 1.0, 1.0));
    }

    #[test]
    fn cook_cache_reuses_and_skips_failures() {
        let cache: CookCache<usize> = CookCache::new();
        let key = MeshKey::new(7, 0);
        let mut cooks = 0;
        for _ in 0..3 {
            let v = cache.get_or_cook(key, || {
                cooks += 1;
                Some(42)
            });
            assert_eq!(v.as_deref(), Some(&42));
        }
        assert_eq!(cooks, 1);

        assert!(cache.get_or_cook(MeshKey::new(8, 0), || None).is_none());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
