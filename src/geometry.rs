// Geometry module
// Scene units and plane helpers shared by the view, the actors and the cache.

/// Scene length unit (nanometres).
pub type Nm = f64;

/// A point or a per-axis value (resolution, spacing) in scene units.
pub type NmVector3 = [Nm; 3];

/// Orientation of a 2D view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plane {
    /// Axial, slices move along Z.
    XY,
    /// Coronal, slices move along Y.
    XZ,
    /// Sagittal, slices move along X.
    YZ,
}

impl Plane {
    /// Index of the axis normal to the plane (the slicing axis).
    pub fn normal_index(self) -> usize {
        match self {
            Plane::XY => 2,
            Plane::XZ => 1,
            Plane::YZ => 0,
        }
    }

    /// Indexes of the two in-plane axes, horizontal first.
    pub fn in_plane_indexes(self) -> (usize, usize) {
        match self {
            Plane::XY => (0, 1),
            Plane::XZ => (0, 2),
            Plane::YZ => (1, 2),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Plane::XY => "Axial",
            Plane::XZ => "Coronal",
            Plane::YZ => "Sagittal",
        }
    }
}

/// Axis aligned rectangle in the in-plane coordinates of a slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent2D {
    pub min: [Nm; 2],
    pub max: [Nm; 2],
}

impl Extent2D {
    pub fn new(min: [Nm; 2], max: [Nm; 2]) -> Self {
        Self { min, max }
    }

    /// Closed-interval containment test.
    pub fn contains(&self, x: Nm, y: Nm) -> bool {
        x >= self.min[0] && x <= self.max[0] && y >= self.min[1] && y <= self.max[1]
    }

    pub fn width(&self) -> Nm {
        (self.max[0] - self.min[0]).max(0.0)
    }

    pub fn height(&self) -> Nm {
        (self.max[1] - self.min[1]).max(0.0)
    }
}

/// Builds a 3D point from in-plane coordinates and a slice position.
pub fn point_on_plane(plane: Plane, x: Nm, y: Nm, slice: Nm) -> NmVector3 {
    let (h, v) = plane.in_plane_indexes();
    let mut point = [0.0; 3];
    point[h] = x;
    point[v] = y;
    point[plane.normal_index()] = slice;
    point
}
