//! The local compute kernel: one cross product per matched vector triple.
//!
//! The kernel knows nothing about ranks, chunks, or collectives; it is applied
//! by every worker to whatever chunk the scatter handed it.

use bytemuck::{Pod, Zeroable};

/// A 3-component vector, stored as three consecutive `f32` scalars.
/// Pod so flat scalar buffers can be viewed as vectors without copying.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// The standard cross product. Total over finite floats; NaN/Inf pass through.
pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    Vec3 {
        x: a.y * b.z - a.z * b.y,
        y: a.z * b.x - a.x * b.z,
        z: a.x * b.y - a.y * b.x,
    }
}

/// Applies [`cross`] to every matched scalar triple of `a` and `b` in index
/// order, writing each result into the corresponding position of `out`.
///
/// All three slices must be the same length. Only whole triples are
/// processed; vectors never interact across triple boundaries.
pub fn cross_chunk(a: &[f32], b: &[f32], out: &mut [f32]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), out.len());

    for ((a, b), out) in a
        .chunks_exact(3)
        .zip(b.chunks_exact(3))
        .zip(out.chunks_exact_mut(3))
    {
        let c = cross(Vec3::new(a[0], a[1], a[2]), Vec3::new(b[0], b[1], b[2]));
        out[0] = c.x;
        out[1] = c.y;
        out[2] = c.z;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn axis_vectors() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        let z = Vec3::new(0.0, 0.0, 1.0);

        assert_eq!(cross(x, y), z);
        assert_eq!(cross(y, z), x);
        assert_eq!(cross(z, x), y);
        assert_eq!(cross(y, x), Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn parallel_vectors_cancel() {
        let v = Vec3::new(2.0, -3.0, 4.0);
        assert_eq!(cross(v, v), Vec3::new(0.0, 0.0, 0.0));
    }

    #[test]
    fn chunk_matches_per_vector_results() {
        let a = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        let b = [0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        let mut out = [0.0f32; 12];

        cross_chunk(&a, &b, &mut out);

        let expected = [0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 1.0, 0.0];
        assert_eq!(out, expected);
    }

    #[test]
    fn empty_chunk_is_a_no_op() {
        let mut out: [f32; 0] = [];
        cross_chunk(&[], &[], &mut out);
    }
}
