use std::mem;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;

use crate::shadow::config::{CasterFilter, LayerMask};

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct CasterVertex {
    pub pos: [f32; 3],
}

impl CasterVertex {
    pub const ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<CasterVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

/// Corners and triangles of an axis-aligned box centred on the origin,
/// counter-clockwise when seen from outside.
pub fn cuboid_geometry(half_extents: Vec3) -> (Vec<CasterVertex>, Vec<u32>) {
    let h = half_extents;
    let vertices = [
        [-h.x, -h.y, -h.z],
        [h.x, -h.y, -h.z],
        [h.x, h.y, -h.z],
        [-h.x, h.y, -h.z],
        [-h.x, -h.y, h.z],
        [h.x, -h.y, h.z],
        [h.x, h.y, h.z],
        [-h.x, h.y, h.z],
    ]
    .into_iter()
    .map(|pos| CasterVertex { pos })
    .collect();

    #[rustfmt::skip]
    let indices = vec![
        4, 5, 6, 4, 6, 7, // +Z
        1, 0, 3, 1, 3, 2, // -Z
        5, 1, 2, 5, 2, 6, // +X
        0, 4, 7, 0, 7, 3, // -X
        7, 6, 2, 7, 2, 3, // +Y
        0, 1, 5, 0, 5, 4, // -Y
    ];
    (vertices, indices)
}

/// Position-only geometry uploaded for the depth pass.
#[derive(Debug)]
pub struct CasterMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

impl CasterMesh {
    pub fn new(device: &wgpu::Device, label: &str, vertices: &[CasterVertex], indices: &[u32]) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}Vertices")),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}Indices")),
            contents: bytemuck::cast_slice(indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        }
    }

    pub fn cuboid(device: &wgpu::Device, half_extents: Vec3) -> Self {
        let (vertices, indices) = cuboid_geometry(half_extents);
        Self::new(device, "Cuboid", &vertices, &indices)
    }

    pub fn vertex_buffer(&self) -> &wgpu::Buffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &wgpu::Buffer {
        &self.index_buffer
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// One object drawn into the depth target.
#[derive(Clone, Debug)]
pub struct ShadowCaster {
    pub mesh: Arc<CasterMesh>,
    pub model: Mat4,
    /// Layer index tested against the camera's culling mask.
    pub layer: u8,
    pub transparent: bool,
}

impl ShadowCaster {
    pub fn opaque(mesh: Arc<CasterMesh>, model: Mat4) -> Self {
        Self {
            mesh,
            model,
            layer: 0,
            transparent: false,
        }
    }
}

/// How a caster ends up in the depth pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasterDraw {
    Skip,
    Solid,
    Dithered,
}

pub fn classify(layer: u8, transparent: bool, mask: LayerMask, filter: CasterFilter) -> CasterDraw {
    if !mask.includes_layer(layer) {
        return CasterDraw::Skip;
    }
    match (transparent, filter) {
        (false, _) => CasterDraw::Solid,
        (true, CasterFilter::OpaqueOnly) => CasterDraw::Skip,
        (true, CasterFilter::All) => CasterDraw::Solid,
        (true, CasterFilter::DitheredTransparent) => CasterDraw::Dithered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_matches_struct_size() {
        assert_eq!(
            CasterVertex::layout().array_stride,
            mem::size_of::<CasterVertex>() as wgpu::BufferAddress
        );
    }

    #[test]
    fn cuboid_faces_point_outwards() {
        let (vertices, indices) = cuboid_geometry(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(vertices.len(), 8);
        assert_eq!(indices.len(), 36);

        for tri in indices.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(vertices[i as usize].pos));
            let normal = (b - a).cross(c - a);
            let centre = (a + b + c) / 3.0;
            assert!(normal.dot(centre) > 0.0, "inward face {:?}", tri);
        }
    }

    #[test]
    fn classify_honours_mask_and_filter() {
        let mask = LayerMask::DEFAULT;
        assert_eq!(classify(0, false, mask, CasterFilter::OpaqueOnly), CasterDraw::Solid);
        assert_eq!(classify(3, false, mask, CasterFilter::All), CasterDraw::Skip);
        assert_eq!(classify(0, true, mask, CasterFilter::OpaqueOnly), CasterDraw::Skip);
        assert_eq!(classify(0, true, mask, CasterFilter::All), CasterDraw::Solid);
        assert_eq!(
            classify(0, true, mask, CasterFilter::DitheredTransparent),
            CasterDraw::Dithered
        );
    }
}
