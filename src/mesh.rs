// mesh.rs — 全景球体网格
//
// 经纬网格，纹理坐标按等距柱状投影展开：u 沿经度，v 从北极 (0) 到南极 (1)。
// 从球心向 +Z 看时，u = 0.5 在视野正中，u 增大向右。

use std::f32::consts::PI;

/// Unit sphere: the little-planet eye sits on its surface.
pub const SPHERE_RADIUS: f32 = 1.0;
pub const LAT_SEGMENTS: u32 = 50;
pub const LON_SEGMENTS: u32 = 50;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x2];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SphereMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl SphereMesh {
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

/// Build a UV sphere. The seam column is duplicated so `u` runs 0..=1
/// without wrapping inside a triangle.
pub fn build_sphere(radius: f32, lat: u32, lon: u32) -> SphereMesh {
    let lat = lat.max(2);
    let lon = lon.max(3);
    let mut vertices = Vec::with_capacity(((lat + 1) * (lon + 1)) as usize);
    let mut indices = Vec::with_capacity((lat * lon * 6) as usize);

    for i in 0..=lat {
        let v = i as f32 / lat as f32;
        let theta = PI * v;
        let (sin_t, cos_t) = theta.sin_cos();

        for j in 0..=lon {
            let u = j as f32 / lon as f32;
            let phi = 2.0 * PI * u - PI;
            let (sin_p, cos_p) = phi.sin_cos();

            vertices.push(Vertex {
                position: [-radius * sin_t * sin_p, radius * cos_t, radius * sin_t * cos_p],
                uv: [u, v],
            });
        }
    }

    for i in 0..lat {
        for j in 0..lon {
            let a = i * (lon + 1) + j;
            let b = a + lon + 1;
            indices.extend_from_slice(&[a, b, a + 1, b, b + 1, a + 1]);
        }
    }

    SphereMesh { vertices, indices }
}
