use color_eyre::Result;
use crate::renderer::error::RenderError;
use crate::renderer::handle::BufferHandle;
use crate::renderer::resources::vertex::Vertex;

/// Host-side geometry handed over by the scene layer
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
        }
    }

    pub fn new_quad() -> Self {
        let vertices = vec![
            Vertex { // Top left
                position: [-0.8, 0.8, 0.0].into(),
                normal: [0.0, 0.0, 1.0].into(),
                texcoord: [0.0, 1.0].into(),
            },
            Vertex { // Bottom left
                position: [-0.8, -0.8, 0.0].into(),
                normal: [0.0, 0.0, 1.0].into(),
                texcoord: [0.0, 0.0].into(),
            },
            Vertex { // Top right
                position: [0.8, 0.8, 0.0].into(),
                normal: [0.0, 0.0, 1.0].into(),
                texcoord: [1.0, 1.0].into(),
            },
            Vertex { // Bottom right
                position: [0.8, -0.8, 0.0].into(),
                normal: [0.0, 0.0, 1.0].into(),
                texcoord: [1.0, 0.0].into(),
            },
        ];

        let indices = vec![
            0, 1, 2, // Top left triangle
            3, 2, 1, // Bottom right triangle
        ];

        Self::new(vertices, indices)
    }

    /// Rejects empty geometry and indices pointing past the vertex list.
    pub fn validate(&self) -> Result<()> {
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(RenderError::invalid("mesh needs at least one vertex and one index"));
        }
        let vertex_count = self.vertices.len() as u64;
        if let Some(index) = self.indices.iter().find(|i| u64::from(**i) >= vertex_count) {
            return Err(RenderError::invalid(format!(
                "index {} out of range for {} vertices",
                index, vertex_count
            )));
        }
        Ok(())
    }
}

/// Device-side buffers of one uploaded mesh
#[derive(Debug, Clone, Copy)]
pub struct GpuMesh {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub vertex_count: u32,
    pub index_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quad_is_valid() {
        let quad = MeshData::new_quad();
        assert!(quad.validate().is_ok());
        assert_eq!(quad.indices.len(), 6);
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let mut quad = MeshData::new_quad();
        quad.indices.push(4);
        assert!(matches!(
            RenderError::of(&quad.validate().unwrap_err()),
            Some(RenderError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_mesh_is_rejected() {
        assert!(MeshData::default().validate().is_err());
    }
}
