use std::io::BufRead;
use std::mem::offset_of;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use thiserror::Error;
use tracing::debug;

use crate::backend::vulkan::{self, Buffer, CommandBuffer, CommandPool, Device};
use crate::material::ObjectUniform;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read mesh {path:?}: {err}")]
    Io {
        path: PathBuf,
        err: std::io::Error,
    },
    #[error("failed to parse OBJ: {0}")]
    Obj(#[from] tobj::LoadError),
    #[error("mesh data ended before {what}")]
    Truncated { what: &'static str },
    #[error("model has no vertex data")]
    NoVertexData,
    #[error("model has neither submeshes nor a global index buffer")]
    NoIndexData,
    #[error(transparent)]
    Gpu(#[from] vulkan::Error),
}

/// Vertex record produced by the OBJ loader.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct StaticVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
}

/// Vertex record of the binary mesh format (full tangent basis).
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct MeshVertex {
    pub position: [f32; 4],
    pub texcoord: [f32; 4],
    pub normal: [f32; 4],
    pub tangent: [f32; 4],
}

/// Vertex record of the binary component format (no tangents), used by the
/// skybox.
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct ComponentVertex {
    pub position: [f32; 4],
    pub texcoord: [f32; 4],
    pub normal: [f32; 4],
}

/// Which vertex record the model was loaded with.
enum VertexData {
    None,
    Static(Vec<StaticVertex>),
    Mesh(Vec<MeshVertex>),
    Component(Vec<ComponentVertex>),
}

/// A named indexed chunk of the binary mesh format, drawn with its own index
/// buffer.
pub struct SubMesh {
    pub name: String,
    index_count: u32,
    index_buffer: Arc<Buffer>,
}

impl SubMesh {
    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

pub struct Model {
    vertices: VertexData,
    vertex_buffer: Option<Arc<Buffer>>,
    index_data: Vec<u32>,
    index_buffer: Option<Arc<Buffer>>,
    submeshes: Vec<SubMesh>,
    model_matrix: Mat4,
}

impl Model {
    pub fn new() -> Self {
        Self {
            vertices: VertexData::None,
            vertex_buffer: None,
            index_data: Vec::new(),
            index_buffer: None,
            submeshes: Vec::new(),
            model_matrix: Mat4::IDENTITY,
        }
    }

    /// Loads a triangulated OBJ file. Vertices are duplicated per index with
    /// sequential indices, matching how the renderer's attribute layout is
    /// generated.
    pub fn load_obj(
        device: &Device,
        pool: &CommandPool,
        path: impl AsRef<Path>,
    ) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|err| ModelError::Io {
            path: path.to_path_buf(),
            err,
        })?;
        let mut reader = std::io::BufReader::new(file);

        let (vertices, indices) = parse_obj(&mut reader)?;
        debug!("loaded {:?}: {} vertices", path, vertices.len());

        let mut model = Self::new();
        model.vertex_buffer = Some(Arc::new(Buffer::create_vertex(
            device,
            pool,
            bytemuck::cast_slice(&vertices),
        )?));
        model.index_buffer = Some(Arc::new(Buffer::create_index(
            device,
            pool,
            bytemuck::cast_slice(&indices),
        )?));
        model.vertices = VertexData::Static(vertices);
        model.index_data = indices;
        Ok(model)
    }

    /// Loads the binary mesh format: a vertex block followed by named index
    /// chunks read until end of file, each becoming a submesh with its own
    /// index buffer.
    pub fn load_static_mesh(
        device: &Device,
        pool: &CommandPool,
        path: impl AsRef<Path>,
    ) -> Result<Self, ModelError> {
        let bytes = read_file(path.as_ref())?;
        let (vertices, chunks) = parse_binary_mesh::<MeshVertex>(&bytes)?;
        debug!(
            "loaded {:?}: {} vertices, {} submeshes",
            path.as_ref(),
            vertices.len(),
            chunks.len()
        );

        let mut model = Self::new();
        model.vertex_buffer = Some(Arc::new(Buffer::create_vertex(
            device,
            pool,
            bytemuck::cast_slice(&vertices),
        )?));
        model.vertices = VertexData::Mesh(vertices);
        model.attach_chunks(device, pool, chunks)?;
        Ok(model)
    }

    /// Loads the binary component format (the tangent-less record).
    pub fn load_component_mesh(
        device: &Device,
        pool: &CommandPool,
        path: impl AsRef<Path>,
    ) -> Result<Self, ModelError> {
        let bytes = read_file(path.as_ref())?;
        let (vertices, chunks) = parse_binary_mesh::<ComponentVertex>(&bytes)?;
        debug!(
            "loaded {:?}: {} vertices, {} submeshes",
            path.as_ref(),
            vertices.len(),
            chunks.len()
        );

        let mut model = Self::new();
        model.vertex_buffer = Some(Arc::new(Buffer::create_vertex(
            device,
            pool,
            bytemuck::cast_slice(&vertices),
        )?));
        model.vertices = VertexData::Component(vertices);
        model.attach_chunks(device, pool, chunks)?;
        Ok(model)
    }

    fn attach_chunks(
        &mut self,
        device: &Device,
        pool: &CommandPool,
        chunks: Vec<(String, Vec<u32>)>,
    ) -> Result<(), ModelError> {
        for (name, indices) in chunks {
            self.index_data.extend_from_slice(&indices);
            let index_buffer = Arc::new(Buffer::create_index(
                device,
                pool,
                bytemuck::cast_slice(&indices),
            )?);
            self.submeshes.push(SubMesh {
                name,
                index_count: indices.len() as u32,
                index_buffer,
            });
        }
        Ok(())
    }

    /// Binding description for the loaded vertex record.
    pub fn vertex_input_bindings(
        &self,
    ) -> Result<Vec<vk::VertexInputBindingDescription>, ModelError> {
        let stride = match &self.vertices {
            VertexData::Static(_) => std::mem::size_of::<StaticVertex>(),
            VertexData::Mesh(_) => std::mem::size_of::<MeshVertex>(),
            VertexData::Component(_) => std::mem::size_of::<ComponentVertex>(),
            VertexData::None => return Err(ModelError::NoVertexData),
        };

        Ok(vec![vk::VertexInputBindingDescription {
            binding: 0,
            stride: stride as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }])
    }

    /// Attribute descriptions for the loaded vertex record.
    pub fn vertex_input_attributes(
        &self,
    ) -> Result<Vec<vk::VertexInputAttributeDescription>, ModelError> {
        let attribute = |location: u32, format: vk::Format, offset: usize| {
            vk::VertexInputAttributeDescription {
                location,
                binding: 0,
                format,
                offset: offset as u32,
            }
        };

        match &self.vertices {
            VertexData::Static(_) => Ok(vec![
                attribute(0, vk::Format::R32G32B32_SFLOAT, offset_of!(StaticVertex, position)),
                attribute(1, vk::Format::R32G32B32_SFLOAT, offset_of!(StaticVertex, color)),
                attribute(2, vk::Format::R32G32_SFLOAT, offset_of!(StaticVertex, uv)),
                attribute(3, vk::Format::R32G32B32_SFLOAT, offset_of!(StaticVertex, normal)),
                attribute(4, vk::Format::R32G32B32_SFLOAT, offset_of!(StaticVertex, tangent)),
            ]),
            VertexData::Mesh(_) => Ok(vec![
                attribute(0, vk::Format::R32G32B32A32_SFLOAT, offset_of!(MeshVertex, position)),
                attribute(1, vk::Format::R32G32B32A32_SFLOAT, offset_of!(MeshVertex, texcoord)),
                attribute(2, vk::Format::R32G32B32A32_SFLOAT, offset_of!(MeshVertex, normal)),
                attribute(3, vk::Format::R32G32B32A32_SFLOAT, offset_of!(MeshVertex, tangent)),
            ]),
            VertexData::Component(_) => Ok(vec![
                attribute(0, vk::Format::R32G32B32A32_SFLOAT, offset_of!(ComponentVertex, position)),
                attribute(1, vk::Format::R32G32B32A32_SFLOAT, offset_of!(ComponentVertex, texcoord)),
                attribute(2, vk::Format::R32G32B32A32_SFLOAT, offset_of!(ComponentVertex, normal)),
            ]),
            VertexData::None => Err(ModelError::NoVertexData),
        }
    }

    /// Draws the model: one indexed draw per submesh when submeshes exist,
    /// otherwise a single draw over the global index buffer.
    pub fn draw(&self, cmd: &CommandBuffer) -> Result<(), ModelError> {
        let vertex_buffer = self.vertex_buffer.as_ref().ok_or(ModelError::NoVertexData)?;
        cmd.bind_vertex_buffer(vertex_buffer);

        if !self.submeshes.is_empty() {
            for submesh in &self.submeshes {
                cmd.bind_index_buffer(&submesh.index_buffer);
                cmd.draw_indexed(submesh.index_count);
            }
            return Ok(());
        }

        let index_buffer = self.index_buffer.as_ref().ok_or(ModelError::NoIndexData)?;
        cmd.bind_index_buffer(index_buffer);
        cmd.draw_indexed(self.index_data.len() as u32);
        Ok(())
    }

    pub fn submeshes(&self) -> &[SubMesh] {
        &self.submeshes
    }

    pub fn set_model_matrix(&mut self, matrix: Mat4) {
        self.model_matrix = matrix;
    }

    pub fn model_matrix(&self) -> Mat4 {
        self.model_matrix
    }

    pub fn object_uniform(&self) -> ObjectUniform {
        ObjectUniform {
            model: self.model_matrix.to_cols_array_2d(),
        }
    }
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ModelError> {
    std::fs::read(path).map_err(|err| ModelError::Io {
        path: path.to_path_buf(),
        err,
    })
}

/// Parses a triangulated OBJ stream into duplicated-per-index vertices with
/// sequential indices.
pub fn parse_obj(
    reader: &mut impl BufRead,
) -> Result<(Vec<StaticVertex>, Vec<u32>), ModelError> {
    let (models, _) = tobj::load_obj_buf(
        reader,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
        // Material libraries are irrelevant here.
        |_| Ok((Vec::new(), Default::default())),
    )?;

    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    for model in &models {
        let mesh = &model.mesh;
        for &index in &mesh.indices {
            let index = index as usize;
            let position = [
                mesh.positions[3 * index],
                mesh.positions[3 * index + 1],
                mesh.positions[3 * index + 2],
            ];

            let uv = if mesh.texcoords.is_empty() {
                [0.0, 0.0]
            } else {
                // OBJ uses a bottom-left UV origin.
                [mesh.texcoords[2 * index], 1.0 - mesh.texcoords[2 * index + 1]]
            };

            indices.push(vertices.len() as u32);
            vertices.push(StaticVertex {
                position,
                color: [1.0, 1.0, 1.0],
                uv,
                normal: [0.0, 0.0, 0.0],
                tangent: [0.0, 0.0, 0.0],
            });
        }
    }

    Ok((vertices, indices))
}

/// Parses the binary mesh layout:
/// `[i32 vertex_count][vertex records][repeat: i32 name_len, name bytes,
/// i32 index_count, u32 indices]` until end of input. A trailing partial
/// chunk ends parsing, matching a writer that stopped mid-chunk.
pub fn parse_binary_mesh<V: Pod>(
    bytes: &[u8],
) -> Result<(Vec<V>, Vec<(String, Vec<u32>)>), ModelError> {
    let mut reader = ByteReader::new(bytes);

    let vertex_count = reader.read_i32().ok_or(ModelError::Truncated {
        what: "vertex count",
    })?;
    let vertex_bytes = reader
        .read_bytes(vertex_count as usize * std::mem::size_of::<V>())
        .ok_or(ModelError::Truncated {
            what: "vertex data",
        })?;
    let vertices: Vec<V> = bytemuck::pod_collect_to_vec(vertex_bytes);

    let mut chunks = Vec::new();
    loop {
        let Some(name_len) = reader.read_i32() else {
            break;
        };
        let Some(name_bytes) = reader.read_bytes(name_len as usize) else {
            break;
        };
        let Some(index_count) = reader.read_i32() else {
            break;
        };
        let Some(index_bytes) = reader.read_bytes(index_count as usize * 4) else {
            break;
        };

        let name = String::from_utf8_lossy(name_bytes).into_owned();
        let indices: Vec<u32> = bytemuck::pod_collect_to_vec(index_bytes);
        chunks.push((name, indices));
    }

    Ok((vertices, chunks))
}

struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_i32(&mut self) -> Option<i32> {
        let bytes = self.read_bytes(4)?;
        Some(i32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        if end > self.data.len() {
            return None;
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Some(bytes)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{
        parse_binary_mesh, parse_obj, ComponentVertex, MeshVertex, Model, ModelError,
        StaticVertex, VertexData,
    };

    fn mesh_vertex(seed: f32) -> MeshVertex {
        MeshVertex {
            position: [seed, seed + 1.0, seed + 2.0, 1.0],
            texcoord: [0.0; 4],
            normal: [0.0, 1.0, 0.0, 0.0],
            tangent: [1.0, 0.0, 0.0, 0.0],
        }
    }

    fn encode_mesh(vertices: &[MeshVertex], chunks: &[(&str, &[u32])]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(vertices.len() as i32).to_le_bytes());
        bytes.extend_from_slice(bytemuck::cast_slice(vertices));
        for (name, indices) in chunks {
            bytes.extend_from_slice(&(name.len() as i32).to_le_bytes());
            bytes.extend_from_slice(name.as_bytes());
            bytes.extend_from_slice(&(indices.len() as i32).to_le_bytes());
            bytes.extend_from_slice(bytemuck::cast_slice(indices));
        }
        bytes
    }

    #[test]
    fn binary_mesh_roundtrip() {
        let vertices = vec![mesh_vertex(0.0), mesh_vertex(10.0), mesh_vertex(20.0)];
        let bytes = encode_mesh(
            &vertices,
            &[("hull", &[0, 1, 2]), ("visor", &[2, 1, 0, 0, 1, 2])],
        );

        let (parsed, chunks) = parse_binary_mesh::<MeshVertex>(&bytes).unwrap();
        assert_eq!(parsed, vertices);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].0, "hull");
        assert_eq!(chunks[0].1, vec![0, 1, 2]);
        assert_eq!(chunks[1].0, "visor");
        assert_eq!(chunks[1].1.len(), 6);
    }

    #[test]
    fn binary_mesh_stops_at_partial_trailing_chunk() {
        let vertices = vec![mesh_vertex(0.0)];
        let mut bytes = encode_mesh(&vertices, &[("hull", &[0, 0, 0])]);
        // A chunk header with no body.
        bytes.extend_from_slice(&8i32.to_le_bytes());
        bytes.extend_from_slice(b"tr");

        let (_, chunks) = parse_binary_mesh::<MeshVertex>(&bytes).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn binary_mesh_rejects_truncated_vertex_block() {
        let bytes = 100i32.to_le_bytes().to_vec();
        let err = parse_binary_mesh::<ComponentVertex>(&bytes).unwrap_err();
        assert!(matches!(err, ModelError::Truncated { .. }));
    }

    #[test]
    fn obj_parse_duplicates_vertices_with_sequential_indices() {
        let obj = "\
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 0.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 0.0 1.0
f 1/1 2/2 3/3
";
        let (vertices, indices) = parse_obj(&mut Cursor::new(obj)).unwrap();
        assert_eq!(vertices.len(), 3);
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(vertices[1].position, [1.0, 0.0, 0.0]);
        // The v coordinate is flipped into a top-left origin.
        assert_eq!(vertices[2].uv, [0.0, 0.0]);
        assert_eq!(vertices[0].uv, [0.0, 1.0]);
        assert_eq!(vertices[0].color, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn vertex_layout_matches_record() {
        let mut model = Model::new();
        assert!(matches!(
            model.vertex_input_bindings(),
            Err(ModelError::NoVertexData)
        ));

        model.vertices = VertexData::Static(vec![StaticVertex {
            position: [0.0; 3],
            color: [0.0; 3],
            uv: [0.0; 2],
            normal: [0.0; 3],
            tangent: [0.0; 3],
        }]);

        let bindings = model.vertex_input_bindings().unwrap();
        assert_eq!(bindings[0].stride, 56);

        let attributes = model.vertex_input_attributes().unwrap();
        assert_eq!(attributes.len(), 5);
        assert_eq!(attributes[1].offset, 12);
        assert_eq!(attributes[2].offset, 24);
        assert_eq!(attributes[3].offset, 32);
        assert_eq!(attributes[4].offset, 44);

        model.vertices = VertexData::Mesh(Vec::new());
        let attributes = model.vertex_input_attributes().unwrap();
        assert_eq!(attributes.len(), 4);
        assert_eq!(model.vertex_input_bindings().unwrap()[0].stride, 64);

        model.vertices = VertexData::Component(Vec::new());
        let attributes = model.vertex_input_attributes().unwrap();
        assert_eq!(attributes.len(), 3);
        assert_eq!(attributes[2].offset, 32);
    }
}
