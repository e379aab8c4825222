//! Wavefront OBJ loading.
//!
//! Every shape in the file becomes one [`MeshData`]. Polygons are
//! triangulated and each position/normal/texcoord combination gets a single
//! index, so the result can be uploaded as-is. Materials are ignored.

use crate::error::{Error, Result};
use crate::mesh::MeshData;
use glam::Vec3;
use std::io::BufRead;
use std::path::Path;

fn load_options() -> tobj::LoadOptions {
    tobj::LoadOptions {
        single_index: true,
        triangulate: true,
        ignore_points: true,
        ignore_lines: true,
        ..Default::default()
    }
}

impl MeshData {
    /// Load one mesh per shape from an OBJ file.
    pub fn load_obj(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let (models, _materials) = tobj::load_obj(path, &load_options())
            .map_err(|e| Error::ObjLoad(format!("{}: {e}", path.display())))?;
        meshes_from_models(models)
    }

    /// Parse one mesh per shape from OBJ text.
    ///
    /// `mtllib` statements are not followed.
    pub fn parse_obj(reader: &mut impl BufRead) -> Result<Vec<Self>> {
        let (models, _materials) = tobj::load_obj_buf(reader, &load_options(), |_| {
            Err(tobj::LoadError::OpenFileFailed)
        })
        .map_err(|e| Error::ObjLoad(e.to_string()))?;
        meshes_from_models(models)
    }
}

fn meshes_from_models(models: Vec<tobj::Model>) -> Result<Vec<MeshData>> {
    let meshes = models
        .into_iter()
        // Shapes made only of points or lines have no triangles left
        .filter(|model| !model.mesh.indices.is_empty())
        .map(|model| {
            let positions = model
                .mesh
                .positions
                .chunks_exact(3)
                .map(|p| Vec3::new(p[0], p[1], p[2]))
                .collect();
            MeshData::new(positions, model.mesh.indices)
                .map_err(|e| Error::ObjLoad(format!("shape {:?}: {e}", model.name)))
        })
        .collect::<Result<Vec<_>>>()?;

    if meshes.is_empty() {
        return Err(Error::ObjLoad("no triangles in any shape".to_string()));
    }
    Ok(meshes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TWO_SHAPES: &str = "\
# unit quad and a lone triangle
o quad
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
f 1 2 3 4

o tri
v 0 0 1
v 1 0 1
v 0 1 1
f 5 6 7
";

    #[test]
    fn one_mesh_per_shape_triangulated() {
        let meshes = MeshData::parse_obj(&mut Cursor::new(TWO_SHAPES)).unwrap();
        assert_eq!(meshes.len(), 2);

        let quad = &meshes[0];
        assert_eq!(quad.vertex_count(), 4);
        assert_eq!(quad.primitive_count(), 2);
        assert!(quad.validate().is_ok());

        let tri = &meshes[1];
        assert_eq!(tri.vertex_count(), 3);
        assert_eq!(tri.primitive_count(), 1);
        // Indices are local to each shape
        assert!(tri.indices.iter().all(|&i| i < 3));
        assert!(tri.positions.iter().all(|p| p.z == 1.0));
    }

    #[test]
    fn lines_only_file_is_rejected() {
        let obj = "v 0 0 0\nv 1 0 0\nl 1 2\n";
        assert!(matches!(
            MeshData::parse_obj(&mut Cursor::new(obj)),
            Err(Error::ObjLoad(_))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            MeshData::load_obj("does/not/exist.obj"),
            Err(Error::ObjLoad(_))
        ));
    }
}
