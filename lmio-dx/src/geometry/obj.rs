//! Wavefront OBJ decoding
//!
//! Handles `v`, `vt` and `f` records; polygons are fan-triangulated. Texture
//! coordinates are re-indexed per vertex, taking the first `vt` a vertex is
//! referenced with.

use super::Geometry;
use lmio_common::{Error, Result};

pub fn parse_obj(text: &str) -> Result<Geometry> {
    let mut vertices: Vec<[f32; 3]> = Vec::new();
    let mut tex_coords: Vec<[f32; 2]> = Vec::new();
    let mut vertex_uv: Vec<Option<usize>> = Vec::new();
    let mut faces: Vec<[u32; 3]> = Vec::new();

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        let mut parts = line.split_whitespace();
        let bad = |what: &str| Error::Parse(format!("OBJ line {}: {}", line_no + 1, what));

        match parts.next() {
            Some("v") => {
                let c = parse_floats::<3>(parts).ok_or_else(|| bad("bad vertex"))?;
                vertices.push(c);
                vertex_uv.push(None);
            }
            Some("vt") => {
                let c = parse_floats::<2>(parts).ok_or_else(|| bad("bad texture coordinate"))?;
                tex_coords.push(c);
            }
            Some("f") => {
                let corners = parts
                    .map(|token| parse_corner(token, vertices.len(), tex_coords.len()))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| bad("bad face index"))?;

                if corners.len() < 3 {
                    return Err(bad("face with fewer than 3 vertices"));
                }

                for &(v, vt) in &corners {
                    if let (Some(vt), slot @ None) = (vt, &mut vertex_uv[v]) {
                        *slot = Some(vt);
                    }
                }

                for i in 1..corners.len() - 1 {
                    faces.push([
                        corners[0].0 as u32,
                        corners[i].0 as u32,
                        corners[i + 1].0 as u32,
                    ]);
                }
            }
            _ => {}
        }
    }

    let uvs = if vertex_uv.iter().any(Option::is_some) {
        vertex_uv
            .iter()
            .map(|vt| vt.map(|i| tex_coords[i]).unwrap_or([0.0, 0.0]))
            .collect()
    } else {
        Vec::new()
    };

    Ok(Geometry {
        vertices,
        faces,
        uvs,
    })
}

fn parse_floats<'a, const N: usize>(parts: impl Iterator<Item = &'a str>) -> Option<[f32; N]> {
    let mut out = [0.0f32; N];
    let mut parts = parts;
    for slot in out.iter_mut() {
        *slot = parts.next()?.parse().ok()?;
    }
    Some(out)
}

/// Resolve an OBJ index (1-based, negative = relative to the end) to 0-based
fn resolve_index(raw: &str, len: usize) -> Option<usize> {
    let idx: i64 = raw.parse().ok()?;
    let resolved = match idx {
        i if i > 0 => i - 1,
        i if i < 0 => len as i64 + i,
        _ => return None,
    };
    (0..len as i64).contains(&resolved).then_some(resolved as usize)
}

/// `v`, `v/vt`, `v//vn` or `v/vt/vn`
fn parse_corner(token: &str, n_vertices: usize, n_tex: usize) -> Option<(usize, Option<usize>)> {
    let mut fields = token.split('/');
    let v = resolve_index(fields.next()?, n_vertices)?;
    let vt = match fields.next() {
        Some("") | None => None,
        Some(raw) => Some(resolve_index(raw, n_tex)?),
    };
    Some((v, vt))
}
