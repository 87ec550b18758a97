//! STL decoding (binary and ASCII)

use super::Geometry;
use lmio_common::{Error, Result};

fn is_ascii_stl(data: &[u8]) -> bool {
    // Binary headers may also start with "solid", so require a facet keyword too
    if !data.starts_with(b"solid") {
        return false;
    }
    let check_len = data.len().min(1024);
    data[..check_len].windows(5).any(|w| w == b"facet")
}

pub fn parse_stl(data: &[u8]) -> Result<Geometry> {
    let triangles = if is_ascii_stl(data) {
        parse_ascii(data)?
    } else {
        parse_binary(data)?
    };

    let mut geometry = Geometry::default();
    for (i, tri) in triangles.into_iter().enumerate() {
        geometry.vertices.extend_from_slice(&tri);
        let base = (i * 3) as u32;
        geometry.faces.push([base, base + 1, base + 2]);
    }
    Ok(geometry)
}

fn parse_binary(data: &[u8]) -> Result<Vec<[[f32; 3]; 3]>> {
    if data.len() < 84 {
        return Err(Error::Parse("Binary STL too short".to_string()));
    }

    let count = u32::from_le_bytes([data[80], data[81], data[82], data[83]]) as usize;

    // 12 bytes normal + 36 bytes vertices + 2 bytes attribute per triangle
    let expected = 84 + count * 50;
    if data.len() < expected {
        return Err(Error::Parse(format!(
            "Binary STL truncated: {} triangles need {} bytes, got {}",
            count,
            expected,
            data.len()
        )));
    }

    let read_f32 = |at: usize| f32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);

    let triangles = (0..count)
        .map(|t| {
            let start = 84 + t * 50 + 12;
            let mut tri = [[0.0f32; 3]; 3];
            for (v, vertex) in tri.iter_mut().enumerate() {
                for (c, coord) in vertex.iter_mut().enumerate() {
                    *coord = read_f32(start + v * 12 + c * 4);
                }
            }
            tri
        })
        .collect();

    Ok(triangles)
}

fn parse_ascii(data: &[u8]) -> Result<Vec<[[f32; 3]; 3]>> {
    let text = std::str::from_utf8(data)
        .map_err(|_| Error::Parse("Invalid UTF-8 in ASCII STL".to_string()))?;

    let mut triangles = Vec::new();
    let mut pending: Vec<[f32; 3]> = Vec::with_capacity(3);

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("vertex") else {
            continue;
        };

        let coords: Vec<f32> = rest
            .split_whitespace()
            .map(str::parse)
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| Error::Parse(format!("Bad vertex on line {}", line_no + 1)))?;

        match coords.as_slice() {
            [x, y, z] => pending.push([*x, *y, *z]),
            _ => return Err(Error::Parse(format!("Bad vertex on line {}", line_no + 1))),
        }

        if pending.len() == 3 {
            triangles.push([pending[0], pending[1], pending[2]]);
            pending.clear();
        }
    }

    Ok(triangles)
}
