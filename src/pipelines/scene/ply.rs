// SPDX-License-Identifier: GPL-3.0-only

//! PLY point cloud reading and writing
//!
//! Writes `binary_little_endian` files with `x y z`, optional `nx ny nz`,
//! optional `red green blue` and optional `s t` vertex properties. Reads
//! ASCII and binary little-endian files; only the vertex element is kept.

use super::PointSet;
use crate::errors::{CaptureError, CaptureResult};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Write a point set as binary little-endian PLY
pub fn write_ply<W: Write>(mut out: W, points: &PointSet) -> CaptureResult<()> {
    let n = points.len();
    let normals = points.normals.as_ref().filter(|v| v.len() == n);
    let colors = points.colors.as_ref().filter(|v| v.len() == n);
    let uvs = points.uvs.as_ref().filter(|v| v.len() == n);

    let mut header = String::new();
    header.push_str("ply\nformat binary_little_endian 1.0\ncomment depthcap\n");
    header.push_str(&format!("element vertex {}\n", n));
    header.push_str("property float x\nproperty float y\nproperty float z\n");
    if normals.is_some() {
        header.push_str("property float nx\nproperty float ny\nproperty float nz\n");
    }
    if colors.is_some() {
        header.push_str("property uchar red\nproperty uchar green\nproperty uchar blue\n");
    }
    if uvs.is_some() {
        header.push_str("property float s\nproperty float t\n");
    }
    header.push_str("end_header\n");
    out.write_all(header.as_bytes())?;

    let mut record = Vec::with_capacity(32);
    for i in 0..n {
        record.clear();
        for c in points.positions[i] {
            record.extend_from_slice(&c.to_le_bytes());
        }
        if let Some(normals) = normals {
            for c in normals[i] {
                record.extend_from_slice(&c.to_le_bytes());
            }
        }
        if let Some(colors) = colors {
            record.extend_from_slice(&colors[i]);
        }
        if let Some(uvs) = uvs {
            for c in uvs[i] {
                record.extend_from_slice(&c.to_le_bytes());
            }
        }
        out.write_all(&record)?;
    }
    out.flush()?;
    Ok(())
}

/// Write a point set to a PLY file
pub fn write_ply_file(path: &Path, points: &PointSet) -> CaptureResult<()> {
    let file = File::create(path)
        .map_err(|e| CaptureError::Io(format!("{}: {}", path.display(), e)))?;
    write_ply(BufWriter::new(file), points)?;
    debug!(path = %path.display(), points = points.len(), "Wrote PLY");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    BinaryLe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "char" | "int8" => Scalar::I8,
            "uchar" | "uint8" => Scalar::U8,
            "short" | "int16" => Scalar::I16,
            "ushort" | "uint16" => Scalar::U16,
            "int" | "int32" => Scalar::I32,
            "uint" | "uint32" => Scalar::U32,
            "float" | "float32" => Scalar::F32,
            "double" | "float64" => Scalar::F64,
            _ => return None,
        })
    }

    fn size(&self) -> usize {
        match self {
            Scalar::I8 | Scalar::U8 => 1,
            Scalar::I16 | Scalar::U16 => 2,
            Scalar::I32 | Scalar::U32 | Scalar::F32 => 4,
            Scalar::F64 => 8,
        }
    }

    fn read_le(&self, b: &[u8]) -> f64 {
        match self {
            Scalar::I8 => b[0] as i8 as f64,
            Scalar::U8 => b[0] as f64,
            Scalar::I16 => i16::from_le_bytes([b[0], b[1]]) as f64,
            Scalar::U16 => u16::from_le_bytes([b[0], b[1]]) as f64,
            Scalar::I32 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            Scalar::U32 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            Scalar::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64,
            Scalar::F64 => f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]),
        }
    }
}

/// Vertex attribute a property maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Position(usize),
    Normal(usize),
    Color(usize),
    Uv(usize),
    Ignored,
}

impl Slot {
    fn from_name(name: &str) -> Self {
        match name {
            "x" => Slot::Position(0),
            "y" => Slot::Position(1),
            "z" => Slot::Position(2),
            "nx" => Slot::Normal(0),
            "ny" => Slot::Normal(1),
            "nz" => Slot::Normal(2),
            "red" | "r" | "diffuse_red" => Slot::Color(0),
            "green" | "g" | "diffuse_green" => Slot::Color(1),
            "blue" | "b" | "diffuse_blue" => Slot::Color(2),
            "s" | "u" | "texture_u" => Slot::Uv(0),
            "t" | "v" | "texture_v" => Slot::Uv(1),
            _ => Slot::Ignored,
        }
    }
}

#[derive(Debug)]
struct Header {
    encoding: Encoding,
    vertex_count: usize,
    /// Lines (ASCII) of elements stored before the vertex element
    skip_lines: usize,
    properties: Vec<(Scalar, Slot)>,
}

fn format_err(msg: impl Into<String>) -> CaptureError {
    CaptureError::Format(format!("PLY: {}", msg.into()))
}

fn read_header<R: BufRead>(reader: &mut R) -> CaptureResult<Header> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim_end() != "ply" {
        return Err(format_err("missing magic"));
    }

    let mut encoding = None;
    let mut vertex_count = None;
    let mut skip_lines = 0usize;
    let mut in_vertex = false;
    let mut properties = Vec::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(format_err("unterminated header"));
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["end_header"] => break,
            ["format", "ascii", _] => encoding = Some(Encoding::Ascii),
            ["format", "binary_little_endian", _] => encoding = Some(Encoding::BinaryLe),
            ["format", other, _] => return Err(format_err(format!("unsupported format {}", other))),
            ["comment", ..] | ["obj_info", ..] => {}
            ["element", name, count] => {
                let count: usize = count
                    .parse()
                    .map_err(|_| format_err(format!("bad element count {}", count)))?;
                in_vertex = *name == "vertex";
                if in_vertex {
                    vertex_count = Some(count);
                } else if vertex_count.is_none() {
                    skip_lines += count;
                }
            }
            ["property", "list", ..] => {
                if in_vertex {
                    return Err(format_err("list properties on vertices are not supported"));
                }
                if vertex_count.is_none() && encoding == Some(Encoding::BinaryLe) {
                    return Err(format_err("binary list elements before vertices"));
                }
            }
            ["property", ty, name] => {
                if in_vertex {
                    let scalar = Scalar::parse(ty)
                        .ok_or_else(|| format_err(format!("unknown property type {}", ty)))?;
                    properties.push((scalar, Slot::from_name(name)));
                } else if vertex_count.is_none() && encoding == Some(Encoding::BinaryLe) {
                    return Err(format_err("binary elements before vertices"));
                }
            }
            [] => {}
            _ => return Err(format_err(format!("unexpected header line {:?}", line.trim_end()))),
        }
    }

    let encoding = encoding.ok_or_else(|| format_err("missing format line"))?;
    let vertex_count = vertex_count.ok_or_else(|| format_err("no vertex element"))?;
    if !(0..3).all(|axis| properties.iter().any(|(_, s)| *s == Slot::Position(axis))) {
        return Err(format_err("vertex element lacks x/y/z"));
    }
    Ok(Header {
        encoding,
        vertex_count,
        skip_lines,
        properties,
    })
}

/// Vertices reserved up front; the header count is not trusted beyond this
const PREALLOCATED_VERTICES: usize = 1 << 16;

/// Builds the point set while properties are decoded
struct Assembler {
    points: PointSet,
    has_normals: bool,
    has_colors: bool,
    has_uvs: bool,
}

impl Assembler {
    fn new(header: &Header) -> Self {
        let has = |f: fn(&Slot) -> bool| header.properties.iter().any(|(_, s)| f(s));
        let has_normals = has(|s| matches!(s, Slot::Normal(_)));
        let has_colors = has(|s| matches!(s, Slot::Color(_)));
        let has_uvs = has(|s| matches!(s, Slot::Uv(_)));
        let n = header.vertex_count.min(PREALLOCATED_VERTICES);
        Self {
            points: PointSet {
                positions: Vec::with_capacity(n),
                colors: has_colors.then(|| Vec::with_capacity(n)),
                uvs: has_uvs.then(|| Vec::with_capacity(n)),
                normals: has_normals.then(|| Vec::with_capacity(n)),
            },
            has_normals,
            has_colors,
            has_uvs,
        }
    }

    fn push(&mut self, values: impl Iterator<Item = (Slot, f64)>) {
        let mut p = [0.0f32; 3];
        let mut n = [0.0f32; 3];
        let mut c = [0u8; 3];
        let mut uv = [0.0f32; 2];
        for (slot, v) in values {
            match slot {
                Slot::Position(i) => p[i] = v as f32,
                Slot::Normal(i) => n[i] = v as f32,
                Slot::Color(i) => c[i] = v.clamp(0.0, 255.0) as u8,
                Slot::Uv(i) => uv[i] = v as f32,
                Slot::Ignored => {}
            }
        }
        self.points.positions.push(p);
        if self.has_normals
            && let Some(normals) = &mut self.points.normals
        {
            normals.push(n);
        }
        if self.has_colors
            && let Some(colors) = &mut self.points.colors
        {
            colors.push(c);
        }
        if self.has_uvs
            && let Some(uvs) = &mut self.points.uvs
        {
            uvs.push(uv);
        }
    }
}

/// Read a PLY point cloud
pub fn read_ply<R: BufRead>(mut reader: R) -> CaptureResult<PointSet> {
    let header = read_header(&mut reader)?;
    let mut assembler = Assembler::new(&header);

    match header.encoding {
        Encoding::Ascii => {
            let mut lines = reader.lines();
            for _ in 0..header.skip_lines {
                lines
                    .next()
                    .ok_or_else(|| format_err("truncated element data"))??;
            }
            for i in 0..header.vertex_count {
                let line = lines
                    .next()
                    .ok_or_else(|| format_err(format!("expected {} vertices, got {}", header.vertex_count, i)))??;
                let values: Vec<f64> = line
                    .split_whitespace()
                    .map(|t| t.parse::<f64>())
                    .collect::<Result<_, _>>()
                    .map_err(|_| format_err(format!("bad vertex line {}", i)))?;
                if values.len() < header.properties.len() {
                    return Err(format_err(format!("short vertex line {}", i)));
                }
                assembler.push(header.properties.iter().zip(values).map(|((_, s), v)| (*s, v)));
            }
        }
        Encoding::BinaryLe => {
            let stride: usize = header.properties.iter().map(|(t, _)| t.size()).sum();
            let mut record = vec![0u8; stride];
            for i in 0..header.vertex_count {
                reader.read_exact(&mut record).map_err(|_| {
                    format_err(format!("expected {} vertices, got {}", header.vertex_count, i))
                })?;
                let mut offset = 0;
                assembler.push(header.properties.iter().map(|(ty, slot)| {
                    let v = ty.read_le(&record[offset..offset + ty.size()]);
                    offset += ty.size();
                    (*slot, v)
                }));
            }
        }
    }

    Ok(assembler.points)
}

/// Read a PLY point cloud from memory
pub fn read_ply_bytes(bytes: &[u8]) -> CaptureResult<PointSet> {
    read_ply(BufReader::new(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_points() -> PointSet {
        PointSet {
            positions: vec![[1.0, 2.0, 3.0], [-4.5, 0.0, 1200.25]],
            colors: Some(vec![[255, 0, 10], [1, 2, 3]]),
            uvs: Some(vec![[0.25, 0.5], [1.0, 0.0]]),
            normals: Some(vec![[0.0, 0.0, -1.0], [0.0, 1.0, 0.0]]),
        }
    }

    #[test]
    fn test_binary_write_then_read() {
        let points = sample_points();
        let mut bytes = Vec::new();
        write_ply(&mut bytes, &points).unwrap();
        assert!(bytes.starts_with(b"ply\nformat binary_little_endian 1.0\n"));
        assert_eq!(read_ply_bytes(&bytes).unwrap(), points);
    }

    #[test]
    fn test_read_ascii_with_extra_properties() {
        let text = "ply\n\
            format ascii 1.0\n\
            comment made elsewhere\n\
            element vertex 2\n\
            property float x\n\
            property float y\n\
            property float z\n\
            property float intensity\n\
            property uchar red\n\
            property uchar green\n\
            property uchar blue\n\
            element face 0\n\
            property list uchar int vertex_indices\n\
            end_header\n\
            0 1 2 0.5 10 20 30\n\
            3 4 5 0.7 40 50 60\n";
        let points = read_ply_bytes(text.as_bytes()).unwrap();
        assert_eq!(points.positions, vec![[0.0, 1.0, 2.0], [3.0, 4.0, 5.0]]);
        assert_eq!(points.colors, Some(vec![[10, 20, 30], [40, 50, 60]]));
        assert!(points.normals.is_none());
    }

    #[test]
    fn test_truncated_binary_is_format_error() {
        let mut bytes = Vec::new();
        write_ply(&mut bytes, &sample_points()).unwrap();
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(read_ply_bytes(&bytes), Err(CaptureError::Format(_))));
    }

    #[test]
    fn test_huge_vertex_count_is_format_error() {
        let header = "ply\n\
            format binary_little_endian 1.0\n\
            element vertex 18446744073709551615\n\
            property float x\n\
            property float y\n\
            property float z\n\
            end_header\n";
        assert!(matches!(
            read_ply_bytes(header.as_bytes()),
            Err(CaptureError::Format(_))
        ));

        let ascii = header.replace("binary_little_endian", "ascii") + "1 2 3\n";
        assert!(matches!(
            read_ply_bytes(ascii.as_bytes()),
            Err(CaptureError::Format(_))
        ));
    }

    #[test]
    fn test_missing_magic_rejected() {
        assert!(read_ply_bytes(b"obj\n").is_err());
    }
}
