//! Edge-byte encoding and the precomputed per-byte geometry table.
//!
//! Every tile stores its cut line in a single byte: two 4-bit perimeter
//! positions ("half-bytes") A (high nibble) and B (low nibble). Each
//! half-byte names one of 16 points on a 4x4 lattice around the tile border.
//!
//! ## Perimeter layout
//!
//! ```text
//!   12   11   10    9    8
//!    +----+----+----+----+
//!  13|                   |7
//!    +                   +
//!  14|                   |6
//!    +                   +
//!  15|                   |5
//!    +----+----+----+----+
//!    0    1    2    3    4
//! ```
//!
//! Indices walk counter-clockwise (y up) from the bottom-left corner, so
//! multiples of 4 are corners and side `s` spans `4s..=4s+4`.
//!
//! Region A of an edge byte is the polygon walked counter-clockwise from A to
//! B, inserting every corner passed, then closed back along the cut. It lies
//! on the right of the directed cut A -> B. All geometry is in tile-local
//! units where the tile covers `[0, 1]²`.

use bevy::prelude::Vec2;
use std::sync::OnceLock;

/// Number of perimeter positions around a tile.
pub const HALF_BYTE_COUNT: u8 = 16;

/// Lattice points per tile side.
pub const TILE_GRID: u8 = 4;

/// Maximum number of points in a region polygon (A, four corners, B).
pub const MAX_REGION_VERTICES: usize = 6;

/// Area below which a region is treated as empty.
pub const AREA_EPSILON: f32 = 1e-4;

/// Unit square, used for regions that cover a whole tile.
pub const FULL_TILE_VERTICES: [Vec2; 4] = [
    Vec2::new(0.0, 0.0),
    Vec2::new(1.0, 0.0),
    Vec2::new(1.0, 1.0),
    Vec2::new(0.0, 1.0),
];

/// Map a perimeter index to lattice coordinates in `0..=4`.
pub fn half_byte_to_xy(h: u8) -> (u8, u8) {
    debug_assert!(h < HALF_BYTE_COUNT, "half-byte out of range: {h}");
    let h = h % HALF_BYTE_COUNT;
    match h / TILE_GRID {
        0 => (h, 0),
        1 => (TILE_GRID, h - 4),
        2 => (12 - h, TILE_GRID),
        _ => (0, 16 - h),
    }
}

/// Inverse of [`half_byte_to_xy`] for points on the tile border.
pub fn xy_to_half_byte(x: u8, y: u8) -> u8 {
    debug_assert!(
        x <= TILE_GRID && y <= TILE_GRID && (x == 0 || y == 0 || x == TILE_GRID || y == TILE_GRID),
        "({x}, {y}) is not on the tile perimeter"
    );
    if y == 0 {
        x
    } else if x == TILE_GRID {
        4 + y
    } else if y == TILE_GRID {
        12 - x
    } else {
        (16 - y) % HALF_BYTE_COUNT
    }
}

/// Whether a perimeter index sits on a tile corner.
pub fn is_corner(h: u8) -> bool {
    h % TILE_GRID == 0
}

/// Pack two half-bytes into an edge byte (A in the high nibble).
pub fn encode_edge(a: u8, b: u8) -> u8 {
    debug_assert!(a < HALF_BYTE_COUNT && b < HALF_BYTE_COUNT);
    ((a & 0x0F) << 4) | (b & 0x0F)
}

/// Split an edge byte into `(A, B)`.
pub fn decode_edge(edge: u8) -> (u8, u8) {
    (edge >> 4, edge & 0x0F)
}

/// Edge byte describing the complementary region (A and B swapped).
pub fn invert(edge: u8) -> u8 {
    edge.rotate_left(4)
}

/// Tile-local position of a perimeter index.
pub fn half_byte_point(h: u8) -> Vec2 {
    let (x, y) = half_byte_to_xy(h);
    Vec2::new(x as f32, y as f32) / TILE_GRID as f32
}

/// Cut line endpoints (A, B) for an edge byte.
pub fn edge_line(edge: u8) -> (Vec2, Vec2) {
    table()[edge as usize].line
}

/// Polygon of region A for an edge byte. Two points or fewer means no area.
pub fn vertex_list(edge: u8) -> &'static [Vec2] {
    let entry = &table()[edge as usize];
    &entry.vertices[..entry.vertex_count as usize]
}

/// Area of region A as a fraction of the tile.
pub fn edge_area(edge: u8) -> f32 {
    table()[edge as usize].area
}

/// Number of perimeter steps owned by region A (0 when A == B).
pub fn region_a_steps(edge: u8) -> u8 {
    let (a, b) = decode_edge(edge);
    (b + HALF_BYTE_COUNT - a) % HALF_BYTE_COUNT
}

/// Precomputed geometry for one edge byte.
#[derive(Debug, Clone, Copy)]
struct EdgeGeometry {
    line: (Vec2, Vec2),
    vertices: [Vec2; MAX_REGION_VERTICES],
    vertex_count: u8,
    area: f32,
}

static EDGE_TABLE: OnceLock<Box<[EdgeGeometry; 256]>> = OnceLock::new();

/// Build the edge table. Safe to call repeatedly; later calls are no-ops.
///
/// Queries build it on first use, so calling this at startup only moves the
/// cost out of the first frame that touches terrain.
pub fn build_cache() {
    table();
}

fn table() -> &'static [EdgeGeometry; 256] {
    EDGE_TABLE.get_or_init(|| {
        let mut entries = Box::new(
            [EdgeGeometry {
                line: (Vec2::ZERO, Vec2::ZERO),
                vertices: [Vec2::ZERO; MAX_REGION_VERTICES],
                vertex_count: 0,
                area: 0.0,
            }; 256],
        );
        for (edge, entry) in entries.iter_mut().enumerate() {
            *entry = compute_geometry(edge as u8);
        }
        entries
    })
}

fn compute_geometry(edge: u8) -> EdgeGeometry {
    let (a, b) = decode_edge(edge);
    let mut vertices = [Vec2::ZERO; MAX_REGION_VERTICES];
    let mut count = 0usize;

    vertices[count] = half_byte_point(a);
    count += 1;
    if a != b {
        let mut h = a;
        loop {
            h = (h + 1) % HALF_BYTE_COUNT;
            if h == b {
                break;
            }
            if is_corner(h) {
                vertices[count] = half_byte_point(h);
                count += 1;
            }
        }
    }
    vertices[count] = half_byte_point(b);
    count += 1;

    EdgeGeometry {
        line: (half_byte_point(a), half_byte_point(b)),
        vertices,
        vertex_count: count as u8,
        area: polygon_area(&vertices[..count]).max(0.0),
    }
}

/// Signed shoelace area (positive for counter-clockwise winding).
pub fn polygon_area(points: &[Vec2]) -> f32 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..points.len() {
        let p = points[i];
        let q = points[(i + 1) % points.len()];
        sum += p.x * q.y - q.x * p.y;
    }
    sum * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_byte_bijection() {
        for h in 0..HALF_BYTE_COUNT {
            let (x, y) = half_byte_to_xy(h);
            assert_eq!(xy_to_half_byte(x, y), h, "h={h} -> ({x}, {y})");
        }
    }

    #[test]
    fn test_corners() {
        assert_eq!(half_byte_to_xy(0), (0, 0));
        assert_eq!(half_byte_to_xy(4), (4, 0));
        assert_eq!(half_byte_to_xy(8), (4, 4));
        assert_eq!(half_byte_to_xy(12), (0, 4));
        for h in 0..HALF_BYTE_COUNT {
            let (x, y) = half_byte_to_xy(h);
            let on_corner = (x == 0 || x == 4) && (y == 0 || y == 4);
            assert_eq!(is_corner(h), on_corner);
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        for a in 0..HALF_BYTE_COUNT {
            for b in 0..HALF_BYTE_COUNT {
                assert_eq!(decode_edge(encode_edge(a, b)), (a, b));
            }
        }
    }

    #[test]
    fn test_invert_is_involution() {
        for e in 0..=255u8 {
            assert_eq!(invert(invert(e)), e);
            let (a, b) = decode_edge(e);
            assert_eq!(decode_edge(invert(e)), (b, a));
        }
    }

    #[test]
    fn test_area_conservation() {
        for e in 0..=255u8 {
            let (a, b) = decode_edge(e);
            if a == b {
                // A == B is the full/clear sentinel: region A is empty both ways.
                assert!(edge_area(e) < AREA_EPSILON);
                continue;
            }
            let total = edge_area(e) + edge_area(invert(e));
            assert!((total - 1.0).abs() < 1e-5, "edge {e:#04x}: total area {total}");
        }
    }

    #[test]
    fn test_vertex_list_bounds() {
        for e in 0..=255u8 {
            let verts = vertex_list(e);
            assert!(verts.len() >= 2 && verts.len() <= MAX_REGION_VERTICES);
            for v in verts {
                assert!(v.x >= 0.0 && v.x <= 1.0 && v.y >= 0.0 && v.y <= 1.0);
            }
        }
    }

    #[test]
    fn test_degenerate_corner_has_no_area() {
        for corner in [0u8, 4, 8, 12] {
            let e = encode_edge(corner, corner);
            assert_eq!(vertex_list(e).len(), 2);
            assert_eq!(edge_area(e), 0.0);
        }
    }

    #[test]
    fn test_diagonal_halves() {
        // Bottom-left to top-right corner: region A is the lower-right triangle.
        let e = encode_edge(0, 8);
        assert_eq!(vertex_list(e).len(), 3);
        assert!((edge_area(e) - 0.5).abs() < 1e-6);
        assert_eq!(edge_line(e), (Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0)));
    }

    #[test]
    fn test_region_a_steps() {
        assert_eq!(region_a_steps(encode_edge(0, 8)), 8);
        assert_eq!(region_a_steps(encode_edge(14, 2)), 4);
        assert_eq!(region_a_steps(encode_edge(5, 5)), 0);
    }
}
