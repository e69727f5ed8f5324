//! Terrain tile value type.
//!
//! A [`Tile`] is a square split by at most one straight cut into two surface
//! regions. The cut is the edge byte described in [`crate::edge_table`];
//! `surface_a` fills region A (right of the directed cut) and `surface_b`
//! fills the rest. Surface 0 is always "clear".
//!
//! A tile is *full* when one surface covers it entirely: either both surfaces
//! are equal, or A == B so region A has no area and `surface_b` covers the
//! tile. A tile is *clear* when no non-zero surface has any area.

use bevy::prelude::Vec2;
use serde::{Deserialize, Serialize};

use crate::edge_table::{
    decode_edge, edge_area, edge_line, encode_edge, half_byte_to_xy, invert,
    region_a_steps, vertex_list, xy_to_half_byte, AREA_EPSILON, FULL_TILE_VERTICES,
    HALF_BYTE_COUNT, TILE_GRID,
};

/// Number of distinct tile sets addressable by the packed texture byte.
pub const TILE_SET_COUNT: u8 = 32;

/// Texture rotation in quarter turns (counter-clockwise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    /// Rotation for a quadrant count; values wrap modulo 4.
    pub fn from_quadrant(quadrant: u8) -> Self {
        match quadrant % 4 {
            0 => Rotation::R0,
            1 => Rotation::R90,
            2 => Rotation::R180,
            _ => Rotation::R270,
        }
    }

    pub fn quadrant(self) -> u8 {
        self as u8
    }

    /// Add `quadrants` quarter turns.
    pub fn rotated(self, quadrants: u8) -> Self {
        Self::from_quadrant(self.quadrant() + quadrants % 4)
    }

    /// Rotation seen through an x-axis mirror.
    pub fn mirrored(self) -> Self {
        Self::from_quadrant((4 - self.quadrant()) % 4)
    }
}

/// Texture selection for a tile, unpacked.
///
/// Persisted as one byte: low 5 bits tile set, bit 5 mirror, bits 6-7 rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TileTexture {
    pub tile_set: u8,
    pub rotation: Rotation,
    pub mirror: bool,
}

impl TileTexture {
    pub fn new(tile_set: u8, rotation: Rotation, mirror: bool) -> Self {
        debug_assert!(tile_set < TILE_SET_COUNT, "tile set {tile_set} out of range");
        Self {
            tile_set: tile_set.min(TILE_SET_COUNT - 1),
            rotation,
            mirror,
        }
    }

    pub fn pack(self) -> u8 {
        (self.tile_set & 0x1F) | ((self.mirror as u8) << 5) | (self.rotation.quadrant() << 6)
    }

    pub fn unpack(byte: u8) -> Self {
        Self {
            tile_set: byte & 0x1F,
            mirror: byte & 0x20 != 0,
            rotation: Rotation::from_quadrant(byte >> 6),
        }
    }
}

/// One terrain tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tile {
    /// Packed cut line (A in the high nibble, B in the low nibble).
    pub edge: u8,
    /// Surface index of region A.
    pub surface_a: u8,
    /// Surface index of region B.
    pub surface_b: u8,
    pub texture: TileTexture,
}

/// Size of a tile in the binary save format.
pub const TILE_BYTES: usize = 4;

impl Tile {
    /// A clear tile (no surface, no collision).
    pub const CLEAR: Tile = Tile {
        edge: 0,
        surface_a: 0,
        surface_b: 0,
        texture: TileTexture {
            tile_set: 0,
            rotation: Rotation::R0,
            mirror: false,
        },
    };

    /// A tile entirely covered by `surface`.
    pub fn full(surface: u8) -> Self {
        Self {
            surface_a: surface,
            surface_b: surface,
            ..Self::CLEAR
        }
    }

    /// A tile cut from perimeter point `a` to `b`.
    pub fn split(a: u8, b: u8, surface_a: u8, surface_b: u8) -> Self {
        let mut tile = Self {
            edge: encode_edge(a, b),
            surface_a,
            surface_b,
            ..Self::CLEAR
        };
        tile.normalize();
        tile
    }

    pub fn with_texture(mut self, texture: TileTexture) -> Self {
        self.texture = texture;
        self
    }

    pub fn to_bytes(self) -> [u8; TILE_BYTES] {
        [self.edge, self.surface_a, self.surface_b, self.texture.pack()]
    }

    pub fn from_bytes(bytes: [u8; TILE_BYTES]) -> Self {
        Self {
            edge: bytes[0],
            surface_a: bytes[1],
            surface_b: bytes[2],
            texture: TileTexture::unpack(bytes[3]),
        }
    }

    /// `(A, B)` perimeter indices.
    pub fn half_bytes(&self) -> (u8, u8) {
        decode_edge(self.edge)
    }

    /// Surface index of a region (0 = A, 1 = B).
    pub fn surface(&self, side: usize) -> u8 {
        if side == 0 {
            self.surface_a
        } else {
            self.surface_b
        }
    }

    pub fn set_surface(&mut self, side: usize, surface: u8) {
        if side == 0 {
            self.surface_a = surface;
        } else {
            self.surface_b = surface;
        }
    }

    /// Whether A == B, which leaves region A without area.
    pub fn has_degenerate_cut(&self) -> bool {
        let (a, b) = self.half_bytes();
        a == b
    }

    /// Whether a single surface covers the whole tile.
    pub fn is_full(&self) -> bool {
        self.surface_a == self.surface_b || self.has_degenerate_cut()
    }

    /// The covering surface of a full tile.
    pub fn full_surface(&self) -> Option<u8> {
        if self.has_degenerate_cut() {
            Some(self.surface_b)
        } else if self.surface_a == self.surface_b {
            Some(self.surface_a)
        } else {
            None
        }
    }

    /// Area of a region as a fraction of the tile.
    pub fn surface_area(&self, side: usize) -> f32 {
        let a = edge_area(self.edge);
        if side == 0 {
            a
        } else {
            1.0 - a
        }
    }

    /// Total area covered by non-clear surfaces.
    pub fn solid_area(&self) -> f32 {
        (0..2)
            .filter(|&side| self.surface(side) != 0)
            .map(|side| self.surface_area(side))
            .sum()
    }

    /// Whether any non-clear surface has area.
    pub fn has_area(&self) -> bool {
        self.solid_area() > AREA_EPSILON
    }

    pub fn is_clear(&self) -> bool {
        !self.has_area()
    }

    /// Area covered by regions painted with `surface`.
    pub fn area_of_surface(&self, surface: u8) -> f32 {
        (0..2)
            .filter(|&side| self.surface(side) == surface)
            .map(|side| self.surface_area(side))
            .sum()
    }

    /// Cut line endpoints in tile-local units.
    pub fn edge_line(&self) -> (Vec2, Vec2) {
        edge_line(self.edge)
    }

    /// Polygon of region A.
    pub fn vertex_list(&self) -> &'static [Vec2] {
        vertex_list(self.edge)
    }

    /// Polygon of a region; region B of a degenerate cut is the whole square.
    pub fn surface_vertices(&self, side: usize) -> &'static [Vec2] {
        if side == 0 {
            vertex_list(self.edge)
        } else if self.has_degenerate_cut() {
            &FULL_TILE_VERTICES
        } else {
            vertex_list(invert(self.edge))
        }
    }

    /// Region (0 = A, 1 = B) containing a tile-local point.
    pub fn region_at(&self, local: Vec2) -> usize {
        if self.has_degenerate_cut() {
            return 1;
        }
        let (a, b) = self.edge_line();
        let cut = b - a;
        let rel = local - a;
        // Region A lies on the right of A -> B.
        if cut.perp_dot(rel) < 0.0 {
            0
        } else {
            1
        }
    }

    /// Surface index at a tile-local point.
    pub fn surface_at(&self, local: Vec2) -> u8 {
        self.surface(self.region_at(local))
    }

    /// Region owning the perimeter step from `h` to `h + 1`.
    pub fn step_region(&self, h: u8) -> usize {
        let (a, _) = self.half_bytes();
        let offset = (h + HALF_BYTE_COUNT - a) % HALF_BYTE_COUNT;
        if offset < region_a_steps(self.edge) {
            0
        } else {
            1
        }
    }

    /// Whether region `which_surface` is open to `side` (0 bottom, 1 right, 2 top, 3 left).
    ///
    /// Full tiles touch every side with their covering surface. With
    /// `treat_clear_as_touching`, a clear region counts as touching all sides.
    pub fn touches_side(
        &self,
        side: u8,
        treat_clear_as_touching: bool,
        which_surface: usize,
    ) -> bool {
        debug_assert!(side < 4);
        if self.is_full() {
            return true;
        }
        if treat_clear_as_touching && self.surface(which_surface) == 0 {
            return true;
        }
        let first = side * TILE_GRID;
        (first..first + TILE_GRID).any(|h| self.step_region(h) == which_surface)
    }

    /// Whether `a`'s B endpoint meets `b`'s A endpoint when `b` sits one tile
    /// away in direction `(dx, dy)`.
    pub fn connected(a: &Tile, b: &Tile, dx: i32, dy: i32) -> bool {
        debug_assert!((-1..=1).contains(&dx) && (-1..=1).contains(&dy));
        let (_, a_end) = a.half_bytes();
        let (b_start, _) = b.half_bytes();
        let (ax, ay) = half_byte_to_xy(a_end);
        let (bx, by) = half_byte_to_xy(b_start);
        let step = TILE_GRID as i32;
        ax as i32 - dx * step == bx as i32 && ay as i32 - dy * step == by as i32
    }

    /// Rotate geometry and texture by `quadrant` quarter turns counter-clockwise.
    pub fn rotate(&mut self, quadrant: u8) {
        let q = quadrant % 4;
        let (a, b) = self.half_bytes();
        let shift = q * TILE_GRID;
        self.edge = encode_edge((a + shift) % HALF_BYTE_COUNT, (b + shift) % HALF_BYTE_COUNT);
        self.texture.rotation = self.texture.rotation.rotated(q);
    }

    /// Mirror geometry and texture across the vertical axis.
    pub fn mirror(&mut self) {
        let (a, b) = self.half_bytes();
        // Reflection flips winding, so A and B trade places to keep region A.
        self.edge = encode_edge(mirror_half_byte(b), mirror_half_byte(a));
        self.texture.mirror = !self.texture.mirror;
        self.texture.rotation = self.texture.rotation.mirrored();
    }

    /// Collapse a degenerate cut with an empty side into a full tile.
    pub fn normalize(&mut self) {
        if self.surface_a == 0 && self.surface_b == 0 {
            self.edge = 0;
            return;
        }
        if self.has_degenerate_cut() && (self.surface_a == 0 || self.surface_b == 0) {
            self.edge = 0;
            self.surface_a = self.surface_b;
        }
    }

    /// Clear both surfaces, keeping the texture selection.
    pub fn clear_surfaces(&mut self) {
        self.edge = 0;
        self.surface_a = 0;
        self.surface_b = 0;
    }

    /// Re-cut the tile along the segment `p1 -> p2` (tile-local units).
    ///
    /// The region right of the segment receives `kept`, the region left of it
    /// receives `removed`. An entry intersection sets A, an exit sets B. Two
    /// intersections on the same perimeter point leave the tile untouched.
    /// Returns whether the tile changed.
    pub fn cut_line(&mut self, p1: Vec2, p2: Vec2, kept: u8, removed: u8) -> bool {
        let before = *self;
        let hits = boundary_hits(p1, p2);
        let entry = hits.iter().filter(|hit| hit.entering).min_by(|l, r| l.t.total_cmp(&r.t));
        let exit = hits.iter().filter(|hit| !hit.entering).max_by(|l, r| l.t.total_cmp(&r.t));

        match (entry, exit) {
            (Some(entry), Some(exit)) => {
                if entry.h == exit.h {
                    return false;
                }
                self.edge = encode_edge(entry.h, exit.h);
                self.surface_a = kept;
                self.surface_b = removed;
            }
            (Some(single), None) | (None, Some(single)) => {
                if let Some(existing) = self.full_surface() {
                    // Seed a cut from the existing surface; a second pass
                    // through this tile moves the other endpoint.
                    self.edge = encode_edge(single.h, single.h);
                    self.surface_a = kept;
                    self.surface_b = existing;
                } else {
                    let (a, b) = self.half_bytes();
                    self.edge = if single.entering {
                        encode_edge(single.h, b)
                    } else {
                        encode_edge(a, single.h)
                    };
                }
            }
            (None, None) => return false,
        }

        self.normalize();
        *self != before
    }

    /// Destructively re-cut the tile along `p1 -> p2`, clearing the left side.
    ///
    /// Never adds material: a cut that would grow the remaining surface is
    /// rejected, except for seeding a cut into a full tile. Tiles holding two
    /// materials are left alone, since one cut can't keep both.
    pub fn resurface_line(&mut self, p1: Vec2, p2: Vec2) -> bool {
        if !self.is_full() && self.surface_a != 0 && self.surface_b != 0 {
            return false;
        }
        let kept = match self.full_surface() {
            Some(surface) => surface,
            None if self.surface_a != 0 => self.surface_a,
            None => self.surface_b,
        };
        if kept == 0 {
            return false;
        }

        let mut candidate = *self;
        if !candidate.cut_line(p1, p2, kept, 0) {
            return false;
        }
        let seeded = self.is_full() && candidate.solid_area() >= self.solid_area() - AREA_EPSILON;
        if candidate.solid_area() < self.solid_area() - AREA_EPSILON || seeded {
            *self = candidate;
            true
        } else {
            false
        }
    }

    /// Carve a circle (tile-local units) out of the tile.
    ///
    /// Clears the tile when its centre lies inside the circle; otherwise cuts
    /// along the tangent at distance `radius + jitter` from the centre.
    pub fn resurface_circle(&mut self, center: Vec2, radius: f32, jitter: f32) -> bool {
        let tile_center = Vec2::splat(0.5);
        let offset = tile_center - center;
        let distance = offset.length();

        if distance < radius {
            if self.is_clear() && self.edge == 0 {
                return false;
            }
            let before = *self;
            self.clear_surfaces();
            return *self != before;
        }

        let direction = if distance > f32::EPSILON {
            offset / distance
        } else {
            Vec2::Y
        };
        let tangent_point = center + direction * (radius + jitter).max(0.0);
        // Perpendicular chosen so the circle lies on the removed (left) side.
        let along = Vec2::new(-direction.y, direction.x);
        self.resurface_line(tangent_point - along * radius, tangent_point + along * radius)
    }
}

/// Perimeter index mirrored across the vertical axis.
fn mirror_half_byte(h: u8) -> u8 {
    (HALF_BYTE_COUNT + TILE_GRID - h) % HALF_BYTE_COUNT
}

#[derive(Debug, Clone, Copy)]
struct BoundaryHit {
    t: f32,
    h: u8,
    entering: bool,
}

/// Intersections of a segment with the four tile sides, quantized to the
/// nearest perimeter index. Duplicate hits (corner crossings) are merged.
fn boundary_hits(p1: Vec2, p2: Vec2) -> Vec<BoundaryHit> {
    let d = p2 - p1;
    let mut hits: Vec<BoundaryHit> = Vec::with_capacity(4);
    let grid = TILE_GRID as f32;

    let mut push = |t: f32, perimeter: f32, entering: bool| {
        let h = (perimeter.round() as i32).rem_euclid(HALF_BYTE_COUNT as i32) as u8;
        if !hits.iter().any(|hit| hit.h == h && hit.entering == entering) {
            hits.push(BoundaryHit { t, h, entering });
        }
    };

    let in_range = |v: f32| (-1e-5..=1.0 + 1e-5).contains(&v);

    if d.y.abs() > f32::EPSILON {
        // Bottom (y = 0), outward normal -y.
        let t = -p1.y / d.y;
        let x = p1.x + t * d.x;
        if in_range(t) && in_range(x) {
            push(t, x * grid, d.y > 0.0);
        }
        // Top (y = 1), outward normal +y.
        let t = (1.0 - p1.y) / d.y;
        let x = p1.x + t * d.x;
        if in_range(t) && in_range(x) {
            push(t, 2.0 * grid + (1.0 - x) * grid, d.y < 0.0);
        }
    }
    if d.x.abs() > f32::EPSILON {
        // Right (x = 1), outward normal +x.
        let t = (1.0 - p1.x) / d.x;
        let y = p1.y + t * d.y;
        if in_range(t) && in_range(y) {
            push(t, grid + y * grid, d.x < 0.0);
        }
        // Left (x = 0), outward normal -x.
        let t = -p1.x / d.x;
        let y = p1.y + t * d.y;
        if in_range(t) && in_range(y) {
            push(t, 3.0 * grid + (1.0 - y) * grid, d.x > 0.0);
        }
    }

    hits
}

/// Lattice point of a perimeter index mirrored into the neighbour at `(dx, dy)`.
pub(crate) fn neighbor_half_byte(h: u8, dx: i32, dy: i32) -> Option<u8> {
    let (x, y) = half_byte_to_xy(h);
    let step = TILE_GRID as i32;
    let nx = x as i32 - dx * step;
    let ny = y as i32 - dy * step;
    let range = 0..=step;
    if !range.contains(&nx) || !range.contains(&ny) {
        return None;
    }
    let (nx, ny) = (nx as u8, ny as u8);
    let on_border = nx == 0 || ny == 0 || nx == TILE_GRID || ny == TILE_GRID;
    on_border.then(|| xy_to_half_byte(nx, ny))
}
