//! Collision geometry synthesis for terrain patches.
//!
//! Shape building is a pure function of the physics-layer tiles, the surface
//! catalog and a ring of neighbouring tiles, so it can be tested without any
//! physics engine. [`crate::patch::TerrainPatch`] feeds the result to a
//! [`crate::physics::PhysicsBackend`].
//!
//! ## Polygon mode
//!
//! Tiles fully covered by a colliding surface are merged into rectangles with
//! a greedy row-major scan: extend right while the next tile matches, then
//! extend down while the whole row span of the next row matches. Every other
//! colliding region becomes one convex polygon.
//!
//! ```text
//!   ####..      AAAA..
//!   ####..  ->  AAAA..     A, B: merged rectangles
//!   ##/...      BB/...     /: partial tile, own polygon
//! ```
//!
//! ## Edge mode
//!
//! Thin segments are placed wherever colliding material meets non-colliding
//! material: along a tile's cut line, and along quarter-side steps of the
//! tile border where the neighbouring tile's region doesn't collide. Segments
//! are oriented with the solid side on their left.

use bevy::prelude::*;

use crate::config::{PhysicsMode, TerrainConfig};
use crate::edge_table::{half_byte_point, AREA_EPSILON, HALF_BYTE_COUNT, TILE_GRID};
use crate::surface::SurfaceCatalog;
use crate::tile::{neighbor_half_byte, Tile};

/// Tiles surrounding a patch on its physics layer, one ring deep.
///
/// Positions outside the world are `None` and count as non-colliding.
#[derive(Debug, Clone)]
pub struct PatchBorder {
    patch_size: i32,
    tiles: Vec<Option<Tile>>,
}

impl PatchBorder {
    /// A border with nothing around the patch.
    pub fn empty(patch_size: i32) -> Self {
        let side = (patch_size + 2).max(0) as usize;
        Self {
            patch_size,
            tiles: vec![None; side * side],
        }
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        let ps = self.patch_size;
        let range = -1..=ps;
        if !range.contains(&x) || !range.contains(&y) {
            return None;
        }
        let on_ring = x == -1 || y == -1 || x == ps || y == ps;
        on_ring.then(|| ((y + 1) * (ps + 2) + (x + 1)) as usize)
    }

    /// Record the tile at patch-local `(x, y)`, which must lie on the ring.
    pub fn set(&mut self, x: i32, y: i32, tile: Tile) {
        if let Some(index) = self.index(x, y) {
            self.tiles[index] = Some(tile);
        } else {
            debug_assert!(false, "({x}, {y}) is not on the patch border");
        }
    }

    pub fn get(&self, x: i32, y: i32) -> Option<Tile> {
        self.index(x, y).and_then(|index| self.tiles[index])
    }

    /// Ring coordinates in patch-local tile units.
    pub fn ring_positions(patch_size: i32) -> impl Iterator<Item = IVec2> {
        (-1..=patch_size).flat_map(move |y| {
            (-1..=patch_size).filter_map(move |x| {
                let on_ring = x == -1 || y == -1 || x == patch_size || y == patch_size;
                on_ring.then_some(IVec2::new(x, y))
            })
        })
    }
}

/// Everything shape synthesis reads besides the patch's own tiles.
pub struct PhysicsEnv<'a> {
    pub catalog: &'a SurfaceCatalog,
    pub config: &'a TerrainConfig,
    pub border: &'a PatchBorder,
}

/// Geometry of one fixture, in patch-local world units.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeGeometry {
    Polygon(Vec<Vec2>),
    Edge(Vec2, Vec2),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatchShape {
    pub geometry: ShapeGeometry,
    pub surface: u8,
}

/// Output of shape synthesis for one patch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatchShapes {
    pub shapes: Vec<PatchShape>,
    /// Tiles covered by rectangles spanning more than one tile.
    pub merged_tiles: usize,
}

impl PatchShapes {
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// Statistics about the last physics build of a patch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PatchPhysicsStats {
    /// Fixtures accepted by the backend.
    pub fixtures: usize,
    /// Tiles folded into multi-tile rectangles.
    pub merged_tiles: usize,
    /// Shapes dropped because the proxy budget ran out.
    pub skipped: usize,
    pub budget_exhausted: bool,
}

/// Build collision shapes for one patch.
///
/// `tiles` is the physics layer in row-major order (`y * patch_size + x`).
pub fn build_patch_shapes(tiles: &[Tile], patch_size: i32, env: &PhysicsEnv) -> PatchShapes {
    debug_assert_eq!(tiles.len(), (patch_size * patch_size) as usize);
    match env.config.physics_mode {
        PhysicsMode::Polygon => build_polygons(tiles, patch_size, env),
        PhysicsMode::Edge => build_edges(tiles, patch_size, env),
    }
}

/// Surface covering the whole tile with collision, if any.
///
/// A split tile whose two regions collide and may merge counts as full.
fn full_collision(tile: &Tile, catalog: &SurfaceCatalog) -> Option<u8> {
    if let Some(surface) = tile.full_surface() {
        return catalog.has_collision(surface).then_some(surface);
    }
    let (a, b) = (tile.surface_a, tile.surface_b);
    (catalog.has_collision(a) && catalog.has_collision(b) && catalog.can_merge(a, b)).then_some(a)
}

fn build_polygons(tiles: &[Tile], patch_size: i32, env: &PhysicsEnv) -> PatchShapes {
    let ps = patch_size.max(0) as usize;
    let ts = env.config.tile_size;
    let catalog = env.catalog;
    let full: Vec<Option<u8>> = tiles.iter().map(|tile| full_collision(tile, catalog)).collect();
    let matches =
        |code: u8, other: Option<u8>| other.is_some_and(|other| catalog.can_merge(code, other));

    let mut out = PatchShapes::default();
    let mut used = vec![false; ps * ps];

    for y in 0..ps {
        for x in 0..ps {
            let idx = y * ps + x;
            if used[idx] {
                continue;
            }
            let Some(code) = full[idx] else {
                push_partial_polygons(&mut out, &tiles[idx], x, y, ts, catalog);
                continue;
            };

            let mut w = 1;
            while x + w < ps && matches(code, full[y * ps + x + w]) && !used[y * ps + x + w] {
                w += 1;
            }
            let mut h = 1;
            'expand: while y + h < ps {
                for i in 0..w {
                    let j = (y + h) * ps + x + i;
                    if !matches(code, full[j]) || used[j] {
                        break 'expand;
                    }
                }
                h += 1;
            }

            for yy in 0..h {
                for xx in 0..w {
                    used[(y + yy) * ps + x + xx] = true;
                }
            }
            if w * h > 1 {
                out.merged_tiles += w * h;
            }

            let min = Vec2::new(x as f32, y as f32) * ts;
            let max = Vec2::new((x + w) as f32, (y + h) as f32) * ts;
            out.shapes.push(PatchShape {
                geometry: ShapeGeometry::Polygon(vec![
                    min,
                    Vec2::new(max.x, min.y),
                    max,
                    Vec2::new(min.x, max.y),
                ]),
                surface: code,
            });
        }
    }
    out
}

fn push_partial_polygons(
    out: &mut PatchShapes,
    tile: &Tile,
    x: usize,
    y: usize,
    ts: f32,
    catalog: &SurfaceCatalog,
) {
    let offset = Vec2::new(x as f32, y as f32);
    for side in 0..2 {
        let surface = tile.surface(side);
        if !catalog.has_collision(surface) || tile.surface_area(side) <= AREA_EPSILON {
            continue;
        }
        let vertices = tile.surface_vertices(side);
        if vertices.len() < 3 {
            continue;
        }
        out.shapes.push(PatchShape {
            geometry: ShapeGeometry::Polygon(vertices.iter().map(|v| (*v + offset) * ts).collect()),
            surface,
        });
    }
}

/// Cut segment of one tile, in tile order A -> B.
#[derive(Debug, Clone, Copy)]
struct CutSegment {
    start: Vec2,
    end: Vec2,
    surface: u8,
    /// Region A collides, so the segment is emitted B -> A.
    solid_a: bool,
}

fn build_edges(tiles: &[Tile], patch_size: i32, env: &PhysicsEnv) -> PatchShapes {
    let ps = patch_size;
    let ts = env.config.tile_size;
    let catalog = env.catalog;
    let tile_at = |x: i32, y: i32| -> Option<Tile> {
        if (0..ps).contains(&x) && (0..ps).contains(&y) {
            Some(tiles[(y * ps + x) as usize])
        } else {
            env.border.get(x, y)
        }
    };

    let mut out = PatchShapes::default();

    // Cut lines between a colliding and a non-colliding region.
    let mut cuts: Vec<Option<CutSegment>> = vec![None; (ps * ps).max(0) as usize];
    for y in 0..ps {
        for x in 0..ps {
            let tile = tiles[(y * ps + x) as usize];
            if tile.is_full() {
                continue;
            }
            let solid_a = catalog.has_collision(tile.surface_a);
            let solid_b = catalog.has_collision(tile.surface_b);
            if solid_a == solid_b {
                continue;
            }
            let (a, b) = tile.edge_line();
            let offset = Vec2::new(x as f32, y as f32);
            cuts[(y * ps + x) as usize] = Some(CutSegment {
                start: a + offset,
                end: b + offset,
                surface: if solid_a { tile.surface_a } else { tile.surface_b },
                solid_a,
            });
        }
    }
    chain_cuts(&mut out, &cuts, tiles, ps, ts, catalog);

    // Quarter-side steps against neighbouring regions.
    const SIDE_DIRECTIONS: [IVec2; 4] = [IVec2::NEG_Y, IVec2::X, IVec2::Y, IVec2::NEG_X];
    for y in 0..ps {
        for x in 0..ps {
            let tile = tiles[(y * ps + x) as usize];
            let offset = Vec2::new(x as f32, y as f32);
            for (side, dir) in SIDE_DIRECTIONS.iter().enumerate() {
                let neighbor = tile_at(x + dir.x, y + dir.y);
                let mut run: Option<(u8, u8, u8)> = None; // (first step, last step, surface)
                for step in 0..TILE_GRID {
                    let h = side as u8 * TILE_GRID + step;
                    let surface = tile.surface(tile.step_region(h));
                    let exposed = catalog.has_collision(surface)
                        && !neighbor_step_collides(neighbor, h, *dir, catalog);
                    run = match (run, exposed) {
                        (Some((first, _, run_surface)), true)
                            if catalog.can_merge(run_surface, surface) =>
                        {
                            Some((first, h, run_surface))
                        }
                        (previous, true) => {
                            if let Some(done) = previous {
                                push_step_run(&mut out, done, offset, ts);
                            }
                            Some((h, h, surface))
                        }
                        (previous, false) => {
                            if let Some(done) = previous {
                                push_step_run(&mut out, done, offset, ts);
                            }
                            None
                        }
                    };
                }
                if let Some(done) = run {
                    push_step_run(&mut out, done, offset, ts);
                }
            }
        }
    }
    out
}

fn neighbor_step_collides(
    neighbor: Option<Tile>,
    h: u8,
    dir: IVec2,
    catalog: &SurfaceCatalog,
) -> bool {
    let Some(neighbor) = neighbor else {
        return false;
    };
    let next = (h + 1) % HALF_BYTE_COUNT;
    let Some(opposite) = neighbor_half_byte(next, dir.x, dir.y) else {
        return false;
    };
    catalog.has_collision(neighbor.surface(neighbor.step_region(opposite)))
}

fn push_step_run(
    out: &mut PatchShapes,
    (first, last, surface): (u8, u8, u8),
    offset: Vec2,
    ts: f32,
) {
    let start = half_byte_point(first) + offset;
    let end = half_byte_point((last + 1) % HALF_BYTE_COUNT) + offset;
    out.shapes.push(PatchShape {
        geometry: ShapeGeometry::Edge(start * ts, end * ts),
        surface,
    });
}

/// Chain cut segments that continue one another into single segments.
fn chain_cuts(
    out: &mut PatchShapes,
    cuts: &[Option<CutSegment>],
    tiles: &[Tile],
    ps: i32,
    ts: f32,
    catalog: &SurfaceCatalog,
) {
    let mut used = vec![false; cuts.len()];
    let cut_at = |x: i32, y: i32| -> Option<(usize, CutSegment)> {
        if (0..ps).contains(&x) && (0..ps).contains(&y) {
            let idx = (y * ps + x) as usize;
            cuts[idx].map(|cut| (idx, cut))
        } else {
            None
        }
    };
    let continues = |from: &CutSegment, to: &CutSegment| {
        from.solid_a == to.solid_a
            && catalog.can_merge(from.surface, to.surface)
            && (from.end - from.start)
                .normalize_or_zero()
                .abs_diff_eq((to.end - to.start).normalize_or_zero(), 1e-4)
    };

    for y in 0..ps {
        for x in 0..ps {
            let idx = (y * ps + x) as usize;
            let Some(seed) = cuts[idx] else { continue };
            if used[idx] {
                continue;
            }
            used[idx] = true;
            let mut segment = seed;

            // Forward: this tile's B meets the next tile's A.
            let mut cursor = IVec2::new(x, y);
            'forward: loop {
                for (dx, dy) in NEIGHBOR_OFFSETS {
                    let next = cursor + IVec2::new(dx, dy);
                    let Some((next_idx, next_cut)) = cut_at(next.x, next.y) else { continue };
                    let here = tiles[(cursor.y * ps + cursor.x) as usize];
                    if !used[next_idx]
                        && Tile::connected(&here, &tiles[next_idx], dx, dy)
                        && continues(&segment, &next_cut)
                    {
                        used[next_idx] = true;
                        segment.end = next_cut.end;
                        cursor = next;
                        continue 'forward;
                    }
                }
                break;
            }

            // Backward: the previous tile's B meets this tile's A.
            let mut cursor = IVec2::new(x, y);
            'backward: loop {
                for (dx, dy) in NEIGHBOR_OFFSETS {
                    let prev = cursor - IVec2::new(dx, dy);
                    let Some((prev_idx, prev_cut)) = cut_at(prev.x, prev.y) else { continue };
                    let here = tiles[(cursor.y * ps + cursor.x) as usize];
                    if !used[prev_idx]
                        && Tile::connected(&tiles[prev_idx], &here, dx, dy)
                        && continues(&prev_cut, &segment)
                    {
                        used[prev_idx] = true;
                        segment.start = prev_cut.start;
                        cursor = prev;
                        continue 'backward;
                    }
                }
                break;
            }

            let (start, end) = if segment.solid_a {
                (segment.end, segment.start)
            } else {
                (segment.start, segment.end)
            };
            out.shapes.push(PatchShape {
                geometry: ShapeGeometry::Edge(start * ts, end * ts),
                surface: segment.surface,
            });
        }
    }
}

const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];
