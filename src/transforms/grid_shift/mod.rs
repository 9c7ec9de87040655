//! Datum shifts interpolated from gridded longitude/latitude corrections.
//!
//! Grid files are read completely into memory when a transform is constructed;
//! no file handle outlives the constructor and no I/O happens while transforming.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{TransformError, TransformResult, Transformation, wkt};

pub(crate) mod nadcon;
pub use nadcon::NadconTransform;

pub(crate) mod ntv2;
pub use ntv2::Ntv2Transform;

/// Environment variable holding the directory bare grid file names are resolved against.
pub const GRID_DIR_ENV: &str = "GEODETIC_GRID_DIR";
const DEFAULT_GRID_DIR: &str = ".";

/// Convergence threshold of the inverse grid shift, in degrees.
pub const TOL: f64 = 5.0e-10;
/// Iteration cap of the inverse grid shift.
pub const MAX_ITER: usize = 10;

pub(crate) const SECONDS_PER_DEGREE: f64 = 3600.0;

/// Where grid files given by bare name (no path separator) are looked up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GridLocation {
    base: PathBuf,
}

impl Default for GridLocation {
    /// Taken from [GRID_DIR_ENV], or the working directory.
    fn default() -> Self {
        let base = std::env::var_os(GRID_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_GRID_DIR));
        Self { base }
    }
}

impl GridLocation {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Names containing `/`, `\` or `:` are used as given.
    pub fn resolve(&self, name: &str) -> PathBuf {
        if name.contains(['/', '\\', ':']) {
            PathBuf::from(name)
        } else {
            self.base.join(name)
        }
    }
}

/// Read a whole file; the handle is closed before returning.
pub(crate) fn read_grid_file(path: &Path) -> TransformResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| TransformError::io(path, e))
}

/// Reads fixed-width numbers out of a grid file held in memory.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    big_endian: bool,
    path: &'a Path,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8], path: &'a Path, big_endian: bool) -> Self {
        Self {
            bytes,
            pos: 0,
            big_endian,
            path,
        }
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn skip(&mut self, n: usize) {
        self.pos += n;
    }

    pub fn take<const N: usize>(&mut self) -> TransformResult<[u8; N]> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            TransformError::grid_format(
                self.path,
                format!("unexpected end of file at byte {}", self.pos),
            )
        })?;
        let mut buf = [0; N];
        buf.copy_from_slice(slice);
        self.pos = end;
        Ok(buf)
    }

    pub fn i32(&mut self) -> TransformResult<i32> {
        let b = self.take::<4>()?;
        Ok(if self.big_endian {
            i32::from_be_bytes(b)
        } else {
            i32::from_le_bytes(b)
        })
    }

    pub fn f32(&mut self) -> TransformResult<f32> {
        let b = self.take::<4>()?;
        Ok(if self.big_endian {
            f32::from_be_bytes(b)
        } else {
            f32::from_le_bytes(b)
        })
    }

    pub fn f64(&mut self) -> TransformResult<f64> {
        let b = self.take::<8>()?;
        Ok(if self.big_endian {
            f64::from_be_bytes(b)
        } else {
            f64::from_le_bytes(b)
        })
    }

    /// Fixed-width ASCII field, trailing blanks and NULs removed.
    pub fn text(&mut self, width: usize) -> TransformResult<String> {
        let end = self.pos + width;
        let slice = self.bytes.get(self.pos..end).ok_or_else(|| {
            TransformError::grid_format(self.path, "unexpected end of file in text field")
        })?;
        self.pos = end;
        Ok(String::from_utf8_lossy(slice)
            .trim_end_matches([' ', '\0'])
            .to_string())
    }
}

/// Regular grid of two shift values per node, interpolated bilinearly.
///
/// Node `(col, row)` lies at `(x0 + col·dx, y0 + row·dy)`; nodes are stored row by row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ShiftGrid {
    pub x0: f64,
    pub y0: f64,
    pub dx: f64,
    pub dy: f64,
    pub ncols: usize,
    pub nrows: usize,
    pub shifts: Vec<[f32; 2]>,
}

impl ShiftGrid {
    pub fn try_new(
        path: &Path,
        (x0, y0): (f64, f64),
        (dx, dy): (f64, f64),
        (ncols, nrows): (usize, usize),
        shifts: Vec<[f32; 2]>,
    ) -> TransformResult<Self> {
        if ncols < 2 || nrows < 2 {
            return Err(TransformError::grid_format(
                path,
                format!("grid of {ncols}x{nrows} nodes cannot be interpolated"),
            ));
        }
        if !(dx > 0.0 && dy > 0.0) {
            return Err(TransformError::grid_format(
                path,
                format!("cell size ({dx}, {dy}) is not positive"),
            ));
        }
        if shifts.len() != ncols * nrows {
            return Err(TransformError::grid_format(
                path,
                format!(
                    "expected {} nodes, found {}",
                    ncols * nrows,
                    shifts.len()
                ),
            ));
        }
        Ok(Self {
            x0,
            y0,
            dx,
            dy,
            ncols,
            nrows,
            shifts,
        })
    }

    pub fn x_max(&self) -> f64 {
        self.x0 + (self.ncols - 1) as f64 * self.dx
    }

    pub fn y_max(&self) -> f64 {
        self.y0 + (self.nrows - 1) as f64 * self.dy
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x0 && x <= self.x_max() && y >= self.y0 && y <= self.y_max()
    }

    pub fn cell_area(&self) -> f64 {
        self.dx * self.dy
    }

    fn node(&self, col: usize, row: usize) -> [f64; 2] {
        let [a, b] = self.shifts[row * self.ncols + col];
        [a as f64, b as f64]
    }

    /// Bilinear interpolation; `None` outside the grid extent.
    pub fn interpolate(&self, x: f64, y: f64) -> Option<[f64; 2]> {
        if !self.contains(x, y) {
            return None;
        }
        let gx = (x - self.x0) / self.dx;
        let gy = (y - self.y0) / self.dy;
        let col = (gx.floor() as usize).min(self.ncols - 2);
        let row = (gy.floor() as usize).min(self.nrows - 2);
        let fx = gx - col as f64;
        let fy = gy - row as f64;

        let s00 = self.node(col, row);
        let s10 = self.node(col + 1, row);
        let s01 = self.node(col, row + 1);
        let s11 = self.node(col + 1, row + 1);
        let mut out = [0.0; 2];
        for (idx, o) in out.iter_mut().enumerate() {
            let lower = s00[idx] + fx * (s10[idx] - s00[idx]);
            let upper = s01[idx] + fx * (s11[idx] - s01[idx]);
            *o = lower + fy * (upper - lower);
        }
        Some(out)
    }
}

/// A forward grid shift on `(longitude, latitude)` in degrees.
pub(crate) trait GridShift: Transformation + Clone + 'static {
    fn shift(&self, lon: f64, lat: f64) -> TransformResult<(f64, f64)>;

    /// Find the point which the forward shift maps onto `(lon, lat)`,
    /// by feeding the residual back into the query point.
    fn inverse_shift(&self, lon: f64, lat: f64) -> TransformResult<(f64, f64)> {
        let (mut x, mut y) = (lon, lat);
        for _ in 0..=MAX_ITER {
            let (fx, fy) = self.shift(x, y)?;
            let x_dif = fx - lon;
            let y_dif = fy - lat;
            if x_dif.abs() <= TOL && y_dif.abs() <= TOL {
                return Ok((x, y));
            }
            if x_dif.abs() > TOL {
                x -= x_dif;
            }
            if y_dif.abs() > TOL {
                y -= y_dif;
            }
        }
        log::debug!("Inverse grid shift of ({lon}, {lat}) did not converge");
        Err(TransformError::NoConvergence {
            operation: "inverse grid shift",
            iterations: MAX_ITER,
        })
    }
}

/// Inverse of a grid shift, found iteratively per point.
#[derive(Debug, Clone)]
pub(crate) struct InverseGridShift<G> {
    forward: G,
}

impl<G: GridShift> Transformation for InverseGridShift<G> {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        let (x, y) = self.forward.inverse_shift(pt[0], pt[1])?;
        buf[0] = x;
        buf[1] = y;
        Ok(())
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        Ok(Arc::new(self.forward.clone()))
    }

    fn is_identity(&self) -> bool {
        false
    }

    fn input_ndim(&self) -> usize {
        2
    }

    fn output_ndim(&self) -> usize {
        2
    }

    fn to_wkt(&self) -> String {
        wkt::inverse_mt(&self.forward.to_wkt())
    }
}

pub(crate) fn inverse_of<G: GridShift>(forward: &G) -> Arc<dyn Transformation> {
    Arc::new(InverseGridShift {
        forward: forward.clone(),
    })
}
