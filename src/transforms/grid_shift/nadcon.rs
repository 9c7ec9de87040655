use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    ByteReader, GridLocation, GridShift, SECONDS_PER_DEGREE, ShiftGrid, inverse_of,
    read_grid_file,
};
use crate::{ParameterGroup, TransformError, TransformResult, Transformation};

const DESCRIPTION_LENGTH: usize = 64;
const HEADER_BYTES: usize = 96;
const SEPARATOR_BYTES: usize = 4;

/// Header shared by a pair of NADCON grid files.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Header {
    ncols: usize,
    nrows: usize,
    nz: i32,
    xmin: f32,
    dx: f32,
    ymin: f32,
    dy: f32,
    angle: f32,
}

impl Header {
    fn from_values(path: &Path, ints: [i32; 3], floats: [f32; 5]) -> TransformResult<Self> {
        let [nc, nr, nz] = ints;
        let to_count = |v: i32, what: &str| {
            usize::try_from(v)
                .map_err(|_| TransformError::grid_format(path, format!("negative {what} count {v}")))
        };
        Ok(Self {
            ncols: to_count(nc, "column")?,
            nrows: to_count(nr, "row")?,
            nz,
            xmin: floats[0],
            dx: floats[1],
            ymin: floats[2],
            dy: floats[3],
            angle: floats[4],
        })
    }

    fn read_binary(reader: &mut ByteReader, path: &Path) -> TransformResult<Self> {
        reader.seek(DESCRIPTION_LENGTH);
        let ints = [reader.i32()?, reader.i32()?, reader.i32()?];
        let floats = [
            reader.f32()?,
            reader.f32()?,
            reader.f32()?,
            reader.f32()?,
            reader.f32()?,
        ];
        Self::from_values(path, ints, floats)
    }

    fn parse_text(line: &str, path: &Path) -> TransformResult<Self> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 8 {
            return Err(TransformError::grid_format(
                path,
                format!("header has {} values, expected 8", tokens.len()),
            ));
        }
        let bad = |t: &str| TransformError::grid_format(path, format!("bad header value {t:?}"));
        let mut ints = [0; 3];
        for (i, t) in ints.iter_mut().zip(tokens[..3].iter().copied()) {
            *i = t.parse().map_err(|_| bad(t))?;
        }
        let mut floats = [0.0; 5];
        for (f, t) in floats.iter_mut().zip(tokens[3..].iter().copied()) {
            *f = t.parse().map_err(|_| bad(t))?;
        }
        Self::from_values(path, ints, floats)
    }

    fn into_grid(self, path: &Path, shifts: Vec<[f32; 2]>) -> TransformResult<ShiftGrid> {
        ShiftGrid::try_new(
            path,
            (self.xmin as f64, self.ymin as f64),
            (self.dx as f64, self.dy as f64),
            (self.ncols, self.nrows),
            shifts,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Binary,
    Text,
}

impl Format {
    fn detect(lat: &str, long: &str) -> TransformResult<Self> {
        let ext = |name: &str| {
            Path::new(name)
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default()
        };
        match (ext(lat).as_str(), ext(long).as_str()) {
            ("las", "los") => Ok(Self::Binary),
            ("laa", "loa") => Ok(Self::Text),
            (a, b) => Err(TransformError::invalid_argument(format!(
                "Unsupported grid file types \"{a}\" and \"{b}\""
            ))),
        }
    }
}

/// NADCON datum shift (NAD27 to NAD83 and similar), EPSG method 9613.
///
/// Built from a latitude shift grid (`.las` binary or `.laa` text)
/// and a longitude shift grid (`.los` or `.loa`).
/// Shifts are stored in arc-seconds, longitude shifts positive westward.
///
/// Equality and hashing consider the resolved grid file paths only.
#[derive(Debug, Clone)]
pub struct NadconTransform {
    lat_grid_name: String,
    long_grid_name: String,
    lat_path: PathBuf,
    long_path: PathBuf,
    grid: Arc<ShiftGrid>,
}

impl NadconTransform {
    /// Load a pair of grids, resolving bare names through [GridLocation::default].
    pub fn open(lat_grid: &str, long_grid: &str) -> TransformResult<Self> {
        Self::open_in(&GridLocation::default(), lat_grid, long_grid)
    }

    pub fn open_in(location: &GridLocation, lat_grid: &str, long_grid: &str) -> TransformResult<Self> {
        let format = Format::detect(lat_grid, long_grid)?;
        let lat_path = location.resolve(lat_grid);
        let long_path = location.resolve(long_grid);
        let lat_bytes = read_grid_file(&lat_path)?;
        let long_bytes = read_grid_file(&long_path)?;

        let grid = match format {
            Format::Binary => load_binary(&lat_path, &lat_bytes, &long_path, &long_bytes)?,
            Format::Text => load_text(&lat_path, &lat_bytes, &long_path, &long_bytes)?,
        };
        log::debug!(
            "Loaded NADCON grid {} / {}: {}x{} nodes over x [{}, {}], y [{}, {}]",
            lat_path.display(),
            long_path.display(),
            grid.ncols,
            grid.nrows,
            grid.x0,
            grid.x_max(),
            grid.y0,
            grid.y_max()
        );
        Ok(Self {
            lat_grid_name: lat_grid.to_string(),
            long_grid_name: long_grid.to_string(),
            lat_path,
            long_path,
            grid: Arc::new(grid),
        })
    }

    /// `(xmin, ymin, xmax, ymax)` in degrees.
    pub fn extent(&self) -> (f64, f64, f64, f64) {
        (self.grid.x0, self.grid.y0, self.grid.x_max(), self.grid.y_max())
    }

    pub fn lat_grid_path(&self) -> &Path {
        &self.lat_path
    }

    pub fn long_grid_path(&self) -> &Path {
        &self.long_path
    }
}

fn mismatched(lat_path: &Path) -> TransformError {
    TransformError::grid_format(lat_path, "latitude and longitude grid headers differ")
}

fn load_binary(
    lat_path: &Path,
    lat_bytes: &[u8],
    long_path: &Path,
    long_bytes: &[u8],
) -> TransformResult<ShiftGrid> {
    let mut lat = ByteReader::new(lat_bytes, lat_path, false);
    let mut long = ByteReader::new(long_bytes, long_path, false);
    let header = Header::read_binary(&mut lat, lat_path)?;
    if header != Header::read_binary(&mut long, long_path)? {
        return Err(mismatched(lat_path));
    }

    // The header occupies the first record; each record is one row plus a separator.
    let record_length = header.ncols * 4 + SEPARATOR_BYTES;
    if record_length < HEADER_BYTES {
        return Err(TransformError::grid_format(
            lat_path,
            format!("{} columns are too few to hold the header", header.ncols),
        ));
    }
    let expected_len = (header.nrows + 1) * record_length;
    for (path, bytes) in [(lat_path, lat_bytes), (long_path, long_bytes)] {
        if bytes.len() < expected_len {
            return Err(TransformError::grid_format(
                path,
                format!("{} bytes, expected {expected_len}", bytes.len()),
            ));
        }
    }
    lat.seek(record_length);
    long.seek(record_length);

    let mut shifts = Vec::with_capacity(header.ncols * header.nrows);
    for _ in 0..header.nrows {
        lat.skip(SEPARATOR_BYTES);
        long.skip(SEPARATOR_BYTES);
        for _ in 0..header.ncols {
            shifts.push([long.f32()?, lat.f32()?]);
        }
    }
    header.into_grid(lat_path, shifts)
}

fn load_text(
    lat_path: &Path,
    lat_bytes: &[u8],
    long_path: &Path,
    long_bytes: &[u8],
) -> TransformResult<ShiftGrid> {
    let lat_text = String::from_utf8_lossy(lat_bytes);
    let long_text = String::from_utf8_lossy(long_bytes);
    let mut lat_lines = lat_text.lines().skip(1);
    let mut long_lines = long_text.lines().skip(1);

    let missing = |p: &Path| TransformError::grid_format(p, "missing header line");
    let header = Header::parse_text(lat_lines.next().ok_or_else(|| missing(lat_path))?, lat_path)?;
    let long_header =
        Header::parse_text(long_lines.next().ok_or_else(|| missing(long_path))?, long_path)?;
    if header != long_header {
        return Err(mismatched(lat_path));
    }

    let lat_values = parse_values(lat_lines, lat_path)?;
    let long_values = parse_values(long_lines, long_path)?;
    if lat_values.len() != long_values.len() {
        return Err(mismatched(lat_path));
    }
    let shifts = long_values
        .into_iter()
        .zip(lat_values)
        .map(|(lo, la)| [lo, la])
        .collect();
    header.into_grid(lat_path, shifts)
}

fn parse_values<'a>(lines: impl Iterator<Item = &'a str>, path: &Path) -> TransformResult<Vec<f32>> {
    lines
        .flat_map(str::split_whitespace)
        .map(|t| {
            t.parse::<f32>()
                .map_err(|_| TransformError::grid_format(path, format!("bad shift value {t:?}")))
        })
        .collect()
}

impl PartialEq for NadconTransform {
    fn eq(&self, other: &Self) -> bool {
        self.lat_path == other.lat_path && self.long_path == other.long_path
    }
}

impl Eq for NadconTransform {}

impl Hash for NadconTransform {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.lat_path.hash(state);
        self.long_path.hash(state);
    }
}

impl GridShift for NadconTransform {
    fn shift(&self, lon: f64, lat: f64) -> TransformResult<(f64, f64)> {
        let [sx, sy] = self
            .grid
            .interpolate(lon, lat)
            .ok_or(TransformError::PointOutsideGrid { x: lon, y: lat })?;
        Ok((lon - sx / SECONDS_PER_DEGREE, lat + sy / SECONDS_PER_DEGREE))
    }
}

impl Transformation for NadconTransform {
    fn transform_into(&self, pt: &[f64], buf: &mut [f64]) -> TransformResult<()> {
        let (x, y) = self.shift(pt[0], pt[1])?;
        buf[0] = x;
        buf[1] = y;
        Ok(())
    }

    fn invert(&self) -> TransformResult<Arc<dyn Transformation>> {
        Ok(inverse_of(self))
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

    fn parameters(&self) -> Option<ParameterGroup> {
        Some(
            ParameterGroup::new("NADCON")
                .with("Latitude_difference_file", self.lat_grid_name.as_str())
                .with("Longitude_difference_file", self.long_grid_name.as_str()),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::hash_map::DefaultHasher;
    use std::fs;

    use approx::assert_relative_eq;

    use super::*;
    use crate::tests::{check_inverse_transform_coord_with, make_coords_in, transform};

    pub const NCOLS: usize = 24;
    pub const NROWS: usize = 4;
    pub const XMIN: f32 = -100.0;
    pub const YMIN: f32 = 30.0;
    pub const CELL: f32 = 0.25;

    /// Longitude shift in seconds, positive west.
    pub fn long_shift(col: usize, row: usize) -> f32 {
        1.0 + 0.5 * col as f32 + 0.25 * row as f32
    }

    /// Latitude shift in seconds.
    pub fn lat_shift(col: usize, row: usize) -> f32 {
        -0.5 + 0.125 * col as f32 - 0.25 * row as f32
    }

    fn binary_grid(shift: fn(usize, usize) -> f32) -> Vec<u8> {
        let record_length = NCOLS * 4 + SEPARATOR_BYTES;
        let mut bytes = vec![b' '; DESCRIPTION_LENGTH];
        for v in [NCOLS as i32, NROWS as i32, 1] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        for v in [XMIN, CELL, YMIN, CELL, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.resize(record_length, 0);
        for row in 0..NROWS {
            bytes.extend_from_slice(&[0; SEPARATOR_BYTES]);
            for col in 0..NCOLS {
                bytes.extend_from_slice(&shift(col, row).to_le_bytes());
            }
        }
        bytes
    }

    fn text_grid(shift: fn(usize, usize) -> f32) -> String {
        let mut out = format!("test grid\n{NCOLS} {NROWS} 1 {XMIN} {CELL} {YMIN} {CELL} 0\n");
        for row in 0..NROWS {
            // rows may wrap over several lines
            for chunk in (0..NCOLS).collect::<Vec<_>>().chunks(6) {
                let line: Vec<String> = chunk.iter().map(|c| shift(*c, row).to_string()).collect();
                out.push_str(&line.join(" "));
                out.push('\n');
            }
        }
        out
    }

    pub fn write_binary_pair(dir: &Path) {
        fs::write(dir.join("test.las"), binary_grid(lat_shift)).unwrap();
        fs::write(dir.join("test.los"), binary_grid(long_shift)).unwrap();
    }

    fn write_text_pair(dir: &Path) {
        fs::write(dir.join("test.laa"), text_grid(lat_shift)).unwrap();
        fs::write(dir.join("test.loa"), text_grid(long_shift)).unwrap();
    }

    fn inside() -> Vec<Vec<f64>> {
        make_coords_in(200, &[(-99.9, -94.4), (30.1, 30.6)])
    }

    #[test]
    fn test_shift_at_node() {
        let dir = tempfile::tempdir().unwrap();
        write_binary_pair(dir.path());
        let t = NadconTransform::open_in(&GridLocation::new(dir.path()), "test.las", "test.los")
            .unwrap();
        let x = XMIN as f64 + 2.0 * CELL as f64;
        let y = YMIN as f64 + CELL as f64;
        let out = transform(&t, &[x, y]);
        assert_relative_eq!(out[0], x - long_shift(2, 1) as f64 / 3600.0, epsilon = 1e-12);
        assert_relative_eq!(out[1], y + lat_shift(2, 1) as f64 / 3600.0, epsilon = 1e-12);
    }

    #[test]
    fn test_files_released_after_construction() {
        let dir = tempfile::tempdir().unwrap();
        write_binary_pair(dir.path());
        let lat = dir.path().join("test.las");
        let long = dir.path().join("test.los");
        let t = NadconTransform::open(lat.to_str().unwrap(), long.to_str().unwrap()).unwrap();
        fs::remove_file(&lat).unwrap();
        fs::remove_file(&long).unwrap();
        assert_eq!(transform(&t, &[-99.0, 30.5]).len(), 2);
    }

    #[test]
    fn test_text_matches_binary() {
        let dir = tempfile::tempdir().unwrap();
        write_binary_pair(dir.path());
        write_text_pair(dir.path());
        let loc = GridLocation::new(dir.path());
        let binary = NadconTransform::open_in(&loc, "test.las", "test.los").unwrap();
        let text = NadconTransform::open_in(&loc, "test.laa", "test.loa").unwrap();
        assert_ne!(binary, text);
        for pt in inside() {
            assert_eq!(transform(&binary, &pt), transform(&text, &pt));
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write_binary_pair(dir.path());
        let t = NadconTransform::open_in(&GridLocation::new(dir.path()), "test.las", "test.los")
            .unwrap();
        check_inverse_transform_coord_with(&t, &inside(), 1e-8);
        let inv = t.invert().unwrap();
        assert!(inv.to_wkt().starts_with("INVERSE_MT[PARAM_MT[\"NADCON\""));
        let back = inv.invert().unwrap();
        assert_eq!(transform(back.as_ref(), &[-99.0, 30.5]), transform(&t, &[-99.0, 30.5]));
    }

    #[test]
    fn test_outside_grid() {
        let dir = tempfile::tempdir().unwrap();
        write_binary_pair(dir.path());
        let t = NadconTransform::open_in(&GridLocation::new(dir.path()), "test.las", "test.los")
            .unwrap();
        let mut out = [0.0; 2];
        assert!(matches!(
            t.transform_into(&[-120.0, 30.5], &mut out),
            Err(TransformError::PointOutsideGrid { .. })
        ));

        let pts: Vec<&[f64]> = vec![&[-99.0, 30.5], &[-120.0, 30.5], &[-98.0, 30.2]];
        let mut bufs = vec![vec![0.0; 2]; 3];
        let mut buf_refs: Vec<&mut [f64]> = bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
        assert!(t.bulk_transform_into(&pts, &mut buf_refs).is_err());
        assert!(bufs[1].iter().all(|v| v.is_nan()));
        assert!(bufs[0].iter().chain(bufs[2].iter()).all(|v| v.is_finite()));
    }

    #[test]
    fn test_equality_over_resources() {
        let dir = tempfile::tempdir().unwrap();
        write_binary_pair(dir.path());
        let loc = GridLocation::new(dir.path());
        let a = NadconTransform::open_in(&loc, "test.las", "test.los").unwrap();
        let b = NadconTransform::open_in(&loc, "test.las", "test.los").unwrap();
        assert_eq!(a, b);
        let hash = |t: &NadconTransform| {
            let mut h = DefaultHasher::new();
            t.hash(&mut h);
            h.finish()
        };
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn test_bad_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let loc = GridLocation::new(dir.path());
        assert!(matches!(
            NadconTransform::open_in(&loc, "a.txt", "b.txt"),
            Err(TransformError::InvalidArgument(_))
        ));
        assert!(matches!(
            NadconTransform::open_in(&loc, "missing.las", "missing.los"),
            Err(TransformError::Io { .. })
        ));
        fs::write(dir.path().join("short.las"), [0_u8; 40]).unwrap();
        fs::write(dir.path().join("short.los"), [0_u8; 40]).unwrap();
        assert!(matches!(
            NadconTransform::open_in(&loc, "short.las", "short.los"),
            Err(TransformError::GridFormat { .. })
        ));
    }
}
