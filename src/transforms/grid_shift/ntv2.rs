use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    ByteReader, GridLocation, GridShift, SECONDS_PER_DEGREE, ShiftGrid, inverse_of,
    read_grid_file,
};
use crate::{ParameterGroup, TransformError, TransformResult, Transformation};

const RECORD_BYTES: usize = 16;
const KEY_BYTES: usize = 8;
const OVERVIEW_RECORDS: i32 = 11;
const NODE_BYTES: usize = 16;

/// Field positions within the overview header.
mod overview {
    pub const NUM_OREC: usize = 0;
    pub const NUM_SREC: usize = 1;
    pub const NUM_FILE: usize = 2;
    pub const GS_TYPE: usize = 3;
}

/// Field positions within a sub-grid header.
mod subgrid {
    pub const SUB_NAME: usize = 0;
    pub const PARENT: usize = 1;
    pub const S_LAT: usize = 4;
    pub const N_LAT: usize = 5;
    pub const E_LONG: usize = 6;
    pub const W_LONG: usize = 7;
    pub const LAT_INC: usize = 8;
    pub const LONG_INC: usize = 9;
    pub const GS_COUNT: usize = 10;
}

/// One sub-grid, in arc-seconds with longitude positive west.
#[derive(Debug, Clone, PartialEq)]
struct SubGrid {
    name: String,
    parent: String,
    grid: ShiftGrid,
}

/// NTv2 datum shift (EPSG method 9615) from a `.gsb` grid file.
///
/// Files of either byte order are accepted.
/// Where sub-grids overlap, the one with the finest cells containing the point is used.
///
/// Equality and hashing consider the resolved grid file path only.
#[derive(Debug, Clone)]
pub struct Ntv2Transform {
    grid_name: String,
    path: PathBuf,
    subgrids: Arc<Vec<SubGrid>>,
}

impl Ntv2Transform {
    /// Load a grid, resolving a bare name through [GridLocation::default].
    pub fn open(grid: &str) -> TransformResult<Self> {
        Self::open_in(&GridLocation::default(), grid)
    }

    pub fn open_in(location: &GridLocation, grid: &str) -> TransformResult<Self> {
        let path = location.resolve(grid);
        let bytes = read_grid_file(&path)?;
        let subgrids = parse(&path, &bytes)?;
        log::debug!(
            "Loaded NTv2 grid {} with {} sub-grids",
            path.display(),
            subgrids.len()
        );
        Ok(Self {
            grid_name: grid.to_string(),
            path,
            subgrids: Arc::new(subgrids),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the sub-grids and their parents, in file order.
    pub fn subgrid_names(&self) -> Vec<(&str, &str)> {
        self.subgrids
            .iter()
            .map(|s| (s.name.as_str(), s.parent.as_str()))
            .collect()
    }

    fn find(&self, lon_west: f64, lat: f64) -> Option<&SubGrid> {
        self.subgrids
            .iter()
            .filter(|s| s.grid.contains(lon_west, lat))
            .min_by(|a, b| a.grid.cell_area().total_cmp(&b.grid.cell_area()))
    }
}

fn record_value(reader: &mut ByteReader, header_start: usize, index: usize) {
    reader.seek(header_start + index * RECORD_BYTES + KEY_BYTES);
}

fn read_int(reader: &mut ByteReader, start: usize, index: usize) -> TransformResult<i32> {
    record_value(reader, start, index);
    reader.i32()
}

fn read_real(reader: &mut ByteReader, start: usize, index: usize) -> TransformResult<f64> {
    record_value(reader, start, index);
    reader.f64()
}

fn read_text(reader: &mut ByteReader, start: usize, index: usize) -> TransformResult<String> {
    record_value(reader, start, index);
    reader.text(RECORD_BYTES - KEY_BYTES)
}

fn to_count(path: &Path, name: &str, value: i32) -> TransformResult<usize> {
    usize::try_from(value)
        .map_err(|_| TransformError::grid_format(path, format!("{name} = {value} is negative")))
}

fn parse(path: &Path, bytes: &[u8]) -> TransformResult<Vec<SubGrid>> {
    let mut reader = ByteReader::new(bytes, path, false);
    if read_int(&mut reader, 0, overview::NUM_OREC)? != OVERVIEW_RECORDS {
        reader = ByteReader::new(bytes, path, true);
        if read_int(&mut reader, 0, overview::NUM_OREC)? != OVERVIEW_RECORDS {
            return Err(TransformError::grid_format(
                path,
                "not an NTv2 file: NUM_OREC is not 11 in either byte order",
            ));
        }
    }
    let num_srec = to_count(path, "NUM_SREC", read_int(&mut reader, 0, overview::NUM_SREC)?)?;
    let num_file = to_count(path, "NUM_FILE", read_int(&mut reader, 0, overview::NUM_FILE)?)?;
    let units = match read_text(&mut reader, 0, overview::GS_TYPE)?
        .to_ascii_uppercase()
        .as_str()
    {
        "SECONDS" => 1.0,
        "MINUTES" => 60.0,
        "DEGREES" => SECONDS_PER_DEGREE,
        other => {
            return Err(TransformError::grid_format(
                path,
                format!("unknown GS_TYPE {other:?}"),
            ));
        }
    };

    let mut start = OVERVIEW_RECORDS as usize * RECORD_BYTES;
    let mut subgrids = Vec::with_capacity(num_file.min(bytes.len() / RECORD_BYTES));
    for _ in 0..num_file {
        let name = read_text(&mut reader, start, subgrid::SUB_NAME)?;
        let parent = read_text(&mut reader, start, subgrid::PARENT)?;
        let s_lat = read_real(&mut reader, start, subgrid::S_LAT)?;
        let n_lat = read_real(&mut reader, start, subgrid::N_LAT)?;
        let e_long = read_real(&mut reader, start, subgrid::E_LONG)?;
        let w_long = read_real(&mut reader, start, subgrid::W_LONG)?;
        let lat_inc = read_real(&mut reader, start, subgrid::LAT_INC)?;
        let long_inc = read_real(&mut reader, start, subgrid::LONG_INC)?;
        let count = to_count(path, "GS_COUNT", read_int(&mut reader, start, subgrid::GS_COUNT)?)?;

        let spans = [(n_lat - s_lat) / lat_inc, (w_long - e_long) / long_inc];
        if !spans.iter().all(|s| s.is_finite() && *s >= 0.0) {
            return Err(TransformError::grid_format(
                path,
                format!("sub-grid {name:?} has an invalid extent or cell size"),
            ));
        }
        let nrows = spans[0].round() as usize + 1;
        let ncols = spans[1].round() as usize + 1;
        if nrows.checked_mul(ncols) != Some(count) {
            return Err(TransformError::grid_format(
                path,
                format!("sub-grid {name:?} has {count} nodes but spans {ncols}x{nrows}"),
            ));
        }

        // Nodes run from the south-east corner westward, then northward.
        reader.seek(start + num_srec * RECORD_BYTES);
        let mut shifts = Vec::with_capacity(count.min(bytes.len() / NODE_BYTES));
        for _ in 0..count {
            let lat_shift = reader.f32()?;
            let lon_shift = reader.f32()?;
            // accuracies
            reader.skip(NODE_BYTES - 8);
            shifts.push([lon_shift * units as f32, lat_shift * units as f32]);
        }
        let grid = ShiftGrid::try_new(
            path,
            (e_long, s_lat),
            (long_inc, lat_inc),
            (ncols, nrows),
            shifts,
        )?;
        log::debug!(
            "NTv2 sub-grid {name:?} (parent {parent:?}): {ncols}x{nrows} nodes, cells {long_inc}\" x {lat_inc}\""
        );
        subgrids.push(SubGrid { name, parent, grid });
        start += (num_srec + count) * RECORD_BYTES;
    }
    Ok(subgrids)
}

impl PartialEq for Ntv2Transform {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for Ntv2Transform {}

impl Hash for Ntv2Transform {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl GridShift for Ntv2Transform {
    fn shift(&self, lon: f64, lat: f64) -> TransformResult<(f64, f64)> {
        let x = -lon * SECONDS_PER_DEGREE;
        let y = lat * SECONDS_PER_DEGREE;
        let [sx, sy] = self
            .find(x, y)
            .and_then(|s| s.grid.interpolate(x, y))
            .ok_or(TransformError::PointOutsideGrid { x: lon, y: lat })?;
        Ok((lon - sx / SECONDS_PER_DEGREE, lat + sy / SECONDS_PER_DEGREE))
    }
}

impl Transformation for Ntv2Transform {
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
            ParameterGroup::new("NTv2")
                .with("Latitude and longitude difference file", self.grid_name.as_str()),
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;

    use approx::assert_relative_eq;

    use super::*;
    use crate::tests::{check_inverse_transform_coord_with, make_coords_in, transform};

    struct Writer {
        bytes: Vec<u8>,
        big_endian: bool,
    }

    impl Writer {
        fn key(&mut self, key: &str) {
            let mut k = [b' '; KEY_BYTES];
            k[..key.len()].copy_from_slice(key.as_bytes());
            self.bytes.extend_from_slice(&k);
        }

        fn int(&mut self, key: &str, v: i32) {
            self.key(key);
            let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
            self.bytes.extend_from_slice(&b);
            self.bytes.extend_from_slice(&[0; 4]);
        }

        fn real(&mut self, key: &str, v: f64) {
            self.key(key);
            let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
            self.bytes.extend_from_slice(&b);
        }

        fn text(&mut self, key: &str, v: &str) {
            self.key(key);
            let mut t = [b' '; 8];
            t[..v.len()].copy_from_slice(v.as_bytes());
            self.bytes.extend_from_slice(&t);
        }

        fn f32(&mut self, v: f32) {
            let b = if self.big_endian { v.to_be_bytes() } else { v.to_le_bytes() };
            self.bytes.extend_from_slice(&b);
        }

        fn subgrid(
            &mut self,
            name: &str,
            parent: &str,
            (s_lat, n_lat, e_long, w_long): (f64, f64, f64, f64),
            inc: f64,
            shift: impl Fn(usize, usize) -> (f32, f32),
        ) {
            let nrows = ((n_lat - s_lat) / inc) as usize + 1;
            let ncols = ((w_long - e_long) / inc) as usize + 1;
            self.text("SUB_NAME", name);
            self.text("PARENT", parent);
            self.text("CREATED", "20240101");
            self.text("UPDATED", "20240101");
            self.real("S_LAT", s_lat);
            self.real("N_LAT", n_lat);
            self.real("E_LONG", e_long);
            self.real("W_LONG", w_long);
            self.real("LAT_INC", inc);
            self.real("LONG_INC", inc);
            self.int("GS_COUNT", (nrows * ncols) as i32);
            for row in 0..nrows {
                for col in 0..ncols {
                    let (lat, lon) = shift(col, row);
                    self.f32(lat);
                    self.f32(lon);
                    self.f32(0.01);
                    self.f32(0.01);
                }
            }
        }
    }

    /// Parent `(lat, lon)` shifts in seconds at node `(col, row)`, counting columns westward.
    fn parent_shift(col: usize, row: usize) -> (f32, f32) {
        (1.0 + 0.1 * col as f32, 2.0 + 0.2 * row as f32)
    }

    pub fn gsb_bytes(big_endian: bool) -> Vec<u8> {
        let mut w = Writer {
            bytes: Vec::new(),
            big_endian,
        };
        w.int("NUM_OREC", 11);
        w.int("NUM_SREC", 11);
        w.int("NUM_FILE", 2);
        w.text("GS_TYPE", "SECONDS");
        w.text("VERSION", "NTv2.0");
        w.text("SYSTEM_F", "TEST_F");
        w.text("SYSTEM_T", "TEST_T");
        w.real("MAJOR_F", 6_378_206.4);
        w.real("MINOR_F", 6_356_583.8);
        w.real("MAJOR_T", 6_378_137.0);
        w.real("MINOR_T", 6_356_752.314);
        // 40N..41N, 70W..72W at 15'
        w.subgrid(
            "PARENT",
            "NONE",
            (144_000.0, 147_600.0, 252_000.0, 259_200.0),
            900.0,
            parent_shift,
        );
        // 40.25N..40.5N, 70.5W..71W at 7.5'
        w.subgrid(
            "CHILD",
            "PARENT",
            (144_900.0, 145_800.0, 253_800.0, 255_600.0),
            450.0,
            |_, _| (3.0, 4.0),
        );
        w.text("END", "");
        w.bytes
    }

    fn open(big_endian: bool) -> (tempfile::TempDir, Ntv2Transform) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("test.gsb"), gsb_bytes(big_endian)).unwrap();
        let t = Ntv2Transform::open_in(&GridLocation::new(dir.path()), "test.gsb").unwrap();
        (dir, t)
    }

    #[test]
    fn test_parent_node() {
        let (_dir, t) = open(false);
        assert_eq!(t.subgrid_names(), vec![("PARENT", "NONE"), ("CHILD", "PARENT")]);
        let out = transform(&t, &[-71.0, 40.75]);
        let (lat, lon) = parent_shift(4, 3);
        assert_relative_eq!(out[0], -71.0 - lon as f64 / 3600.0, epsilon = 1e-12);
        assert_relative_eq!(out[1], 40.75 + lat as f64 / 3600.0, epsilon = 1e-12);
    }

    #[test]
    fn test_finest_subgrid_wins() {
        let (_dir, t) = open(false);
        let out = transform(&t, &[-70.75, 40.4]);
        assert_relative_eq!(out[0], -70.75 - 4.0 / 3600.0, epsilon = 1e-12);
        assert_relative_eq!(out[1], 40.4 + 3.0 / 3600.0, epsilon = 1e-12);
    }

    #[test]
    fn test_byte_orders_agree() {
        let (_d1, little) = open(false);
        let (_d2, big) = open(true);
        for pt in make_coords_in(100, &[(-71.9, -70.1), (40.1, 40.9)]) {
            assert_eq!(transform(&little, &pt), transform(&big, &pt));
        }
    }

    #[test]
    fn test_round_trip() {
        let (_dir, t) = open(true);
        let parent_only = make_coords_in(100, &[(-71.9, -71.1), (40.1, 40.9)]);
        check_inverse_transform_coord_with(&t, &parent_only, 1e-8);
        let child_only = make_coords_in(100, &[(-70.95, -70.55), (40.3, 40.45)]);
        check_inverse_transform_coord_with(&t, &child_only, 1e-8);
    }

    #[test]
    fn test_outside_and_released() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.gsb");
        fs::write(&path, gsb_bytes(false)).unwrap();
        let t = Ntv2Transform::open(path.to_str().unwrap()).unwrap();
        fs::remove_file(&path).unwrap();
        let mut out = [0.0; 2];
        assert!(matches!(
            t.transform_into(&[-60.0, 40.5], &mut out),
            Err(TransformError::PointOutsideGrid { .. })
        ));
        assert!(t.transform_into(&[-71.5, 40.5], &mut out).is_ok());
    }

    #[test]
    fn test_not_ntv2() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bad.gsb"), vec![0_u8; 200]).unwrap();
        assert!(matches!(
            Ntv2Transform::open_in(&GridLocation::new(dir.path()), "bad.gsb"),
            Err(TransformError::GridFormat { .. })
        ));
    }
}
