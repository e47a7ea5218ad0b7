// src/results/gridfile.rs
//
// =============================================================================
// FLOWCALC: BINARY GRID FILE INDEX (v 0.3 )
// =============================================================================
//
// Reader for the layered binary outputs of MODFLOW (head, drawdown) and
// MT3D (UCN concentration).
//
// On-disk layout (little-endian, one record per layer per output step):
//   head/drawdown: kstp:i32 kper:i32 pertim:real totim:real text:[u8;16]
//                  ncol:i32 nrow:i32 ilay:i32   + ncol*nrow reals
//   ucn:           ntrans:i32 kstp:i32 kper:i32 totim:real text:[u8;16]
//                  ncol:i32 nrow:i32 ilay:i32   + ncol*nrow reals
//
// `real` is f32 or f64; precision is sniffed from the first header.
//
// Opening only scans headers (data blocks are skipped with a seek), so the
// index is cheap; values are read on demand. A record cut short by a writer
// that has not finished yet ends the index instead of failing it.

use super::ReadError;
use crate::core::TimeKey;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

// -----------------------------------------------------------------------------
// FORMAT DESCRIPTION
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderLayout {
    /// MODFLOW head / drawdown records.
    Head,
    /// MT3D concentration records.
    Ucn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Single,
    Double,
}

impl Precision {
    fn real_size(self) -> usize {
        match self {
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }

    fn real_at(self, buf: &[u8], at: usize) -> f64 {
        match self {
            Precision::Single => {
                let mut b = [0u8; 4];
                b.copy_from_slice(&buf[at..at + 4]);
                f32::from_le_bytes(b) as f64
            }
            Precision::Double => {
                let mut b = [0u8; 8];
                b.copy_from_slice(&buf[at..at + 8]);
                f64::from_le_bytes(b)
            }
        }
    }
}

fn i32_at(buf: &[u8], at: usize) -> i32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    i32::from_le_bytes(b)
}

impl HeaderLayout {
    fn header_size(self, precision: Precision) -> usize {
        let r = precision.real_size();
        match self {
            HeaderLayout::Head => 36 + 2 * r,
            HeaderLayout::Ucn => 40 + r,
        }
    }

    fn parse(self, precision: Precision, buf: &[u8]) -> RawHeader {
        let r = precision.real_size();
        // (kstp, kper, totim, text) offsets differ; the trailing ints follow text.
        let (kstp, kper, totim, text_at) = match self {
            HeaderLayout::Head => (
                i32_at(buf, 0),
                i32_at(buf, 4),
                precision.real_at(buf, 8 + r),
                8 + 2 * r,
            ),
            HeaderLayout::Ucn => (
                i32_at(buf, 4),
                i32_at(buf, 8),
                precision.real_at(buf, 12),
                12 + r,
            ),
        };
        let mut text = [0u8; 16];
        text.copy_from_slice(&buf[text_at..text_at + 16]);

        RawHeader {
            kstp,
            kper,
            totim,
            text,
            ncol: i32_at(buf, text_at + 16),
            nrow: i32_at(buf, text_at + 20),
            ilay: i32_at(buf, text_at + 24),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct RawHeader {
    kstp: i32,
    kper: i32,
    totim: f64,
    text: [u8; 16],
    ncol: i32,
    nrow: i32,
    ilay: i32,
}

impl RawHeader {
    fn is_plausible(&self) -> bool {
        self.text.iter().all(|b| (0x20..=0x7e).contains(b))
            && self.ncol > 0
            && self.nrow > 0
            && self.ilay != 0
            && self.kstp > 0
            && self.kper > 0
            && self.totim.is_finite()
    }

    fn label(&self) -> String {
        String::from_utf8_lossy(&self.text).trim().to_ascii_uppercase()
    }

    /// Byte length of the data block, `None` for non-positive or overflowing
    /// dimensions.
    fn data_len(&self, precision: Precision) -> Option<u64> {
        let ncol = u64::try_from(self.ncol).ok().filter(|n| *n > 0)?;
        let nrow = u64::try_from(self.nrow).ok().filter(|n| *n > 0)?;
        ncol.checked_mul(nrow)?
            .checked_mul(precision.real_size() as u64)
    }
}

// -----------------------------------------------------------------------------
// TIME INDEX
// -----------------------------------------------------------------------------

/// Location of one layer's data block.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerRecord {
    /// Zero-based layer.
    pub layer: usize,
    pub ncol: usize,
    pub nrow: usize,
    offset: u64,
}

/// One recorded output step.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeEntry {
    pub totim: f64,
    /// Zero-based (time step, stress period).
    pub kstpkper: (usize, usize),
    pub layers: Vec<LayerRecord>,
}

impl TimeEntry {
    fn layer(&self, layer: usize) -> Option<&LayerRecord> {
        self.layers.iter().find(|r| r.layer == layer)
    }
}

/// Keys are compared against f32 storage, hence the relative tolerance.
pub(crate) fn totim_matches(stored: f64, key: f64) -> bool {
    (stored - key).abs() <= 1e-6 * stored.abs().max(1.0)
}

// -----------------------------------------------------------------------------
// GRID FILE
// -----------------------------------------------------------------------------

#[derive(Debug)]
pub struct GridFile {
    path: PathBuf,
    precision: Precision,
    entries: Vec<TimeEntry>,
}

impl GridFile {
    /// Indexes every record whose text label contains `text_filter`
    /// (e.g. `HEAD`, `DRAWDOWN`, `CONCENTRATION`).
    pub fn open(path: &Path, layout: HeaderLayout, text_filter: &str) -> Result<Self, ReadError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let precision = sniff_precision(&mut reader, layout, len).ok_or_else(|| {
            ReadError::Malformed {
                path: path.to_path_buf(),
                reason: "no recognizable record header".into(),
            }
        })?;

        let header_size = layout.header_size(precision) as u64;
        let filter = text_filter.to_ascii_uppercase();

        let mut entries: Vec<TimeEntry> = Vec::new();
        let mut header_buf = vec![0u8; header_size as usize];
        let mut pos = 0u64;

        while pos + header_size <= len {
            reader.seek(SeekFrom::Start(pos))?;
            reader.read_exact(&mut header_buf)?;
            let header = layout.parse(precision, &header_buf);

            let data_len = header
                .is_plausible()
                .then(|| header.data_len(precision))
                .flatten();
            let Some(data_len) = data_len else {
                if entries.is_empty() {
                    return Err(ReadError::Malformed {
                        path: path.to_path_buf(),
                        reason: format!("implausible record header at byte {}", pos),
                    });
                }
                log::debug!("Stopping index of {:?} at byte {}: bad header", path, pos);
                break;
            };

            let data_start = pos + header_size;
            let data_end = data_start.saturating_add(data_len);
            if data_end > len {
                log::debug!("Ignoring truncated record at byte {} of {:?}", pos, path);
                break;
            }
            pos = data_end;

            if !header.label().contains(&filter) {
                continue;
            }

            let record = LayerRecord {
                layer: (header.ilay.unsigned_abs() as usize).saturating_sub(1),
                ncol: header.ncol as usize,
                nrow: header.nrow as usize,
                offset: data_start,
            };
            let kstpkper = (header.kstp as usize - 1, header.kper as usize - 1);

            match entries.last_mut() {
                Some(last) if last.totim == header.totim && last.kstpkper == kstpkper => {
                    last.layers.push(record)
                }
                _ => entries.push(TimeEntry {
                    totim: header.totim,
                    kstpkper,
                    layers: vec![record],
                }),
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            precision,
            entries,
        })
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn entries(&self) -> &[TimeEntry] {
        &self.entries
    }

    pub fn times(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.totim).collect()
    }

    pub fn kstpkper(&self) -> Vec<(usize, usize)> {
        self.entries.iter().map(|e| e.kstpkper).collect()
    }

    /// Layer count of the last recorded step.
    pub fn number_of_layers(&self) -> usize {
        self.entries
            .last()
            .and_then(|e| e.layers.iter().map(|r| r.layer + 1).max())
            .unwrap_or(0)
    }

    /// Position of the step addressed by `key`.
    pub fn resolve(&self, key: TimeKey) -> Result<usize, ReadError> {
        let found = match key {
            TimeKey::Idx(idx) => (idx < self.entries.len()).then_some(idx),
            TimeKey::Totim(t) => self.entries.iter().position(|e| totim_matches(e.totim, t)),
            TimeKey::Kstpkper(step, period) => self
                .entries
                .iter()
                .position(|e| e.kstpkper == (step, period)),
        };
        found.ok_or(ReadError::UnknownTime(key))
    }

    /// Raw row-major values of one layer at one step.
    pub fn read_layer(&self, idx: usize, layer: usize) -> Result<Vec<Vec<f64>>, ReadError> {
        let record = self
            .entries
            .get(idx)
            .ok_or(ReadError::UnknownTime(TimeKey::Idx(idx)))?
            .layer(layer)
            .ok_or(ReadError::LayerOutOfRange { layer })?;

        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(record.offset))?;
        let real_size = self.precision.real_size();
        let mut buf = vec![0u8; record.ncol * record.nrow * real_size];
        reader.read_exact(&mut buf)?;

        let grid = buf
            .chunks_exact(record.ncol * real_size)
            .map(|row| {
                (0..record.ncol)
                    .map(|c| self.precision.real_at(row, c * real_size))
                    .collect()
            })
            .collect();
        Ok(grid)
    }

    /// Raw value of one cell at every step. `None` where a step lacks the layer.
    pub fn read_cell_series(
        &self,
        layer: usize,
        row: usize,
        column: usize,
    ) -> Result<Vec<(f64, Option<f64>)>, ReadError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        let real_size = self.precision.real_size();
        let mut buf = vec![0u8; real_size];
        let mut series = Vec::with_capacity(self.entries.len());
        let mut layer_seen = false;

        for entry in &self.entries {
            let Some(record) = entry.layer(layer) else {
                series.push((entry.totim, None));
                continue;
            };
            layer_seen = true;
            if row >= record.nrow || column >= record.ncol {
                return Err(ReadError::CellOutOfRange {
                    row,
                    column,
                    nrow: record.nrow,
                    ncol: record.ncol,
                });
            }
            let cell = (row * record.ncol + column) * real_size;
            reader.seek(SeekFrom::Start(record.offset + cell as u64))?;
            reader.read_exact(&mut buf)?;
            series.push((entry.totim, Some(self.precision.real_at(&buf, 0))));
        }

        if !layer_seen {
            return Err(ReadError::LayerOutOfRange { layer });
        }
        Ok(series)
    }
}

fn sniff_precision<R: Read + Seek>(
    reader: &mut R,
    layout: HeaderLayout,
    len: u64,
) -> Option<Precision> {
    for precision in [Precision::Single, Precision::Double] {
        let size = layout.header_size(precision);
        if (size as u64) > len {
            continue;
        }
        let mut buf = vec![0u8; size];
        if reader.seek(SeekFrom::Start(0)).is_err() || reader.read_exact(&mut buf).is_err() {
            return None;
        }
        let header = layout.parse(precision, &buf);
        if !header.is_plausible() {
            continue;
        }
        let fits = header
            .data_len(precision)
            .is_some_and(|n| (size as u64).saturating_add(n) <= len);
        if fits {
            return Some(precision);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn head_record(out: &mut Vec<u8>, kstp: i32, kper: i32, totim: f32, text: &str, ilay: i32) {
        out.extend_from_slice(&kstp.to_le_bytes());
        out.extend_from_slice(&kper.to_le_bytes());
        out.extend_from_slice(&totim.to_le_bytes()); // pertim
        out.extend_from_slice(&totim.to_le_bytes());
        out.extend_from_slice(format!("{:>16}", text).as_bytes());
        out.extend_from_slice(&3i32.to_le_bytes()); // ncol
        out.extend_from_slice(&2i32.to_le_bytes()); // nrow
        out.extend_from_slice(&ilay.to_le_bytes());
        for i in 0..6 {
            out.extend_from_slice(&(totim * 10.0 + ilay as f32 + i as f32).to_le_bytes());
        }
    }

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        File::create(&path).unwrap().write_all(bytes).unwrap();
        path
    }

    #[test]
    fn groups_layers_by_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        for (kstp, totim) in [(1, 1.0f32), (2, 31.0)] {
            head_record(&mut bytes, kstp, 1, totim, "HEAD", 1);
            head_record(&mut bytes, kstp, 1, totim, "HEAD", 2);
        }
        let path = write(dir.path(), "mf.hds", &bytes);

        let grid = GridFile::open(&path, HeaderLayout::Head, "HEAD").unwrap();
        assert_eq!(grid.precision(), Precision::Single);
        assert_eq!(grid.times(), vec![1.0, 31.0]);
        assert_eq!(grid.kstpkper(), vec![(0, 0), (1, 0)]);
        assert_eq!(grid.number_of_layers(), 2);

        let layer = grid.read_layer(1, 1).unwrap();
        assert_eq!(layer.len(), 2);
        assert_eq!(layer[0], vec![312.0, 313.0, 314.0]);
        assert_eq!(layer[1], vec![315.0, 316.0, 317.0]);
    }

    #[test]
    fn truncated_tail_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        head_record(&mut bytes, 1, 1, 1.0, "HEAD", 1);
        head_record(&mut bytes, 2, 1, 2.0, "HEAD", 1);
        bytes.truncate(bytes.len() - 5);
        let path = write(dir.path(), "mf.hds", &bytes);

        let grid = GridFile::open(&path, HeaderLayout::Head, "HEAD").unwrap();
        assert_eq!(grid.times(), vec![1.0]);
    }

    #[test]
    fn text_filter_skips_foreign_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        head_record(&mut bytes, 1, 1, 1.0, "HEAD", 1);
        head_record(&mut bytes, 1, 1, 1.0, "DRAWDOWN", 1);
        let path = write(dir.path(), "mixed.hds", &bytes);

        let ddn = GridFile::open(&path, HeaderLayout::Head, "DRAWDOWN").unwrap();
        assert_eq!(ddn.entries().len(), 1);
        assert_eq!(ddn.entries()[0].layers.len(), 1);
    }

    #[test]
    fn detects_double_precision_ucn() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes()); // ntrans
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&5.5f64.to_le_bytes());
        bytes.extend_from_slice(b"CONCENTRATION   ");
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&0.25f64.to_le_bytes());
        let path = write(dir.path(), "MT3D001.UCN", &bytes);

        let ucn = GridFile::open(&path, HeaderLayout::Ucn, "CONCENTRATION").unwrap();
        assert_eq!(ucn.precision(), Precision::Double);
        assert_eq!(ucn.times(), vec![5.5]);
        assert_eq!(ucn.read_layer(0, 0).unwrap(), vec![vec![0.25]]);
    }

    #[test]
    fn garbage_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "junk.hds", &[0xffu8; 128]);
        assert!(matches!(
            GridFile::open(&path, HeaderLayout::Head, "HEAD"),
            Err(ReadError::Malformed { .. })
        ));
    }

    #[test]
    fn huge_dimensions_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&1.0f64.to_le_bytes());
        bytes.extend_from_slice(&1.0f64.to_le_bytes());
        bytes.extend_from_slice(b"            HEAD");
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        bytes.extend_from_slice(&i32::MAX.to_le_bytes());
        bytes.extend_from_slice(&1i32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 64]);
        let path = write(dir.path(), "mf.hds", &bytes);

        assert!(matches!(
            GridFile::open(&path, HeaderLayout::Head, "HEAD"),
            Err(ReadError::Malformed { .. })
        ));
    }

    #[test]
    fn resolve_accepts_all_three_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        head_record(&mut bytes, 1, 1, 1.0, "HEAD", 1);
        head_record(&mut bytes, 1, 2, 31.0, "HEAD", 1);
        let path = write(dir.path(), "mf.hds", &bytes);
        let grid = GridFile::open(&path, HeaderLayout::Head, "HEAD").unwrap();

        assert_eq!(grid.resolve(TimeKey::Idx(1)).unwrap(), 1);
        assert_eq!(grid.resolve(TimeKey::Totim(31.0)).unwrap(), 1);
        assert_eq!(grid.resolve(TimeKey::Kstpkper(0, 1)).unwrap(), 1);
        assert!(grid.resolve(TimeKey::Idx(2)).is_err());
        assert!(grid.resolve(TimeKey::Totim(30.0)).is_err());
    }
}
