//! Append-only point storage that moves from memory to a scratch file once it
//! outgrows `MAX_IN_MEMORY` records.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Largest number of records kept in memory before spilling to disk.
pub const MAX_IN_MEMORY: usize = 1024;

const RECORD_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datum {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Datum {
    fn to_bytes(self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.x.to_le_bytes());
        buf[16..24].copy_from_slice(&self.y.to_le_bytes());
        buf[24..32].copy_from_slice(&self.z.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; RECORD_SIZE]) -> Self {
        let word = |i: usize| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&buf[i..i + 8]);
            w
        };
        Self {
            id: u64::from_le_bytes(word(0)),
            x: f64::from_le_bytes(word(8)),
            y: f64::from_le_bytes(word(16)),
            z: f64::from_le_bytes(word(24)),
        }
    }
}

/// Errors from container access.
#[derive(Debug)]
pub enum ContainerError {
    OutOfBounds {
        index: usize,
        len: usize,
    },
    /// Creating or writing the spill file failed.
    Spill {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Reading a record back from the spill file failed.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for ContainerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerError::OutOfBounds { index, len } => {
                write!(f, "index {index} out of bounds for {len} elements")
            }
            ContainerError::Spill { path, source } => {
                write!(f, "failed to write spill file {}: {}", path.display(), source)
            }
            ContainerError::Read { path, source } => {
                write!(f, "failed to read spill file {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ContainerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ContainerError::OutOfBounds { .. } => None,
            ContainerError::Spill { source, .. } => Some(source),
            ContainerError::Read { source, .. } => Some(source),
        }
    }
}

#[derive(Debug)]
enum Storage {
    Memory(Vec<Datum>),
    File(File),
}

#[derive(Debug)]
pub struct DataContainer {
    storage: Storage,
    spill_path: PathBuf,
    len: usize,
}

impl DataContainer {
    /// Create an empty container. Its spill file, if ever needed, is
    /// `<spill_dir>/<id>.bin`.
    pub fn new(id: usize, spill_dir: &Path) -> Self {
        Self {
            storage: Storage::Memory(Vec::new()),
            spill_path: spill_dir.join(format!("{id}.bin")),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.storage, Storage::File(_))
    }

    pub fn spill_path(&self) -> &Path {
        &self.spill_path
    }

    pub fn push(&mut self, datum: Datum) -> Result<(), ContainerError> {
        if let Storage::Memory(vec) = &self.storage {
            if vec.len() >= MAX_IN_MEMORY {
                self.spill()?;
            }
        }

        match &mut self.storage {
            Storage::Memory(vec) => vec.push(datum),
            Storage::File(file) => {
                let offset = (self.len * RECORD_SIZE) as u64;
                file.write_all_at(&datum.to_bytes(), offset)
                    .map_err(|e| ContainerError::Spill {
                        path: self.spill_path.clone(),
                        source: e,
                    })?;
            }
        }
        self.len += 1;
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<Datum, ContainerError> {
        if index >= self.len {
            return Err(ContainerError::OutOfBounds {
                index,
                len: self.len,
            });
        }
        match &self.storage {
            Storage::Memory(vec) => Ok(vec[index]),
            Storage::File(file) => {
                let mut buf = [0u8; RECORD_SIZE];
                file.read_exact_at(&mut buf, (index * RECORD_SIZE) as u64)
                    .map_err(|e| ContainerError::Read {
                        path: self.spill_path.clone(),
                        source: e,
                    })?;
                Ok(Datum::from_bytes(&buf))
            }
        }
    }

    /// Move every in-memory record into a fresh spill file. On failure the
    /// container keeps its in-memory storage.
    fn spill(&mut self) -> Result<(), ContainerError> {
        let Storage::Memory(vec) = &self.storage else {
            return Ok(());
        };
        let spill_err = |e| ContainerError::Spill {
            path: self.spill_path.clone(),
            source: e,
        };

        // A file left by a killed run is truncated, not reused.
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.spill_path)
            .map_err(spill_err)?;
        let mut writer = BufWriter::new(&file);
        for datum in vec {
            writer.write_all(&datum.to_bytes()).map_err(spill_err)?;
        }
        writer.flush().map_err(spill_err)?;
        drop(writer);

        tracing::debug!(
            path = %self.spill_path.display(),
            records = vec.len(),
            "switched to file-backed storage"
        );
        self.storage = Storage::File(file);
        Ok(())
    }
}

impl Drop for DataContainer {
    fn drop(&mut self) {
        if self.is_spilled() {
            if let Err(e) = std::fs::remove_file(&self.spill_path) {
                tracing::warn!(
                    error = %e,
                    path = %self.spill_path.display(),
                    "failed to remove temporary file"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datum(id: u64) -> Datum {
        let f = id as f64;
        Datum {
            id,
            x: f,
            y: f * 0.5,
            z: -f,
        }
    }

    #[test]
    fn test_push_and_get_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = DataContainer::new(1, dir.path());
        assert!(data.is_empty());

        data.push(datum(0)).unwrap();
        data.push(datum(1)).unwrap();

        assert_eq!(data.len(), 2);
        assert!(!data.is_spilled());
        assert_eq!(data.get(1).unwrap(), datum(1));
        assert!(!data.spill_path().exists());
    }

    #[test]
    fn test_debug_shows_backing_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = DataContainer::new(1, dir.path());
        data.push(datum(0)).unwrap();
        let shown = format!("{data:?}");
        assert!(shown.contains("Memory"));
        assert!(shown.contains("1.bin"));
    }

    #[test]
    fn test_get_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let data = DataContainer::new(1, dir.path());
        let err = data.get(0).unwrap_err();
        assert!(matches!(err, ContainerError::OutOfBounds { index: 0, len: 0 }));
        assert!(err.to_string().contains("out of bounds"));
    }

    #[test]
    fn test_spills_after_max_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = DataContainer::new(7, dir.path());

        for id in 0..MAX_IN_MEMORY as u64 {
            data.push(datum(id)).unwrap();
        }
        assert!(!data.is_spilled());

        data.push(datum(MAX_IN_MEMORY as u64)).unwrap();
        assert!(data.is_spilled());
        assert_eq!(data.spill_path(), dir.path().join("7.bin"));

        let on_disk = std::fs::metadata(data.spill_path()).unwrap().len();
        assert_eq!(on_disk, ((MAX_IN_MEMORY + 1) * RECORD_SIZE) as u64);
    }

    #[test]
    fn test_records_survive_spill() {
        let dir = tempfile::tempdir().unwrap();
        let mut data = DataContainer::new(1, dir.path());
        let total = MAX_IN_MEMORY * 2 + 3;
        for id in 0..total as u64 {
            data.push(datum(id)).unwrap();
        }

        assert_eq!(data.len(), total);
        for index in [0, 1, MAX_IN_MEMORY - 1, MAX_IN_MEMORY, total - 1] {
            assert_eq!(data.get(index).unwrap(), datum(index as u64));
        }
        assert!(data.get(total).is_err());
    }

    #[test]
    fn test_drop_removes_spill_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut data = DataContainer::new(1, dir.path());
            for id in 0..=MAX_IN_MEMORY as u64 {
                data.push(datum(id)).unwrap();
            }
            assert!(data.spill_path().exists());
            data.spill_path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_spill_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1.bin"), vec![0xAB; RECORD_SIZE * 4096]).unwrap();

        let mut data = DataContainer::new(1, dir.path());
        for id in 0..=MAX_IN_MEMORY as u64 {
            data.push(datum(id)).unwrap();
        }
        let on_disk = std::fs::metadata(data.spill_path()).unwrap().len();
        assert_eq!(on_disk, ((MAX_IN_MEMORY + 1) * RECORD_SIZE) as u64);
        assert_eq!(data.get(MAX_IN_MEMORY).unwrap(), datum(MAX_IN_MEMORY as u64));
    }

    #[test]
    fn test_spill_failure_keeps_memory_storage() {
        let mut data = DataContainer::new(1, Path::new("/nonexistent-dir/spill"));
        for id in 0..MAX_IN_MEMORY as u64 {
            data.push(datum(id)).unwrap();
        }
        let err = data.push(datum(MAX_IN_MEMORY as u64)).unwrap_err();
        assert!(matches!(err, ContainerError::Spill { .. }));
        assert!(!data.is_spilled());
        assert_eq!(data.len(), MAX_IN_MEMORY);
        assert_eq!(data.get(0).unwrap(), datum(0));
    }
}
