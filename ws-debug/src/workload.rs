use crate::data_container::{ContainerError, DataContainer, Datum};
use std::path::{Path, PathBuf};

/// Spill file id used for the point set read by `read_data`.
const CONTAINER_ID: usize = 1;

#[derive(Debug)]
pub enum WorkloadError {
    /// The input file could not be opened or read.
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    Container(ContainerError),
    /// The worker task panicked or was cancelled.
    Join { source: tokio::task::JoinError },
}

impl std::fmt::Display for WorkloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkloadError::Open { path, source } => {
                write!(f, "failed to open input {}: {}", path.display(), source)
            }
            WorkloadError::Container(e) => write!(f, "{e}"),
            WorkloadError::Join { source } => write!(f, "worker task failed: {source}"),
        }
    }
}

impl std::error::Error for WorkloadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkloadError::Open { source, .. } => Some(source),
            WorkloadError::Container(e) => Some(e),
            WorkloadError::Join { source } => Some(source),
        }
    }
}

impl From<ContainerError> for WorkloadError {
    fn from(e: ContainerError) -> Self {
        WorkloadError::Container(e)
    }
}

/// Split whitespace-separated text into `(x, y, z)` triples.
///
/// Stops at the first token that isn't a float, or at a trailing
/// incomplete triple.
fn parse_triples(text: &str) -> Vec<(f64, f64, f64)> {
    let mut tokens = text.split_whitespace().map(str::parse::<f64>);
    let mut triples = Vec::new();
    while let (Some(Ok(x)), Some(Ok(y)), Some(Ok(z))) =
        (tokens.next(), tokens.next(), tokens.next())
    {
        triples.push((x, y, z));
    }
    triples
}

/// Read a point file into a container, numbering points from 0.
pub async fn read_data(path: &Path, spill_dir: &Path) -> Result<DataContainer, WorkloadError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| WorkloadError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;
    let text = String::from_utf8_lossy(&bytes);

    let mut data = DataContainer::new(CONTAINER_ID, spill_dir);
    for (id, (x, y, z)) in parse_triples(&text).into_iter().enumerate() {
        data.push(Datum {
            id: id as u64,
            x,
            y,
            z,
        })?;
    }

    if data.is_spilled() {
        tracing::debug!(path = %data.spill_path().display(), "points stored on disk");
    }
    tracing::info!("file contained {} elements", data.len());
    Ok(data)
}
