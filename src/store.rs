//! Durable backing for the Hazard Model.
//!
//! An append-only log plus a coarse range query over it.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Result;
use crate::geo_point::GeoPoint;
use crate::hazard::HazardRecord;

pub trait HazardStore: Send + Sync {
    fn append(&self, record: &HazardRecord) -> Result<()>;

    /// Every record in append order.
    fn load_all(&self) -> Result<Vec<HazardRecord>>;

    /// Records located within roughly `radius_meters` of `point`. Expiry markers are skipped.
    fn query_near(&self, point: &GeoPoint, radius_meters: f64) -> Result<Vec<HazardRecord>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|r| {
                r.location()
                    .is_some_and(|loc| loc.distance_meters(point) <= radius_meters)
            })
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<HazardRecord>>,
}

impl HazardStore for MemoryStore {
    fn append(&self, record: &HazardRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record.clone());
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<HazardRecord>> {
        Ok(self.records.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

/// One JSON object per line, appended and flushed on every write.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    writer: Mutex<File>,
}

impl JsonlStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        terminate_torn_tail(&mut writer)?;
        log::info!("Hazard log at {}", path.display());
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }
}

/// Closes off a final line left without its newline by an interrupted write,
/// so the next record starts on a line of its own.
fn terminate_torn_tail(file: &mut File) -> Result<()> {
    if file.metadata()?.len() == 0 {
        return Ok(());
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        log::warn!("Hazard log ends mid-record; starting a new line");
        file.write_all(b"\n")?;
        file.flush()?;
    }
    Ok(())
}

impl HazardStore for JsonlStore {
    fn append(&self, record: &HazardRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    fn load_all(&self) -> Result<Vec<HazardRecord>> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                // A torn final write should not take the whole log down.
                Err(e) => log::warn!("Skipping hazard log line {}: {e}", number + 1),
            }
        }
        Ok(records)
    }
}
