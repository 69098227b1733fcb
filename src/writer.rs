use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::CrawlError;
use crate::progress;
use crate::record::{ProcessedRecord, RESULT_HEADER};

/// Append-only writer for the result table.
///
/// `append` returns only after the row has reached the disk, so any row the
/// crawl loop has moved past survives a crash.
pub struct ResultWriter {
    path: PathBuf,
    csv: csv::Writer<File>,
}

impl ResultWriter {
    pub fn open(path: &Path) -> Result<Self, CrawlError> {
        let fail = |e: std::io::Error| CrawlError::write_failure(path, e);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(fail)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(fail)?;
        let mut len = file.metadata().map_err(fail)?.len();
        if len > 0 && progress::is_blank(&mut file).map_err(fail)? {
            warn!("{} holds no rows, starting it over", path.display());
            file.set_len(0).map_err(fail)?;
            len = 0;
        }

        // A row cut short by a crash must not swallow the next one.
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1)).map_err(fail)?;
            file.read_exact(&mut last).map_err(fail)?;
            if last[0] != b'\n' {
                file.write_all(b"\n").map_err(fail)?;
            }
        }

        let mut csv = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if len == 0 {
            csv.write_record(RESULT_HEADER)
                .map_err(|e| CrawlError::write_failure(path, e))?;
            info!("Created result table {}", path.display());
        } else {
            info!("Appending to existing {}", path.display());
        }

        let mut writer = Self {
            path: path.to_path_buf(),
            csv,
        };
        writer.sync()?;
        Ok(writer)
    }

    /// Wrap a handle as is: no header, no newline repair.
    #[cfg(test)]
    pub fn over(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            csv: csv::WriterBuilder::new().has_headers(false).from_writer(file),
        }
    }

    pub fn append(&mut self, record: &ProcessedRecord) -> Result<(), CrawlError> {
        self.csv
            .serialize(record)
            .map_err(|e| CrawlError::write_failure(&self.path, e))?;
        self.sync()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sync(&mut self) -> Result<(), CrawlError> {
        self.csv
            .flush()
            .and_then(|()| self.csv.get_ref().sync_data())
            .map_err(|e| CrawlError::write_failure(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;

    use super::*;
    use crate::progress::load_records;
    use crate::record::Detection;

    #[test]
    fn creates_table_with_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");

        let mut w = ResultWriter::open(&path).unwrap();
        w.append(&ProcessedRecord::new("a.example", Detection::Yes, &Map::new()))
            .unwrap();
        drop(w);

        let mut w = ResultWriter::open(&path).unwrap();
        w.append(&ProcessedRecord::new("b.example", Detection::No, &Map::new()))
            .unwrap();
        drop(w);

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("domain,is_wordpress").count(), 1);
        let rows = load_records(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].domain, "b.example");
    }

    #[test]
    fn existing_bytes_are_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let before = "domain,is_wordpress,metadata,checked_at\n\
                      old.example,no,{},2026-01-01T00:00:00Z\n";
        fs::write(&path, before).unwrap();

        let mut w = ResultWriter::open(&path).unwrap();
        let mut meta = Map::new();
        meta.insert("theme".into(), "astra".into());
        w.append(&ProcessedRecord::new("new.example", Detection::Yes, &meta))
            .unwrap();

        let after = fs::read_to_string(&path).unwrap();
        assert!(after.starts_with(before));
        let rows = load_records(&path).unwrap();
        assert_eq!(rows[1].metadata, r#"{"theme":"astra"}"#);
    }

    #[test]
    fn unterminated_last_line_gets_a_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(
            &path,
            "domain,is_wordpress,metadata,checked_at\nold.example,no,{},2026-01-01T00:00:00Z",
        )
        .unwrap();

        let mut w = ResultWriter::open(&path).unwrap();
        w.append(&ProcessedRecord::new("new.example", Detection::Unknown, &Map::new()))
            .unwrap();

        let rows = load_records(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].is_wordpress, Detection::Unknown);
    }

    #[test]
    fn blank_table_gets_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "\n \n").unwrap();

        let mut w = ResultWriter::open(&path).unwrap();
        w.append(&ProcessedRecord::new("a.example", Detection::No, &Map::new()))
            .unwrap();
        drop(w);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("domain,is_wordpress,metadata,checked_at\n"), "{text:?}");
        let rows = load_records(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].domain, "a.example");
    }

    #[test]
    fn unwritable_path_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = ResultWriter::open(dir.path()).err().unwrap();
        assert!(matches!(err, CrawlError::WriteFailure { .. }));
    }
}
