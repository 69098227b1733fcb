use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;

use tracing::{info, warn};

use crate::domain::Candidate;
use crate::error::CrawlError;
use crate::record::{Detection, ProcessedRecord, RESULT_HEADER};

/// Read every row of the result table.
///
/// A missing, empty or whitespace-only file is a first run. Anything that does not parse is
/// fatal: guessing here would mean writing a second row for some domain.
pub fn load_records(path: &Path) -> Result<Vec<ProcessedRecord>, CrawlError> {
    let corrupt = |source: csv::Error| CrawlError::CorruptProgressFile {
        path: path.to_path_buf(),
        source,
    };

    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(corrupt(e.into())),
    };
    if is_blank(&mut file).map_err(|e| corrupt(e.into()))? {
        return Ok(Vec::new());
    }
    file.rewind().map_err(|e| corrupt(e.into()))?;
    let mut reader = csv::Reader::from_reader(file);

    let headers = reader.headers().map_err(corrupt)?;
    if headers.is_empty() {
        return Ok(Vec::new());
    }
    if !headers.iter().eq(RESULT_HEADER) {
        let msg = format!("unexpected header {:?}", headers.iter().collect::<Vec<_>>());
        return Err(corrupt(io::Error::new(io::ErrorKind::InvalidData, msg).into()));
    }

    reader
        .deserialize::<ProcessedRecord>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(corrupt)
}

/// True when everything from the current position on is whitespace.
pub fn is_blank(reader: impl Read) -> io::Result<bool> {
    for byte in BufReader::new(reader).bytes() {
        if !byte?.is_ascii_whitespace() {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Build the skip-set: normalized keys of every domain already recorded.
pub fn load_processed(path: &Path) -> Result<HashSet<String>, CrawlError> {
    let records = load_records(path)?;
    let mut seen = HashSet::with_capacity(records.len());
    for record in &records {
        let key = Candidate::new(record.domain.as_str()).key().to_string();
        if !seen.insert(key) {
            warn!("Duplicate row for {} in {}", record.domain, path.display());
        }
    }
    if !seen.is_empty() {
        info!("Found {} already processed domains in {}", seen.len(), path.display());
    }
    Ok(seen)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Summary {
    pub rows: usize,
    pub yes: usize,
    pub no: usize,
    pub unknown: usize,
}

pub fn summarize(records: &[ProcessedRecord]) -> Summary {
    records.iter().fold(
        Summary {
            rows: records.len(),
            ..Default::default()
        },
        |mut s, r| {
            match r.is_wordpress {
                Detection::Yes => s.yes += 1,
                Detection::No => s.no += 1,
                Detection::Unknown => s.unknown += 1,
            }
            s
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "domain,is_wordpress,metadata,checked_at\n";

    fn table(rows: &str) -> tempfile::NamedTempFile {
        let f = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(f.path(), format!("{HEADER}{rows}")).unwrap();
        f
    }

    #[test]
    fn missing_and_empty_tables_are_first_runs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_processed(&dir.path().join("out.csv")).unwrap().is_empty());

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, "").unwrap();
        assert!(load_processed(&empty).unwrap().is_empty());

        let header_only = table("");
        assert!(load_processed(header_only.path()).unwrap().is_empty());

        let blank = dir.path().join("blank.csv");
        std::fs::write(&blank, "\n  \r\n\n").unwrap();
        assert!(load_processed(&blank).unwrap().is_empty());
    }

    #[test]
    fn keys_are_normalized() {
        let f = table(
            "Bücher.example,yes,{},2026-01-01T00:00:00Z\n\
             other.example,unknown,\"{\"\"error\"\":\"\"timeout\"\"}\",2026-01-01T00:00:01Z\n",
        );
        let set = load_processed(f.path()).unwrap();
        assert!(set.contains("xn--bcher-kva.example"));
        assert!(set.contains("other.example"));
    }

    #[test]
    fn duplicates_are_tolerated() {
        let f = table(
            "a.example,no,{},2026-01-01T00:00:00Z\n\
             A.example,no,{},2026-01-01T00:00:01Z\n",
        );
        assert_eq!(load_processed(f.path()).unwrap().len(), 1);
    }

    #[test]
    fn malformed_rows_are_fatal() {
        for rows in [
            "a.example,maybe,{},2026-01-01T00:00:00Z\n",
            "a.example,yes,{}\n",
            "a.example,yes,{},yesterday\n",
        ] {
            let f = table(rows);
            let err = load_processed(f.path()).unwrap_err();
            assert!(matches!(err, CrawlError::CorruptProgressFile { .. }), "{rows}");
        }
    }

    #[test]
    fn foreign_header_is_fatal() {
        let f = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(f.path(), "name,domain\nAcme,acme.example\n").unwrap();
        assert!(matches!(
            load_processed(f.path()),
            Err(CrawlError::CorruptProgressFile { .. })
        ));
    }

    #[test]
    fn summary_counts_each_state() {
        let f = table(
            "a.example,yes,{},2026-01-01T00:00:00Z\n\
             b.example,no,{},2026-01-01T00:00:00Z\n\
             c.example,unknown,{},2026-01-01T00:00:00Z\n\
             d.example,yes,{},2026-01-01T00:00:00Z\n",
        );
        let s = summarize(&load_records(f.path()).unwrap());
        assert_eq!(
            s,
            Summary {
                rows: 4,
                yes: 2,
                no: 1,
                unknown: 1
            }
        );
    }
}
