use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::domain::Candidate;
use crate::error::CrawlError;

const HEADER_NAMES: &[&str] = &["domain", "name", "idn", "host"];

/// Load candidates from the first column of a delimited file, in file order.
///
/// A leading header row is recognized by name and skipped, as are blank rows.
/// Duplicates are returned as-is; the skip-set takes care of them.
pub fn load_candidates(path: &Path, delimiter: u8) -> Result<Vec<Candidate>, CrawlError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| {
            if is_not_found(&e) {
                CrawlError::InputNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                CrawlError::InputUnreadable {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

    let mut candidates = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| CrawlError::InputUnreadable {
            path: path.to_path_buf(),
            source: e,
        })?;
        let Some(first) = record.get(0).map(str::trim) else {
            continue;
        };
        if first.is_empty() {
            continue;
        }
        if i == 0 && HEADER_NAMES.iter().any(|h| first.eq_ignore_ascii_case(h)) {
            debug!("Skipping header row in {}", path.display());
            continue;
        }
        candidates.push(Candidate::new(first));
    }

    info!("Loaded {} candidates from {}", candidates.len(), path.display());
    Ok(candidates)
}

pub(crate) fn is_not_found(e: &csv::Error) -> bool {
    matches!(e.kind(), csv::ErrorKind::Io(io) if io.kind() == io::ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_input(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn reads_first_column_in_order() {
        let f = write_input("domain,owner\nb.example,x\n\na.example,y\n , z\nb.example\n");
        let got = load_candidates(f.path(), b',').unwrap();
        let raws: Vec<_> = got.iter().map(Candidate::raw).collect();
        assert_eq!(raws, ["b.example", "a.example", "b.example"]);
    }

    #[test]
    fn without_header_keeps_first_row() {
        let f = write_input("münchen.example\nzürich.example\n");
        let got = load_candidates(f.path(), b',').unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].key(), "xn--mnchen-3ya.example");
    }

    #[test]
    fn honours_delimiter() {
        let f = write_input("name;note\nexample.org;a;b\n");
        let got = load_candidates(f.path(), b';').unwrap();
        assert_eq!(got[0].raw(), "example.org");
    }

    #[test]
    fn missing_file_is_input_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_candidates(&dir.path().join("nope.csv"), b',').unwrap_err();
        assert!(matches!(err, CrawlError::InputNotFound { .. }));
    }
}
