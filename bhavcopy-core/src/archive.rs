//! Archive integrity check, member extraction and shape probing.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read};
use zip::ZipArchive;

const ZIP_MAGIC: &[u8] = b"PK";
const MAX_CAPACITY_HINT: u64 = 64 << 20;

/// `(rows, cols)` of a tabular artifact, header excluded from rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub rows: usize,
    pub cols: usize,
}

impl Shape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.rows, self.cols)
    }
}

/// One member pulled out of a fetched archive.
#[derive(Debug, Clone)]
pub struct ExtractedMember {
    pub name: String,
    pub bytes: Vec<u8>,
    pub shape: Shape,
}

/// Open `payload` as a zip archive, or fail with `Integrity`.
fn open(payload: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>, PipelineError> {
    if !payload.starts_with(ZIP_MAGIC) {
        let preview: String = String::from_utf8_lossy(&payload[..payload.len().min(40)])
            .chars()
            .filter(|c| !c.is_control())
            .collect();
        return Err(PipelineError::Integrity(format!(
            "payload is not a zip archive ({} bytes, starts with {preview:?})",
            payload.len()
        )));
    }
    ZipArchive::new(Cursor::new(payload))
        .map_err(|e| PipelineError::Integrity(format!("corrupt zip archive: {e}")))
}

/// Extract the expected member from a zip payload.
///
/// Falls back to the only `.csv` member when the expected name is missing,
/// since the exchange has renamed members inside otherwise valid archives.
pub fn extract_member(payload: &[u8], expected: &str) -> Result<ExtractedMember, PipelineError> {
    let mut archive = open(payload)?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let name = if names.iter().any(|n| n == expected) {
        expected.to_string()
    } else {
        let csvs: Vec<&String> = names
            .iter()
            .filter(|n| n.to_ascii_lowercase().ends_with(".csv"))
            .collect();
        match csvs.as_slice() {
            [only] => (*only).clone(),
            [] => {
                return Err(PipelineError::ExtractionShape(format!(
                    "{expected} not found in archive (members: {})",
                    names.join(", ")
                )))
            }
            _ => {
                return Err(PipelineError::ExtractionShape(format!(
                    "{expected} not found and archive has {} csv members",
                    csvs.len()
                )))
            }
        }
    };

    let mut entry = archive
        .by_name(&name)
        .map_err(|e| PipelineError::Integrity(format!("cannot open member {name}: {e}")))?;
    let mut bytes = Vec::with_capacity(capacity_hint(entry.size()));
    entry
        .read_to_end(&mut bytes)
        .map_err(|e| PipelineError::Integrity(format!("cannot read member {name}: {e}")))?;

    let shape = probe_shape(&bytes)?;
    Ok(ExtractedMember { name, bytes, shape })
}

/// Buffer size for a member whose header declares `declared` bytes.
/// The declared size is untrusted, so it only seeds the allocation up to a cap.
fn capacity_hint(declared: u64) -> usize {
    usize::try_from(declared.min(MAX_CAPACITY_HINT)).unwrap_or(0)
}

/// Count data rows and header columns; both must be non-zero and every row
/// must have as many fields as the header.
pub fn probe_shape(bytes: &[u8]) -> Result<Shape, PipelineError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(PipelineError::ExtractionShape("extracted file is empty".into()));
    }
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(bytes);

    let cols = reader
        .headers()
        .map_err(|e| PipelineError::ExtractionShape(format!("unreadable header: {e}")))?
        .len();
    let mut rows = 0;
    for record in reader.records() {
        record.map_err(|e| PipelineError::ExtractionShape(format!("row {}: {e}", rows + 1)))?;
        rows += 1;
    }

    if rows == 0 || cols == 0 {
        return Err(PipelineError::ExtractionShape(format!(
            "extracted file has shape ({rows}, {cols})"
        )));
    }
    Ok(Shape::new(rows, cols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_of(members: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            for (name, body) in members {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(body.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    const CSV: &str = "SYMBOL, SERIES, DATE1, CLOSE_PRICE\nINFY, EQ, 01-Jan-2025, 1900.5\nTCS, EQ, 01-Jan-2025, 4100\n";

    #[test]
    fn extracts_expected_member() {
        let payload = zip_of(&[("readme.txt", "x"), ("sec_bhavdata_full_01012025.csv", CSV)]);
        let member = extract_member(&payload, "sec_bhavdata_full_01012025.csv").unwrap();
        assert_eq!(member.name, "sec_bhavdata_full_01012025.csv");
        assert_eq!(member.shape, Shape::new(2, 4));
        assert_eq!(member.bytes, CSV.as_bytes());
    }

    #[test]
    fn falls_back_to_single_csv_member() {
        let payload = zip_of(&[("Bhav_renamed.CSV", CSV)]);
        let member = extract_member(&payload, "sec_bhavdata_full_01012025.csv").unwrap();
        assert_eq!(member.name, "Bhav_renamed.CSV");
    }

    #[test]
    fn html_error_page_fails_integrity() {
        let err = extract_member(b"<html>Access Denied</html>", "a.csv").unwrap_err();
        assert_eq!(err.kind(), "integrity");
    }

    #[test]
    fn truncated_zip_fails_integrity() {
        let payload = zip_of(&[("a.csv", CSV)]);
        let err = extract_member(&payload[..payload.len() / 2], "a.csv").unwrap_err();
        assert_eq!(err.kind(), "integrity");
    }

    #[test]
    fn header_only_member_is_a_shape_error() {
        let payload = zip_of(&[("a.csv", "SYMBOL,SERIES\n")]);
        let err = extract_member(&payload, "a.csv").unwrap_err();
        assert_eq!(err.kind(), "extraction_shape");

        let payload = zip_of(&[("a.csv", "")]);
        assert_eq!(extract_member(&payload, "a.csv").unwrap_err().kind(), "extraction_shape");
    }

    #[test]
    fn ragged_rows_are_a_shape_error() {
        let ragged = "SYMBOL,SERIES,DATE1,CLOSE_PRICE\n\
                      INFY,EQ,02-Jan-2025,1900,EXTRA,MORE\n\
                      TCS,EQ\n";
        let payload = zip_of(&[("a.csv", ragged)]);
        let err = extract_member(&payload, "a.csv").unwrap_err();
        assert_eq!(err.kind(), "extraction_shape");

        let short = "SYMBOL,SERIES,DATE1,CLOSE_PRICE\nINFY,EQ,02-Jan-2025,1900\nTCS,EQ\n";
        assert_eq!(probe_shape(short.as_bytes()).unwrap_err().kind(), "extraction_shape");
    }

    #[test]
    fn declared_member_size_is_capped() {
        assert_eq!(capacity_hint(1_024), 1_024);
        assert_eq!(capacity_hint(u64::MAX), MAX_CAPACITY_HINT as usize);
    }

    #[test]
    fn missing_member_among_many() {
        let payload = zip_of(&[("x.csv", CSV), ("y.csv", CSV)]);
        let err = extract_member(&payload, "a.csv").unwrap_err();
        assert_eq!(err.kind(), "extraction_shape");
    }
}
