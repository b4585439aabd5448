//! CSV landing files with encoding, delimiter and type auto-detection.
//!
//! Landing zones receive exports in whatever encoding the producer used
//! (UTF-8, ISO-8859-1, Windows-1252). Each file is decoded to UTF-8, its
//! delimiter guessed from the header line, and the column types inferred
//! over all files of the glob:
//!
//! ```text
//! int64 -> float64 -> boolean -> timestamp -> utf8
//! ```
//!
//! The first type every non-empty cell parses as wins. Empty cells are null.

use std::path::Path;
use tracing::debug;

use crate::error::{EtlResult, StorageError, StorageResult};
use crate::frame::{DataFrame, DataType, Field, Frame, Schema, Value};

use super::files::resolve_glob;

/// Raw text cells of one CSV file.
#[derive(Debug, Clone)]
pub struct CsvContent {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Detected encoding.
    pub encoding: String,
    /// Detected delimiter.
    pub delimiter: char,
}

/// Detect the encoding of raw bytes using chardet.
pub fn detect_encoding(bytes: &[u8]) -> String {
    let charset = chardet::detect(bytes).0;
    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to a string. Unknown encodings fall back to lossy UTF-8.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "iso-8859-1" | "latin-1" | "latin1" => encoding_rs::ISO_8859_15.decode(bytes).0.into_owned(),
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Pick the separator occurring most often in the first line.
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");
    let mut best = (',', 0);
    for sep in [',', ';', '\t', '|'] {
        let count = first_line.matches(sep).count();
        if count > best.1 {
            best = (sep, count);
        }
    }
    best.0
}

/// Parse decoded CSV text.
pub fn parse_content(content: &str, delimiter: char, origin: &str) -> StorageResult<CsvContent> {
    let csv_error = |message: String| StorageError::Csv {
        path: origin.to_string(),
        message,
    };
    let delimiter_byte = u8::try_from(delimiter)
        .map_err(|_| csv_error(format!("delimiter '{}' is not a single byte", delimiter)))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter_byte)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.trim_start_matches('\u{feff}').as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| csv_error(e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.iter().all(String::is_empty) {
        return Err(csv_error("no header row".into()));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_error(e.to_string()))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let row = (0..headers.len())
            .map(|i| record.get(i).unwrap_or("").to_string())
            .collect();
        rows.push(row);
    }

    Ok(CsvContent {
        headers,
        rows,
        encoding: "utf-8".to_string(),
        delimiter,
    })
}

/// Read one file with encoding and delimiter detection.
pub fn read_csv_file(path: &Path) -> StorageResult<CsvContent> {
    let origin = path.display().to_string();
    let bytes = std::fs::read(path).map_err(|e| StorageError::io(origin.clone(), e))?;
    let encoding = detect_encoding(&bytes);
    let content = decode_content(&bytes, &encoding);
    let delimiter = detect_delimiter(&content);
    let mut parsed = parse_content(&content, delimiter, &origin)?;
    parsed.encoding = encoding;
    debug!(
        file = %origin,
        encoding = %parsed.encoding,
        delimiter = %parsed.delimiter.escape_default(),
        rows = parsed.rows.len(),
        "Parsed CSV file"
    );
    Ok(parsed)
}

/// Narrowest type every non-empty cell parses as.
pub fn infer_type<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> DataType {
    const CANDIDATES: [DataType; 4] = [
        DataType::Int64,
        DataType::Float64,
        DataType::Boolean,
        DataType::Timestamp,
    ];
    CANDIDATES
        .into_iter()
        .find(|&dt| {
            let mut seen = false;
            let all = cells.clone().filter(|c| !c.trim().is_empty()).all(|c| {
                seen = true;
                Value::parse_as(c, dt).is_some()
            });
            seen && all
        })
        .unwrap_or(DataType::Utf8)
}

/// Type and stack parsed files. All files must share the same header.
pub fn to_data_frame(files: &[(String, CsvContent)]) -> StorageResult<DataFrame> {
    let Some((first_origin, first)) = files.first() else {
        return Ok(DataFrame::default());
    };
    for (origin, file) in &files[1..] {
        if file.headers != first.headers {
            return Err(StorageError::Csv {
                path: origin.clone(),
                message: format!(
                    "header [{}] differs from '{}' [{}]",
                    file.headers.join(", "),
                    first_origin,
                    first.headers.join(", ")
                ),
            });
        }
    }

    let all_rows = || files.iter().flat_map(|(_, f)| f.rows.iter());
    let fields = first
        .headers
        .iter()
        .enumerate()
        .map(|(i, name)| Field::new(name.clone(), infer_type(all_rows().map(move |r| r[i].as_str()))))
        .collect::<Vec<_>>();
    let schema = Schema::new(fields).map_err(|e| StorageError::Csv {
        path: first_origin.clone(),
        message: e.to_string(),
    })?;

    let rows = all_rows()
        .map(|row| {
            schema
                .fields()
                .iter()
                .zip(row)
                .map(|(field, cell)| Value::parse_as(cell, field.data_type).unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    DataFrame::from_rows(&schema, rows).map_err(|e| StorageError::Csv {
        path: first_origin.clone(),
        message: e.to_string(),
    })
}

/// Read every CSV file matching `glob_uri` into one frame.
pub fn source_csv(glob_uri: &str) -> EtlResult<Frame> {
    let files = resolve_glob(glob_uri)?
        .into_iter()
        .map(|path| Ok((path.display().to_string(), read_csv_file(&path)?)))
        .collect::<StorageResult<Vec<_>>>()?;
    let df = to_data_frame(&files)?;
    debug!(source = %glob_uri, files = files.len(), rows = df.height(), "Loaded CSV source");
    Ok(Frame::Eager(df))
}
