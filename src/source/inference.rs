//! Schema inference over newline-delimited JSON documents.
//!
//! Uses Arrow's JSON inference across every record of every matched file,
//! so the resulting schema is the union of all fields seen. Numeric widening
//! follows Arrow (`Int64` mixed with `Float64` becomes `Float64`).

use std::io::{BufReader, Read};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::json::reader::infer_json_schema;
use tracing::debug;

use crate::error::ReaderError;

/// Infer one schema from a set of cleaned NDJSON documents.
///
/// Each document must end with a newline.
pub fn infer_schema(documents: &[Vec<u8>]) -> Result<SchemaRef, ReaderError> {
    let chained = documents.iter().fold(
        Box::new(std::io::empty()) as Box<dyn Read + '_>,
        |acc, doc| Box::new(acc.chain(doc.as_slice())) as Box<dyn Read + '_>,
    );

    let (schema, records) = infer_json_schema(BufReader::new(chained), None).map_err(|e| {
        ReaderError::Inference {
            message: e.to_string(),
        }
    })?;

    if records == 0 {
        return Err(ReaderError::Inference {
            message: format!("no records found in {} file(s)", documents.len()),
        });
    }

    debug!(
        "Inferred {} fields from {} records: {:?}",
        schema.fields().len(),
        records,
        schema.fields().iter().map(|f| f.name()).collect::<Vec<_>>()
    );

    Ok(Arc::new(schema))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;

    fn doc(lines: &[&str]) -> Vec<u8> {
        let mut text = lines.join("\n");
        text.push('\n');
        text.into_bytes()
    }

    #[test]
    fn test_union_of_fields_across_documents() {
        let schema = infer_schema(&[
            doc(&[r#"{"song_id": "SOA", "year": 0}"#]),
            doc(&[r#"{"song_id": "SOB", "num_songs": 1, "title": "Elena"}"#]),
        ])
        .unwrap();

        for name in ["song_id", "year", "num_songs", "title"] {
            assert!(schema.field_with_name(name).is_ok(), "missing {name}");
        }
    }

    #[test]
    fn test_numeric_widening() {
        let schema = infer_schema(&[
            doc(&[r#"{"artist_latitude": 35}"#]),
            doc(&[r#"{"artist_latitude": 40.71455}"#]),
        ])
        .unwrap();

        assert_eq!(
            schema.field_with_name("artist_latitude").unwrap().data_type(),
            &DataType::Float64
        );
    }

    #[test]
    fn test_all_null_field_is_kept() {
        let schema = infer_schema(&[doc(&[
            r#"{"artist_longitude": null, "title": "x"}"#,
            r#"{"artist_longitude": null, "title": "y"}"#,
        ])])
        .unwrap();

        assert!(schema.field_with_name("artist_longitude").is_ok());
    }

    #[test]
    fn test_empty_documents_error() {
        let err = infer_schema(&[Vec::new(), Vec::new()]).unwrap_err();
        assert!(matches!(err, ReaderError::Inference { .. }));
    }
}
