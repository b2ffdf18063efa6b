//! Parquet file writer.
//!
//! Encodes Arrow RecordBatches into in-memory Parquet files with
//! configurable compression, flushing row groups by size and rolling to a
//! new file once the target file size is reached.

use bytes::{BufMut, Bytes, BytesMut};
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use snafu::prelude::*;
use std::io::Write;
use std::sync::{Arc, Mutex};

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;

use crate::config::{MB, OutputConfig, ParquetCompression};
use crate::error::{
    BufferInUseSnafu, BufferLockSnafu, ParquetError, WriteSnafu, WriterCreateSnafu,
    WriterUnavailableSnafu,
};

/// Rows handed to the Arrow writer at a time, so size checks run often
/// enough to roll inside one large batch.
const WRITE_CHUNK_ROWS: usize = 8192;

/// Initial buffer capacity; grows on demand.
const INITIAL_BUFFER_CAPACITY: usize = MB;

/// A buffer with interior mutability for the ArrowWriter.
#[derive(Clone)]
struct SharedBuffer {
    buffer: Arc<Mutex<bytes::buf::Writer<BytesMut>>>,
}

impl SharedBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(BytesMut::with_capacity(capacity).writer())),
        }
    }

    fn into_inner(self) -> Result<BytesMut, ParquetError> {
        let mutex = Arc::into_inner(self.buffer).context(BufferInUseSnafu)?;
        let writer = mutex.into_inner().map_err(|_| BufferLockSnafu.build())?;
        Ok(writer.into_inner())
    }

    fn len(&self) -> Result<usize, ParquetError> {
        let guard = self.buffer.lock().map_err(|_| BufferLockSnafu.build())?;
        Ok(guard.get_ref().len())
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut buffer = self.buffer.try_lock().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::WouldBlock, "buffer lock contention")
        })?;
        Write::write(&mut *buffer, buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Configuration for the Parquet writer.
#[derive(Debug, Clone)]
pub struct ParquetWriterConfig {
    /// Roll to a new file once the encoded size reaches this many bytes.
    pub target_file_size: usize,
    /// Flush a row group once its in-progress size exceeds this many bytes.
    pub row_group_size_bytes: usize,
    /// Compression codec.
    pub compression: ParquetCompression,
}

impl Default for ParquetWriterConfig {
    fn default() -> Self {
        Self {
            target_file_size: 128 * MB,
            row_group_size_bytes: 128 * MB,
            compression: ParquetCompression::Snappy,
        }
    }
}

impl From<&OutputConfig> for ParquetWriterConfig {
    fn from(output: &OutputConfig) -> Self {
        Self {
            target_file_size: output.file_size_bytes(),
            row_group_size_bytes: output.row_group_size_bytes,
            compression: output.compression,
        }
    }
}

impl ParquetWriterConfig {
    fn writer_properties(&self) -> WriterProperties {
        let compression = match self.compression {
            ParquetCompression::Uncompressed => Compression::UNCOMPRESSED,
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Gzip => Compression::GZIP(GzipLevel::default()),
            ParquetCompression::Zstd => Compression::ZSTD(ZstdLevel::default()),
            ParquetCompression::Lz4 => Compression::LZ4,
        };
        WriterProperties::builder()
            .set_compression(compression)
            .build()
    }
}

/// A completed in-memory Parquet file.
#[derive(Debug, Clone)]
pub struct FinishedFile {
    /// The encoded file.
    pub bytes: Bytes,
    /// Number of records in the file.
    pub record_count: usize,
}

/// Parquet writer that encodes batches into one or more in-memory files.
pub struct ParquetWriter {
    schema: SchemaRef,
    config: ParquetWriterConfig,
    writer: Option<ArrowWriter<SharedBuffer>>,
    buffer: SharedBuffer,
    records_in_file: usize,
    finished_files: Vec<FinishedFile>,
}

impl ParquetWriter {
    /// Create a new Parquet writer.
    pub fn new(schema: SchemaRef, config: ParquetWriterConfig) -> Result<Self, ParquetError> {
        let buffer = SharedBuffer::new(INITIAL_BUFFER_CAPACITY);
        let writer = Self::create_writer(&schema, &config, buffer.clone())?;

        Ok(Self {
            schema,
            config,
            writer: Some(writer),
            buffer,
            records_in_file: 0,
            finished_files: Vec::new(),
        })
    }

    fn create_writer(
        schema: &SchemaRef,
        config: &ParquetWriterConfig,
        buffer: SharedBuffer,
    ) -> Result<ArrowWriter<SharedBuffer>, ParquetError> {
        ArrowWriter::try_new(buffer, schema.clone(), Some(config.writer_properties()))
            .context(WriterCreateSnafu)
    }

    /// Encoded bytes plus the row group still held in memory.
    fn current_file_size(&self) -> Result<usize, ParquetError> {
        let in_progress = self
            .writer
            .as_ref()
            .map(|w| w.in_progress_size())
            .unwrap_or_default();
        Ok(self.buffer.len()? + in_progress)
    }

    /// Write a batch, rolling files as the size limit is reached.
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), ParquetError> {
        let mut offset = 0;
        while offset < batch.num_rows() {
            let len = WRITE_CHUNK_ROWS.min(batch.num_rows() - offset);
            self.write_chunk(&batch.slice(offset, len))?;
            offset += len;
        }
        Ok(())
    }

    fn write_chunk(&mut self, chunk: &RecordBatch) -> Result<(), ParquetError> {
        let writer = self.writer.as_mut().context(WriterUnavailableSnafu)?;
        writer.write(chunk).context(WriteSnafu)?;
        self.records_in_file += chunk.num_rows();

        if writer.in_progress_size() > self.config.row_group_size_bytes {
            tracing::debug!(
                "Flushing row group of {} bytes",
                writer.in_progress_size()
            );
            writer.flush().context(WriteSnafu)?;
        }

        if self.current_file_size()? >= self.config.target_file_size {
            tracing::debug!(
                "Rolling file at {} records ({} bytes)",
                self.records_in_file,
                self.current_file_size()?
            );
            self.roll_file()?;
        }

        Ok(())
    }

    /// Close the current file and start a new one.
    fn roll_file(&mut self) -> Result<(), ParquetError> {
        let writer = self.writer.take().context(WriterUnavailableSnafu)?;
        writer.close().context(WriteSnafu)?;

        let bytes = std::mem::replace(
            &mut self.buffer,
            SharedBuffer::new(INITIAL_BUFFER_CAPACITY),
        )
        .into_inner()?
        .freeze();

        self.finished_files.push(FinishedFile {
            bytes,
            record_count: self.records_in_file,
        });

        self.writer = Some(Self::create_writer(
            &self.schema,
            &self.config,
            self.buffer.clone(),
        )?);
        self.records_in_file = 0;

        Ok(())
    }

    /// Close the writer and return every finished file.
    ///
    /// A trailing file with no records is discarded.
    pub fn close(mut self) -> Result<Vec<FinishedFile>, ParquetError> {
        let writer = self.writer.take().context(WriterUnavailableSnafu)?;
        writer.close().context(WriteSnafu)?;

        if self.records_in_file > 0 {
            let bytes = self.buffer.into_inner()?.freeze();
            self.finished_files.push(FinishedFile {
                bytes,
                record_count: self.records_in_file,
            });
        }

        Ok(self.finished_files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn users_batch(rows: usize) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("user_id", DataType::Utf8, true),
            Field::new("session_id", DataType::Int64, true),
        ]));
        let ids: Vec<String> = (0..rows).map(|i| format!("user-{i}")).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(Int64Array::from_iter_values(0..rows as i64)),
            ],
        )
        .unwrap()
    }

    fn read_back(file: &FinishedFile) -> usize {
        ParquetRecordBatchReaderBuilder::try_new(file.bytes.clone())
            .unwrap()
            .build()
            .unwrap()
            .map(|b| b.unwrap().num_rows())
            .sum()
    }

    #[test]
    fn test_single_file() {
        let batch = users_batch(100);
        let mut writer = ParquetWriter::new(batch.schema(), ParquetWriterConfig::default()).unwrap();
        writer.write_batch(&batch).unwrap();

        let files = writer.close().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].record_count, 100);
        assert_eq!(read_back(&files[0]), 100);
    }

    #[test]
    fn test_rolls_by_size() {
        let batch = users_batch(50_000);
        let config = ParquetWriterConfig {
            target_file_size: 64 * 1024,
            row_group_size_bytes: 16 * 1024,
            compression: ParquetCompression::Uncompressed,
        };
        let mut writer = ParquetWriter::new(batch.schema(), config).unwrap();
        writer.write_batch(&batch).unwrap();

        let files = writer.close().unwrap();
        assert!(files.len() > 1, "expected rolling, got {} file(s)", files.len());
        let total: usize = files.iter().map(|f| f.record_count).sum();
        assert_eq!(total, 50_000);
        let read: usize = files.iter().map(read_back).sum();
        assert_eq!(read, 50_000);
    }

    #[test]
    fn test_empty_writer_produces_no_files() {
        let batch = users_batch(0);
        let writer = ParquetWriter::new(batch.schema(), ParquetWriterConfig::default()).unwrap();
        assert!(writer.close().unwrap().is_empty());
    }

    #[test]
    fn test_every_codec_round_trips() {
        let batch = users_batch(10);
        for compression in [
            ParquetCompression::Uncompressed,
            ParquetCompression::Snappy,
            ParquetCompression::Gzip,
            ParquetCompression::Zstd,
            ParquetCompression::Lz4,
        ] {
            let config = ParquetWriterConfig {
                compression,
                ..ParquetWriterConfig::default()
            };
            let mut writer = ParquetWriter::new(batch.schema(), config).unwrap();
            writer.write_batch(&batch).unwrap();
            let files = writer.close().unwrap();
            assert_eq!(read_back(&files[0]), 10, "{compression:?}");
        }
    }
}
