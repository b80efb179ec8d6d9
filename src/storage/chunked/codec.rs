//! Arrow/Parquet codec for chunked-store data files
//!
//! - arrays: one non-nullable `values` column, elements in row-major order
//! - trajectory chunks: `time: Float64` plus `frame: List<dtype>`, one row
//!   per frame
//!
//! Files are written to a temporary sibling and renamed into place.

use crate::value::{ArrayData, DType, FrameLayout, Trajectory};
use crate::{Error, Result};
use arrow::array::{
    Array as ArrowArray, ArrayRef, BooleanArray, Float32Array, Float64Array, Int32Array,
    Int64Array, ListArray, UInt8Array,
};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

const VALUES_COLUMN: &str = "values";
const TIME_COLUMN: &str = "time";
const FRAME_COLUMN: &str = "frame";

const fn arrow_type(dtype: DType) -> DataType {
    match dtype {
        DType::Bool => DataType::Boolean,
        DType::UInt8 => DataType::UInt8,
        DType::Int32 => DataType::Int32,
        DType::Int64 => DataType::Int64,
        DType::Float32 => DataType::Float32,
        DType::Float64 => DataType::Float64,
    }
}

fn to_arrow(data: &ArrayData) -> ArrayRef {
    match data {
        ArrayData::Bool(v) => Arc::new(BooleanArray::from(v.clone())),
        ArrayData::UInt8(v) => Arc::new(UInt8Array::from(v.clone())),
        ArrayData::Int32(v) => Arc::new(Int32Array::from(v.clone())),
        ArrayData::Int64(v) => Arc::new(Int64Array::from(v.clone())),
        ArrayData::Float32(v) => Arc::new(Float32Array::from(v.clone())),
        ArrayData::Float64(v) => Arc::new(Float64Array::from(v.clone())),
    }
}

macro_rules! downcast_values {
    ($array:expr, $arrow:ty, $variant:ident) => {
        $array
            .as_any()
            .downcast_ref::<$arrow>()
            .map(|a| ArrayData::$variant(a.values().to_vec()))
    };
}

fn from_arrow(array: &dyn ArrowArray, dtype: DType, file: &Path) -> Result<ArrayData> {
    let data = match dtype {
        DType::Bool => array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .map(|a| ArrayData::Bool(a.values().iter().collect())),
        DType::UInt8 => downcast_values!(array, UInt8Array, UInt8),
        DType::Int32 => downcast_values!(array, Int32Array, Int32),
        DType::Int64 => downcast_values!(array, Int64Array, Int64),
        DType::Float32 => downcast_values!(array, Float32Array, Float32),
        DType::Float64 => downcast_values!(array, Float64Array, Float64),
    };
    data.ok_or_else(|| {
        Error::format(
            file.display(),
            format!("expected {dtype} column, found {}", array.data_type()),
        )
    })
}

fn write_batch(path: &Path, batch: &RecordBatch) -> Result<()> {
    let storage_err = |e: &dyn std::fmt::Display| {
        Error::Storage(format!("{}: failed to write Parquet file: {e}", path.display()))
    };
    let tmp = path.with_extension("parquet.tmp");
    let file = File::create(&tmp).map_err(|e| Error::io(tmp.display(), &e))?;
    let mut writer =
        ArrowWriter::try_new(file, batch.schema(), None).map_err(|e| storage_err(&e))?;
    writer.write(batch).map_err(|e| storage_err(&e))?;
    writer.close().map_err(|e| storage_err(&e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path.display(), &e))
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path).map_err(|e| Error::io(path.display(), &e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::format(path.display(), format!("failed to parse Parquet file: {e}")))?;
    let reader = builder
        .build()
        .map_err(|e| Error::format(path.display(), format!("failed to create Parquet reader: {e}")))?;
    reader
        .map(|batch| {
            batch.map_err(|e| {
                Error::format(path.display(), format!("failed to read record batch: {e}"))
            })
        })
        .collect()
}

fn column<'a>(batch: &'a RecordBatch, name: &str, path: &Path) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::format(path.display(), format!("missing `{name}` column")))
}

/// Write a flat element buffer.
pub(super) fn write_array(path: &Path, data: &ArrayData) -> Result<()> {
    let schema = Schema::new(vec![Field::new(
        VALUES_COLUMN,
        arrow_type(data.dtype()),
        false,
    )]);
    let batch = RecordBatch::try_new(Arc::new(schema), vec![to_arrow(data)])
        .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
    write_batch(path, &batch)
}

/// Read a flat element buffer.
pub(super) fn read_array(path: &Path, dtype: DType) -> Result<ArrayData> {
    let mut data = ArrayData::empty(dtype);
    for batch in read_batches(path)? {
        let values = column(&batch, VALUES_COLUMN, path)?;
        data.extend_from(&from_arrow(values.as_ref(), dtype, path)?);
    }
    Ok(data)
}

/// Write every frame of `chunk` as one row.
pub(super) fn write_chunk(path: &Path, chunk: &Trajectory) -> Result<()> {
    let layout = chunk.layout();
    let item = Arc::new(Field::new("item", arrow_type(layout.dtype), false));
    let offsets =
        OffsetBuffer::<i32>::from_lengths(std::iter::repeat(layout.element_count()).take(chunk.len()));
    let frames = ListArray::try_new(item.clone(), offsets, to_arrow(chunk.data()), None)
        .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
    let schema = Schema::new(vec![
        Field::new(TIME_COLUMN, DataType::Float64, false),
        Field::new(FRAME_COLUMN, DataType::List(item), false),
    ]);
    let times: ArrayRef = Arc::new(Float64Array::from(chunk.times().to_vec()));
    let batch = RecordBatch::try_new(Arc::new(schema), vec![times, Arc::new(frames)])
        .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
    write_batch(path, &batch)
}

/// Read the time points and frame buffer of one chunk file.
pub(super) fn read_chunk(path: &Path, layout: &FrameLayout) -> Result<(Vec<f64>, ArrayData)> {
    let mut times = Vec::new();
    let mut data = ArrayData::empty(layout.dtype);
    for batch in read_batches(path)? {
        let time_column = column(&batch, TIME_COLUMN, path)?;
        let batch_times = time_column
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| Error::format(path.display(), "`time` column is not float64"))?;
        times.extend_from_slice(batch_times.values());

        let frames = column(&batch, FRAME_COLUMN, path)?
            .as_any()
            .downcast_ref::<ListArray>()
            .ok_or_else(|| Error::format(path.display(), "`frame` column is not a list"))?;
        let offsets = frames.value_offsets();
        let (Some(&first), Some(&last)) = (offsets.first(), offsets.last()) else {
            continue;
        };
        let start = usize::try_from(first).unwrap_or_default();
        let end = usize::try_from(last).unwrap_or_default();
        let values = frames.values().slice(start, end.saturating_sub(start));
        data.extend_from(&from_arrow(values.as_ref(), layout.dtype, path)?);
    }
    if data.len() != times.len() * layout.element_count() {
        return Err(Error::format(
            path.display(),
            format!(
                "chunk holds {} elements for {} frames of {layout}",
                data.len(),
                times.len()
            ),
        ));
    }
    Ok((times, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Array;
    use tempfile::TempDir;

    #[test]
    fn test_array_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.parquet");
        let data = ArrayData::Bool(vec![true, false, true]);
        write_array(&path, &data).unwrap();
        assert_eq!(read_array(&path, DType::Bool).unwrap(), data);
        assert!(!dir.path().join("data.parquet.tmp").exists());
    }

    #[test]
    fn test_empty_array_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.parquet");
        write_array(&path, &ArrayData::Int32(Vec::new())).unwrap();
        assert!(read_array(&path, DType::Int32).unwrap().is_empty());
    }

    #[test]
    fn test_chunk_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunk-000000.parquet");
        let layout = FrameLayout::new(vec![2, 2], DType::Float32);
        let frames = [
            Array::new(vec![2, 2], ArrayData::Float32(vec![1.0, 2.0, 3.0, 4.0])).unwrap(),
            Array::new(vec![2, 2], ArrayData::Float32(vec![5.0, 6.0, 7.0, 8.0])).unwrap(),
        ];
        let chunk = Trajectory::from_frames(layout.clone(), &frames).unwrap();
        write_chunk(&path, &chunk).unwrap();

        let (times, data) = read_chunk(&path, &layout).unwrap();
        assert_eq!(times, vec![0.0, 1.0]);
        assert_eq!(data, *chunk.data());
    }

    #[test]
    fn test_wrong_dtype_is_format_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.parquet");
        write_array(&path, &ArrayData::Int64(vec![1, 2])).unwrap();
        assert!(matches!(
            read_array(&path, DType::Float64),
            Err(Error::Format { .. })
        ));
    }
}
