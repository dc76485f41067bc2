//! Trace files: the text format with one `timestamp;key;size` line per request,
//! and the binary `.events` format of fixed-size little-endian records.

use std::{
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use proj_models::{codec::Codec, Request, Trace, MAX_TRACE_LEN};
use tracing::{info, warn};

use crate::error::Result;

fn custom_reader_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .delimiter(b';')
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All);
    builder
}

fn record_to_request(record: &csv::StringRecord) -> Option<Request> {
    let timestamp = record.get(0)?.parse().ok()?;
    let key = record.get(1)?.parse().ok()?;
    let size = record.get(2)?.parse().ok()?;
    Some(Request {
        timestamp,
        key,
        size,
    })
}

/// Read a text trace. Malformed lines are skipped; reading stops after
/// [`MAX_TRACE_LEN`] requests.
pub fn read_text_trace<R: Read>(reader: R) -> Result<Trace> {
    let mut reader = custom_reader_builder().from_reader(reader);
    let mut requests = Vec::new();
    let mut skipped = 0;
    for record in reader.records() {
        let record = record?;
        match record_to_request(&record) {
            Some(request) => requests.push(request),
            None => {
                skipped += 1;
                warn!("skipping malformed trace line {:?}", record);
            }
        }
        if requests.len() == MAX_TRACE_LEN {
            warn!("trace is capped at {} requests", MAX_TRACE_LEN);
            break;
        }
    }
    if skipped > 0 {
        warn!("skipped {} malformed lines", skipped);
    }
    Ok(Trace::new(requests))
}

pub fn write_text_trace<W: Write>(mut writer: W, trace: &Trace) -> std::io::Result<()> {
    for request in trace.iter() {
        writeln!(
            writer,
            "{};{};{}",
            request.timestamp, request.key, request.size
        )?;
    }
    writer.flush()
}

/// Read a binary events file. A trailing partial record is ignored.
pub fn read_events<R: Read>(reader: R) -> Result<Trace> {
    let requests = Request::repeat_read_till_end(reader)
        .take(MAX_TRACE_LEN)
        .collect::<std::io::Result<Vec<_>>>()?;
    Ok(Trace::new(requests))
}

pub fn write_events<W: Write>(mut writer: W, trace: &Trace) -> std::io::Result<()> {
    Request::repeat_write_till_end(&mut writer, trace.iter())?;
    writer.flush()
}

/// Load a trace, picking the format from the extension: `.events` is binary,
/// anything else is text.
pub fn load_trace_file<P: AsRef<Path>>(path: P) -> Result<Trace> {
    let path = path.as_ref();
    let reader = BufReader::new(std::fs::File::open(path)?);
    let trace = match path.extension().and_then(|ext| ext.to_str()) {
        Some("events") => read_events(reader)?,
        _ => read_text_trace(reader)?,
    };
    info!("loaded {} requests from {}", trace.len(), path.display());
    Ok(trace)
}

pub fn save_events_file<P: AsRef<Path>>(path: P, trace: &Trace) -> Result<()> {
    let writer = BufWriter::new(std::fs::File::create(path)?);
    write_events(writer, trace)?;
    Ok(())
}
