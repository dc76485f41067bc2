//! Flat-file outputs of the estimators.

use std::io::Write;

use proj_models::KeyId;

use crate::{burstiness::BurstinessReport, verify::DelayEstimates};

/// Receives named scalars, optionally attributed to a key. `None` marks a value
/// that is undefined for that key.
pub trait ScalarSink {
    fn record(&mut self, name: &str, key: Option<KeyId>, value: Option<f64>)
        -> std::io::Result<()>;

    /// Several unnamed values at once, optionally led by a key.
    fn record_row(&mut self, key: Option<KeyId>, values: &[Option<f64>]) -> std::io::Result<()>;
}

/// Writes `name key value` (or `name value`) lines.
pub struct LineSink<W: Write> {
    writer: W,
}

impl<W: Write> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn finish(mut self) -> std::io::Result<W> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> ScalarSink for LineSink<W> {
    fn record(
        &mut self,
        name: &str,
        key: Option<KeyId>,
        value: Option<f64>,
    ) -> std::io::Result<()> {
        match key {
            Some(key) => writeln!(self.writer, "{} {} {}", name, key, format_scalar(value)),
            None => writeln!(self.writer, "{} {}", name, format_scalar(value)),
        }
    }

    fn record_row(&mut self, key: Option<KeyId>, values: &[Option<f64>]) -> std::io::Result<()> {
        let mut fields = key.map(|key| key.to_string()).into_iter().collect::<Vec<_>>();
        fields.extend(values.iter().map(|value| format_scalar(*value)));
        writeln!(self.writer, "{}", fields.join(" "))
    }
}

/// Keeps everything in memory.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemorySink {
    pub records: Vec<(String, Option<KeyId>, Option<f64>)>,
    pub rows: Vec<(Option<KeyId>, Vec<Option<f64>>)>,
}

impl ScalarSink for MemorySink {
    fn record(
        &mut self,
        name: &str,
        key: Option<KeyId>,
        value: Option<f64>,
    ) -> std::io::Result<()> {
        self.records.push((name.to_string(), key, value));
        Ok(())
    }

    fn record_row(&mut self, key: Option<KeyId>, values: &[Option<f64>]) -> std::io::Result<()> {
        self.rows.push((key, values.to_vec()));
        Ok(())
    }
}

/// Shortest round-trip digits, positional for `1e-4 <= |v| < 1e16` (always with a
/// fractional part) and `<mantissa>e<sign><at least two digits>` outside it, so
/// `1e-05`, `3.2e-07` and `1e+16`. Undefined values are `nan`.
pub fn format_scalar(value: Option<f64>) -> String {
    let v = match value {
        Some(v) if !v.is_nan() => v,
        _ => return "nan".to_string(),
    };
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let magnitude = v.abs();
    if magnitude == 0.0 || (1e-4..1e16).contains(&magnitude) {
        let positional = format!("{}", v);
        return if positional.contains('.') {
            positional
        } else {
            positional + ".0"
        };
    }
    let scientific = format!("{:e}", v);
    match scientific.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => scientific,
    }
}

/// `E1` for every reported key, then `E3` for every reported key, then `E2` and `E4`.
pub fn emit_estimates<S: ScalarSink>(
    sink: &mut S,
    estimates: &DelayEstimates,
) -> std::io::Result<()> {
    for key in estimates.keys.iter() {
        sink.record("E1", Some(*key), estimates.e1.get(key).copied())?;
    }
    for key in estimates.keys.iter() {
        sink.record("E3", Some(*key), estimates.e3.get(key).copied())?;
    }
    sink.record("E2", None, estimates.e2)?;
    sink.record("E4", None, estimates.e4)
}

/// `<weighted B1> <weighted B2>`, then `<key> <B1> <B2>` for every scored key.
pub fn write_burstiness<S: ScalarSink>(
    sink: &mut S,
    report: &BurstinessReport,
) -> std::io::Result<()> {
    sink.record_row(None, &[report.weighted_b1, report.weighted_b2])?;
    for (key, scores) in report.keys.iter() {
        sink.record_row(Some(*key), &[Some(scores.b1), scores.b2])?;
    }
    Ok(())
}
