use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::PathBuf,
    time::Duration,
};

use chrono::{SecondsFormat, Utc};
use clap::Args;
use serde_json::{Map, Number, Value};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{CliError, IoSnafu, JsonSnafu, Result};

/// Number of whitespace separated columns in a turbofan dataset row.
pub const DATASET_COLUMNS: usize = 26;

const SETTING_COLUMNS: usize = 3;
const SENSOR_COLUMNS: usize = 21;

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Path of the turbofan dataset (e.g. `CMaps/train_FD001.txt`).
    #[arg(long, default_value = "CMaps/train_FD001.txt")]
    dataset: PathBuf,
    /// File receiving one JSON reading per line.
    #[arg(long)]
    output: PathBuf,
    /// Only replay units up to and including this number.
    #[arg(long, default_value_t = 5)]
    max_unit: u32,
    /// Readings written per second. Zero disables pacing.
    #[arg(long, default_value_t = 10)]
    rate: u32,
    /// Maximum number of readings to write. Zero means no limit.
    #[arg(long, default_value_t = 5000)]
    limit: usize,
}

/// Replay parameters.
#[derive(Debug, Clone, Copy)]
pub struct SimulationOptions {
    pub max_unit: u32,
    pub interval: Option<Duration>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SimulationSummary {
    pub rows: usize,
    pub sent: usize,
}

impl SimulateArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let reader = BufReader::new(File::open(&self.dataset).context(IoSnafu {})?);
        let writer = BufWriter::new(File::create(&self.output).context(IoSnafu {})?);

        let options = SimulationOptions {
            max_unit: self.max_unit,
            interval: (self.rate > 0).then(|| Duration::from_secs(1) / self.rate),
            limit: (self.limit > 0).then_some(self.limit),
        };

        info!(
            dataset = %self.dataset.display(),
            output = %self.output.display(),
            max_unit = self.max_unit,
            rate = self.rate,
            "Starting simulation"
        );

        let start = tokio::time::Instant::now();
        let summary = simulate(reader, writer, options, ct).await?;
        let elapsed = start.elapsed().as_secs_f64();

        info!(
            rows = summary.rows,
            sent = summary.sent,
            duration_secs = elapsed,
            per_second = if elapsed > 0.0 { summary.sent as f64 / elapsed } else { 0.0 },
            "Simulation finished"
        );

        Ok(())
    }
}

/// Writes the selected dataset rows as JSON readings until the input, the
/// limit or `ct` is exhausted.
pub async fn simulate(
    reader: impl BufRead,
    mut writer: impl Write,
    options: SimulationOptions,
    ct: CancellationToken,
) -> Result<SimulationSummary> {
    let mut summary = SimulationSummary::default();
    let mut ticker = options.interval.map(tokio::time::interval);

    for (index, line) in reader.lines().enumerate() {
        let line = line.context(IoSnafu {})?;
        if line.trim().is_empty() {
            continue;
        }
        summary.rows += 1;

        let mut reading = parse_row(index + 1, &line)?;
        if unit_of(&reading) > options.max_unit as f64 {
            continue;
        }

        if options.limit.is_some_and(|limit| summary.sent >= limit) {
            info!(limit = summary.sent, "Send limit reached");
            break;
        }

        if let Some(ticker) = ticker.as_mut() {
            tokio::select! {
                _ = ct.cancelled() => break,
                _ = ticker.tick() => {}
            }
        } else if ct.is_cancelled() {
            break;
        }

        stamp(&mut reading, summary.sent);
        serde_json::to_writer(&mut writer, &reading).context(JsonSnafu {})?;
        writer.write_all(b"\n").context(IoSnafu {})?;
        summary.sent += 1;

        if summary.sent % 50 == 0 {
            info!(sent = summary.sent, "Simulation progress");
        }
    }

    writer.flush().context(IoSnafu {})?;

    Ok(summary)
}

/// Column names of a turbofan dataset row, in file order.
pub fn column_names() -> Vec<String> {
    let mut names = vec!["unit_number".to_string(), "time_in_cycles".to_string()];
    names.extend((1..=SETTING_COLUMNS).map(|i| format!("setting_{i}")));
    names.extend((1..=SENSOR_COLUMNS).map(|i| format!("sensor_{i}")));
    names
}

/// Parses one dataset row. Every value is kept as a float.
pub fn parse_row(line_number: usize, line: &str) -> Result<Map<String, Value>> {
    let values: Vec<&str> = line.split_whitespace().collect();
    if values.len() != DATASET_COLUMNS {
        return Err(CliError::DatasetRow {
            line: line_number,
            message: format!("expected {DATASET_COLUMNS} columns, found {}", values.len()),
        });
    }

    column_names()
        .into_iter()
        .zip(values)
        .map(|(name, raw)| {
            let number = raw
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .ok_or_else(|| CliError::DatasetRow {
                    line: line_number,
                    message: format!("{name} is not a number: {raw}"),
                })?;
            Ok((name, Value::Number(number)))
        })
        .collect()
}

fn unit_of(reading: &Map<String, Value>) -> f64 {
    reading
        .get("unit_number")
        .and_then(Value::as_f64)
        .unwrap_or(f64::MAX)
}

fn stamp(reading: &mut Map<String, Value>, sent: usize) {
    let field = |name: &str| {
        reading
            .get(name)
            .map(Value::to_string)
            .unwrap_or_else(|| "N/A".to_string())
    };
    let message_id = format!("msg_{sent}_{}_{}", field("unit_number"), field("time_in_cycles"));

    reading.insert("message_id".to_string(), Value::String(message_id));
    reading.insert(
        "event_timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
    );
}
