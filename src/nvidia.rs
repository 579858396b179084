use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{ParseError, SampleError};
use crate::models::Gpu;
use crate::runner::CommandRunner;

/// Fixed contract with the probed hosts: 7 comma-separated fields, no
/// header, no units. Changing it requires changing [`parse_line`].
pub const QUERY: &str = "nvidia-smi \
    --query-gpu=index,name,temperature.gpu,utilization.gpu,memory.used,memory.total,power.draw \
    --format=csv,noheader,nounits";

const FIELD_COUNT: usize = 7;

/// Polls GPU telemetry through a host's runner.
#[derive(Clone, Debug)]
pub struct GpuSampler {
    timeout: Duration,
}

impl GpuSampler {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Query the host and parse every well-formed line. An `Err` means no
    /// telemetry is available: the command failed, or it printed lines of
    /// which none parsed. Empty output is a host with no GPUs.
    pub async fn sample(
        &self,
        host: &str,
        runner: &mut dyn CommandRunner,
    ) -> Result<Vec<Gpu>, SampleError> {
        let output = runner.run(QUERY, self.timeout).await?;
        let (gpus, errors) = parse_output(&output);
        if gpus.is_empty() && !errors.is_empty() {
            return Err(SampleError::Unparseable { lines: errors.len() });
        }
        for (line, err) in errors {
            warn!(host, line, error = %err, "skipping malformed telemetry line");
        }
        debug!(host, count = gpus.len(), "sampled gpus");
        Ok(gpus)
    }
}

/// Parse a full report, returning the accepted records and the rejected
/// lines with their reasons.
pub fn parse_output(output: &str) -> (Vec<Gpu>, Vec<(String, ParseError)>) {
    let mut gpus = Vec::new();
    let mut errors = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        match parse_line(line) {
            Ok(gpu) => gpus.push(gpu),
            Err(err) => errors.push((line.to_string(), err)),
        }
    }
    (gpus, errors)
}

pub fn parse_line(line: &str) -> Result<Gpu, ParseError> {
    let parts: Vec<&str> = line.split(',').map(|s| s.trim()).collect();
    if parts.len() != FIELD_COUNT {
        return Err(ParseError::FieldCount(parts.len()));
    }

    let gpu = Gpu {
        index: number(parts[0], "index")?,
        name: parts[1].to_string(),
        temperature_c: number(parts[2], "temperature")?,
        utilization_pct: number(parts[3], "utilization")?,
        memory_used_mib: number(parts[4], "memory.used")?,
        memory_total_mib: number(parts[5], "memory.total")?,
        power_draw_w: number(parts[6], "power.draw")?,
    };

    if gpu.memory_used_mib > gpu.memory_total_mib {
        return Err(ParseError::MemoryOverflow {
            used: gpu.memory_used_mib,
            total: gpu.memory_total_mib,
        });
    }
    if gpu.power_draw_w < 0.0 {
        return Err(ParseError::NegativePower(gpu.power_draw_w));
    }
    Ok(gpu)
}

fn number<T: std::str::FromStr>(value: &str, field: &'static str) -> Result<T, ParseError> {
    value.parse().map_err(|_| ParseError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}
