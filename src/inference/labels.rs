use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_MICROS: AtomicI64 = AtomicI64::new(0);

/// Seconds since the epoch with microsecond fraction, e.g. `1700000000.123456`.
///
/// Strictly increasing within the process: two calls in the same
/// microsecond get distinct values.
pub fn next_timestamp() -> String {
    let now = Utc::now().timestamp_micros();
    let mut last = LAST_MICROS.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_MICROS.compare_exchange_weak(last, candidate, Ordering::SeqCst, Ordering::Relaxed) {
            Ok(_) => return format!("{}.{:06}", candidate / 1_000_000, candidate % 1_000_000),
            Err(actual) => last = actual,
        }
    }
}

/// Tensor labels used by one inference call
#[derive(Debug, Clone, PartialEq)]
pub struct TensorLabels {
    /// `<name>_<version>_input_<timestamp>`
    pub input: String,
    /// `<name>_<version>_output_<index>_<timestamp>`, in output order
    pub outputs: Vec<String>,
}

impl TensorLabels {
    pub fn generate(name: &str, version: &str, output_count: usize) -> Self {
        let timestamp = next_timestamp();
        Self {
            input: format!("{}_{}_input_{}", name, version, timestamp),
            outputs: (0..output_count)
                .map(|i| format!("{}_{}_output_{}_{}", name, version, i, timestamp))
                .collect(),
        }
    }

    /// Input label followed by the output labels
    pub fn all(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.input).chain(self.outputs.iter())
    }
}
