//! Progress counters and console lines.
//!
//! [`Progress`] counts processed records and decides when a progress line is
//! due. Lines are produced every `batch_size` records: after each report the
//! next boundary moves to the next multiple of the batch size above the
//! counter, so a batched increment that jumps past a multiple still reports
//! exactly once.

use tokio::time::Instant;

use crate::metrics::calculate_rate;

/// Processing counters and timers for one run of an action.
#[derive(Debug, Clone)]
pub struct Progress {
    batch_size: u64,
    counter: u64,
    expected: u64,
    errors: u64,
    next_boundary: u64,
    last_report_at: u64,
    total_timer: Option<Instant>,
    batch_timer: Option<Instant>,
}

impl Progress {
    /// Creates counters reporting every `batch_size` records; `0` disables
    /// automatic reports.
    #[must_use]
    pub fn new(batch_size: u64) -> Self {
        Self {
            batch_size,
            counter: 0,
            expected: 0,
            errors: 0,
            next_boundary: batch_size,
            last_report_at: 0,
            total_timer: None,
            batch_timer: None,
        }
    }

    /// Starts both timers.
    pub fn start(&mut self) {
        let now = Instant::now();
        self.total_timer = Some(now);
        self.batch_timer = Some(now);
    }

    /// Whether [`start`](Self::start) has been called since the last reset.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.batch_timer.is_some()
    }

    /// Records processed so far.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Expected record count, `0` if unknown.
    #[must_use]
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Errors reported so far.
    #[must_use]
    pub fn errors(&self) -> u64 {
        self.errors
    }

    /// Reporting batch size.
    #[must_use]
    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Sets the expected record count.
    pub fn expect(&mut self, expected: u64) {
        self.expected = expected;
    }

    /// Counts an error.
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Adds `n` processed records; returns `true` when a boundary was crossed.
    pub fn advance(&mut self, n: u64) -> bool {
        self.counter += n;
        if self.batch_size == 0 || self.counter < self.next_boundary {
            return false;
        }
        self.next_boundary = (self.counter / self.batch_size + 1) * self.batch_size;
        true
    }

    /// Whether records were processed since the last progress line.
    #[must_use]
    pub fn has_unreported(&self) -> bool {
        self.counter != self.last_report_at
    }

    /// Builds the progress line for the records since the last one and
    /// restarts the batch timer.
    ///
    /// Returns `None` if nothing was processed since the previous line.
    pub fn report(&mut self) -> Option<String> {
        if !self.has_unreported() {
            return None;
        }
        let last = self.counter.saturating_sub(self.last_report_at);
        self.last_report_at = self.counter;

        let batch_elapsed = elapsed_secs(self.batch_timer);
        let total_elapsed = elapsed_secs(self.total_timer);
        let mut line = String::new();
        if self.expected > 0 {
            #[allow(clippy::cast_precision_loss)]
            let percentage = self.counter as f64 / self.expected as f64 * 100.0;
            line.push_str(&format!("[{percentage:.2}%] "));
        }
        line.push_str(&format!(
            "{} records processed.  Last {} records took {} seconds. \
             Batch rate was {} records/seconds. Overall rate is {} records/seconds.",
            format_count(self.counter),
            format_count(last),
            format_decimal(batch_elapsed),
            format_decimal(calculate_rate(last, batch_elapsed)),
            format_decimal(calculate_rate(self.counter, total_elapsed)),
        ));
        self.batch_timer = Some(Instant::now());
        Some(line)
    }

    /// Line noting a mismatch between expected and processed counts.
    #[must_use]
    pub fn expectation_line(&self) -> Option<String> {
        (self.expected > 0 && self.counter != self.expected).then(|| {
            format!(
                "Expected number of records was incorrect, expected {} but processed {}",
                format_count(self.expected),
                format_count(self.counter)
            )
        })
    }

    /// Final summary of a completed run.
    #[must_use]
    pub fn summary(&self) -> String {
        let elapsed = elapsed_secs(self.total_timer);
        format!(
            "Finished Work, processed {} record{} in {} seconds at {} records/seconds \
             and encountered {} error{}.",
            format_count(self.counter),
            plural(self.counter),
            format_decimal(elapsed),
            format_decimal(calculate_rate(self.counter, elapsed)),
            format_count(self.errors),
            plural(self.errors),
        )
    }

    /// Final summary of an aborted run.
    #[must_use]
    pub fn aborted_summary(&self) -> String {
        let elapsed = elapsed_secs(self.total_timer);
        format!(
            "Aborted!  Processed {} records in {} seconds at {} records/seconds",
            format_count(self.counter),
            format_decimal(elapsed),
            format_decimal(calculate_rate(self.counter, elapsed)),
        )
    }

    /// Clears counters and timers so the action can be started again.
    pub fn reset(&mut self) {
        *self = Self::new(self.batch_size);
    }
}

fn elapsed_secs(timer: Option<Instant>) -> f64 {
    timer.map_or(0.0, |t| t.elapsed().as_secs_f64())
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// Formats an integer with `,` thousands separators.
#[must_use]
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Formats a non-negative number with two decimals and thousands separators.
#[must_use]
pub fn format_decimal(value: f64) -> String {
    let fixed = format!("{:.2}", value.max(0.0));
    let (whole, frac) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let whole = whole.parse::<u64>().map_or_else(|_| whole.to_string(), format_count);
    format!("{whole}.{frac}")
}
