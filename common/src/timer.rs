//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use std::fmt::Error;
use std::fmt::Formatter;
use std::sync::Mutex;
use std::time::Instant;

use log::info;

/// A naive timer that reports through the `log` facade
///
/// Log output looks like
/// `[round1 | blind size: 10000] elapsed: 0.00625 sec [qps: 1600435]`
///
/// # Example
///
/// ```
/// use common::timer;
/// let t = timer::Timer::new_silent("round1");
/// let values = vec![1, 2, 3];
/// // logs: [round1 | blind size: 3] elapsed 0.000 sec [qps: ...]
/// t.qps("blind", values.len());
/// ```
///
/// A non-silent timer also reports once when dropped, which makes
/// `let _t = Timer::new("step");` meter the enclosing block.
pub struct Timer {
    start: Mutex<Instant>,
    label: String,
    extra_label: Option<String>,
    size: Option<usize>,
    silent: bool,
}

/// Builder for a `Timer`, meant to be used as `timer::Builder`
///
/// ```
/// use common::timer;
/// let t = timer::Builder::new().label("session").extra_label("round2").build();
/// ```
#[derive(Default)]
pub struct Builder {
    label: String,
    extra_label: Option<String>,
    size: Option<usize>,
    silent: bool,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    pub fn label(&mut self, label: &str) -> &mut Builder {
        self.label = label.to_string();
        self
    }

    pub fn extra_label(&mut self, extra_label: &str) -> &mut Builder {
        self.extra_label = Some(extra_label.to_string());
        self
    }

    pub fn size(&mut self, size: usize) -> &mut Builder {
        self.size = Some(size);
        self
    }

    pub fn silent(&mut self, silent: bool) -> &mut Builder {
        self.silent = silent;
        self
    }

    pub fn build(&self) -> Timer {
        Timer {
            start: Mutex::new(Instant::now()),
            label: self.label.clone(),
            extra_label: self.extra_label.clone(),
            size: self.size,
            silent: self.silent,
        }
    }
}

impl Timer {
    pub fn new(label: &str) -> Timer {
        Builder::new().label(label).build()
    }

    /// A silent timer only logs on explicit `qps`/`elapsed_log` calls
    pub fn new_silent(label: &str) -> Timer {
        Builder::new().label(label).silent(true).build()
    }

    pub fn set_size(&mut self, sz: usize) {
        self.size = Some(sz);
    }

    pub fn set_extra_label(&mut self, label: &str) {
        self.extra_label = Some(label.to_string());
    }

    /// Seconds since start or since the last report
    pub fn elapsed_secs(&self) -> f64 {
        match self.start.lock() {
            Ok(t) => t.elapsed().as_secs_f64(),
            Err(poisoned) => poisoned.into_inner().elapsed().as_secs_f64(),
        }
    }

    /// Restarts the clock, useful when reusing the timer across steps
    pub fn reset(&self) {
        match self.start.lock() {
            Ok(mut t) => *t = Instant::now(),
            Err(poisoned) => *poisoned.into_inner() = Instant::now(),
        }
    }

    /// Formats labels, elapsed time and, when a size is given, throughput.
    /// Resets the clock.
    pub fn qps_str(&self, label: Option<&str>, size: Option<usize>) -> String {
        let e = self.elapsed_secs();
        let mut res = format!("[{}", self.label);
        if let Some(l) = label {
            res.push_str(&format!(" | {}", l));
        }
        if let Some(n) = size {
            res.push_str(&format!(" size: {}", n));
        }
        res.push_str(&format!("] elapsed: {:.5} sec", e));
        if let Some(n) = size {
            let qps = if e > 0.0 { (n as f64) / e } else { 0.0 };
            res.push_str(&format!(" [qps: {:.0}]", qps));
        }
        self.reset();
        res
    }

    pub fn elapsed_str(&self, label: Option<&str>) -> String {
        self.qps_str(label, None)
    }

    pub fn elapsed_log(&self, label: Option<&str>) {
        info!("{}", self.qps_str(label, None))
    }

    pub fn qps(&self, label: &str, size: usize) {
        info!("{}", self.qps_str(Some(label), Some(size)));
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "timer, label: {}", self.label)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if !self.silent {
            let extra = self.extra_label.clone();
            info!("{}", self.qps_str(extra.as_deref(), self.size));
        }
    }
}
