//! Sensor data generation for the simulated device.
//!
//! This module provides the sensor model (fixed values, sequences, random
//! picks, integer ranges), validation of configured sensors, and the
//! `DataGenerator` task that produces one batch of readings per sampling
//! interval while the device is connected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, warn};

/// Reading reported by the fallback sensor that replaces invalid definitions.
pub const DEFAULT_SENSOR_VALUE: f64 = 5.0;

/// Definition of a single simulated sensor.
///
/// Matches the JSON shape accepted by `DEVICE_SIMULATOR_SENSORS`: either a
/// fixed `value`, or a `values` array paired with a `valuesPattern` of
/// `"seq"`, `"random"`, or `"range"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorSpec {
    /// Fixed reading; takes precedence over any pattern when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,

    /// Source values for pattern-based readings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<f64>>,

    /// How to derive a reading from `values`: "seq", "random", or "range".
    /// Unrecognized names behave like "seq".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values_pattern: Option<String>,

    /// Cursor for the "seq" pattern; advances in place across batches
    #[serde(skip)]
    cursor: Option<usize>,
}

impl SensorSpec {
    /// Sensor that always reports the same reading.
    pub fn fixed(value: f64) -> Self {
        Self {
            value: Some(value),
            values: None,
            values_pattern: None,
            cursor: None,
        }
    }

    /// Sensor that cycles through `values` in order, one step per batch.
    pub fn sequence(values: Vec<f64>) -> Self {
        Self::with_pattern(values, "seq")
    }

    /// Sensor that reports a uniformly picked entry of `values` each batch.
    pub fn random(values: Vec<f64>) -> Self {
        Self::with_pattern(values, "random")
    }

    /// Sensor that reports a random integer between `min` and `max`, both
    /// rounded towards the inside of the interval and both ends inclusive.
    pub fn range(min: f64, max: f64) -> Self {
        Self::with_pattern(vec![min, max], "range")
    }

    fn with_pattern(values: Vec<f64>, pattern: &str) -> Self {
        Self {
            value: None,
            values: Some(values),
            values_pattern: Some(pattern.to_string()),
            cursor: None,
        }
    }

    /// Check whether this definition can produce readings.
    ///
    /// A sensor is usable with a fixed `value`, or with a non-empty `values`
    /// array and a declared pattern. A `values` array without a pattern is
    /// rejected even when a fixed value is present.
    fn is_valid(&self) -> bool {
        if self.values.is_some() && self.values_pattern.is_none() {
            return false;
        }

        let has_values = self.values.as_ref().map_or(false, |v| !v.is_empty());
        self.value.is_some() || has_values
    }

    /// Produce the next reading for this sensor.
    ///
    /// A fixed `value` always wins. Otherwise the pattern decides how the
    /// reading is drawn from `values`. Definitions must be validated before
    /// readings are taken; an unusable one falls back to the default value.
    fn next_value(&mut self, rng: &mut impl Rng) -> f64 {
        if let Some(value) = self.value {
            return value;
        }

        let values = match &self.values {
            Some(values) if !values.is_empty() => values,
            _ => return DEFAULT_SENSOR_VALUE,
        };

        match self.values_pattern.as_deref() {
            Some("random") => values[rng.gen_range(0..values.len())],
            Some("range") => {
                if values.len() < 2 {
                    return values[0];
                }

                let min = values[0].ceil() as i64;
                let max = values[1].floor() as i64;
                if min > max {
                    // Degenerate interval, e.g. [2.7, 2.3]
                    return values[0];
                }

                rng.gen_range(min..=max) as f64
            }
            // "seq" and anything unrecognized: round-robin over the values
            _ => {
                let next = match self.cursor {
                    Some(index) => (index + 1) % values.len(),
                    None => 0,
                };
                self.cursor = Some(next);
                values[next]
            }
        }
    }
}

/// One round of readings, keyed by sensor position (`sensorId-1`,
/// `sensorId-2`, ...) in configured order.
///
/// Serializes transparently as a flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorBatch(HashMap<String, f64>);

impl SensorBatch {
    /// Get the number of readings in the batch.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Look up a reading by its `sensorId-<n>` key.
    pub fn get(&self, sensor_id: &str) -> Option<f64> {
        self.0.get(sensor_id).copied()
    }
}

/// Replace unusable sensor definitions with the fallback sensor.
fn validate_sensors(sensors: Vec<SensorSpec>) -> Vec<SensorSpec> {
    sensors
        .into_iter()
        .enumerate()
        .map(|(i, sensor)| {
            if sensor.is_valid() {
                sensor
            } else {
                warn!(index = i + 1, "Invalid sensor definition, using fallback");
                SensorSpec::fixed(DEFAULT_SENSOR_VALUE)
            }
        })
        .collect()
}

/// Compute a full batch, advancing every sensor once in configured order.
fn next_batch(sensors: &Mutex<Vec<SensorSpec>>) -> SensorBatch {
    let mut rng = rand::thread_rng();
    let mut readings = HashMap::new();

    let mut sensors = match sensors.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    for (i, sensor) in sensors.iter_mut().enumerate() {
        readings.insert(format!("sensorId-{}", i + 1), sensor.next_value(&mut rng));
    }

    SensorBatch(readings)
}

/// Periodic sensor batch producer.
///
/// The generator owns the validated sensor list for the life of the device.
/// Sequence cursors advance in place, so stopping and restarting around a
/// reconnect never rewinds a sensor.
///
/// # Example
///
/// ```no_run
/// use device_simulator::data_generator::{DataGenerator, SensorSpec};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let sensors = vec![SensorSpec::sequence(vec![1.0, 2.0, 3.0])];
///     let mut generator = DataGenerator::new(sensors, Duration::from_secs(1));
///
///     generator.start(|batch| {
///         println!("{} readings", batch.len());
///     });
///
///     tokio::time::sleep(Duration::from_secs(5)).await;
///     generator.stop();
/// }
/// ```
pub struct DataGenerator {
    /// Validated sensor definitions; shared with the sampling task
    sensors: Arc<Mutex<Vec<SensorSpec>>>,

    /// Interval between batches
    sample_interval: Duration,

    /// Failsafe checked by the sampling task before every batch
    running: Arc<AtomicBool>,

    /// Handle of the current sampling task, if any
    task: Option<JoinHandle<()>>,
}

impl DataGenerator {
    /// Create a generator from configured sensor definitions.
    ///
    /// Definitions are validated once here; invalid entries are replaced by
    /// the fallback sensor reporting [`DEFAULT_SENSOR_VALUE`].
    pub fn new(sensors: Vec<SensorSpec>, sample_interval: Duration) -> Self {
        let sensors = validate_sensors(sensors);

        Self {
            sensors: Arc::new(Mutex::new(sensors)),
            sample_interval,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    /// Begin emitting batches to `sink`, one per sampling interval.
    ///
    /// The first batch fires one full interval after start. Every batch is
    /// complete: all sensors are read exactly once, in configured order.
    /// Calling `start` while already running reschedules onto a fresh timer.
    pub fn start<F>(&mut self, mut sink: F)
    where
        F: FnMut(SensorBatch) + Send + 'static,
    {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        self.running.store(true, Ordering::SeqCst);

        let sensors = Arc::clone(&self.sensors);
        let running = Arc::clone(&self.running);
        let sample_interval = self.sample_interval;

        let task = tokio::spawn(async move {
            let mut ticker = interval(sample_interval);
            // Skip the first immediate tick
            ticker.tick().await;

            loop {
                ticker.tick().await;

                // A stop may have raced the timer
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                let batch = next_batch(&sensors);
                debug!(readings = batch.len(), "Generated sensor batch");
                sink(batch);
            }
        });

        self.task = Some(task);
    }

    /// Stop emitting batches.
    ///
    /// Safe to call when already stopped. The pending tick is cancelled;
    /// sensor cursors stay where they are.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Whether a sampling task is currently scheduled.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Compute one batch immediately, without the timer.
    pub fn sample(&self) -> SensorBatch {
        next_batch(&self.sensors)
    }
}

impl Drop for DataGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}
