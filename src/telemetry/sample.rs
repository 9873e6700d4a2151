use serde::{Deserialize, Serialize};

/// Fixed label carried by every sample of the simulated CPU series.
pub const METRIC_NAME: &str = "CPU_usage";

/// A single CPU usage sample, keyed by its second-resolution timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub name: String,
    /// Seconds since the Unix epoch. Doubles as the document key.
    pub timestamp: i64,
    pub cpu_usage: f64,
    #[serde(with = "anomaly_flag")]
    pub anomaly: bool,
}

impl Sample {
    pub fn new(timestamp: i64, cpu_usage: f64, anomaly: bool) -> Self {
        Self {
            name: METRIC_NAME.to_string(),
            timestamp,
            cpu_usage,
            anomaly,
        }
    }

    /// Build a sample from raw stored fields, rejecting shapes the generator
    /// never writes.
    pub fn from_stored(
        name: String,
        timestamp: i64,
        cpu_usage: f64,
        anomaly: i64,
    ) -> Result<Self, String> {
        if name != METRIC_NAME {
            return Err(format!("unexpected metric name `{name}` at {timestamp}"));
        }
        if !cpu_usage.is_finite() {
            return Err(format!("non-finite cpu_usage at {timestamp}"));
        }
        let anomaly = match anomaly {
            0 => false,
            1 => true,
            other => return Err(format!("anomaly flag {other} at {timestamp} is not 0 or 1")),
        };
        Ok(Self {
            name,
            timestamp,
            cpu_usage,
            anomaly,
        })
    }

    /// Stored form of the anomaly flag.
    pub fn anomaly_flag(&self) -> i64 {
        i64::from(self.anomaly)
    }
}

/// The store schema keeps the flag as an integer (0/1).
mod anomaly_flag {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(i64::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        match i64::deserialize(deserializer)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(de::Error::custom(format!(
                "anomaly flag must be 0 or 1, got {other}"
            ))),
        }
    }
}
