//! Per-round sample of one actor and the metrics it carries.
//!
//! A sample is created by the `stat` reply of a round and completed in place
//! by the `mem` and `cmem` replies of the same round.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

/// Plotted magnitude for a timed-out measurement.
pub const TIMEOUT_MAGNITUDE: i64 = 0x3fff_ffff;

/// Plotted magnitude for a failed measurement.
pub const ERROR_MAGNITUDE: i64 = TIMEOUT_MAGNITUDE * 2;

/// A single measured field, or the reason it could not be measured.
///
/// Variant order matters: the derived `Ord` places every `Measured` value
/// below `Timeout`, and `Timeout` below `Error`, so ranking by peak value
/// surfaces hung and failing actors first without special cases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    /// A real reading.
    Measured(i64),
    /// The remote side reported `TIMEOUT` for this actor.
    Timeout,
    /// The remote side reported `ERROR` for this actor.
    Error,
}

impl Value {
    /// Returns the number drawn on a chart for this value.
    pub fn plot(self) -> i64 {
        match self {
            Value::Measured(v) => v,
            Value::Timeout => TIMEOUT_MAGNITUDE,
            Value::Error => ERROR_MAGNITUDE,
        }
    }

    /// Returns the series-name suffix for sentinel values.
    pub fn annotation(self) -> Option<&'static str> {
        match self {
            Value::Measured(_) => None,
            Value::Timeout => Some("<timeout>"),
            Value::Error => Some("<error>"),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Measured(v) => write!(f, "{}", v),
            Value::Timeout => f.write_str("TIMEOUT"),
            Value::Error => f.write_str("ERROR"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.plot())
    }
}

/// The fixed set of metrics sampled for every actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Metric {
    /// Accumulated CPU time, milliseconds.
    #[serde(rename = "CPU")]
    Cpu,
    /// Total messages handled.
    #[serde(rename = "MSG_NUM")]
    MsgNum,
    /// Current message queue length.
    #[serde(rename = "MQ_LEN")]
    MqLen,
    /// Managed (script VM) memory, KB.
    #[serde(rename = "LUA_MEM")]
    LuaMem,
    /// Native memory, KB.
    #[serde(rename = "C_MEM")]
    CMem,
}

impl Metric {
    /// Report order: memory first, then cpu and message counters.
    pub const REPORT_ORDER: [Metric; 5] = [
        Metric::LuaMem,
        Metric::CMem,
        Metric::Cpu,
        Metric::MsgNum,
        Metric::MqLen,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Metric::Cpu => "CPU",
            Metric::MsgNum => "MSG_NUM",
            Metric::MqLen => "MQ_LEN",
            Metric::LuaMem => "LUA_MEM",
            Metric::CMem => "C_MEM",
        }
    }

    /// Axis description used as chart subtitle.
    pub fn unit(self) -> &'static str {
        match self {
            Metric::Cpu => "Y-axis unit: total ms",
            Metric::MsgNum => "Y-axis unit: total handled msg num",
            Metric::MqLen => "Y-axis unit: msg queue len",
            Metric::LuaMem => "Y-axis unit: lua vm mem kb",
            Metric::CMem => "Y-axis unit: c mem kb",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CPU" => Ok(Metric::Cpu),
            "MSG_NUM" => Ok(Metric::MsgNum),
            "MQ_LEN" => Ok(Metric::MqLen),
            "LUA_MEM" => Ok(Metric::LuaMem),
            "C_MEM" => Ok(Metric::CMem),
            _ => Err(format!("unknown metric '{}'", s)),
        }
    }
}

/// One snapshot of an actor within a round.
///
/// `lua_mem` and `c_mem` stay `None` until the `mem` and `cmem` replies of
/// the same round fill them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Sample {
    pub cpu_time: Value,
    pub msg_num: Value,
    pub mq_len: Value,
    pub lua_mem: Option<Value>,
    pub c_mem: Option<Value>,
}

impl Sample {
    /// Creates a sample from the fields carried by a `stat` reply.
    pub fn new(cpu_time: Value, msg_num: Value, mq_len: Value) -> Self {
        Self {
            cpu_time,
            msg_num,
            mq_len,
            lua_mem: None,
            c_mem: None,
        }
    }

    /// Creates a sample whose `stat` fields all carry the same sentinel.
    pub fn sentinel(value: Value) -> Self {
        Self::new(value, value, value)
    }

    /// Returns the requested field, or `None` if it has not been filled yet.
    pub fn get(&self, metric: Metric) -> Option<Value> {
        match metric {
            Metric::Cpu => Some(self.cpu_time),
            Metric::MsgNum => Some(self.msg_num),
            Metric::MqLen => Some(self.mq_len),
            Metric::LuaMem => self.lua_mem,
            Metric::CMem => self.c_mem,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.lua_mem.is_some() && self.c_mem.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_rank_above_any_measurement() {
        assert!(Value::Timeout > Value::Measured(i64::MAX));
        assert!(Value::Error > Value::Timeout);
        assert!(Value::Measured(2) > Value::Measured(1));
        assert!(Value::Measured(-5) < Value::Measured(0));
    }

    #[test]
    fn test_plot_magnitudes() {
        assert_eq!(Value::Measured(42).plot(), 42);
        assert_eq!(Value::Timeout.plot(), 0x3fffffff);
        assert_eq!(Value::Error.plot(), 0x7ffffffe);
        assert_eq!(serde_json::to_string(&Value::Timeout).unwrap(), "1073741823");
    }

    #[test]
    fn test_annotation() {
        assert_eq!(Value::Measured(1).annotation(), None);
        assert_eq!(Value::Timeout.annotation(), Some("<timeout>"));
        assert_eq!(Value::Error.annotation(), Some("<error>"));
    }

    #[test]
    fn test_sample_get_tracks_unfilled_fields() {
        let mut s = Sample::new(Value::Measured(120), Value::Measured(100), Value::Measured(3));
        assert_eq!(s.get(Metric::Cpu), Some(Value::Measured(120)));
        assert_eq!(s.get(Metric::MsgNum), Some(Value::Measured(100)));
        assert_eq!(s.get(Metric::MqLen), Some(Value::Measured(3)));
        assert_eq!(s.get(Metric::LuaMem), None);
        assert!(!s.is_complete());

        s.lua_mem = Some(Value::Measured(64));
        s.c_mem = Some(Value::Error);
        assert!(s.is_complete());
        assert_eq!(s.get(Metric::CMem), Some(Value::Error));
    }

    #[test]
    fn test_metric_parse() {
        assert_eq!("cpu".parse::<Metric>().unwrap(), Metric::Cpu);
        assert_eq!("C_MEM".parse::<Metric>().unwrap(), Metric::CMem);
        assert!("disk".parse::<Metric>().is_err());
        for m in Metric::REPORT_ORDER {
            assert_eq!(m.key().parse::<Metric>().unwrap(), m);
        }
    }
}
