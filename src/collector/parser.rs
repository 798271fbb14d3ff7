//! Parsers for debug console reply bodies.
//!
//! Every reply is a newline-separated list of tab-separated records keyed by
//! actor id. Blank lines are ignored.
//!
//! Formats:
//! - `list`: `<id>\t<label>`
//! - `stat`: `<id>\tcpu:<secs>\tmessage:<n>\tmqlen:<n>\ttask:<n>` or
//!   `<id>\tTIMEOUT` / `<id>\tERROR`
//! - `mem`:  `<id>\t<kb> Kb (<label>)` or a `TIMEOUT`/`ERROR` prefixed value
//! - `cmem`: `<id>\t<bytes>` or a `TIMEOUT`/`ERROR` prefixed value

use std::collections::HashMap;

use super::CollectError;
use super::protocol::{Command, ERROR_KEYWORD, FIELD_SEPARATOR, TIMEOUT_KEYWORD};
use crate::storage::{Sample, Value};

/// Minimum field count of a numeric `stat` record.
const STAT_NUMERIC_FIELDS: usize = 5;

/// Unit suffix following the value in a `mem` record.
const MEM_UNIT_SUFFIX: &str = " Kb";

/// Iterates non-blank lines split into fields.
fn records(body: &str) -> impl Iterator<Item = (&str, Vec<&str>)> {
    body.lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| (line, line.split(FIELD_SEPARATOR).collect()))
}

/// Parses the `list` reply into an actor id to label table.
///
/// Lines that do not have exactly two fields are skipped.
pub fn parse_labels(body: &str) -> HashMap<String, String> {
    records(body)
        .filter(|(_, fields)| fields.len() == 2)
        .map(|(_, fields)| (fields[0].to_string(), fields[1].to_string()))
        .collect()
}

/// Parses the `stat` reply into one sample per actor, in reply order.
///
/// A record that is neither the sentinel shape nor the numeric shape fails
/// the whole reply, since dropping it would leave the actor without a sample
/// for `mem`/`cmem` to complete.
pub fn parse_stat(body: &str) -> Result<Vec<(String, Sample)>, CollectError> {
    let mut samples = Vec::new();
    for (line, fields) in records(body) {
        let malformed = || CollectError::Malformed {
            command: Command::Stat,
            line: line.to_string(),
        };

        let sample = match fields.len() {
            2 => match fields[1] {
                TIMEOUT_KEYWORD => Sample::sentinel(Value::Timeout),
                ERROR_KEYWORD => Sample::sentinel(Value::Error),
                _ => return Err(malformed()),
            },
            n if n >= STAT_NUMERIC_FIELDS => {
                let cpu_secs: f64 = sub_value(fields[1]).ok_or_else(malformed)?;
                let msg_num: i64 = sub_value(fields[2]).ok_or_else(malformed)?;
                let mq_len: i64 = sub_value(fields[3]).ok_or_else(malformed)?;
                Sample::new(
                    Value::Measured(round_half_up(cpu_secs * 1000.0)),
                    Value::Measured(msg_num),
                    Value::Measured(mq_len),
                )
            }
            _ => return Err(malformed()),
        };
        samples.push((fields[0].to_string(), sample));
    }
    Ok(samples)
}

/// Parses the `mem` reply into managed memory values in KB.
pub fn parse_mem(body: &str) -> Result<Vec<(String, Value)>, CollectError> {
    parse_memory(body, Command::Mem, |raw| {
        let number = raw.split(MEM_UNIT_SUFFIX).next()?.trim();
        number.parse::<f64>().ok().map(round_half_up)
    })
}

/// Parses the `cmem` reply into native memory values in KB.
///
/// The remote reports bytes; values are converted with 1 KB = 1000 bytes.
pub fn parse_cmem(body: &str) -> Result<Vec<(String, Value)>, CollectError> {
    parse_memory(body, Command::CMem, |raw| {
        let bytes: i64 = raw.trim().parse().ok()?;
        Some(round_half_up(bytes as f64 / 1000.0))
    })
}

fn parse_memory<F>(
    body: &str,
    command: Command,
    parse_value: F,
) -> Result<Vec<(String, Value)>, CollectError>
where
    F: Fn(&str) -> Option<i64>,
{
    let mut values = Vec::new();
    for (line, fields) in records(body) {
        if fields.len() != 2 {
            continue;
        }
        let raw = fields[1];
        let value = if raw.starts_with(TIMEOUT_KEYWORD) {
            Value::Timeout
        } else if raw.starts_with(ERROR_KEYWORD) {
            Value::Error
        } else {
            let kb = parse_value(raw).ok_or_else(|| CollectError::Malformed {
                command,
                line: line.to_string(),
            })?;
            Value::Measured(kb)
        };
        values.push((fields[0].to_string(), value));
    }
    Ok(values)
}

/// Parses the part after the first `:` of a `label:value` field.
fn sub_value<T: std::str::FromStr>(field: &str) -> Option<T> {
    field.split(':').nth(1)?.trim().parse().ok()
}

fn round_half_up(v: f64) -> i64 {
    (v + 0.5).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels() {
        let labels = parse_labels("a1\tsnlua foo\na2\tsnlua bar");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["a1"], "snlua foo");
        assert_eq!(labels["a2"], "snlua bar");
    }

    #[test]
    fn test_parse_labels_skips_malformed_lines() {
        let labels = parse_labels("\na1\tsnlua foo\nno-tab-here\nx\ty\tz\r\n:0b\tsnlua main\r\n");
        assert_eq!(labels.len(), 2);
        assert_eq!(labels["a1"], "snlua foo");
        assert_eq!(labels[":0b"], "snlua main");
    }

    #[test]
    fn test_parse_stat_numeric_and_sentinel() {
        let body = "a1\tTIMEOUT\na2\tcpu:0.12\tmessage:100\tmqlen:3\ttask:0\na3\tERROR\n";
        let samples = parse_stat(body).unwrap();
        assert_eq!(samples.len(), 3);

        assert_eq!(samples[0].0, "a1");
        assert_eq!(samples[0].1, Sample::sentinel(Value::Timeout));

        assert_eq!(samples[1].0, "a2");
        assert_eq!(samples[1].1.cpu_time, Value::Measured(120));
        assert_eq!(samples[1].1.msg_num, Value::Measured(100));
        assert_eq!(samples[1].1.mq_len, Value::Measured(3));
        assert_eq!(samples[1].1.lua_mem, None);

        assert_eq!(samples[2].1, Sample::sentinel(Value::Error));
    }

    #[test]
    fn test_parse_stat_rounds_half_up() {
        let samples = parse_stat(":01\tcpu:0.0125\tmessage:0\tmqlen:0\ttask:0").unwrap();
        assert_eq!(samples[0].1.cpu_time, Value::Measured(13));
        let samples = parse_stat(":01\tcpu:0.0124\tmessage:0\tmqlen:0\ttask:0").unwrap();
        assert_eq!(samples[0].1.cpu_time, Value::Measured(12));
    }

    #[test]
    fn test_parse_stat_extra_fields_allowed() {
        let samples =
            parse_stat(":01\tcpu:1\tmessage:2\tmqlen:3\ttask:4\textra:5\n\n").unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].1.cpu_time, Value::Measured(1000));
    }

    #[test]
    fn test_parse_stat_rejects_bad_shapes() {
        for body in [
            "a1\tBUSY",
            "a1",
            "a1\tcpu:1\tmessage:2",
            "a1\tcpu:1\tmessage:2\tmqlen:3",
            "a1\tcpu\tmessage:2\tmqlen:3\ttask:0",
            "a1\tcpu:x\tmessage:2\tmqlen:3\ttask:0",
            "a1\tcpu:1\tmessage:2.5\tmqlen:3\ttask:0",
        ] {
            match parse_stat(body) {
                Err(CollectError::Malformed { command, .. }) => assert_eq!(command, Command::Stat),
                other => panic!("{:?} should be malformed, got {:?}", body, other),
            }
        }
    }

    #[test]
    fn test_parse_mem() {
        let body = ":01\t41.27 Kb (snlua bootstrap)\n:02\tTIMEOUT\n:03\tERROR: boom\nbogus\n:04\t0.5 Kb\n";
        let values = parse_mem(body).unwrap();
        assert_eq!(
            values,
            vec![
                (":01".to_string(), Value::Measured(41)),
                (":02".to_string(), Value::Timeout),
                (":03".to_string(), Value::Error),
                (":04".to_string(), Value::Measured(1)),
            ]
        );
    }

    #[test]
    fn test_parse_mem_rejects_non_numeric() {
        assert!(matches!(
            parse_mem(":01\tlots Kb"),
            Err(CollectError::Malformed {
                command: Command::Mem,
                ..
            })
        ));
    }

    #[test]
    fn test_parse_cmem() {
        let body = ":01\t123456\n:02\t499\n:03\t500\n:04\tTIMEOUT\ntotal\t124455\n";
        let values = parse_cmem(body).unwrap();
        assert_eq!(values.len(), 5);
        assert_eq!(values[0], (":01".to_string(), Value::Measured(123)));
        assert_eq!(values[1].1, Value::Measured(0));
        assert_eq!(values[2].1, Value::Measured(1));
        assert_eq!(values[3].1, Value::Timeout);
        assert_eq!(values[4].0, "total");
    }
}
