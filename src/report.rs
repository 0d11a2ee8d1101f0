//! Result report
//!
//! A string-keyed tree of facts, measures, error codes and optional raw
//! datapoints. Paths use `.` as separator, so
//! `rsa-2048.testvec0032.latency.average.value` lands four levels deep.
//! Keys keep insertion order when serialized.

use std::fmt;

use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::debug;

use crate::stats::measure::Measure;

#[derive(Debug, Clone, PartialEq)]
pub enum ReportValue {
    Text(String),
    Integer(u64),
    Number(f64),
    Series(Vec<f64>),
    Tree(ResultReport),
}

impl Serialize for ReportValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ReportValue::Text(s) => serializer.serialize_str(s),
            ReportValue::Integer(i) => serializer.serialize_u64(*i),
            ReportValue::Number(n) => serializer.serialize_f64(*n),
            ReportValue::Series(points) => points.serialize(serializer),
            ReportValue::Tree(tree) => tree.serialize(serializer),
        }
    }
}

impl fmt::Display for ReportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportValue::Text(s) => write!(f, "{s}"),
            ReportValue::Integer(i) => write!(f, "{i}"),
            ReportValue::Number(n) => write!(f, "{n}"),
            ReportValue::Series(points) => write!(f, "[{} points]", points.len()),
            ReportValue::Tree(tree) => write!(f, "{{{} entries}}", tree.entries.len()),
        }
    }
}

impl From<&str> for ReportValue {
    fn from(s: &str) -> Self {
        ReportValue::Text(s.to_string())
    }
}

impl From<String> for ReportValue {
    fn from(s: String) -> Self {
        ReportValue::Text(s)
    }
}

impl From<u64> for ReportValue {
    fn from(i: u64) -> Self {
        ReportValue::Integer(i)
    }
}

impl From<usize> for ReportValue {
    fn from(i: usize) -> Self {
        ReportValue::Integer(i as u64)
    }
}

impl From<f64> for ReportValue {
    fn from(n: f64) -> Self {
        ReportValue::Number(n)
    }
}

impl From<Vec<f64>> for ReportValue {
    fn from(points: Vec<f64>) -> Self {
        ReportValue::Series(points)
    }
}

impl From<ResultReport> for ReportValue {
    fn from(tree: ResultReport) -> Self {
        ReportValue::Tree(tree)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultReport {
    entries: Vec<(String, ReportValue)>,
}

impl ResultReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-level entries, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ReportValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn slot(&mut self, key: &str) -> &mut ReportValue {
        let pos = match self.entries.iter().position(|(k, _)| k == key) {
            Some(pos) => pos,
            None => {
                self.entries.push((key.to_string(), ReportValue::Tree(ResultReport::new())));
                self.entries.len() - 1
            }
        };
        &mut self.entries[pos].1
    }

    /// Set the leaf at a dotted `path`, creating intermediate levels. A leaf
    /// standing where a level is needed gets replaced.
    pub fn add(&mut self, path: &str, value: impl Into<ReportValue>) {
        self.insert(&[], path, value.into());
    }

    /// [`add`](Self::add) below literal `prefix` keys. Prefix keys are never
    /// split, so a label such as `aes.cbc` stays one level.
    pub fn add_under(&mut self, prefix: &[&str], path: &str, value: impl Into<ReportValue>) {
        self.insert(prefix, path, value.into());
    }

    fn insert(&mut self, prefix: &[&str], path: &str, value: ReportValue) {
        let segments: Vec<&str> = prefix.iter().copied().chain(path.split('.')).collect();
        let Some((last, levels)) = segments.split_last() else {
            return;
        };

        let mut node = self;
        for &segment in levels {
            let slot = node.slot(segment);
            if !matches!(slot, ReportValue::Tree(_)) {
                debug!(key = segment, "report leaf replaced by a level");
                *slot = ReportValue::Tree(ResultReport::new());
            }
            node = match slot {
                ReportValue::Tree(tree) => tree,
                _ => unreachable!("slot was just made a tree"),
            };
        }

        let slot = node.slot(last);
        if !matches!(slot, ReportValue::Tree(tree) if tree.is_empty()) {
            debug!(key = *last, "report value overwritten");
        }
        *slot = value;
    }

    /// `path.value`, `path.unit`, `path.error` and `path.relerr`.
    pub fn add_measure(&mut self, path: &str, measure: &Measure) {
        self.add_measure_under(&[], path, measure);
    }

    pub fn add_measure_under(&mut self, prefix: &[&str], path: &str, measure: &Measure) {
        self.add_under(prefix, &format!("{path}.value"), measure.value());
        self.add_under(prefix, &format!("{path}.unit"), measure.unit());
        self.add_under(prefix, &format!("{path}.error"), measure.error());
        self.add_under(prefix, &format!("{path}.relerr"), measure.relerr());
    }

    /// Attach `child` under a literal key (dots are not split).
    pub fn add_child(&mut self, key: &str, child: ResultReport) {
        *self.slot(key) = ReportValue::Tree(child);
    }

    pub fn get(&self, path: &str) -> Option<&ReportValue> {
        self.get_under(&[], path)
    }

    /// [`get`](Self::get) below literal `prefix` keys.
    pub fn get_under(&self, prefix: &[&str], path: &str) -> Option<&ReportValue> {
        let mut node = self;
        let mut segments = prefix.iter().copied().chain(path.split('.')).peekable();
        while let Some(segment) = segments.next() {
            let value = node.entries.iter().find(|(k, _)| k == segment).map(|(_, v)| v)?;
            if segments.peek().is_none() {
                return Some(value);
            }
            node = match value {
                ReportValue::Tree(tree) => tree,
                _ => return None,
            };
        }
        None
    }

    pub fn get_number(&self, path: &str) -> Option<f64> {
        match self.get(path)? {
            ReportValue::Number(n) => Some(*n),
            ReportValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn get_text(&self, path: &str) -> Option<&str> {
        match self.get(path)? {
            ReportValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Dotted paths of every leaf, depth first.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_paths("", &mut out);
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut Vec<String>) {
        for (key, value) in &self.entries {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            match value {
                ReportValue::Tree(tree) => tree.collect_paths(&path, out),
                _ => out.push(path),
            }
        }
    }
}

impl Serialize for ResultReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_paths_nest() {
        let mut report = ResultReport::new();
        report.add("aes-128.testvec0016.threads", 4usize);
        report.add("aes-128.testvec0016.errorcode", "CKR_OK");
        report.add("aes-128.testvec0032.wallclock.value", 12.5);

        assert_eq!(report.get_number("aes-128.testvec0016.threads"), Some(4.0));
        assert_eq!(report.get_text("aes-128.testvec0016.errorcode"), Some("CKR_OK"));
        assert_eq!(report.get_number("aes-128.testvec0032.wallclock.value"), Some(12.5));
        assert!(report.get("aes-128.testvec0064").is_none());
        assert!(report.get("aes-128.testvec0016.threads.value").is_none());
    }

    #[test]
    fn measure_leaves() {
        let mut report = ResultReport::new();
        report.add_measure("k.v.latency.average", &Measure::new(1.053712894, 0.0021, "ms"));
        assert_eq!(
            report.leaf_paths(),
            vec![
                "k.v.latency.average.value",
                "k.v.latency.average.unit",
                "k.v.latency.average.error",
                "k.v.latency.average.relerr",
            ]
        );
        assert_eq!(report.get_text("k.v.latency.average.unit"), Some("ms"));
    }

    #[test]
    fn serializes_in_insertion_order() {
        let mut report = ResultReport::new();
        report.add("b.x", 1u64);
        report.add("a", "text");
        report.add("b.points", vec![0.5, 1.5]);
        let mut outer = ResultReport::new();
        outer.add_child("rand using rand-128", report);

        let json = serde_json::to_string(&outer).unwrap();
        assert_eq!(json, r#"{"rand using rand-128":{"b":{"x":1,"points":[0.5,1.5]},"a":"text"}}"#);
    }

    #[test]
    fn dotted_label_stays_one_level() {
        let mut report = ResultReport::new();
        report.add_under(&["aes.cbc-128", "testvec0016"], "errorcode", "CKR_OK");
        report.add_measure_under(&["aes.cbc-128", "testvec0016"], "wallclock", &Measure::new(3.0, 0.01, "ms"));

        assert_eq!(report.iter().map(|(k, _)| k).collect::<Vec<_>>(), vec!["aes.cbc-128"]);
        assert!(report.get("aes.cbc-128.testvec0016.errorcode").is_none());
        assert_eq!(
            report.get_under(&["aes.cbc-128", "testvec0016"], "errorcode"),
            Some(&ReportValue::from("CKR_OK"))
        );
        assert_eq!(
            report.get_under(&["aes.cbc-128"], "testvec0016.wallclock.unit"),
            Some(&ReportValue::from("ms"))
        );
    }

    #[test]
    fn later_value_wins_on_the_same_path() {
        let mut report = ResultReport::new();
        report.add("a.b", 1u64);
        report.add("a.b", 2u64);
        assert_eq!(report.get_number("a.b"), Some(2.0));
        assert_eq!(report.leaf_paths(), vec!["a.b"]);
    }

    #[test]
    fn leaf_replaced_by_level() {
        let mut report = ResultReport::new();
        report.add("a.b", 1u64);
        report.add("a.b.c", 2u64);
        assert_eq!(report.get_number("a.b.c"), Some(2.0));
    }
}
