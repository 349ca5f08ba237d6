//! Scan schedule: which parameter value each pair of a scan session was taken at.
//!
//! Schedules are TOML files:
//!
//! ```toml
//! device = "Laser"
//! parameter = "detuning"
//! unit = "MHz"
//!
//! [elements]
//! 1 = -5.0
//! 2 = "0"
//! 3 = 5
//! ```
//!
//! Keys are the 1-based pair index. Values are numbers or numeric strings; the text as
//! written is kept as the group label.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{AppResult, DaqError};

/// Scan parameter value assigned to one pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPoint {
    /// 1-based pair index.
    pub sequence_index: u32,
    /// Value as written in the schedule, used to key groups and name stored groups.
    pub label: String,
    /// Numeric value, used for ordering.
    pub value: f64,
}

/// Pre-loaded mapping from pair index to scan parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanSchedule {
    device: String,
    parameter: String,
    unit: String,
    points: BTreeMap<u32, ScanPoint>,
}

#[derive(Debug, Deserialize)]
struct ScheduleFile {
    device: String,
    parameter: String,
    #[serde(default)]
    unit: String,
    elements: BTreeMap<String, toml::Spanned<toml::Value>>,
}

impl ScanSchedule {
    /// Build a schedule from `(index, value)` pairs.
    pub fn new(
        device: impl Into<String>,
        parameter: impl Into<String>,
        unit: impl Into<String>,
        values: impl IntoIterator<Item = (u32, f64)>,
    ) -> AppResult<Self> {
        let mut points = BTreeMap::new();
        for (index, value) in values {
            let point = ScanPoint {
                sequence_index: index,
                label: value.to_string(),
                value,
            };
            insert_point(&mut points, point)?;
        }
        Self::from_parts(device.into(), parameter.into(), unit.into(), points)
    }

    /// Parse a schedule from TOML text.
    pub fn from_toml_str(text: &str) -> AppResult<Self> {
        let file: ScheduleFile =
            toml::from_str(text).map_err(|e| DaqError::Schedule(e.to_string()))?;

        let mut points = BTreeMap::new();
        for (key, raw) in &file.elements {
            let index: u32 = key.trim().parse().map_err(|_| {
                DaqError::Schedule(format!("element key '{}' is not a sequence index", key))
            })?;
            // Numbers keep their source token, so `-10.0` stays `-10.0`.
            let token = |fallback: String| {
                text.get(raw.span())
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .unwrap_or(fallback)
            };
            let (label, value) = match raw.get_ref() {
                toml::Value::Integer(i) => (token(i.to_string()), *i as f64),
                toml::Value::Float(f) => (token(f.to_string()), *f),
                toml::Value::String(s) => {
                    let label = s.trim().to_string();
                    let value = label.parse::<f64>().map_err(|_| {
                        DaqError::Schedule(format!(
                            "element {} value '{}' is not numeric",
                            index, s
                        ))
                    })?;
                    (label, value)
                }
                other => {
                    return Err(DaqError::Schedule(format!(
                        "element {} has unsupported value {}",
                        index, other
                    )))
                }
            };
            insert_point(
                &mut points,
                ScanPoint {
                    sequence_index: index,
                    label,
                    value,
                },
            )?;
        }
        Self::from_parts(file.device, file.parameter, file.unit, points)
    }

    /// Read and parse a schedule file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DaqError::Schedule(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    fn from_parts(
        device: String,
        parameter: String,
        unit: String,
        points: BTreeMap<u32, ScanPoint>,
    ) -> AppResult<Self> {
        if parameter.trim().is_empty() {
            return Err(DaqError::Schedule("parameter name is empty".into()));
        }
        if points.is_empty() {
            return Err(DaqError::Schedule("schedule has no elements".into()));
        }
        Ok(Self {
            device,
            parameter,
            unit,
            points,
        })
    }

    /// Device whose parameter is scanned.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Name of the scanned parameter.
    pub fn parameter(&self) -> &str {
        &self.parameter
    }

    /// Unit of the scanned parameter.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Number of scheduled pairs.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false for a loaded schedule.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Value for the 1-based pair `sequence_index`.
    pub fn point(&self, sequence_index: u32) -> Option<&ScanPoint> {
        self.points.get(&sequence_index)
    }

    /// Points in index order.
    pub fn points(&self) -> impl Iterator<Item = &ScanPoint> {
        self.points.values()
    }
}

fn insert_point(points: &mut BTreeMap<u32, ScanPoint>, point: ScanPoint) -> AppResult<()> {
    if point.sequence_index == 0 {
        return Err(DaqError::Schedule("sequence indices start at 1".into()));
    }
    if !point.value.is_finite() {
        return Err(DaqError::Schedule(format!(
            "element {} value is not finite",
            point.sequence_index
        )));
    }
    let index = point.sequence_index;
    if points.insert(index, point).is_some() {
        return Err(DaqError::Schedule(format!("duplicate element {}", index)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEDULE: &str = r#"
device = "Laser"
parameter = "detuning"
unit = "MHz"

[elements]
1 = -5.0
2 = " 0 "
3 = 5
"#;

    #[test]
    fn parses_numbers_and_numeric_strings() {
        let schedule = ScanSchedule::from_toml_str(SCHEDULE).unwrap();

        assert_eq!(schedule.device(), "Laser");
        assert_eq!(schedule.parameter(), "detuning");
        assert_eq!(schedule.unit(), "MHz");
        assert_eq!(schedule.len(), 3);

        let second = schedule.point(2).unwrap();
        assert_eq!(second.label, "0");
        assert_eq!(second.value, 0.0);
        let first = schedule.point(1).unwrap();
        assert_eq!(first.label, "-5.0");
        assert_eq!(first.value, -5.0);
        assert_eq!(schedule.point(3).unwrap().label, "5");
        assert!(schedule.point(4).is_none());
    }

    #[test]
    fn float_labels_keep_written_form() {
        let text = "device = \"d\"\nparameter = \"detuning\"\n[elements]\n1 = -10.0\n2 = 2.50\n3 = 1e3\n";
        let schedule = ScanSchedule::from_toml_str(text).unwrap();

        let labels: Vec<&str> = schedule.points().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, vec!["-10.0", "2.50", "1e3"]);
        assert_eq!(schedule.point(3).unwrap().value, 1000.0);
    }

    #[test]
    fn rejects_non_numeric_values() {
        let text = "device = \"d\"\nparameter = \"p\"\n[elements]\n1 = \"fast\"\n";
        assert!(matches!(
            ScanSchedule::from_toml_str(text),
            Err(DaqError::Schedule(_))
        ));
    }

    #[test]
    fn rejects_zero_index_and_empty() {
        let text = "device = \"d\"\nparameter = \"p\"\n[elements]\n0 = 1\n";
        assert!(ScanSchedule::from_toml_str(text).is_err());

        let text = "device = \"d\"\nparameter = \"p\"\n[elements]\n";
        assert!(ScanSchedule::from_toml_str(text).is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.toml");
        std::fs::write(&path, SCHEDULE).unwrap();

        let schedule = ScanSchedule::load(&path).unwrap();
        assert_eq!(schedule.points().count(), 3);

        assert!(matches!(
            ScanSchedule::load(dir.path().join("missing.toml")),
            Err(DaqError::Schedule(_))
        ));
    }

    #[test]
    fn programmatic_schedule_uses_value_as_label() {
        let schedule = ScanSchedule::new("dev", "power", "mW", [(1, 2.5), (2, 3.0)]).unwrap();
        assert_eq!(schedule.point(1).unwrap().label, "2.5");
        assert_eq!(schedule.point(2).unwrap().label, "3");
        assert!(ScanSchedule::new("dev", "power", "mW", [(1, 1.0), (1, 2.0)]).is_err());
    }
}
