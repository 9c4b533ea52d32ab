//! Phase result tables.

use std::io::Read;
use std::path::Path;

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::Result;
use crate::utils::fs::io_error;

/// Name of the label column, matched case-insensitively.
pub const PREDICTION_COLUMN: &str = "prediction";

/// Rows of a single phase CSV, kept as text exactly as the tool wrote them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl PhaseTable {
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| io_error("opening results", path, e))?;
        Self::from_reader(file)
    }

    /// Parse CSV with a header row. Every row is padded or cut to the header width.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Index of the prediction label column, if the table has one.
    pub fn prediction_column(&self) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(PREDICTION_COLUMN))
    }

    /// Count of rows per prediction label, or `None` without a label column.
    pub fn label_counts(&self) -> Option<LabelCounts> {
        let column = self.prediction_column()?;
        let mut counts = LabelCounts::default();
        for row in &self.rows {
            if let Some(label) = row.get(column).map(|l| l.trim())
                && !label.is_empty()
            {
                counts.add(label);
            }
        }
        Some(counts)
    }
}

/// Label counts in first-occurrence order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelCounts(Vec<(String, usize)>);

impl LabelCounts {
    fn add(&mut self, label: &str) {
        match self.0.iter_mut().find(|(l, _)| l == label) {
            Some((_, count)) => *count += 1,
            None => self.0.push((label.to_string(), 1)),
        }
    }

    pub fn get(&self, label: &str) -> Option<usize> {
        self.0.iter().find(|(l, _)| l == label).map(|(_, c)| *c)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.0.iter().map(|(l, c)| (l.as_str(), *c))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total(&self) -> usize {
        self.0.iter().map(|(_, c)| c).sum()
    }
}

impl Serialize for LabelCounts {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, count) in &self.0 {
            map.serialize_entry(label, count)?;
        }
        map.end()
    }
}

/// JSON form of a cell: integers and floats become numbers, empty cells null.
pub fn cell_to_json(cell: &str) -> serde_json::Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return serde_json::Value::Null;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return int.into();
    }
    if let Ok(float) = trimmed.parse::<f64>()
        && let Some(number) = serde_json::Number::from_f64(float)
    {
        return serde_json::Value::Number(number);
    }
    serde_json::Value::String(cell.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = "\
Sequence_ID,Prediction,Confidence
s1,A,0.91
s2,A,0.88
s3,B,0.52
s4,C,0.77
s5,C,0.60
s6,C,0.99
";

    #[test]
    fn test_label_counts_keep_first_occurrence_order() {
        let table = PhaseTable::from_reader(SAMPLE.as_bytes()).unwrap();
        let counts = table.label_counts().unwrap();

        assert_eq!(table.row_count(), 6);
        let ordered: Vec<(&str, usize)> = counts.iter().collect();
        assert_eq!(ordered, vec![("A", 2), ("B", 1), ("C", 3)]);
        assert_eq!(counts.total(), 6);
        assert_eq!(
            serde_json::to_string(&counts).unwrap(),
            r#"{"A":2,"B":1,"C":3}"#
        );
    }

    #[test]
    fn test_prediction_column_is_case_insensitive() {
        let table = PhaseTable::from_reader("id,PREDICTION\n1,x\n".as_bytes()).unwrap();
        assert_eq!(table.prediction_column(), Some(1));

        let table = PhaseTable::from_reader("id,label\n1,x\n".as_bytes()).unwrap();
        assert!(table.label_counts().is_none());
    }

    #[test]
    fn test_empty_labels_not_counted() {
        let table = PhaseTable::from_reader("id,prediction\n1,x\n2,\n3\n".as_bytes()).unwrap();
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows()[2], vec!["3".to_string(), String::new()]);
        assert_eq!(table.label_counts().unwrap().get("x"), Some(1));
        assert_eq!(table.label_counts().unwrap().len(), 1);
    }

    #[test]
    fn test_rows_match_header_width() {
        let table =
            PhaseTable::from_reader("id,prediction\n1,x,0.9,extra\n2\n".as_bytes()).unwrap();
        assert_eq!(table.rows()[0], vec!["1".to_string(), "x".to_string()]);
        assert_eq!(table.rows()[1], vec!["2".to_string(), String::new()]);
        assert!(table.rows().iter().all(|r| r.len() == table.headers().len()));
    }

    #[test]
    fn test_cell_to_json() {
        assert_eq!(cell_to_json("42"), json!(42));
        assert_eq!(cell_to_json("0.5"), json!(0.5));
        assert_eq!(cell_to_json(""), serde_json::Value::Null);
        assert_eq!(cell_to_json("Omicron"), json!("Omicron"));
        assert_eq!(cell_to_json("NaN"), json!("NaN"));
    }
}
