//! Tabular values exchanged between fetching, transformation, and delivery.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("row has {got} cells but the table has {expected} columns")]
    RowWidth { expected: usize, got: usize },
    #[error("expected an array of objects or a single object, got {0}")]
    Shape(String),
    #[error("columns built from arrays must have equal lengths")]
    RaggedColumns,
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV output was not valid UTF-8")]
    Utf8,
}

/// A single typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Cell {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            Value::String(s) => Self::Str(s.clone()),
            // Nested structures keep their JSON text form.
            other => Self::Str(other.to_string()),
        }
    }

    /// Parse a CSV field back into a typed cell.
    fn from_csv_field(field: &str) -> Self {
        if field.is_empty() {
            return Self::Null;
        }
        match field {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            _ => {}
        }
        if let Ok(i) = field.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = field.parse::<f64>() {
            return Self::Float(f);
        }
        Self::Str(field.to_string())
    }

    fn to_csv_field(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => s.clone(),
        }
    }
}

/// A rectangular, column-named dataset. Every row holds exactly one
/// cell per column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<(), TableError> {
        if row.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                got: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// Build a table from a parsed JSON document.
    ///
    /// An array of objects becomes one row per element, columns drawn
    /// from the keys in first-seen order. A single object whose values
    /// are all arrays is treated column-wise; any other object becomes
    /// a one-row table.
    pub fn from_json(value: &Value) -> Result<Self, TableError> {
        match value {
            Value::Array(items) => Self::from_object_rows(items),
            Value::Object(map) => {
                if !map.is_empty() && map.values().all(Value::is_array) {
                    Self::from_column_arrays(map)
                } else {
                    Self::from_object_rows(std::slice::from_ref(value))
                }
            }
            other => Err(TableError::Shape(json_type_name(other).to_string())),
        }
    }

    fn from_object_rows(items: &[Value]) -> Result<Self, TableError> {
        let mut columns: Vec<String> = Vec::new();
        for item in items {
            let Value::Object(obj) = item else {
                return Err(TableError::Shape(json_type_name(item).to_string()));
            };
            for key in obj.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }

        let mut table = Self::new(columns);
        for item in items {
            let Value::Object(obj) = item else {
                unreachable!("validated above");
            };
            let row = table
                .columns
                .iter()
                .map(|col| obj.get(col).map_or(Cell::Null, Cell::from_json))
                .collect();
            table.push_row(row)?;
        }
        Ok(table)
    }

    fn from_column_arrays(map: &serde_json::Map<String, Value>) -> Result<Self, TableError> {
        let columns: Vec<String> = map.keys().cloned().collect();
        let lengths: Vec<usize> = map
            .values()
            .map(|v| v.as_array().map_or(0, Vec::len))
            .collect();
        let row_count = lengths.first().copied().unwrap_or(0);
        if lengths.iter().any(|&len| len != row_count) {
            return Err(TableError::RaggedColumns);
        }

        let mut table = Self::new(columns);
        for i in 0..row_count {
            let row = map
                .values()
                .map(|v| Cell::from_json(&v.as_array().expect("checked above")[i]))
                .collect();
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Parse CSV text with a header row, inferring cell types.
    pub fn from_csv(text: &str) -> Result<Self, TableError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(text.as_bytes());

        let columns: Vec<String> = reader
            .headers()?
            .iter()
            .map(ToString::to_string)
            .collect();

        let mut table = Self::new(columns);
        for record in reader.records() {
            let record = record?;
            let row = record.iter().map(Cell::from_csv_field).collect();
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Serialize to CSV text: header row plus one line per row, with
    /// standard quoting of embedded separators and newlines.
    pub fn to_csv(&self) -> Result<String, TableError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(Cell::to_csv_field))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| TableError::Csv(csv::Error::from(e.into_error())))?;
        String::from_utf8(bytes).map_err(|_| TableError::Utf8)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_array_of_objects() {
        let value = json!([{"a": 1, "b": 2}, {"a": 3, "b": 4}]);
        let table = Table::from_json(&value).unwrap();

        assert_eq!(table.columns(), ["a", "b"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows()[0], vec![Cell::Int(1), Cell::Int(2)]);
        assert_eq!(table.rows()[1], vec![Cell::Int(3), Cell::Int(4)]);
    }

    #[test]
    fn test_json_single_object_is_one_row() {
        let value = json!({"name": "x", "count": 7});
        let table = Table::from_json(&value).unwrap();

        assert_eq!(table.columns(), ["name", "count"]);
        assert_eq!(table.row_count(), 1);
        assert_eq!(
            table.rows()[0],
            vec![Cell::Str("x".to_string()), Cell::Int(7)]
        );
    }

    #[test]
    fn test_json_object_of_arrays_is_column_wise() {
        let value = json!({"a": [1, 2, 3], "b": ["x", "y", "z"]});
        let table = Table::from_json(&value).unwrap();

        assert_eq!(table.columns(), ["a", "b"]);
        assert_eq!(table.row_count(), 3);
        assert_eq!(
            table.rows()[2],
            vec![Cell::Int(3), Cell::Str("z".to_string())]
        );
    }

    #[test]
    fn test_json_ragged_columns_rejected() {
        let value = json!({"a": [1, 2], "b": [1]});
        assert!(matches!(
            Table::from_json(&value),
            Err(TableError::RaggedColumns)
        ));
    }

    #[test]
    fn test_json_scalar_rejected() {
        assert!(Table::from_json(&json!(42)).is_err());
        assert!(Table::from_json(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_missing_keys_become_null() {
        let value = json!([{"a": 1}, {"a": 2, "b": 3}]);
        let table = Table::from_json(&value).unwrap();

        assert_eq!(table.columns(), ["a", "b"]);
        assert_eq!(table.rows()[0], vec![Cell::Int(1), Cell::Null]);
    }

    #[test]
    fn test_csv_round_trip_preserves_types() {
        let mut table = Table::new(vec![
            "name".to_string(),
            "count".to_string(),
            "ratio".to_string(),
            "active".to_string(),
        ]);
        table
            .push_row(vec![
                Cell::Str("widget".to_string()),
                Cell::Int(12),
                Cell::Float(0.5),
                Cell::Bool(true),
            ])
            .unwrap();
        table
            .push_row(vec![
                Cell::Str("gadget".to_string()),
                Cell::Int(-3),
                Cell::Float(2.25),
                Cell::Bool(false),
            ])
            .unwrap();

        let csv = table.to_csv().unwrap();
        let parsed = Table::from_csv(&csv).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn test_csv_quotes_embedded_delimiters() {
        let mut table = Table::new(vec!["text".to_string()]);
        table
            .push_row(vec![Cell::Str("a,b and \"c\"\nnext".to_string())])
            .unwrap();

        let csv = table.to_csv().unwrap();
        assert!(csv.contains("\"a,b and \"\"c\"\"\nnext\""));

        let parsed = Table::from_csv(&csv).unwrap();
        assert_eq!(parsed, table);
    }

    #[test]
    fn test_csv_header_expected() {
        let table = Table::from_csv("a,b\n1,2\n3,4\n").unwrap();
        assert_eq!(table.columns(), ["a", "b"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.rows()[1], vec![Cell::Int(3), Cell::Int(4)]);
    }

    #[test]
    fn test_push_row_width_checked() {
        let mut table = Table::new(vec!["a".to_string(), "b".to_string()]);
        assert!(table.push_row(vec![Cell::Int(1)]).is_err());
    }
}
