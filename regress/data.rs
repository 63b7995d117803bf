//! # Observation Loading
//!
//! Reads a headed CSV file into labelled observations. The first column is
//! the binary label, every remaining column is a feature. Failures are
//! treated as user-input errors and reported with the offending line.
//!
//! Partitioning is the caller's concern; [`partition_round_robin`] is the
//! scheme used by the command-line tool.

use crate::driver::Observation;
use csv::ReaderBuilder;
use ndarray::Array1;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to parse CSV input: {0}")]
    CsvError(#[from] csv::Error),
    #[error("The input needs a label column and at least one feature column; the header has {0} column(s).")]
    TooFewColumns(usize),
    #[error("The input file contains no data rows.")]
    Empty,
    #[error("Line {line}: label '{value}' is not one of 1, 0, true, false.")]
    InvalidLabel { line: u64, value: String },
    #[error("Line {line}: column '{column}' holds '{value}', which is not a number.")]
    NonNumeric {
        line: u64,
        column: String,
        value: String,
    },
    #[error("Line {line}: expected {expected} fields as in the header, found {found}.")]
    RaggedRow {
        line: u64,
        expected: usize,
        found: usize,
    },
}

/// Loads every row of `path`.
pub fn load_observations(path: impl AsRef<Path>) -> Result<Vec<Observation>, DataError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.len() < 2 {
        return Err(DataError::TooFewColumns(headers.len()));
    }

    let mut observations = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map_or(0, |p| p.line());
        if record.len() != headers.len() {
            return Err(DataError::RaggedRow {
                line,
                expected: headers.len(),
                found: record.len(),
            });
        }

        let label = parse_label(&record[0]).ok_or_else(|| DataError::InvalidLabel {
            line,
            value: record[0].to_string(),
        })?;

        let features = record
            .iter()
            .zip(headers.iter())
            .skip(1)
            .map(|(field, column)| {
                field.parse::<f64>().map_err(|_| DataError::NonNumeric {
                    line,
                    column: column.clone(),
                    value: field.to_string(),
                })
            })
            .collect::<Result<Array1<f64>, DataError>>()?;

        observations.push(Observation::new(label, features));
    }

    if observations.is_empty() {
        return Err(DataError::Empty);
    }
    log::info!(
        "Loaded {} observations with {} features.",
        observations.len(),
        headers.len() - 1
    );
    Ok(observations)
}

fn parse_label(field: &str) -> Option<bool> {
    match field.to_ascii_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}

/// Deals rows into `count` partitions in turn. Row `i` lands in partition
/// `i % count`; a `count` of zero is treated as one.
pub fn partition_round_robin(observations: Vec<Observation>, count: usize) -> Vec<Vec<Observation>> {
    let count = count.max(1);
    let mut partitions: Vec<Vec<Observation>> = (0..count).map(|_| Vec::new()).collect();
    for (index, observation) in observations.into_iter().enumerate() {
        partitions[index % count].push(observation);
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        write!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    #[test]
    fn loads_labels_and_features() {
        let file = create_test_csv("y,intercept,age\n1,1.0,0.5\nfalse,1.0,-2\nTRUE, 1 ,3e-1\n").unwrap();
        let rows = load_observations(file.path()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], Observation::new(true, array![1.0, 0.5]));
        assert_eq!(rows[1], Observation::new(false, array![1.0, -2.0]));
        assert_eq!(rows[2], Observation::new(true, array![1.0, 0.3]));
    }

    #[test]
    fn rejects_bad_labels() {
        let file = create_test_csv("y,x\n2,1.0\n").unwrap();
        match load_observations(file.path()) {
            Err(DataError::InvalidLabel { line, value }) => {
                assert_eq!(line, 2);
                assert_eq!(value, "2");
            }
            other => panic!("expected InvalidLabel, got {other:?}"),
        }
    }

    #[test]
    fn rejects_non_numeric_features() {
        let file = create_test_csv("y,x,z\n1,1.0,abc\n").unwrap();
        match load_observations(file.path()) {
            Err(DataError::NonNumeric { column, value, .. }) => {
                assert_eq!(column, "z");
                assert_eq!(value, "abc");
            }
            other => panic!("expected NonNumeric, got {other:?}"),
        }
    }

    #[test]
    fn rejects_ragged_rows() {
        let file = create_test_csv("y,x,z\n1,1.0,2.0\n0,1.0\n").unwrap();
        assert!(matches!(
            load_observations(file.path()),
            Err(DataError::RaggedRow {
                line: 3,
                expected: 3,
                found: 2
            })
        ));
    }

    #[test]
    fn rejects_empty_and_label_only_files() {
        let header_only = create_test_csv("y,x\n").unwrap();
        assert!(matches!(
            load_observations(header_only.path()),
            Err(DataError::Empty)
        ));

        let label_only = create_test_csv("y\n1\n").unwrap();
        assert!(matches!(
            load_observations(label_only.path()),
            Err(DataError::TooFewColumns(1))
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_observations("/nonexistent/observations.csv").is_err());
    }

    #[test]
    fn round_robin_deals_rows_in_turn() {
        let rows: Vec<Observation> = (0..5)
            .map(|i| Observation::new(i % 2 == 0, array![i as f64]))
            .collect();
        let partitions = partition_round_robin(rows, 2);
        assert_eq!(partitions.len(), 2);
        assert_eq!(partitions[0].len(), 3);
        assert_eq!(partitions[1].len(), 2);
        assert_eq!(partitions[1][0].features, array![1.0]);

        let single = partition_round_robin(Vec::new(), 0);
        assert_eq!(single.len(), 1);
    }
}
