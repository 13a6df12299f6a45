//! Tabular IO
//!
//! Loading of (uncertainty, error) pair tables and persistence of the
//! predicted bins and error bound tables.
use crate::aggregate::{LandmarkResults, MeasureResults};
use crate::config::PipelineConfig;
use crate::data::{FoldSelector, PairTable, Split, UncertaintyPairing};
use crate::errors::UncertaintyError;
use hashbrown::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const UID_COLUMN: &str = "uid";
const BOUNDS_FOLD_COLUMN: &str = "fold";

/// Source of (uncertainty, error) tables.
pub trait PairSource: Sync {
    /// Load the rows of `split` selected by `selector`, with only the
    /// requested value columns.
    fn load(
        &self,
        model: &str,
        landmark: usize,
        split: Split,
        selector: FoldSelector,
        columns: &[&str],
    ) -> Result<PairTable, UncertaintyError>;
}

fn read_error(path: &Path, msg: impl std::fmt::Display) -> UncertaintyError {
    UncertaintyError::UnableToRead(format!("{}: {}", path.display(), msg))
}

fn write_error(path: &Path, msg: impl std::fmt::Display) -> UncertaintyError {
    UncertaintyError::UnableToWrite(format!("{}: {}", path.display(), msg))
}

fn parse_fold(value: &str) -> Option<usize> {
    let value = value.trim();
    value.parse::<usize>().ok().or_else(|| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| *v >= 0.0 && v.fract() == 0.0)
            .map(|v| v as usize)
    })
}

fn parse_value(value: &str) -> Result<f64, std::num::ParseFloatError> {
    let value = value.trim();
    if value.is_empty() {
        Ok(f64::NAN)
    } else {
        value.parse::<f64>()
    }
}

/// Read a csv pair table, keeping the rows whose `fold_column` matches
/// `selector` and only the requested `columns`.
///
/// * `path` - Csv file with a header row.
/// * `fold_column` - Column holding the fold index of each row.
/// * `selector` - Fold(s) to keep.
/// * `columns` - Value columns to return, in this order.
pub fn read_pair_table(
    path: &Path,
    fold_column: &str,
    selector: FoldSelector,
    columns: &[&str],
) -> Result<PairTable, UncertaintyError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| read_error(path, e))?;
    let headers = reader.headers().map_err(|e| read_error(path, e))?.clone();
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| UncertaintyError::MissingColumn(format!("{} in {}", name, path.display())))
    };
    let uid_index = position(UID_COLUMN)?;
    let fold_index = position(fold_column)?;
    let value_indices = columns.iter().map(|&c| position(c)).collect::<Result<Vec<_>, _>>()?;

    let mut uids = Vec::new();
    let mut folds = Vec::new();
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(|e| read_error(path, e))?;
        let fold_str = record.get(fold_index).unwrap_or("");
        let fold =
            parse_fold(fold_str).ok_or_else(|| read_error(path, format!("row {}: invalid fold {:?}", row, fold_str)))?;
        if !selector.matches(fold) {
            continue;
        }
        uids.push(record.get(uid_index).unwrap_or("").to_string());
        folds.push(fold);
        for (col, &idx) in value_indices.iter().enumerate() {
            let v = parse_value(record.get(idx).unwrap_or(""))
                .map_err(|e| read_error(path, format!("row {} column {}: {}", row, columns[col], e)))?;
            values[col].push(v);
        }
    }

    let mut table = PairTable::new(uids, folds)?;
    for (name, v) in columns.iter().zip(values) {
        table.set_column(name, v)?;
    }
    Ok(table)
}

/// Pair tables stored as csv files under the configured dataset root.
pub struct CsvPairSource<'a> {
    config: &'a PipelineConfig,
}

impl<'a> CsvPairSource<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        CsvPairSource { config }
    }
}

impl PairSource for CsvPairSource<'_> {
    fn load(
        &self,
        model: &str,
        landmark: usize,
        split: Split,
        selector: FoldSelector,
        columns: &[&str],
    ) -> Result<PairTable, UncertaintyError> {
        let path = self.config.pairs_path(model, landmark, split);
        read_pair_table(&path, split.fold_column(), selector, columns)
    }
}

/// Pair tables held in memory, keyed by model, landmark and split.
#[derive(Debug, Default, Clone)]
pub struct InMemoryPairSource {
    tables: HashMap<(String, usize, Split), PairTable>,
}

impl InMemoryPairSource {
    pub fn insert(&mut self, model: &str, landmark: usize, split: Split, table: PairTable) {
        self.tables.insert((model.to_string(), landmark, split), table);
    }
}

impl PairSource for InMemoryPairSource {
    fn load(
        &self,
        model: &str,
        landmark: usize,
        split: Split,
        selector: FoldSelector,
        columns: &[&str],
    ) -> Result<PairTable, UncertaintyError> {
        let table = self
            .tables
            .get(&(model.to_string(), landmark, split))
            .ok_or_else(|| {
                UncertaintyError::UnableToRead(format!(
                    "no {} table for model {} landmark {}",
                    split, model, landmark
                ))
            })?;
        table.filter_folds(selector).select(columns)
    }
}

pub fn predicted_bins_path(dir: &Path, landmark: usize) -> PathBuf {
    dir.join(format!("res_predicted_bins_l{}.csv", landmark))
}

pub fn error_bounds_path(dir: &Path, landmark: usize) -> PathBuf {
    dir.join(format!("estimated_error_bounds_l{}.csv", landmark))
}

/// Write the predicted bins table and the error bounds table of `results` into `dir`.
pub fn save_landmark_results(dir: &Path, results: &LandmarkResults) -> Result<(), UncertaintyError> {
    fs::create_dir_all(dir).map_err(|e| write_error(dir, e))?;

    let path = predicted_bins_path(dir, results.landmark);
    let mut writer = csv::Writer::from_path(&path).map_err(|e| write_error(&path, e))?;
    let value_columns: Vec<&str> = results.table.column_names().collect();
    let mut header = vec![UID_COLUMN.to_string(), Split::Testing.fold_column().to_string()];
    header.extend(value_columns.iter().map(|c| c.to_string()));
    header.extend(results.measures.iter().map(|m| m.pairing.bins_column()));
    writer.write_record(&header).map_err(|e| write_error(&path, e))?;

    let columns = value_columns
        .iter()
        .map(|c| results.table.column(c))
        .collect::<Result<Vec<_>, _>>()?;
    for row in 0..results.table.len() {
        let mut record = vec![results.table.uids[row].clone(), results.table.folds[row].to_string()];
        record.extend(columns.iter().map(|c| c[row].to_string()));
        record.extend(results.measures.iter().map(|m| m.bins[row].to_string()));
        writer.write_record(&record).map_err(|e| write_error(&path, e))?;
    }
    writer.flush().map_err(|e| write_error(&path, e))?;

    let path = error_bounds_path(dir, results.landmark);
    let mut writer = csv::Writer::from_path(&path).map_err(|e| write_error(&path, e))?;
    let mut header = vec![BOUNDS_FOLD_COLUMN.to_string()];
    header.extend(results.measures.iter().map(|m| m.pairing.bounds_column()));
    writer.write_record(&header).map_err(|e| write_error(&path, e))?;
    let num_folds = results.measures.iter().map(|m| m.fold_bounds.len()).max().unwrap_or(0);
    for fold in 0..num_folds {
        let mut record = vec![fold.to_string()];
        for m in &results.measures {
            let cell = match m.bounds_for(fold) {
                Some(b) => serde_json::to_string(b).map_err(|e| write_error(&path, e))?,
                None => String::new(),
            };
            record.push(cell);
        }
        writer.write_record(&record).map_err(|e| write_error(&path, e))?;
    }
    writer.flush().map_err(|e| write_error(&path, e))?;
    Ok(())
}

fn read_fold_bounds(path: &Path, pairings: &[UncertaintyPairing]) -> Result<Vec<Vec<Vec<f64>>>, UncertaintyError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| read_error(path, e))?;
    let headers = reader.headers().map_err(|e| read_error(path, e))?.clone();
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| UncertaintyError::MissingColumn(format!("{} in {}", name, path.display())))
    };
    let fold_index = position(BOUNDS_FOLD_COLUMN)?;
    let indices = pairings
        .iter()
        .map(|p| position(&p.bounds_column()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut rows: Vec<(usize, Vec<Vec<f64>>)> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| read_error(path, e))?;
        let fold_str = record.get(fold_index).unwrap_or("");
        let fold = parse_fold(fold_str).ok_or_else(|| read_error(path, format!("invalid fold {:?}", fold_str)))?;
        let bounds = indices
            .iter()
            .map(|&i| serde_json::from_str::<Vec<f64>>(record.get(i).unwrap_or("")).map_err(|e| read_error(path, e)))
            .collect::<Result<Vec<_>, _>>()?;
        rows.push((fold, bounds));
    }
    rows.sort_by_key(|(fold, _)| *fold);
    if rows.iter().enumerate().any(|(i, (fold, _))| i != *fold) {
        return Err(read_error(path, "folds are not numbered 0..n"));
    }

    // Transpose to [measure][fold].
    let mut per_measure = vec![Vec::with_capacity(rows.len()); pairings.len()];
    for (_, bounds) in rows {
        for (m, b) in bounds.into_iter().enumerate() {
            per_measure[m].push(b);
        }
    }
    Ok(per_measure)
}

/// The `pairings` whose bins were saved for `landmark` in `dir`.
pub fn saved_pairings(
    dir: &Path,
    landmark: usize,
    pairings: &[UncertaintyPairing],
) -> Result<Vec<UncertaintyPairing>, UncertaintyError> {
    let path = predicted_bins_path(dir, landmark);
    let mut reader = csv::Reader::from_path(&path).map_err(|e| read_error(&path, e))?;
    let headers = reader.headers().map_err(|e| read_error(&path, e))?;
    Ok(pairings
        .iter()
        .filter(|p| headers.iter().any(|h| h == p.bins_column()))
        .cloned()
        .collect())
}

/// Read back the tables written by [`save_landmark_results`] for `pairings`.
pub fn load_landmark_results(
    dir: &Path,
    model: &str,
    landmark: usize,
    pairings: &[UncertaintyPairing],
) -> Result<LandmarkResults, UncertaintyError> {
    let path = predicted_bins_path(dir, landmark);
    let mut reader = csv::Reader::from_path(&path).map_err(|e| read_error(&path, e))?;
    let headers = reader.headers().map_err(|e| read_error(&path, e))?.clone();
    let bins_columns: Vec<String> = pairings.iter().map(|p| p.bins_column()).collect();
    let fold_column = Split::Testing.fold_column();
    let value_columns: Vec<String> = headers
        .iter()
        .filter(|h| *h != UID_COLUMN && *h != fold_column && !h.ends_with(" bins"))
        .map(String::from)
        .collect();
    let value_refs: Vec<&str> = value_columns.iter().map(|s| s.as_str()).collect();
    let table = read_pair_table(&path, fold_column, FoldSelector::All, &value_refs)?;

    let bins_indices = bins_columns
        .iter()
        .map(|name| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| UncertaintyError::MissingColumn(format!("{} in {}", name, path.display())))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let mut bins: Vec<Vec<usize>> = vec![Vec::with_capacity(table.len()); pairings.len()];
    for record in reader.records() {
        let record = record.map_err(|e| read_error(&path, e))?;
        for (m, &i) in bins_indices.iter().enumerate() {
            let cell = record.get(i).unwrap_or("");
            let bin = parse_fold(cell).ok_or_else(|| read_error(&path, format!("invalid bin {:?}", cell)))?;
            bins[m].push(bin);
        }
    }

    let fold_bounds = read_fold_bounds(&error_bounds_path(dir, landmark), pairings)?;
    let measures = pairings
        .iter()
        .zip(bins.into_iter().zip(fold_bounds))
        .map(|(pairing, (bins, fold_bounds))| MeasureResults {
            pairing: pairing.clone(),
            bins,
            fold_bounds,
        })
        .collect();

    Ok(LandmarkResults {
        model: model.to_string(),
        landmark,
        table,
        measures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CSV: &str = "uid,Testing Fold,S-MHA Error,S-MHA Uncertainty,Other\n\
                       a,0,1.5,0.2,9\n\
                       b,1,2.5,0.4,9\n\
                       c,0,3.5,0.6,9\n\
                       d,1.0,4.5,,9\n";

    #[test]
    fn test_read_pair_table_by_fold() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        fs::write(&path, CSV).unwrap();

        let all = read_pair_table(&path, "Testing Fold", FoldSelector::All, &["S-MHA Error"]).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all.column_names().collect::<Vec<_>>(), vec!["S-MHA Error"]);

        let fold1 = read_pair_table(
            &path,
            "Testing Fold",
            FoldSelector::Fold(1),
            &["S-MHA Error", "S-MHA Uncertainty"],
        )
        .unwrap();
        assert_eq!(fold1.uids, vec!["b", "d"]);
        assert_eq!(fold1.column("S-MHA Error").unwrap(), &[2.5, 4.5]);
        assert!(fold1.column("S-MHA Uncertainty").unwrap()[1].is_nan());
    }

    #[test]
    fn test_read_pair_table_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pairs.csv");
        fs::write(&path, CSV).unwrap();
        assert!(matches!(
            read_pair_table(&path, "Validation Fold", FoldSelector::All, &[]),
            Err(UncertaintyError::MissingColumn(_))
        ));
        assert!(matches!(
            read_pair_table(&dir.path().join("missing.csv"), "Testing Fold", FoldSelector::All, &[]),
            Err(UncertaintyError::UnableToRead(_))
        ));
    }

    #[test]
    fn test_in_memory_source() {
        let table = PairTable::new(vec!["a".into(), "b".into()], vec![0, 1])
            .unwrap()
            .with_column("x", vec![1.0, 2.0])
            .unwrap();
        let mut source = InMemoryPairSource::default();
        source.insert("U-Net", 0, Split::Testing, table);
        let out = source
            .load("U-Net", 0, Split::Testing, FoldSelector::Fold(1), &["x"])
            .unwrap();
        assert_eq!(out.uids, vec!["b"]);
        assert!(source
            .load("U-Net", 0, Split::Validation, FoldSelector::All, &["x"])
            .is_err());
    }

    #[test]
    fn test_results_round_trip() {
        let pairing = UncertaintyPairing::new("S-MHA", "S-MHA Error", "S-MHA Uncertainty");
        let table = PairTable::new(vec!["a".into(), "b".into(), "c".into()], vec![0, 1, 1])
            .unwrap()
            .with_column("S-MHA Error", vec![1.25, 2.0, 7.5])
            .unwrap()
            .with_column("S-MHA Uncertainty", vec![0.1, 0.9, 0.5])
            .unwrap();
        let results = LandmarkResults {
            model: "U-Net".to_string(),
            landmark: 2,
            table,
            measures: vec![MeasureResults {
                pairing: pairing.clone(),
                bins: vec![0, 1, 1],
                fold_bounds: vec![vec![1.5, 3.0], vec![2.0, 8.25]],
            }],
        };

        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("Uncertainty_Preds").join("U-Net").join("4CH");
        save_landmark_results(&out_dir, &results).unwrap();
        assert!(predicted_bins_path(&out_dir, 2).exists());
        assert!(error_bounds_path(&out_dir, 2).exists());

        let unsaved = UncertaintyPairing::new("E-CPV", "E-CPV Error", "E-CPV Uncertainty");
        let saved = saved_pairings(&out_dir, 2, &[unsaved, pairing.clone()]).unwrap();
        assert_eq!(saved, vec![pairing.clone()]);

        let loaded = load_landmark_results(&out_dir, "U-Net", 2, &[pairing]).unwrap();
        assert_eq!(loaded, results);
    }
}
