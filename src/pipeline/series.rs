//! Series assembly: turn per-year outcomes into the year-indexed table.

use super::aggregator::YearOutcome;
use crate::models::{SeriesTable, YearRange, YearlyRecord};
use std::collections::HashMap;

/// Build one record per year of `years`, ascending.
///
/// Years without an outcome get null values; outcomes outside the range
/// are dropped.
pub fn assemble(years: YearRange, outcomes: Vec<YearOutcome>) -> SeriesTable {
    let mut by_year: HashMap<i32, YearOutcome> = HashMap::new();
    for outcome in outcomes {
        by_year.insert(outcome.record.year, outcome);
    }

    let mut table = SeriesTable::default();
    for year in years.years() {
        match by_year.remove(&year) {
            Some(outcome) => {
                table.records.push(outcome.record);
                table.failures.extend(outcome.failures);
            }
            None => table.records.push(YearlyRecord::empty(year)),
        }
    }

    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureStage, Variable, YearFailure};

    fn outcome(year: i32, ndvi: Option<f64>, et: Option<f64>) -> YearOutcome {
        YearOutcome {
            record: YearlyRecord {
                year,
                ndvi_mean: ndvi,
                et_mean: et,
            },
            failures: vec![],
        }
    }

    #[test]
    fn test_assemble_orders_and_fills() {
        let years = YearRange::new(2020, 2022).unwrap();
        let outcomes = vec![
            outcome(2022, Some(0.5), Some(60.0)),
            outcome(2020, Some(0.4), Some(45.0)),
            outcome(2019, Some(0.9), Some(99.0)),
        ];

        let table = assemble(years, outcomes);
        let years: Vec<i32> = table.records.iter().map(|r| r.year).collect();
        assert_eq!(years, vec![2020, 2021, 2022]);
        assert_eq!(table.records[1], YearlyRecord::empty(2021));
        assert_eq!(table.records[2].et_mean, Some(60.0));
    }

    #[test]
    fn test_assemble_collects_failures() {
        let years = YearRange::new(2020, 2020).unwrap();
        let mut failed = outcome(2020, Some(0.4), None);
        failed.failures.push(YearFailure {
            year: 2020,
            variable: Variable::Et,
            stage: FailureStage::Reduction,
            message: "too many pixels".to_string(),
        });

        let table = assemble(years, vec![failed]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.failures.len(), 1);
        assert_eq!(table.failures[0].variable, Variable::Et);
    }
}
