//! Chart dataset builder
//!
//! Turns a snapshot/prediction pair into plain labeled numeric series.
//! Pure and rendering-agnostic: any charting layer can consume the output.

use crate::metrics;
use crate::models::{
    ChartDataset, ChartSeries, ExpenseCategory, FinancialSnapshot, PredictionResult, SeriesPoint,
};

/// Build the three analysis series: spending distribution, income
/// comparison, and per-category potential savings.
pub fn build_datasets(
    snapshot: &FinancialSnapshot,
    prediction: &PredictionResult,
) -> ChartDataset {
    ChartDataset {
        spending_distribution: spending_distribution(snapshot),
        income_comparison: income_comparison(snapshot),
        potential_savings: potential_savings(snapshot, prediction),
    }
}

/// Per-category actual spending (8 labeled values)
fn spending_distribution(snapshot: &FinancialSnapshot) -> ChartSeries {
    ChartSeries {
        title: "Expense Distribution".to_string(),
        points: snapshot
            .expenses
            .iter()
            .map(|(category, amount)| SeriesPoint {
                label: category.display_name().to_string(),
                value: amount,
            })
            .collect(),
    }
}

/// Income vs total expenses vs disposable income (3 buckets)
fn income_comparison(snapshot: &FinancialSnapshot) -> ChartSeries {
    ChartSeries {
        title: "Income vs Expenses".to_string(),
        points: vec![
            SeriesPoint {
                label: "Income".to_string(),
                value: snapshot.income,
            },
            SeriesPoint {
                label: "Expenses".to_string(),
                value: snapshot.expenses.total(),
            },
            SeriesPoint {
                label: "Disposable Income".to_string(),
                value: snapshot.disposable_income,
            },
        ],
    }
}

/// Potential savings bars. Same values as DerivedMetrics.potential_savings,
/// computed through the same deriver so the two can never drift.
fn potential_savings(snapshot: &FinancialSnapshot, prediction: &PredictionResult) -> ChartSeries {
    ChartSeries {
        title: "Potential Savings by Category".to_string(),
        points: metrics::derive(snapshot, prediction)
            .potential_savings
            .into_iter()
            .map(|saving| SeriesPoint {
                label: saving.category.display_name().to_string(),
                value: saving.amount,
            })
            .collect(),
    }
}
