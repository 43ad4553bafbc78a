//! Metrics deriver
//!
//! Pure, total savings arithmetic. No I/O, no failure paths: unparseable
//! input was already coerced to zero at the snapshot boundary, so every
//! snapshot/prediction pair derives to the same metrics every time.

use crate::models::{
    CategorySaving, DerivedMetrics, ExpenseCategory, FinancialSnapshot, PredictionResult,
    TopExpense,
};

/// Round to 2 decimals: scale by 100, round half-up, scale back.
/// Inputs are floored at zero first, so half-away-from-zero is half-up here.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Derive savings metrics from a snapshot and its prediction.
///
/// total_saving is clamped to disposable income. That can look wrong when
/// the reported disposable income disagrees with income minus expenses, but
/// it is the observed behavior and is kept as-is.
pub fn derive(snapshot: &FinancialSnapshot, prediction: &PredictionResult) -> DerivedMetrics {
    let total_expenses = snapshot.expenses.total();
    let calculated_saving = snapshot.income - total_expenses;
    let total_saving = calculated_saving.min(snapshot.disposable_income);

    let savings_rate = if snapshot.income > 0.0 {
        total_saving / snapshot.income * 100.0
    } else {
        0.0
    };

    let shortfall = (snapshot.desired_savings - total_saving).max(0.0);

    DerivedMetrics {
        total_expenses,
        calculated_saving,
        total_saving,
        savings_rate,
        shortfall,
        top_expenses: rank_top_expenses(snapshot),
        potential_savings: potential_savings(snapshot, prediction),
    }
}

/// Up to 3 non-zero categories, descending by amount. Stable sort keeps the
/// declaration order as the tie-break.
fn rank_top_expenses(snapshot: &FinancialSnapshot) -> Vec<TopExpense> {
    let mut ranked: Vec<TopExpense> = snapshot
        .expenses
        .iter()
        .filter(|(_, amount)| *amount > 0.0)
        .map(|(category, amount)| TopExpense { category, amount })
        .collect();

    ranked.sort_by(|a, b| b.amount.partial_cmp(&a.amount).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(3);
    ranked
}

/// Per-category max(actual - predicted, 0), rounded to 2 decimals
fn potential_savings(
    snapshot: &FinancialSnapshot,
    prediction: &PredictionResult,
) -> Vec<CategorySaving> {
    ExpenseCategory::ALL
        .iter()
        .map(|category| {
            let actual = snapshot.expenses.get(*category);
            let predicted = prediction.predicted.get(*category);
            CategorySaving {
                category: *category,
                amount: round2((actual - predicted).max(0.0)),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryAmounts;

    fn sample_snapshot() -> FinancialSnapshot {
        FinancialSnapshot {
            income: 50000.0,
            age: 30,
            dependents: 1,
            disposable_income: 10000.0,
            desired_savings: 15000.0,
            expenses: CategoryAmounts {
                groceries: 8000.0,
                transport: 2000.0,
                eating_out: 1000.0,
                entertainment: 500.0,
                utilities: 1500.0,
                healthcare: 1000.0,
                education: 2000.0,
                miscellaneous: 500.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_reference_scenario() {
        let metrics = derive(&sample_snapshot(), &PredictionResult::default());

        assert_eq!(metrics.total_expenses, 16500.0);
        assert_eq!(metrics.calculated_saving, 33500.0);
        assert_eq!(metrics.total_saving, 10000.0);
        assert_eq!(metrics.savings_rate, 20.0);
        assert_eq!(metrics.shortfall, 5000.0);
    }

    #[test]
    fn test_zero_income_gives_zero_savings_rate() {
        let mut snapshot = sample_snapshot();
        snapshot.income = 0.0;

        let metrics = derive(&snapshot, &PredictionResult::default());
        assert_eq!(metrics.savings_rate, 0.0);
    }

    #[test]
    fn test_total_saving_never_exceeds_disposable_income() {
        let mut snapshot = sample_snapshot();
        snapshot.disposable_income = 3000.0;

        let metrics = derive(&snapshot, &PredictionResult::default());
        assert!(metrics.total_saving <= snapshot.disposable_income);
        assert_eq!(metrics.total_saving, 3000.0);
    }

    #[test]
    fn test_potential_savings_floored_at_zero_and_rounded() {
        let snapshot = sample_snapshot();
        let mut prediction = PredictionResult::default();
        // Predicted above actual: floor at zero
        prediction.predicted.set(ExpenseCategory::Groceries, 9000.0);
        // Predicted below actual with a long fraction: round half-up
        prediction.predicted.set(ExpenseCategory::Transport, 1000.005);

        let metrics = derive(&snapshot, &prediction);
        let by_category = |c: ExpenseCategory| {
            metrics
                .potential_savings
                .iter()
                .find(|s| s.category == c)
                .unwrap()
                .amount
        };

        assert_eq!(by_category(ExpenseCategory::Groceries), 0.0);
        assert!((by_category(ExpenseCategory::Transport) - 1000.0).abs() < 0.01);
        assert!(metrics.potential_savings.iter().all(|s| s.amount >= 0.0));
    }

    #[test]
    fn test_top_expenses_ranked_and_truncated() {
        let metrics = derive(&sample_snapshot(), &PredictionResult::default());

        assert_eq!(metrics.top_expenses.len(), 3);
        assert_eq!(metrics.top_expenses[0].category, ExpenseCategory::Groceries);
        assert_eq!(metrics.top_expenses[1].category, ExpenseCategory::Transport);
        assert_eq!(metrics.top_expenses[2].category, ExpenseCategory::Education);
        assert!(metrics.top_expenses.windows(2).all(|w| w[0].amount >= w[1].amount));
    }

    #[test]
    fn test_top_expense_ties_break_by_declaration_order() {
        let mut snapshot = sample_snapshot();
        // Transport and Education tie at 2000; Transport declares first
        snapshot.expenses.set(ExpenseCategory::Transport, 2000.0);
        snapshot.expenses.set(ExpenseCategory::Education, 2000.0);

        let metrics = derive(&snapshot, &PredictionResult::default());
        let transport_pos = metrics
            .top_expenses
            .iter()
            .position(|e| e.category == ExpenseCategory::Transport)
            .unwrap();
        let education_pos = metrics
            .top_expenses
            .iter()
            .position(|e| e.category == ExpenseCategory::Education)
            .unwrap();
        assert!(transport_pos < education_pos);
    }

    #[test]
    fn test_zero_amount_categories_excluded_before_truncation() {
        let mut snapshot = FinancialSnapshot::default();
        snapshot.expenses.set(ExpenseCategory::Utilities, 100.0);
        snapshot.expenses.set(ExpenseCategory::Healthcare, 50.0);

        let metrics = derive(&snapshot, &PredictionResult::default());
        assert_eq!(metrics.top_expenses.len(), 2);
        assert!(metrics.top_expenses.iter().all(|e| e.amount > 0.0));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let snapshot = sample_snapshot();
        let mut prediction = PredictionResult::default();
        prediction.predicted.set(ExpenseCategory::Groceries, 6500.0);

        let first = derive(&snapshot, &prediction);
        let second = derive(&snapshot, &prediction);
        assert_eq!(first, second);
    }
}
