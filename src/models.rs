//! Core data models for the financial insight pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::PipelineError;

//
// ================= Enums =================
//

/// Expense categories in declaration order. The order is load-bearing: it is
/// the tie-break for top-expense ranking and the label order of every chart
/// series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExpenseCategory {
    Groceries,
    Transport,
    #[serde(rename = "Eating_Out")]
    EatingOut,
    Entertainment,
    Utilities,
    Healthcare,
    Education,
    Miscellaneous,
}

impl ExpenseCategory {
    pub const ALL: [ExpenseCategory; 8] = [
        ExpenseCategory::Groceries,
        ExpenseCategory::Transport,
        ExpenseCategory::EatingOut,
        ExpenseCategory::Entertainment,
        ExpenseCategory::Utilities,
        ExpenseCategory::Healthcare,
        ExpenseCategory::Education,
        ExpenseCategory::Miscellaneous,
    ];

    /// Field name on the wire and in persisted bundles
    pub fn wire_name(&self) -> &'static str {
        match self {
            ExpenseCategory::Groceries => "Groceries",
            ExpenseCategory::Transport => "Transport",
            ExpenseCategory::EatingOut => "Eating_Out",
            ExpenseCategory::Entertainment => "Entertainment",
            ExpenseCategory::Utilities => "Utilities",
            ExpenseCategory::Healthcare => "Healthcare",
            ExpenseCategory::Education => "Education",
            ExpenseCategory::Miscellaneous => "Miscellaneous",
        }
    }

    /// Human-readable label (underscores become spaces)
    pub fn display_name(&self) -> &'static str {
        match self {
            ExpenseCategory::EatingOut => "Eating Out",
            other => other.wire_name(),
        }
    }
}

impl fmt::Display for ExpenseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Occupation {
    Salaried,
    #[serde(rename = "Self-Employed")]
    SelfEmployed,
    Student,
    Retired,
    #[serde(rename = "")]
    #[default]
    Unset,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum CityTier {
    #[serde(rename = "Tier 1", alias = "Tier1")]
    Tier1,
    #[serde(rename = "Tier 2", alias = "Tier2")]
    Tier2,
    #[serde(rename = "Tier 3", alias = "Tier3")]
    Tier3,
    #[serde(rename = "")]
    #[default]
    Unset,
}

/// Languages the audio stage can synthesize
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Hi,
    Kn,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::En, Language::Hi, Language::Kn];

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Hi => "hi",
            Language::Kn => "kn",
        }
    }

    /// Parse an ISO-style code from a query parameter
    pub fn parse(code: &str) -> Option<Language> {
        match code.trim().to_lowercase().as_str() {
            "en" => Some(Language::En),
            "hi" => Some(Language::Hi),
            "kn" => Some(Language::Kn),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

//
// ================= Coercion helpers =================
//

/// Accept a number, a numeric string, blank, or absent input and coerce to a
/// non-negative finite amount. Anything unparseable, negative, NaN or
/// infinite becomes 0.
fn de_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(coerce_amount(&value))
}

fn de_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(coerce_amount(&value).trunc() as u32)
}

pub(crate) fn coerce_amount(value: &serde_json::Value) -> f64 {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };

    if parsed.is_finite() && parsed >= 0.0 {
        parsed
    } else {
        0.0
    }
}

//
// ================= Category amounts =================
//

/// One amount per expense category. Used both for the user's declared
/// spending and for the model's predicted spending.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CategoryAmounts {
    #[serde(rename = "Groceries", default, deserialize_with = "de_amount")]
    pub groceries: f64,
    #[serde(rename = "Transport", default, deserialize_with = "de_amount")]
    pub transport: f64,
    #[serde(rename = "Eating_Out", default, deserialize_with = "de_amount")]
    pub eating_out: f64,
    #[serde(rename = "Entertainment", default, deserialize_with = "de_amount")]
    pub entertainment: f64,
    #[serde(rename = "Utilities", default, deserialize_with = "de_amount")]
    pub utilities: f64,
    #[serde(rename = "Healthcare", default, deserialize_with = "de_amount")]
    pub healthcare: f64,
    #[serde(rename = "Education", default, deserialize_with = "de_amount")]
    pub education: f64,
    #[serde(rename = "Miscellaneous", default, deserialize_with = "de_amount")]
    pub miscellaneous: f64,
}

impl CategoryAmounts {
    pub fn get(&self, category: ExpenseCategory) -> f64 {
        match category {
            ExpenseCategory::Groceries => self.groceries,
            ExpenseCategory::Transport => self.transport,
            ExpenseCategory::EatingOut => self.eating_out,
            ExpenseCategory::Entertainment => self.entertainment,
            ExpenseCategory::Utilities => self.utilities,
            ExpenseCategory::Healthcare => self.healthcare,
            ExpenseCategory::Education => self.education,
            ExpenseCategory::Miscellaneous => self.miscellaneous,
        }
    }

    pub fn set(&mut self, category: ExpenseCategory, amount: f64) {
        match category {
            ExpenseCategory::Groceries => self.groceries = amount,
            ExpenseCategory::Transport => self.transport = amount,
            ExpenseCategory::EatingOut => self.eating_out = amount,
            ExpenseCategory::Entertainment => self.entertainment = amount,
            ExpenseCategory::Utilities => self.utilities = amount,
            ExpenseCategory::Healthcare => self.healthcare = amount,
            ExpenseCategory::Education => self.education = amount,
            ExpenseCategory::Miscellaneous => self.miscellaneous = amount,
        }
    }

    /// Iterate (category, amount) pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (ExpenseCategory, f64)> + '_ {
        ExpenseCategory::ALL.iter().map(move |c| (*c, self.get(*c)))
    }

    pub fn total(&self) -> f64 {
        self.iter().map(|(_, amount)| amount).sum()
    }
}

//
// ================= Financial Snapshot =================
//

/// One complete user-submitted financial profile. Replaced wholesale on each
/// submission, never merged. Serialized field names match the form wire
/// names so persisted bundles round-trip field-for-field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FinancialSnapshot {
    #[serde(rename = "Income", default, deserialize_with = "de_amount")]
    pub income: f64,
    #[serde(rename = "Age", default, deserialize_with = "de_count")]
    pub age: u32,
    #[serde(rename = "Dependents", default, deserialize_with = "de_count")]
    pub dependents: u32,
    #[serde(rename = "Disposable_Income", default, deserialize_with = "de_amount")]
    pub disposable_income: f64,
    #[serde(rename = "Desired_Savings", default, deserialize_with = "de_amount")]
    pub desired_savings: f64,
    #[serde(rename = "Occupation", default)]
    pub occupation: Occupation,
    #[serde(rename = "City_Tier", default)]
    pub city_tier: CityTier,
    #[serde(flatten)]
    pub expenses: CategoryAmounts,
}

impl FinancialSnapshot {
    /// Build a snapshot from a raw form submission. Numeric fields coerce to
    /// non-negative finite values; out-of-range enum fields are rejected.
    pub fn from_form(form: serde_json::Value) -> crate::Result<FinancialSnapshot> {
        serde_json::from_value(form)
            .map_err(|e| PipelineError::InputInvalid(format!("snapshot form: {}", e)))
    }
}

//
// ================= Prediction =================
//

/// Opaque per-category recommended spending from the prediction service.
/// Immutable once received; replaced wholesale on re-analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PredictionResult {
    #[serde(flatten)]
    pub predicted: CategoryAmounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub financial_health_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_hint: Option<String>,
}

//
// ================= Derived Metrics =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopExpense {
    pub category: ExpenseCategory,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategorySaving {
    pub category: ExpenseCategory,
    pub amount: f64,
}

/// Computed savings figures. A pure function of (snapshot, prediction);
/// never persisted independently of the pair that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivedMetrics {
    pub total_expenses: f64,
    pub calculated_saving: f64,
    /// Clamped to disposable income, preserved from observed behavior even
    /// when disposable income disagrees with income minus expenses
    pub total_saving: f64,
    pub savings_rate: f64,
    pub shortfall: f64,
    pub top_expenses: Vec<TopExpense>,
    pub potential_savings: Vec<CategorySaving>,
}

//
// ================= Chart Dataset =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartSeries {
    pub title: String,
    pub points: Vec<SeriesPoint>,
}

/// Chart-ready labeled series, independent of any rendering technology
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartDataset {
    pub spending_distribution: ChartSeries,
    pub income_comparison: ChartSeries,
    pub potential_savings: ChartSeries,
}

//
// ================= Narrative & Audio =================
//

/// One generated podcast script per committed (snapshot, prediction) pair.
/// Generated once in English; translation is the audio stage's concern.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NarrativeScript {
    pub script_id: Uuid,
    pub text: String,
    pub generated_at: DateTime<Utc>,
}

impl NarrativeScript {
    pub fn new(text: String) -> Self {
        Self {
            script_id: Uuid::new_v4(),
            text,
            generated_at: Utc::now(),
        }
    }
}

/// Reference to synthesized speech for one (narrative, language) pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioArtifact {
    pub location: String,
    pub language: Language,
    pub synthesized_at: DateTime<Utc>,
}

//
// ================= Analysis Bundle =================
//

/// The atomic commit unit: everything one successful pipeline run produced.
/// Either the whole bundle replaces the prior one, or nothing changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisBundle {
    pub user_id: Uuid,
    pub run_id: u64,
    pub snapshot: FinancialSnapshot,
    pub prediction: PredictionResult,
    pub metrics: DerivedMetrics,
    pub charts: ChartDataset,
    pub narrative: NarrativeScript,
    pub committed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_coercion_from_form_strings() {
        let form = json!({
            "Income": "50000",
            "Age": "29",
            "Dependents": "",
            "Disposable_Income": 10000,
            "Desired_Savings": "15000",
            "Occupation": "Salaried",
            "City_Tier": "Tier 2",
            "Groceries": "8000",
            "Transport": "2000"
        });

        let snapshot = FinancialSnapshot::from_form(form).unwrap();
        assert_eq!(snapshot.income, 50000.0);
        assert_eq!(snapshot.age, 29);
        assert_eq!(snapshot.dependents, 0);
        assert_eq!(snapshot.occupation, Occupation::Salaried);
        assert_eq!(snapshot.city_tier, CityTier::Tier2);
        assert_eq!(snapshot.expenses.groceries, 8000.0);
        assert_eq!(snapshot.expenses.transport, 2000.0);
        // Absent categories default to zero
        assert_eq!(snapshot.expenses.entertainment, 0.0);
    }

    #[test]
    fn test_negative_and_garbage_amounts_coerce_to_zero() {
        let form = json!({
            "Income": "-500",
            "Groceries": "not a number",
            "Transport": -12.5
        });

        let snapshot = FinancialSnapshot::from_form(form).unwrap();
        assert_eq!(snapshot.income, 0.0);
        assert_eq!(snapshot.expenses.groceries, 0.0);
        assert_eq!(snapshot.expenses.transport, 0.0);
    }

    #[test]
    fn test_unknown_occupation_is_rejected() {
        let form = json!({ "Income": 1000, "Occupation": "Astronaut" });
        let err = FinancialSnapshot::from_form(form).unwrap_err();
        assert!(matches!(err, PipelineError::InputInvalid(_)));
    }

    #[test]
    fn test_unset_enums_from_blank_strings() {
        let form = json!({ "Occupation": "", "City_Tier": "" });
        let snapshot = FinancialSnapshot::from_form(form).unwrap();
        assert_eq!(snapshot.occupation, Occupation::Unset);
        assert_eq!(snapshot.city_tier, CityTier::Unset);
    }

    #[test]
    fn test_snapshot_serde_round_trip() {
        let mut snapshot = FinancialSnapshot {
            income: 42000.0,
            age: 35,
            dependents: 2,
            disposable_income: 9000.0,
            desired_savings: 5000.0,
            occupation: Occupation::SelfEmployed,
            city_tier: CityTier::Tier1,
            expenses: CategoryAmounts::default(),
        };
        snapshot.expenses.set(ExpenseCategory::EatingOut, 1200.0);

        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["Occupation"], "Self-Employed");
        assert_eq!(value["Eating_Out"], 1200.0);

        let back: FinancialSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_category_iteration_order_matches_declaration() {
        let amounts = CategoryAmounts::default();
        let order: Vec<ExpenseCategory> = amounts.iter().map(|(c, _)| c).collect();
        assert_eq!(order, ExpenseCategory::ALL.to_vec());
    }

    #[test]
    fn test_language_parse() {
        assert_eq!(Language::parse("en"), Some(Language::En));
        assert_eq!(Language::parse(" HI "), Some(Language::Hi));
        assert_eq!(Language::parse("kn"), Some(Language::Kn));
        assert_eq!(Language::parse("fr"), None);
    }
}
