use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound a caller should accept for a single deduction
pub const MAX_DEDUCTION: f64 = 1000.0;

/// Description recorded on weekly accrual transactions
pub const WEEKLY_ALLOWANCE_DESCRIPTION: &str = "Weekly allowance";

/// Description recorded on payout transactions
pub const PAYOUT_DESCRIPTION: &str = "Balance paid out";

/// A child whose allowance is being tracked.
///
/// `balance` is a cached aggregate of the child's ledger: the initial balance
/// plus every allowance, minus every deduction and payout. It is only written
/// by ledger-backed operations, except for the explicit balance override on
/// update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildProfile {
    pub id: String,
    pub name: String,
    pub balance: f64,
    pub weekly_allowance: f64,
    /// Last accrual boundary processed for this child (not the accrual time)
    pub last_allowance_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChildProfile {
    /// Generate a fresh child ID
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// Kind of ledger entry. The type decides the direction of the balance effect,
/// the amount itself is always a non-negative magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Allowance,
    Deduction,
    Payout,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Allowance => "allowance",
            TransactionType::Deduction => "deduction",
            TransactionType::Payout => "payout",
        }
    }

    /// Balance effect of a transaction of this type with the given magnitude
    pub fn signed(&self, amount: f64) -> f64 {
        match self {
            TransactionType::Allowance => amount,
            TransactionType::Deduction | TransactionType::Payout => -amount,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = TransactionTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allowance" => Ok(TransactionType::Allowance),
            "deduction" => Ok(TransactionType::Deduction),
            "payout" => Ok(TransactionType::Payout),
            other => Err(TransactionTypeError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionTypeError(pub String);

impl fmt::Display for TransactionTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown transaction type: {}", self.0)
    }
}

impl std::error::Error for TransactionTypeError {}

/// An immutable ledger entry belonging to one child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub child_id: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Non-negative magnitude
    pub amount: f64,
    pub description: String,
    /// When the economic event happened (backfilled entries keep their original date)
    pub date: DateTime<Utc>,
}

impl Transaction {
    /// Generate a fresh transaction ID
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Build a new ledger entry with a freshly generated ID
    pub fn new(
        child_id: &str,
        transaction_type: TransactionType,
        amount: f64,
        description: &str,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Self::generate_id(),
            child_id: child_id.to_string(),
            transaction_type,
            amount,
            description: description.to_string(),
            date,
        }
    }

    pub fn balance_effect(&self) -> f64 {
        self.transaction_type.signed(self.amount)
    }
}

/// Deduction record embedded in child profiles written before the ledger existed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyDeduction {
    #[serde(default)]
    pub id: Option<String>,
    pub amount: f64,
    pub reason: String,
    pub date: DateTime<Utc>,
}

/// Request for creating a new child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddChildRequest {
    pub name: String,
    pub weekly_allowance: f64,
    /// Opening balance; not recorded as a transaction
    #[serde(default)]
    pub initial_balance: f64,
}

impl AddChildRequest {
    pub fn new(name: &str, weekly_allowance: f64) -> Self {
        Self {
            name: name.to_string(),
            weekly_allowance,
            initial_balance: 0.0,
        }
    }

    pub fn with_initial_balance(mut self, initial_balance: f64) -> Self {
        self.initial_balance = initial_balance;
        self
    }
}

/// Partial update of a child. Supplying `balance` overrides the cached
/// balance without writing a ledger entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChildRequest {
    pub name: Option<String>,
    pub weekly_allowance: Option<f64>,
    pub balance: Option<f64>,
}

impl UpdateChildRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.weekly_allowance.is_none() && self.balance.is_none()
    }

    /// Whether applying this request bypasses the ledger
    pub fn overrides_balance(&self) -> bool {
        self.balance.is_some()
    }
}

/// Caller-side form validation failures
#[derive(Debug, Clone, PartialEq)]
pub enum FieldError {
    NameRequired,
    NameTooShort,
    ReasonRequired,
    ReasonTooShort,
    AmountRequired,
    AmountNotANumber,
    AmountNotPositive,
    AmountTooHigh,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            FieldError::NameRequired => "Name is required",
            FieldError::NameTooShort => "Name must be at least 2 characters long",
            FieldError::ReasonRequired => "Reason is required",
            FieldError::ReasonTooShort => "Please provide a reason (at least 3 characters)",
            FieldError::AmountRequired => "Amount is required",
            FieldError::AmountNotANumber => "Please enter a valid number",
            FieldError::AmountNotPositive => "Amount must be greater than 0",
            FieldError::AmountTooHigh => "Amount seems too high",
        };
        f.write_str(message)
    }
}

impl std::error::Error for FieldError {}

pub fn validate_name(value: &str) -> Result<(), FieldError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldError::NameRequired);
    }
    if trimmed.chars().count() < 2 {
        return Err(FieldError::NameTooShort);
    }
    Ok(())
}

pub fn validate_reason(value: &str) -> Result<(), FieldError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldError::ReasonRequired);
    }
    if trimmed.chars().count() < 3 {
        return Err(FieldError::ReasonTooShort);
    }
    Ok(())
}

/// Parse a user-entered amount, returning the cleaned value
pub fn validate_amount(value: &str) -> Result<f64, FieldError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FieldError::AmountRequired);
    }
    let amount: f64 = trimmed.parse().map_err(|_| FieldError::AmountNotANumber)?;
    if !amount.is_finite() {
        return Err(FieldError::AmountNotANumber);
    }
    if amount <= 0.0 {
        return Err(FieldError::AmountNotPositive);
    }
    Ok(amount)
}

pub fn validate_deduction_amount(amount: f64) -> Result<(), FieldError> {
    if !amount.is_finite() {
        return Err(FieldError::AmountNotANumber);
    }
    if amount <= 0.0 {
        return Err(FieldError::AmountNotPositive);
    }
    if amount > MAX_DEDUCTION {
        return Err(FieldError::AmountTooHigh);
    }
    Ok(())
}

/// Balance shown while a deduction is being entered. Floors at zero for
/// display only; the ledger itself lets balances go negative.
pub fn deduction_preview(current_balance: f64, amount: f64) -> f64 {
    (current_balance - amount).max(0.0)
}

/// Format an amount as US dollars, e.g. `-$1,234.50`
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let digits = (cents / 100).to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

/// Sum of the magnitudes of all transactions of one type
pub fn total_amount(transactions: &[Transaction], transaction_type: TransactionType) -> f64 {
    transactions
        .iter()
        .filter(|t| t.transaction_type == transaction_type)
        .map(|t| t.amount)
        .sum()
}

/// Balance implied by an opening balance and a child's ledger
pub fn ledger_balance(initial_balance: f64, transactions: &[Transaction]) -> f64 {
    initial_balance + transactions.iter().map(Transaction::balance_effect).sum::<f64>()
}
