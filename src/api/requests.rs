use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::api::responses::ValidationErrorDetail;

/// Request to open a new account.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OpenAccountRequest {
    #[validate(length(min = 1, max = 128, message = "name must be between 1 and 128 characters"))]
    pub name: String,
    #[validate(custom = "validate_non_negative")]
    pub opening_balance: Option<Decimal>,
}

/// Body of a deposit or withdraw request. Accepts `"100"` or `100`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AmountRequest {
    #[validate(custom = "validate_positive")]
    pub amount: Decimal,
}

fn validate_non_negative(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < Decimal::ZERO {
        let mut error = ValidationError::new("non_negative");
        error.message = Some("amount cannot be negative".into());
        return Err(error);
    }
    Ok(())
}

fn validate_positive(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        let mut error = ValidationError::new("positive");
        error.message = Some("amount must be positive".into());
        return Err(error);
    }
    Ok(())
}

/// Flattens validator output into response details, sorted by field.
pub fn validation_details(errors: &ValidationErrors) -> Vec<ValidationErrorDetail> {
    let mut details: Vec<ValidationErrorDetail> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |e| ValidationErrorDetail {
                field: field.to_string(),
                message: e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string()),
            })
        })
        .collect();
    details.sort_by(|a, b| a.field.cmp(&b.field));
    details
}
