//! Rupee amounts with Indian digit grouping (12,34,567).

use num_format::{CustomFormat, Grouping, ToFormattedString};

/// `Rs 12,34,567`, rounded to whole rupees (half away from zero).
/// Missing or non-finite amounts render as `-`.
pub fn format_currency(amount: Option<f64>) -> String {
    match amount {
        Some(value) if value.is_finite() => {
            let rounded = value.round();
            let sign = if rounded < 0.0 { "-" } else { "" };
            format!("{}Rs {}", sign, indian_grouping(rounded.abs() as u64))
        }
        _ => "-".to_string(),
    }
}

fn indian_grouping(value: u64) -> String {
    match CustomFormat::builder().grouping(Grouping::Indian).separator(",").build() {
        Ok(format) => value.to_formatted_string(&format),
        Err(_) => value.to_string(),
    }
}
