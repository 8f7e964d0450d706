use chrono::NaiveDate;

/// Normalize a date into the `DDMMYYYY` form the statement API expects.
///
/// Accepted: `YYYY-MM-DD`, `DD.MM.YYYY`, or an 8-digit string which is
/// assumed to be `DDMMYYYY` already. Anything else is returned unchanged.
pub fn normalize_date(input: &str) -> String {
    if input.len() == 8 && input.bytes().all(|b| b.is_ascii_digit()) {
        return input.to_string();
    }

    let parsed = if input.contains('-') {
        NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()
    } else if input.contains('.') {
        NaiveDate::parse_from_str(input, "%d.%m.%Y").ok()
    } else {
        None
    };

    match parsed {
        Some(date) => date.format("%d%m%Y").to_string(),
        None => input.to_string(),
    }
}
