use crate::error::ValidationError;
use crate::types::NormalizedQuery;

pub const MAX_QUERY_CHARS: usize = 500;

/// Trim, validate and lowercase raw query text.
///
/// Length is counted in characters, not bytes. Pure; callers run it before
/// anything that costs money.
pub fn normalize(raw: &str) -> Result<NormalizedQuery, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }

    // Length is checked on the lowercased form: a few code points expand when
    // lowercased, and the 500-character bound must hold for the stored key.
    let lowered = trimmed.to_lowercase().trim().to_string();
    let len = lowered.chars().count();
    if len > MAX_QUERY_CHARS {
        return Err(ValidationError::TooLong(len));
    }

    Ok(NormalizedQuery(lowered))
}

#[test]
fn test_normalize_rejects_blank_input() {
    for raw in ["", " ", "\t\n", "   \r\n  "] {
        assert_eq!(normalize(raw), Err(ValidationError::Empty), "input {raw:?}");
    }
}

#[test]
fn test_normalize_length_boundary() {
    let exact = "a".repeat(MAX_QUERY_CHARS);
    assert_eq!(normalize(&exact).unwrap().as_str(), exact);

    let padded = format!("   {}   ", exact);
    assert!(normalize(&padded).is_ok());

    let over = "a".repeat(MAX_QUERY_CHARS + 1);
    assert_eq!(normalize(&over), Err(ValidationError::TooLong(501)));
}

#[test]
fn test_normalize_counts_chars_not_bytes() {
    let multibyte = "é".repeat(MAX_QUERY_CHARS);
    assert!(normalize(&multibyte).is_ok());
}

#[test]
fn test_normalize_lowercases_and_trims() {
    let got = normalize("  Karate BASICS \n").unwrap();
    assert_eq!(got.as_str(), "karate basics");
}

#[test]
fn test_normalize_is_idempotent() {
    for raw in ["Karate Basics", "  MAE GERI  ", "Kihon: ÉTUDE", "x"] {
        let once = normalize(raw).unwrap();
        let twice = normalize(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }
}
