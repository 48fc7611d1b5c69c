use crate::error::CoreError;

/// Normalizes a ticker symbol to its canonical form.
///
/// Symbols are trimmed and upper-cased. Anything other than ASCII alphanumerics
/// and the separators used by common ticker conventions (`.`, `-`, `^`, `=`) is
/// rejected, as is an empty symbol.
pub fn normalize_symbol(raw: &str) -> Result<String, CoreError> {
    let symbol = raw.trim().to_ascii_uppercase();

    if symbol.is_empty() {
        return Err(CoreError::InvalidInput(
            "symbol".to_string(),
            "symbol must not be empty".to_string(),
        ));
    }

    if let Some(bad) = symbol
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '=')))
    {
        return Err(CoreError::InvalidInput(
            "symbol".to_string(),
            format!("'{}' contains invalid character '{}'", raw, bad),
        ));
    }

    Ok(symbol)
}
