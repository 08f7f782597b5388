//! Chilean RUT (Rol Único Tributario) validation.
//!
//! The check digit uses the Modulo-11 algorithm: digits are multiplied right
//! to left by the repeating sequence 2,3,4,5,6,7, the products summed, and
//! the digit is `11 - (sum % 11)` with 11 → 0 and 10 → K.

use crate::error::{Error, Result};

/// Strips dots, hyphens and whitespace and uppercases the check digit.
pub fn clean(rut: &str) -> String {
    rut.trim()
        .chars()
        .filter(|c| !matches!(c, '.' | '-' | ' '))
        .collect::<String>()
        .to_uppercase()
}

/// Formats a RUT as `XX.XXX.XXX-X`. Inputs too short to carry a check digit
/// are returned unchanged.
pub fn format(rut: &str) -> String {
    let cleaned = clean(rut);
    if cleaned.len() < 2 {
        return rut.to_string();
    }

    let (number, check) = cleaned.split_at(cleaned.len() - 1);

    let mut grouped = String::new();
    for (i, digit) in number.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.insert(0, '.');
        }
        grouped.insert(0, digit);
    }

    std::format!("{grouped}-{check}")
}

/// Computes the Modulo-11 check digit for the numeric part of a RUT.
pub fn check_digit(number: &str) -> Option<char> {
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    const MULTIPLIERS: [u32; 6] = [2, 3, 4, 5, 6, 7];

    let total: u32 = number
        .chars()
        .rev()
        .enumerate()
        .map(|(i, c)| c.to_digit(10).unwrap_or(0) * MULTIPLIERS[i % 6])
        .sum();

    match 11 - (total % 11) {
        11 => Some('0'),
        10 => Some('K'),
        d => char::from_digit(d, 10),
    }
}

/// Validates format and check digit. Error messages are user-facing (Spanish).
pub fn validate(rut: &str) -> Result<()> {
    if rut.trim().is_empty() {
        return Err(Error::invalid("RUT no puede estar vacío"));
    }

    let cleaned = clean(rut);

    if cleaned.len() < 8 {
        return Err(Error::invalid(
            "RUT debe tener al menos 7 dígitos más dígito verificador",
        ));
    }
    if cleaned.len() > 9 {
        return Err(Error::invalid("RUT no puede tener más de 8 dígitos"));
    }

    let (number, check) = cleaned.split_at(cleaned.len() - 1);
    let provided = check.chars().next().unwrap();

    if !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::invalid(
            "RUT debe contener solo números antes del dígito verificador",
        ));
    }
    if !provided.is_ascii_digit() && provided != 'K' {
        return Err(Error::invalid(
            "Dígito verificador debe ser un número (0-9) o K",
        ));
    }

    let expected = check_digit(number)
        .ok_or_else(|| Error::invalid("RUT inválido"))?;

    if provided != expected {
        return Err(Error::invalid(std::format!(
            "Dígito verificador inválido. Esperado: {expected}, Recibido: {provided}"
        )));
    }

    Ok(())
}

/// Returns the RUT in canonical `XX.XXX.XXX-X` form, or `None` if invalid.
pub fn normalize(rut: &str) -> Option<String> {
    validate(rut).ok().map(|_| format(rut))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_strips_formatting() {
        assert_eq!(clean("12.345.678-9"), "123456789");
        assert_eq!(clean("12345678-k"), "12345678K");
        assert_eq!(clean(" 12 345 678 9 "), "123456789");
    }

    #[test]
    fn format_adds_separators() {
        assert_eq!(format("123456785"), "12.345.678-5");
        assert_eq!(format("12345678K"), "12.345.678-K");
        assert_eq!(format("1234567K"), "1.234.567-K");
    }

    #[test]
    fn check_digit_modulo_11() {
        assert_eq!(check_digit("12345678"), Some('5'));
        assert_eq!(check_digit("11111111"), Some('1'));
        assert_eq!(check_digit(""), None);
        assert_eq!(check_digit("12a"), None);
    }

    #[test]
    fn validate_accepts_valid_ruts() {
        assert!(validate("12.345.678-5").is_ok());
        assert!(validate("123456785").is_ok());
        assert!(validate("11.111.111-1").is_ok());
    }

    #[test]
    fn validate_rejects_wrong_check_digit() {
        assert!(validate("12.345.678-9").is_err());
    }

    #[test]
    fn validate_rejects_malformed() {
        assert!(validate("").is_err());
        assert!(validate("123").is_err());
        assert!(validate("1234567890123").is_err());
        assert!(validate("abcdefgh-5").is_err());
    }

    #[test]
    fn normalize_round_trips_any_formatting() {
        assert_eq!(normalize("123456785").as_deref(), Some("12.345.678-5"));
        assert_eq!(normalize("12345678-5").as_deref(), Some("12.345.678-5"));
        assert_eq!(normalize("12.345.678-5").as_deref(), Some("12.345.678-5"));
        assert_eq!(normalize("invalid"), None);
    }

    #[test]
    fn validation_invariant_under_normalization() {
        for rut in ["123456785", "12.345.678-5", "12345678-9", "11111111-1"] {
            let direct = validate(rut).is_ok();
            match normalize(rut) {
                Some(canonical) => {
                    assert!(direct);
                    assert!(validate(&canonical).is_ok());
                }
                None => assert!(!direct),
            }
        }
    }
}
