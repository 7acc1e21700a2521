//! Input formatters applied to every edit before it is compared with the
//! previous value.

use crate::application::card::scheme::detect_scheme;
use crate::domain::card::CardScheme;

const MAX_CARD_NUMBER_LENGTH: usize = 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFormatter {
    /// Digits grouped by scheme: 4-6-5 for Amex, 4-6-4 for Diners, else 4s.
    CardNumber,
    /// `MM / YY`.
    Expiration,
    /// Digits only, at most 3 for schemes known to use 3-digit codes, else 4.
    SecurityCode { scheme: Option<CardScheme> },
    UppercaseCode,
    Plain,
}

impl FieldFormatter {
    pub fn format(&self, value: &str) -> String {
        match self {
            Self::CardNumber => format_card_number(value),
            Self::Expiration => format_expiration(value),
            Self::SecurityCode { scheme } => {
                let max = security_code_length(*scheme);
                value.chars().filter(char::is_ascii_digit).take(max).collect()
            }
            Self::UppercaseCode => value.trim().to_ascii_uppercase(),
            Self::Plain => value.to_string(),
        }
    }
}

pub fn security_code_length(scheme: Option<CardScheme>) -> usize {
    match scheme {
        Some(CardScheme::Amex) | Some(CardScheme::Unknown) | None => 4,
        Some(_) => 3,
    }
}

fn format_card_number(value: &str) -> String {
    let digits: String = value
        .chars()
        .filter(char::is_ascii_digit)
        .take(MAX_CARD_NUMBER_LENGTH)
        .collect();
    let groups: &[usize] = match detect_scheme(&digits) {
        Some(CardScheme::Amex) => &[4, 6, 5],
        Some(CardScheme::DinersClub) if digits.len() <= 14 => &[4, 6, 4],
        _ => &[4, 4, 4, 4, 3],
    };
    let mut formatted = String::with_capacity(digits.len() + groups.len());
    let mut rest = digits.as_str();
    for &size in groups {
        if rest.is_empty() {
            break;
        }
        let (head, tail) = rest.split_at(size.min(rest.len()));
        if !formatted.is_empty() {
            formatted.push(' ');
        }
        formatted.push_str(head);
        rest = tail;
    }
    if !rest.is_empty() {
        formatted.push_str(rest);
    }
    formatted
}

fn format_expiration(value: &str) -> String {
    let mut digits: String = value.chars().filter(char::is_ascii_digit).collect();
    if let Some(first) = digits.chars().next()
        && first > '1'
    {
        digits.insert(0, '0');
    }
    digits.truncate(4);
    if digits.len() <= 2 {
        digits
    } else {
        format!("{} / {}", &digits[..2], &digits[2..])
    }
}

/// Parses `MM / YY` into a month and a four digit year.
pub fn parse_expiration(value: &str) -> Option<(u8, u16)> {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 4 {
        return None;
    }
    let month: u8 = digits[..2].parse().ok()?;
    let year: u16 = digits[2..].parse().ok()?;
    (1..=12).contains(&month).then_some((month, 2000 + year))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_number_grouping() {
        let formatter = FieldFormatter::CardNumber;
        assert_eq!(formatter.format("4242424242424242"), "4242 4242 4242 4242");
        assert_eq!(formatter.format("4242-4242"), "4242 4242");
        assert_eq!(formatter.format("378282246310005"), "3782 822463 10005");
        assert_eq!(formatter.format("30569309025904"), "3056 930902 5904");
        assert_eq!(
            formatter.format("42424242424242424242"),
            "4242 4242 4242 4242 424"
        );
    }

    #[test]
    fn test_expiration() {
        let formatter = FieldFormatter::Expiration;
        assert_eq!(formatter.format("1"), "1");
        assert_eq!(formatter.format("3"), "03");
        assert_eq!(formatter.format("1228"), "12 / 28");
        assert_eq!(formatter.format("12 / 28 9"), "12 / 28");
        assert_eq!(parse_expiration("12 / 28"), Some((12, 2028)));
        assert_eq!(parse_expiration("13 / 28"), None);
        assert_eq!(parse_expiration("1"), None);
    }

    #[test]
    fn test_security_code_depends_on_scheme() {
        let unknown = FieldFormatter::SecurityCode { scheme: None };
        let visa = FieldFormatter::SecurityCode {
            scheme: Some(CardScheme::Visa),
        };
        let amex = FieldFormatter::SecurityCode {
            scheme: Some(CardScheme::Amex),
        };
        assert_eq!(unknown.format("12345"), "1234");
        assert_eq!(visa.format("1234"), "123");
        assert_eq!(amex.format("1a234"), "1234");
    }
}
