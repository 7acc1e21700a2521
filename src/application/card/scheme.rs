use crate::domain::card::CardScheme;

/// Leading-digit range `[low, high]` compared on the first `digits` digits.
struct IinRange {
    digits: usize,
    low: u32,
    high: u32,
    scheme: CardScheme,
}

const fn range(digits: usize, low: u32, high: u32, scheme: CardScheme) -> IinRange {
    IinRange {
        digits,
        low,
        high,
        scheme,
    }
}

// Ordered from the most to the least specific prefix.
const RANGES: &[IinRange] = &[
    range(6, 401178, 401179, CardScheme::Elo),
    range(6, 431274, 431274, CardScheme::Elo),
    range(6, 438935, 438935, CardScheme::Elo),
    range(6, 451416, 451416, CardScheme::Elo),
    range(6, 457393, 457393, CardScheme::Elo),
    range(6, 457631, 457632, CardScheme::Elo),
    range(6, 504175, 504175, CardScheme::Elo),
    range(6, 506699, 506778, CardScheme::Elo),
    range(6, 509000, 509999, CardScheme::Elo),
    range(6, 627780, 627780, CardScheme::Elo),
    range(6, 636297, 636297, CardScheme::Elo),
    range(6, 636368, 636368, CardScheme::Elo),
    range(6, 650031, 650033, CardScheme::Elo),
    range(6, 650035, 650051, CardScheme::Elo),
    range(6, 650405, 650439, CardScheme::Elo),
    range(6, 650485, 650538, CardScheme::Elo),
    range(6, 650541, 650598, CardScheme::Elo),
    range(6, 650700, 650718, CardScheme::Elo),
    range(6, 650720, 650727, CardScheme::Elo),
    range(6, 650901, 650920, CardScheme::Elo),
    range(6, 651652, 651679, CardScheme::Elo),
    range(6, 655000, 655019, CardScheme::Elo),
    range(6, 655021, 655058, CardScheme::Elo),
    range(6, 622126, 622925, CardScheme::Discover),
    range(4, 6011, 6011, CardScheme::Discover),
    range(4, 3528, 3589, CardScheme::Jcb),
    range(3, 300, 305, CardScheme::DinersClub),
    range(3, 309, 309, CardScheme::DinersClub),
    range(3, 644, 649, CardScheme::Discover),
    range(2, 36, 36, CardScheme::DinersClub),
    range(2, 38, 39, CardScheme::DinersClub),
    range(2, 34, 34, CardScheme::Amex),
    range(2, 37, 37, CardScheme::Amex),
    range(2, 51, 55, CardScheme::Mastercard),
    range(4, 2221, 2720, CardScheme::Mastercard),
    range(2, 65, 65, CardScheme::Discover),
    range(2, 62, 62, CardScheme::UnionPay),
    range(2, 50, 50, CardScheme::Maestro),
    range(2, 56, 59, CardScheme::Maestro),
    range(1, 4, 4, CardScheme::Visa),
    range(1, 6, 6, CardScheme::Maestro),
];

/// Detects the card scheme from the leading digits of a card number.
///
/// Works on partial input: the most specific range whose prefix length fits
/// the typed digits wins. Returns `None` when nothing matches yet.
pub fn detect_scheme(number: &str) -> Option<CardScheme> {
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    RANGES.iter().find_map(|entry| {
        let prefix = digits.get(..entry.digits)?;
        let value: u32 = prefix.parse().ok()?;
        (entry.low..=entry.high)
            .contains(&value)
            .then_some(entry.scheme)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_common_schemes() {
        let cases = [
            ("4242 4242 4242 4242", Some(CardScheme::Visa)),
            ("5555555555554444", Some(CardScheme::Mastercard)),
            ("2223003122003222", Some(CardScheme::Mastercard)),
            ("378282246310005", Some(CardScheme::Amex)),
            ("6011111111111117", Some(CardScheme::Discover)),
            ("3530111333300000", Some(CardScheme::Jcb)),
            ("30569309025904", Some(CardScheme::DinersClub)),
            ("6200000000000005", Some(CardScheme::UnionPay)),
            ("6759649826438453", Some(CardScheme::Maestro)),
            ("5090001234567890", Some(CardScheme::Elo)),
            ("1234", None),
            ("", None),
        ];
        for (number, expected) in cases {
            assert_eq!(detect_scheme(number), expected, "number {number}");
        }
    }

    #[test]
    fn test_partial_prefixes() {
        assert_eq!(detect_scheme("4"), Some(CardScheme::Visa));
        assert_eq!(detect_scheme("37"), Some(CardScheme::Amex));
        assert_eq!(detect_scheme("3"), None);
    }
}
