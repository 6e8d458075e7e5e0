//! Pure validity predicates for payment-instrument fields.
//!
//! Everything in this file is a total function over strings: no clocks
//! except where a clock is the whole point (expiration), and there the
//! "now" is an explicit argument with a thin wall-clock wrapper on top.
//! State objects call these on every mutation; tests call them directly.

use chrono::{Datelike, Utc};

use crate::config;

// ---------------------------------------------------------------------------
// Card
// ---------------------------------------------------------------------------

/// Luhn checksum over a card number, ignoring whitespace separators.
///
/// Valid iff the string is all digits (after stripping whitespace), at
/// least 13 digits long, and the alternating doubled-digit sum is 0 mod 10.
pub fn is_valid_card_number(number: &str) -> bool {
    let digits: Vec<u32> = number
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<u32>>>()
        .unwrap_or_default();

    if digits.len() < config::MIN_CARD_DIGITS || digits.len() > config::MAX_CARD_DIGITS {
        return false;
    }

    // Double every second digit from the right; digits > 9 fold back by
    // subtracting 9 (equivalently, summing their decimal digits).
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

/// Security codes are 3 or 4 numeric digits.
pub fn is_valid_security_code(code: &str) -> bool {
    let len = code.len();
    (config::MIN_SECURITY_CODE_DIGITS..=config::MAX_SECURITY_CODE_DIGITS).contains(&len)
        && code.chars().all(|c| c.is_ascii_digit())
}

/// Expiration check against an explicit "now".
///
/// Valid iff `year` is a 4-digit number >= `now_year`, `month` is 1..=12,
/// and when `year == now_year`, `month >= now_month`.
pub fn is_valid_expiration_at(month: &str, year: &str, now_year: i32, now_month: u32) -> bool {
    if year.len() != 4 {
        return false;
    }
    let (Ok(y), Ok(m)) = (year.parse::<i32>(), month.parse::<u32>()) else {
        return false;
    };
    if !(1..=12).contains(&m) {
        return false;
    }
    y > now_year || (y == now_year && m >= now_month)
}

/// Expiration check against the wall clock.
pub fn is_valid_expiration(month: &str, year: &str) -> bool {
    let now = Utc::now();
    is_valid_expiration_at(month, year, now.year(), now.month())
}

/// Split a progressive `MM/YYYY` string into its month and year parts.
/// Returns `None` unless both parts are present and fully typed.
pub fn split_expiration(expiration: &str) -> Option<(&str, &str)> {
    let (month, year) = expiration.split_once('/')?;
    if month.len() == 2 && year.len() == 4 {
        Some((month, year))
    } else {
        None
    }
}

/// Postal code check against a small per-country format table.
///
/// This stands in for the full locale table, which is a presentational
/// collaborator outside this crate. Unknown countries accept any non-empty
/// value rather than block a payment over a table gap.
pub fn is_valid_postal_code(country: &str, postal: &str) -> bool {
    let p = postal.trim();
    match country.to_ascii_uppercase().as_str() {
        "US" | "USA" => {
            let bytes = p.as_bytes();
            match bytes.len() {
                5 => bytes.iter().all(u8::is_ascii_digit),
                10 => {
                    bytes[..5].iter().all(u8::is_ascii_digit)
                        && bytes[5] == b'-'
                        && bytes[6..].iter().all(u8::is_ascii_digit)
                }
                _ => false,
            }
        }
        "CA" | "CAN" => {
            // A1A 1A1, space optional.
            let compact: Vec<char> = p.chars().filter(|c| !c.is_whitespace()).collect();
            compact.len() == 6
                && compact
                    .iter()
                    .enumerate()
                    .all(|(i, c)| if i % 2 == 0 { c.is_ascii_alphabetic() } else { c.is_ascii_digit() })
        }
        "GB" | "UK" => {
            let compact: String = p.chars().filter(|c| !c.is_whitespace()).collect();
            (5..=8).contains(&compact.len()) && compact.chars().all(|c| c.is_ascii_alphanumeric())
        }
        _ => !p.is_empty(),
    }
}

// ---------------------------------------------------------------------------
// Bank Account
// ---------------------------------------------------------------------------

/// ABA routing checksum: exactly 9 digits with
/// `3*(d0+d3+d6) + 7*(d1+d4+d7) + 1*(d2+d5+d8) == 0 (mod 10)` and a
/// nonzero sum (all-zeros passes the congruence but is not a bank).
pub fn is_valid_routing_number(routing: &str) -> bool {
    if routing.len() != config::ROUTING_NUMBER_DIGITS {
        return false;
    }
    let Some(digits) = routing
        .chars()
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<u32>>>()
    else {
        return false;
    };

    let weights = [3u32, 7, 1];
    let sum: u32 = digits
        .iter()
        .enumerate()
        .map(|(i, &d)| d * weights[i % 3])
        .sum();

    sum > 0 && sum % 10 == 0
}

/// Account numbers are numeric with length strictly between 3 and 18.
pub fn is_valid_account_number(account: &str) -> bool {
    let len = account.len();
    len > config::ACCOUNT_NUMBER_MIN_EXCLUSIVE
        && len < config::ACCOUNT_NUMBER_MAX_EXCLUSIVE
        && account.chars().all(|c| c.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Cash / Contact
// ---------------------------------------------------------------------------

/// Loose email shape: one `@`, non-empty local part, domain with an
/// internal dot, no whitespace. Deliverability is the server's problem.
pub fn is_valid_email(contact: &str) -> bool {
    let c = contact.trim();
    if c.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = c.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.len() < 3 {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && tld.len() >= 2,
        None => false,
    }
}

/// Loose phone shape: optional leading `+`, separators allowed, 10 to 15
/// digits once stripped.
pub fn is_valid_phone(contact: &str) -> bool {
    let mut digits = 0usize;
    for (i, c) in contact.trim().chars().enumerate() {
        match c {
            '0'..='9' => digits += 1,
            '+' if i == 0 => {}
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return false,
        }
    }
    (10..=15).contains(&digits)
}

/// Cash contact: an email or a phone number.
pub fn is_valid_contact(contact: &str) -> bool {
    is_valid_email(contact) || is_valid_phone(contact)
}
