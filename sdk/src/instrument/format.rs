//! Pure field formatting.
//!
//! Each function takes what the caller typed and returns what actually
//! gets committed to the field: separators inserted, overflow clamped,
//! junk characters dropped. Formatting is part of the same mutation as the
//! write itself — there is no second reactive pass that could observe a
//! half-formatted value.

use crate::config;

/// Committed form of a card number: digits grouped in fours, capped at the
/// maximum PAN length. Everything that is not a digit is discarded, so
/// pasting `"4242-4242..."` works the same as typing it.
pub fn format_card_number(entered: &str) -> String {
    let digits: String = entered
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(config::MAX_CARD_DIGITS)
        .collect();

    let mut out = String::with_capacity(digits.len() + digits.len() / 4);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && i % 4 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}

/// Digits-only view of a (possibly formatted) value.
pub fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Committed form of an expiration entry, progressive `MM/YYYY`.
///
/// Forward typing auto-advances: a first digit of 2-9 is promoted to a
/// zero-padded month (`"4"` becomes `"04/"`), and the separator appears as
/// soon as the month is complete. Deletion is detected by comparing digit
/// counts against the previous committed value so backspacing over the
/// separator doesn't immediately re-insert it.
pub fn format_expiration(previous: &str, entered: &str) -> String {
    let digits: String = entered
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(6)
        .collect();
    let deleting = digits.len() < digits_only(previous).len();

    match digits.len() {
        0 => String::new(),
        1 => {
            let first = digits.chars().next().unwrap_or('0');
            if ('2'..='9').contains(&first) && !deleting {
                format!("0{first}/")
            } else {
                digits
            }
        }
        2 => {
            if deleting {
                digits
            } else {
                format!("{digits}/")
            }
        }
        _ => format!("{}/{}", &digits[..2], &digits[2..]),
    }
}

/// Committed form of a digits-only field with a hard length cap
/// (security code, routing number, account number).
pub fn format_digits(entered: &str, cap: usize) -> String {
    entered
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(cap)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_number_grouped_in_fours() {
        assert_eq!(format_card_number("4242424242424242"), "4242 4242 4242 4242");
        assert_eq!(format_card_number("42424"), "4242 4");
        assert_eq!(format_card_number("4242"), "4242");
        assert_eq!(format_card_number(""), "");
    }

    #[test]
    fn card_number_strips_junk_and_clamps() {
        assert_eq!(
            format_card_number("4242-4242-4242-4242"),
            "4242 4242 4242 4242"
        );
        // 25 digits in: committed value holds exactly the PAN cap.
        let long = "1".repeat(25);
        assert_eq!(digits_only(&format_card_number(&long)).len(), 19);
    }

    #[test]
    fn reformatting_committed_value_is_stable() {
        let once = format_card_number("4242424242424242");
        assert_eq!(format_card_number(&once), once);
    }

    #[test]
    fn expiration_auto_advances_forward_typing() {
        assert_eq!(format_expiration("", "1"), "1");
        assert_eq!(format_expiration("1", "12"), "12/");
        assert_eq!(format_expiration("12/", "12/2"), "12/2");
        assert_eq!(format_expiration("12/203", "12/2030"), "12/2030");
        // First digit 2-9 cannot start a month: zero-pad and advance.
        assert_eq!(format_expiration("", "4"), "04/");
    }

    #[test]
    fn expiration_deletion_does_not_reinsert_separator() {
        // Backspace over "12/" leaves "12", not "12/" again.
        assert_eq!(format_expiration("12/", "12"), "12");
        // And deleting into a single digit keeps it unpadded.
        assert_eq!(format_expiration("04/", "0"), "0");
    }

    #[test]
    fn expiration_overflow_clamped() {
        assert_eq!(format_expiration("12/2030", "12/20301"), "12/2030");
    }

    #[test]
    fn digit_fields_clamped_to_cap() {
        assert_eq!(format_digits("123456", 4), "1234");
        assert_eq!(format_digits("12a4", 4), "124");
        assert_eq!(format_digits("", 4), "");
    }
}
