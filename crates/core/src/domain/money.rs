//! Brazilian real amounts as typed by influencers and operators.

use std::str::FromStr;

use rust_decimal::Decimal;

/// Renders an amount the way replies and prompts show it, e.g. `R$2800.00`.
pub fn format_brl(amount: Decimal) -> String {
    format!("R${:.2}", amount.round_dp(2))
}

/// Parses pt-BR money: `.` groups thousands and `,` marks decimals. Accepts an `R$` prefix,
/// inner spaces and the `k`/`mil`/`m` suffixes, e.g. `R$ 5.000,00`, `5.000`, `4500,50`, `5k`.
pub fn parse_brl(input: &str) -> Option<Decimal> {
    let compact: String =
        input.trim().to_lowercase().chars().filter(|ch| !ch.is_whitespace()).collect();
    let (digits, multiplier) = split_multiplier(compact.trim_start_matches("r$"));
    if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit() || ch == '.' || ch == ',')
    {
        return None;
    }

    let normalized = if multiplier != 1 {
        digits.replace(',', ".")
    } else if digits.contains(',') {
        digits.replace('.', "").replace(',', ".")
    } else if digits.split('.').skip(1).all(|group| group.len() == 3) {
        digits.replace('.', "")
    } else {
        digits.to_owned()
    };

    let amount = Decimal::from_str(&normalized).ok()?;
    Some((amount * Decimal::from(multiplier)).round_dp(2))
}

/// Splits a `k`, `mil` or `m` suffix into its multiplier.
pub fn split_multiplier(token: &str) -> (&str, u64) {
    if let Some(prefix) = token.strip_suffix("mil") {
        (prefix, 1_000)
    } else if let Some(prefix) = token.strip_suffix('k') {
        (prefix, 1_000)
    } else if let Some(prefix) = token.strip_suffix('m') {
        (prefix, 1_000_000)
    } else {
        (token, 1)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{format_brl, parse_brl};

    #[test]
    fn dots_group_thousands_and_commas_mark_cents() {
        assert_eq!(parse_brl("5.000"), Some(Decimal::from(5000)));
        assert_eq!(parse_brl("R$ 5.000,00"), Some(Decimal::from(5000)));
        assert_eq!(parse_brl("r$4500,50"), Some(Decimal::new(450_050, 2)));
        assert_eq!(parse_brl("1.250.000"), Some(Decimal::from(1_250_000)));
        assert_eq!(parse_brl("12.5"), Some(Decimal::new(125, 1)));
        assert_eq!(parse_brl("5k"), Some(Decimal::from(5000)));
        assert_eq!(parse_brl("2,5 mil"), Some(Decimal::from(2500)));
        assert_eq!(parse_brl("sim"), None);
        assert_eq!(parse_brl("R$"), None);
    }

    #[test]
    fn formats_with_two_decimals() {
        assert_eq!(format_brl(Decimal::from(8000)), "R$8000.00");
        assert_eq!(format_brl(Decimal::new(2_800_456, 3)), "R$2800.46");
    }
}
