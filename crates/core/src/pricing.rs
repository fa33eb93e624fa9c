use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Monetary values carry exactly two fractional digits.
pub const MONEY_SCALE: u32 = 2;

/// TVA rate applied on top of the pre-tax total (0.20).
pub const TAX_RATE: Decimal = Decimal::from_parts(20, 0, 0, false, 2);

/// Largest unit price or line amount accepted: 99 999 999.99.
pub const MAX_MONEY: Decimal = Decimal::from_parts(1_410_065_407, 2, 0, false, 2);

/// Checks a unit price and normalises it to two fractional digits.
pub fn normalize_unit_price(unit_price: Decimal) -> Result<Decimal, DomainError> {
    if unit_price.is_sign_negative() && !unit_price.is_zero() {
        return Err(DomainError::validation("unit_price", "unit price cannot be negative"));
    }
    if unit_price.normalize().scale() > MONEY_SCALE {
        return Err(DomainError::validation(
            "unit_price",
            format!("unit price `{unit_price}` has more than {MONEY_SCALE} decimal places"),
        ));
    }

    if unit_price > MAX_MONEY {
        return Err(DomainError::validation(
            "unit_price",
            format!("unit price `{unit_price}` exceeds {MAX_MONEY}"),
        ));
    }

    Ok(to_money_scale(unit_price.abs().normalize()))
}

/// `quantity × unit_price`, exact, and never above [`MAX_MONEY`].
pub fn line_amount(quantity: u32, unit_price: Decimal) -> Result<Decimal, DomainError> {
    Decimal::from(quantity)
        .checked_mul(unit_price)
        .filter(|amount| *amount <= MAX_MONEY)
        .map(to_money_scale)
        .ok_or_else(|| {
            DomainError::validation(
                "quantity",
                format!("line amount for {quantity} x {unit_price} exceeds {MAX_MONEY}"),
            )
        })
}

/// Sum of line amounts; an empty set of lines totals `0.00`.
pub fn pre_tax_total<I>(amounts: I) -> Result<Decimal, DomainError>
where
    I: IntoIterator<Item = Decimal>,
{
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |total, amount| total.checked_add(amount))
        .map(to_money_scale)
        .ok_or_else(|| DomainError::validation("lines", "quote total overflows"))
}

/// Rounds for presentation. Internal arithmetic never calls this.
pub fn round_money(value: Decimal) -> Decimal {
    to_money_scale(value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

pub fn format_money(value: Decimal) -> String {
    round_money(value).to_string()
}

fn to_money_scale(value: Decimal) -> Decimal {
    let mut value = value;
    if value.scale() < MONEY_SCALE {
        value.rescale(MONEY_SCALE);
    }
    value
}

/// HT / TVA / TTC derived from a pre-tax total. Computed on demand, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub pre_tax_total: Decimal,
    pub tax_amount: Decimal,
    pub tax_inclusive_total: Decimal,
}

impl TaxBreakdown {
    /// Stored totals are sums of capped line amounts, far below the point
    /// where saturation would kick in.
    pub fn from_pre_tax(pre_tax_total: Decimal) -> Self {
        let tax_amount = pre_tax_total.saturating_mul(TAX_RATE);
        Self {
            pre_tax_total,
            tax_amount,
            tax_inclusive_total: pre_tax_total.saturating_add(tax_amount),
        }
    }

    pub fn rounded(&self) -> Self {
        Self {
            pre_tax_total: round_money(self.pre_tax_total),
            tax_amount: round_money(self.tax_amount),
            tax_inclusive_total: round_money(self.tax_inclusive_total),
        }
    }

    pub fn rate_label() -> String {
        format!("{}%", (TAX_RATE * Decimal::ONE_HUNDRED).normalize())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use rust_decimal::Decimal;

    use super::{
        format_money, line_amount, normalize_unit_price, pre_tax_total, TaxBreakdown, MAX_MONEY,
        TAX_RATE,
    };
    use crate::errors::DomainError;

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).expect("valid decimal")
    }

    #[test]
    fn tax_rate_is_twenty_percent() {
        assert_eq!(TAX_RATE, dec("0.20"));
        assert_eq!(TaxBreakdown::rate_label(), "20%");
    }

    #[test]
    fn line_amount_is_exact_product() {
        let amount = |quantity, price| line_amount(quantity, dec(price)).expect("amount");
        assert_eq!(amount(3, "19.99"), dec("59.97"));
        assert_eq!(amount(3, "19.99").to_string(), "59.97");
        assert_eq!(amount(0, "250.00").to_string(), "0.00");
        assert_eq!(amount(7, "0.10").to_string(), "0.70");
        assert_eq!(amount(1_000, "0.01").to_string(), "10.00");
    }

    #[test]
    fn repeated_cents_do_not_drift() {
        let amounts = (0..10).map(|_| line_amount(1, dec("0.10")).expect("amount"));
        let total = pre_tax_total(amounts).expect("total");
        assert_eq!(total.to_string(), "1.00");
    }

    #[test]
    fn empty_total_is_zero_with_two_decimals() {
        let total = pre_tax_total(Vec::new()).expect("total");
        assert_eq!(total, Decimal::ZERO);
        assert_eq!(total.to_string(), "0.00");
    }

    #[test]
    fn unit_price_validation() {
        assert_eq!(normalize_unit_price(dec("12")).expect("whole").to_string(), "12.00");
        assert_eq!(normalize_unit_price(dec("12.50")).expect("two places").to_string(), "12.50");
        assert_eq!(normalize_unit_price(dec("12.500")).expect("trailing zero").to_string(), "12.50");

        let negative = normalize_unit_price(dec("-0.01")).expect_err("negative");
        assert!(matches!(negative, DomainError::Validation { field: "unit_price", .. }));

        let precise = normalize_unit_price(dec("1.005")).expect_err("three places");
        assert!(matches!(precise, DomainError::Validation { field: "unit_price", .. }));
    }

    #[test]
    fn oversized_amounts_are_rejected_instead_of_overflowing() {
        assert_eq!(MAX_MONEY, dec("99999999.99"));
        assert_eq!(normalize_unit_price(MAX_MONEY).expect("at the cap"), MAX_MONEY);

        let price = normalize_unit_price(dec("100000000000000000000")).expect_err("huge price");
        assert!(matches!(price, DomainError::Validation { field: "unit_price", .. }));

        let above_cap = line_amount(2, MAX_MONEY).expect_err("line above the cap");
        assert!(matches!(above_cap, DomainError::Validation { field: "quantity", .. }));

        let overflow = line_amount(u32::MAX, Decimal::MAX).expect_err("multiplication overflow");
        assert!(matches!(overflow, DomainError::Validation { field: "quantity", .. }));

        let sum = pre_tax_total([Decimal::MAX, Decimal::MAX]).expect_err("sum overflow");
        assert!(matches!(sum, DomainError::Validation { field: "lines", .. }));
    }

    #[test]
    fn tax_breakdown_for_one_hundred() {
        let breakdown = TaxBreakdown::from_pre_tax(dec("100.00"));
        assert_eq!(breakdown.tax_amount, dec("20.00"));
        assert_eq!(breakdown.tax_inclusive_total, dec("120.00"));

        let rounded = breakdown.rounded();
        assert_eq!(rounded.tax_amount.to_string(), "20.00");
        assert_eq!(rounded.tax_inclusive_total.to_string(), "120.00");
    }

    #[test]
    fn rounding_happens_only_at_presentation() {
        let breakdown = TaxBreakdown::from_pre_tax(dec("0.05"));
        assert_eq!(breakdown.tax_amount, dec("0.01"));

        let breakdown = TaxBreakdown::from_pre_tax(dec("10.03"));
        assert_eq!(breakdown.tax_amount, dec("2.006"));
        assert_eq!(breakdown.tax_inclusive_total, dec("12.036"));
        assert_eq!(format_money(breakdown.tax_amount), "2.01");
        assert_eq!(format_money(breakdown.tax_inclusive_total), "12.04");
    }

    #[test]
    fn midpoint_rounds_away_from_zero() {
        assert_eq!(format_money(dec("0.125")), "0.13");
        assert_eq!(format_money(dec("2.5")), "2.50");
    }
}
