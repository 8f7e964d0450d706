//! Balance inference over a raw statement feed.
//!
//! The statement API has no reliable balance endpoint, so balances are read
//! from entries whose description names them ("Saldo Anterior", "S A L D O",
//! ...). When no usable label is present the balance is reconstructed from
//! credits and debits and reported as calculated, never as authoritative.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::{EntrySign, TransactionEntry};

/// Decides whether an entry description belongs to a balance category.
pub trait DescriptionMatcher: Send + Sync + fmt::Debug {
    fn matches(&self, description: &str) -> bool;
}

/// Case-insensitive substring match against any of a list of phrases.
#[derive(Debug, Clone)]
pub struct PhraseMatcher {
    phrases: Vec<String>,
}

impl PhraseMatcher {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }
}

impl DescriptionMatcher for PhraseMatcher {
    fn matches(&self, description: &str) -> bool {
        let haystack = description.to_lowercase();
        self.phrases.iter().any(|p| haystack.contains(p.as_str()))
    }
}

/// The matcher set used by [`derive_balance`].
#[derive(Debug, Clone)]
pub struct BalanceMatchers {
    pub previous: Arc<dyn DescriptionMatcher>,
    pub day: Arc<dyn DescriptionMatcher>,
    pub current: Arc<dyn DescriptionMatcher>,
    /// Marks the first entry as an opening balance in the arithmetic fallback.
    pub opening: Arc<dyn DescriptionMatcher>,
}

impl BalanceMatchers {
    pub fn new(
        previous: Arc<dyn DescriptionMatcher>,
        day: Arc<dyn DescriptionMatcher>,
        current: Arc<dyn DescriptionMatcher>,
        opening: Arc<dyn DescriptionMatcher>,
    ) -> Self {
        Self {
            previous,
            day,
            current,
            opening,
        }
    }

    pub fn from_phrases<S: AsRef<str>>(
        previous: &[S],
        day: &[S],
        current: &[S],
        opening_keyword: &str,
    ) -> Self {
        Self::new(
            Arc::new(PhraseMatcher::new(previous)),
            Arc::new(PhraseMatcher::new(day)),
            Arc::new(PhraseMatcher::new(current)),
            Arc::new(PhraseMatcher::new([opening_keyword])),
        )
    }

    /// Labels used by Banco do Brasil statements.
    pub fn portuguese() -> Self {
        Self::from_phrases(
            &["saldo anterior"],
            &["saldo do dia", "s a l d o"],
            &["saldo atual", "saldo disponivel", "saldo disponível"],
            "saldo",
        )
    }

    pub fn english() -> Self {
        Self::from_phrases(
            &["previous balance"],
            &["day balance"],
            &["current balance"],
            "balance",
        )
    }
}

impl Default for BalanceMatchers {
    fn default() -> Self {
        Self::portuguese()
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DerivedBalance {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_balance: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub day_balance: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_balance: Option<Decimal>,
    /// Opening + credits - debits; an estimate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calculated_balance: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_entry: Option<TransactionEntry>,
}

pub fn derive_balance(entries: &[TransactionEntry], matchers: &BalanceMatchers) -> DerivedBalance {
    let mut derived = DerivedBalance::default();
    let Some(last) = entries.last() else {
        return derived;
    };

    for entry in entries {
        let description = entry.description.as_str();
        if derived.previous_balance.is_none() && matchers.previous.matches(description) {
            derived.previous_balance = Some(entry.signed_amount());
        }
        if derived.day_balance.is_none() && matchers.day.matches(description) {
            derived.day_balance = Some(entry.signed_amount());
        }
        if derived.current_balance.is_none() && matchers.current.matches(description) {
            derived.current_balance = Some(entry.signed_amount());
        }
    }

    derived.last_entry = Some(last.clone());

    if let Some(day) = derived.day_balance {
        derived.current_balance = Some(day);
    }

    if derived.previous_balance.is_none() && derived.day_balance.is_none() {
        derived.calculated_balance = Some(reconstruct(entries, matchers));
    }

    derived
}

fn reconstruct(entries: &[TransactionEntry], matchers: &BalanceMatchers) -> Decimal {
    let (opening, rest) = match entries.split_first() {
        Some((first, rest)) if matchers.opening.matches(&first.description) => {
            (first.signed_amount(), rest)
        }
        _ => (Decimal::ZERO, entries),
    };

    let mut credits = Decimal::ZERO;
    let mut debits = Decimal::ZERO;
    for entry in rest {
        match entry.sign() {
            EntrySign::Credit => credits += entry.amount.abs(),
            EntrySign::Debit => debits += entry.amount.abs(),
            EntrySign::Unknown => {}
        }
    }

    opening + credits - debits
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(description: &str, amount: Decimal, sign: &str) -> TransactionEntry {
        TransactionEntry::new(amount, sign, "05012025", description)
    }

    #[test]
    fn empty_feed_derives_nothing() {
        let derived = derive_balance(&[], &BalanceMatchers::english());
        assert_eq!(derived, DerivedBalance::default());
    }

    #[test]
    fn day_balance_overrides_current_balance() {
        let entries = vec![
            entry("Current balance", dec!(50), "C"),
            entry("Payment", dec!(10), "D"),
            entry("Day balance", dec!(100), "C"),
        ];
        let derived = derive_balance(&entries, &BalanceMatchers::english());

        assert_eq!(derived.day_balance, Some(dec!(100)));
        assert_eq!(derived.current_balance, Some(dec!(100)));
        assert_eq!(derived.calculated_balance, None);
        assert_eq!(derived.last_entry.unwrap().description, "Day balance");
    }

    #[test]
    fn first_match_per_category_wins() {
        let entries = vec![
            entry("PREVIOUS BALANCE", dec!(10), "C"),
            entry("previous balance (corrected)", dec!(20), "C"),
            entry("day balance", dec!(30), "C"),
            entry("DAY BALANCE", dec!(40), "C"),
        ];
        let derived = derive_balance(&entries, &BalanceMatchers::english());

        assert_eq!(derived.previous_balance, Some(dec!(10)));
        assert_eq!(derived.day_balance, Some(dec!(30)));
        assert_eq!(derived.current_balance, Some(dec!(30)));
    }

    #[test]
    fn fallback_without_opening_balance() {
        let entries = vec![
            entry("Salary", dec!(200), "C"),
            entry("Groceries", dec!(75), "D"),
        ];
        let derived = derive_balance(&entries, &BalanceMatchers::english());

        assert_eq!(derived.calculated_balance, Some(dec!(125)));
        assert_eq!(derived.previous_balance, None);
        assert_eq!(derived.current_balance, None);
        assert_eq!(derived.last_entry.unwrap().description, "Groceries");
    }

    #[test]
    fn fallback_uses_labelled_first_entry_as_opening() {
        let entries = vec![
            entry("Opening balance", dec!(1000), "C"),
            entry("Transfer in", dec!(250.50), "C"),
            entry("Card", dec!(100.25), "D"),
        ];
        let derived = derive_balance(&entries, &BalanceMatchers::english());

        assert_eq!(derived.calculated_balance, Some(dec!(1150.25)));
    }

    #[test]
    fn fallback_runs_alongside_current_balance() {
        let entries = vec![
            entry("Deposit", dec!(300), "C"),
            entry("Current balance", dec!(300), "C"),
        ];
        let derived = derive_balance(&entries, &BalanceMatchers::english());

        assert_eq!(derived.current_balance, Some(dec!(300)));
        assert_eq!(derived.calculated_balance, Some(dec!(600)));
    }

    #[test]
    fn fallback_ignores_entries_without_sign_indicator() {
        let entries = vec![
            entry("Salary", dec!(200), "C"),
            entry("Pending", dec!(999), ""),
            entry("Reversal", dec!(50), "X"),
            entry("Groceries", dec!(75), "D"),
        ];
        let derived = derive_balance(&entries, &BalanceMatchers::english());

        assert_eq!(derived.calculated_balance, Some(dec!(125)));
        assert_eq!(derived.last_entry.unwrap().description, "Groceries");
    }

    #[test]
    fn unsigned_balance_line_keeps_raw_amount() {
        let entries = vec![entry("Day balance", dec!(-12), "")];
        let derived = derive_balance(&entries, &BalanceMatchers::english());
        assert_eq!(derived.day_balance, Some(dec!(-12)));
    }

    #[test]
    fn previous_balance_suppresses_fallback() {
        let entries = vec![
            entry("Saldo Anterior", dec!(500), "C"),
            entry("Pix recebido", dec!(20), "C"),
        ];
        let derived = derive_balance(&entries, &BalanceMatchers::portuguese());

        assert_eq!(derived.previous_balance, Some(dec!(500)));
        assert_eq!(derived.calculated_balance, None);
    }

    #[test]
    fn portuguese_day_balance_line() {
        let entries = vec![
            entry("Saldo Anterior", dec!(500), "C"),
            entry("Tarifa", dec!(12.90), "D"),
            entry("S A L D O", dec!(487.10), "C"),
        ];
        let derived = derive_balance(&entries, &BalanceMatchers::portuguese());

        assert_eq!(derived.day_balance, Some(dec!(487.10)));
        assert_eq!(derived.current_balance, Some(dec!(487.10)));
    }

    #[test]
    fn debit_balance_lines_are_negative() {
        let entries = vec![entry("Saldo do dia", dec!(42), "D")];
        let derived = derive_balance(&entries, &BalanceMatchers::portuguese());

        assert_eq!(derived.day_balance, Some(dec!(-42)));
    }

    #[test]
    fn custom_matcher_can_be_plugged_in() {
        #[derive(Debug)]
        struct StartsWith(&'static str);
        impl DescriptionMatcher for StartsWith {
            fn matches(&self, description: &str) -> bool {
                description.starts_with(self.0)
            }
        }

        let english = BalanceMatchers::english();
        let matchers = BalanceMatchers::new(
            Arc::new(StartsWith("PREV")),
            english.day.clone(),
            english.current.clone(),
            english.opening.clone(),
        );
        let entries = vec![entry("PREV 2025", dec!(7), "C")];
        assert_eq!(derive_balance(&entries, &matchers).previous_balance, Some(dec!(7)));
    }
}
