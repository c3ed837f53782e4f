use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Settlement currencies supported by the payment gateway. Balances are
/// always stored in the currency's minor unit (kobo, pesewas, cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    #[default]
    Ngn,
    Ghs,
    Kes,
    Zar,
}

impl Currency {
    /// ISO 4217 code, as the gateway expects it.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Ngn => "NGN",
            Currency::Ghs => "GHS",
            Currency::Kes => "KES",
            Currency::Zar => "ZAR",
        }
    }

    /// Minor units per major unit. All supported currencies are centesimal.
    pub fn subunit(&self) -> u64 {
        100
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Currency::Ngn => "₦",
            Currency::Ghs => "GH₵",
            Currency::Kes => "KSh",
            Currency::Zar => "R",
        }
    }

    pub fn all() -> &'static [Currency] {
        &[Currency::Ngn, Currency::Ghs, Currency::Kes, Currency::Zar]
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NGN" => Ok(Currency::Ngn),
            "GHS" => Ok(Currency::Ghs),
            "KES" => Ok(Currency::Kes),
            "ZAR" => Ok(Currency::Zar),
            other => Err(format!("unsupported currency code: {other}")),
        }
    }
}

/// Format an amount stored in minor units for display, e.g. `₦5.00`.
pub fn format_amount(amount_minor: u64, currency: &Currency) -> String {
    let sub = currency.subunit();
    format!(
        "{}{}.{:02}",
        currency.symbol(),
        amount_minor / sub,
        amount_minor % sub
    )
}
