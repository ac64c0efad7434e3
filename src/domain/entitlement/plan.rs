//! Plan catalog and billing vocabulary.
//!
//! Plans are server-owned: amount and currency never come from the client.
//! The catalog is static configuration; a client supplies only a plan id.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::ValidationError;

/// Currencies the gateway accepts from us.
pub const SUPPORTED_CURRENCIES: &[&str] = &["INR", "USD"];

/// ISO 4217 currency code, validated to a supported 3-letter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    /// Parses and validates a currency code.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidFormat` if the code is not a
    /// supported 3-letter code.
    pub fn parse(code: &str) -> Result<Self, ValidationError> {
        let upper = code.to_ascii_uppercase();
        if upper.len() != 3 || !SUPPORTED_CURRENCIES.contains(&upper.as_str()) {
            return Err(ValidationError::invalid_format(
                "currency",
                format!("'{}' is not a supported 3-letter currency code", code),
            ));
        }
        let bytes = upper.as_bytes();
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        // Constructed only from validated ASCII uppercase.
        std::str::from_utf8(&self.0).expect("currency is ASCII")
    }

    /// Indian rupee, the default store currency.
    pub fn inr() -> Self {
        Self(*b"INR")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.as_str().to_string()
    }
}

/// The kind of access a plan grants.
///
/// At most one ACTIVE entitlement of a given kind exists per user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementKind {
    /// Recurring premium subscription.
    Subscription,

    /// One-off business profile unlock.
    ProfileUnlock,
}

impl EntitlementKind {
    /// Stable string form used in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntitlementKind::Subscription => "subscription",
            EntitlementKind::ProfileUnlock => "profile_unlock",
        }
    }

    /// Parses the storage string form.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s {
            "subscription" => Ok(EntitlementKind::Subscription),
            "profile_unlock" => Ok(EntitlementKind::ProfileUnlock),
            other => Err(ValidationError::invalid_format(
                "kind",
                format!("unknown entitlement kind '{}'", other),
            )),
        }
    }
}

/// Billing period granted per successful payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPeriod {
    Monthly,
    Quarterly,
    Yearly,
}

impl PlanPeriod {
    /// Calendar months granted per payment.
    pub fn months(&self) -> u32 {
        match self {
            PlanPeriod::Monthly => 1,
            PlanPeriod::Quarterly => 3,
            PlanPeriod::Yearly => 12,
        }
    }
}

/// Plan identifier as exposed to clients (e.g. "premium-monthly").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    /// Creates a new PlanId, returning error if empty.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::empty_field("plan_id"));
        }
        Ok(Self(id))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A purchasable plan: price, currency, kind, and granted period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub id: PlanId,
    pub kind: EntitlementKind,
    pub period: PlanPeriod,
    /// Price in minor units (paise for INR). Always > 0.
    pub amount_minor_units: i64,
    pub currency: Currency,
}

static PLANS: Lazy<Vec<Plan>> = Lazy::new(|| {
    vec![
        Plan {
            id: PlanId::new("premium-monthly").expect("static plan id"),
            kind: EntitlementKind::Subscription,
            period: PlanPeriod::Monthly,
            amount_minor_units: 29_900,
            currency: Currency::inr(),
        },
        Plan {
            id: PlanId::new("premium-quarterly").expect("static plan id"),
            kind: EntitlementKind::Subscription,
            period: PlanPeriod::Quarterly,
            amount_minor_units: 79_900,
            currency: Currency::inr(),
        },
        Plan {
            id: PlanId::new("premium-yearly").expect("static plan id"),
            kind: EntitlementKind::Subscription,
            period: PlanPeriod::Yearly,
            amount_minor_units: 249_900,
            currency: Currency::inr(),
        },
        Plan {
            id: PlanId::new("business-profile").expect("static plan id"),
            kind: EntitlementKind::ProfileUnlock,
            period: PlanPeriod::Yearly,
            amount_minor_units: 49_900,
            currency: Currency::inr(),
        },
    ]
});

/// Looks up a plan by id in the static catalog.
pub fn plan_catalog(plan_id: &str) -> Option<&'static Plan> {
    PLANS.iter().find(|p| p.id.as_str() == plan_id)
}
