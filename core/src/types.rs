//! Core value types shared by every part of the harness.
//!
//! Identifiers coming back from the storefront are opaque strings. They are
//! compared for equality only; nothing here assumes they are dense or ordered.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates the identifier from any string-like value
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the inner string value
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_id!(
    /// Order identifier as reported by the storefront
    OrderId
);
opaque_id!(
    /// Product reference (SKU, slug or catalogue id)
    ProductRef
);
opaque_id!(
    /// Shipping or payment method identifier
    MethodId
);
opaque_id!(
    /// Human readable label of an actor, used in logs and reports
    ActorLabel
);

/// Error returned when a display string cannot be read as money
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot read '{input}' as a money amount: {reason}")]
pub struct MoneyParseError {
    /// The text that failed to parse
    pub input: String,
    /// What went wrong
    pub reason: &'static str,
}

/// Money amount in minor units (cents) to avoid floating point issues
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a money amount from cents
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the value in cents
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Multiplies by a quantity, saturating at the `i64` bounds
    #[must_use]
    #[allow(clippy::cast_lossless)] // `i64::from` is not const
    pub const fn times(self, quantity: u32) -> Self {
        Self(self.0.saturating_mul(quantity as i64))
    }

    /// Parses a storefront display string such as `"$1,234.50"`, `"1.234,50 €"`
    /// or `"(19.99)"`.
    ///
    /// Currency symbols, letters and whitespace are ignored. The last `.` or `,`
    /// followed by one or two digits is the decimal separator; every other
    /// separator is a thousands separator.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyParseError`] when no digits are present or the fraction
    /// has more than two digits.
    pub fn parse_display(input: &str) -> Result<Self, MoneyParseError> {
        let error = |reason| MoneyParseError {
            input: input.to_string(),
            reason,
        };

        let trimmed = input.trim();
        let negative = trimmed.starts_with('-')
            || (trimmed.starts_with('(') && trimmed.ends_with(')'))
            || trimmed.contains("-$")
            || trimmed.contains("- ");

        let kept: String = trimmed
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
            .collect();
        if !kept.chars().any(|c| c.is_ascii_digit()) {
            return Err(error("no digits"));
        }

        let (whole, fraction) = match kept.rfind(['.', ',']) {
            Some(idx) if (1..=2).contains(&(kept.len() - idx - 1)) => {
                (&kept[..idx], &kept[idx + 1..])
            },
            Some(idx) if kept.len() - idx - 1 == 0 => (&kept[..idx], ""),
            _ => (kept.as_str(), ""),
        };

        let whole_digits: String = whole.chars().filter(char::is_ascii_digit).collect();
        let whole_value: i64 = if whole_digits.is_empty() {
            0
        } else {
            whole_digits.parse().map_err(|_| error("amount out of range"))?
        };

        let fraction_value: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| error("bad fraction"))? * 10,
            2 => fraction.parse().map_err(|_| error("bad fraction"))?,
            _ => return Err(error("more than two fraction digits")),
        };

        let cents = whole_value
            .checked_mul(100)
            .and_then(|c| c.checked_add(fraction_value))
            .ok_or_else(|| error("amount out of range"))?;

        Ok(Self(if negative { -cents } else { cents }))
    }
}

impl std::ops::Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

/// A product line, either in a cart or in a placed order
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LineItem {
    /// Product reference
    pub product: ProductRef,
    /// Quantity, always positive
    pub quantity: u32,
    /// Unit price observed when the line was captured
    pub unit_price: Money,
}

impl LineItem {
    /// Creates a new line item
    #[must_use]
    pub fn new(product: impl Into<String>, quantity: u32, unit_price: Money) -> Self {
        Self {
            product: ProductRef::new(product),
            quantity,
            unit_price,
        }
    }

    /// Quantity times unit price
    #[must_use]
    pub const fn total(&self) -> Money {
        self.unit_price.times(self.quantity)
    }
}

/// Error raised when building an invalid cart snapshot
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    /// A line carried quantity zero
    #[error("cart line for '{0}' has zero quantity")]
    ZeroQuantity(ProductRef),
}

/// Point-in-time capture of a cart.
///
/// Lines are keyed by product, so the snapshot has set semantics. An empty
/// snapshot is a valid state, not an error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    lines: BTreeMap<ProductRef, LineItem>,
}

impl CartSnapshot {
    /// The empty cart
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            lines: BTreeMap::new(),
        }
    }

    /// Builds a snapshot from lines, merging repeated products.
    ///
    /// # Errors
    ///
    /// Returns [`CartError::ZeroQuantity`] if any line has quantity zero.
    pub fn from_lines(lines: impl IntoIterator<Item = LineItem>) -> Result<Self, CartError> {
        let mut merged: BTreeMap<ProductRef, LineItem> = BTreeMap::new();
        for line in lines {
            if line.quantity == 0 {
                return Err(CartError::ZeroQuantity(line.product));
            }
            merged
                .entry(line.product.clone())
                .and_modify(|existing| {
                    existing.quantity += line.quantity;
                    existing.unit_price = line.unit_price;
                })
                .or_insert(line);
        }
        Ok(Self { lines: merged })
    }

    /// Whether the cart holds no lines
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of distinct products
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Lines ordered by product reference
    pub fn lines(&self) -> impl Iterator<Item = &LineItem> {
        self.lines.values()
    }

    /// Sum of all line totals
    #[must_use]
    pub fn total(&self) -> Money {
        self.lines.values().map(LineItem::total).sum()
    }

    /// Lines as a sorted vector, the form used for content comparison
    #[must_use]
    pub fn line_set(&self) -> Vec<LineItem> {
        self.lines.values().cloned().collect()
    }
}

/// Order status as shown in the storefront's order history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted, not yet processed
    Pending,
    /// Being processed
    Processing,
    /// Completed
    Completed,
    /// Cancelled by the customer or admin
    Cancelled,
    /// Anything the harness does not recognise
    Unknown(String),
}

impl OrderStatus {
    /// Whether a customer may still cancel
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

/// One row of the order history.
///
/// Immutable once captured: later snapshots may add rows at the head, or change
/// a row's status, but never its total.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    /// Opaque order identifier
    pub order_id: OrderId,
    /// Total exactly as displayed by the storefront
    pub total_observed: String,
    /// 0 for the most recent order
    pub position_from_most_recent: usize,
    /// Line items, when the capture included order details
    pub line_items: Option<Vec<LineItem>>,
    /// Status at capture time
    pub status: OrderStatus,
}

impl OrderSummary {
    /// Creates a summary without line items in `Pending` status
    #[must_use]
    pub fn new(order_id: OrderId, total_observed: impl Into<String>, position: usize) -> Self {
        Self {
            order_id,
            total_observed: total_observed.into(),
            position_from_most_recent: position,
            line_items: None,
            status: OrderStatus::Pending,
        }
    }

    /// Attaches line items (sorted, so comparison is order-insensitive)
    #[must_use]
    pub fn with_line_items(mut self, mut items: Vec<LineItem>) -> Self {
        items.sort();
        self.line_items = Some(items);
        self
    }

    /// Sets the status
    #[must_use]
    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    /// Total normalised to minor units, if the display string is readable
    #[must_use]
    pub fn normalized_total(&self) -> Option<Money> {
        Money::parse_display(&self.total_observed).ok()
    }

    /// Whether both orders show the same total.
    ///
    /// Compares normalised amounts; falls back to the trimmed display text
    /// when either side cannot be parsed.
    #[must_use]
    pub fn same_total(&self, other: &Self) -> bool {
        match (self.normalized_total(), other.normalized_total()) {
            (Some(x), Some(y)) => x == y,
            _ => self.total_observed.trim() == other.total_observed.trim(),
        }
    }
}

/// Who an actor is, towards the storefront.
///
/// `Debug` never prints secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Identity {
    /// Registered customer
    Customer {
        /// Login e-mail
        email: String,
        /// Password
        password: String,
    },
    /// Anonymous shopper holding a guest token
    Guest {
        /// Opaque guest token
        token: String,
    },
}

impl Identity {
    /// A registered customer
    #[must_use]
    pub fn customer(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Customer {
            email: email.into(),
            password: password.into(),
        }
    }

    /// A guest shopper
    #[must_use]
    pub fn guest(token: impl Into<String>) -> Self {
        Self::Guest {
            token: token.into(),
        }
    }

    /// Key identifying the account whose order history this identity sees.
    ///
    /// Two customer identities with the same e-mail share an account.
    #[must_use]
    pub fn account_key(&self) -> String {
        match self {
            Self::Customer { email, .. } => format!("customer:{}", email.to_lowercase()),
            Self::Guest { token } => format!("guest:{token}"),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer { email, .. } => f
                .debug_struct("Customer")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
            Self::Guest { .. } => f
                .debug_struct("Guest")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Minimal shipping/billing address
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// First name
    pub first_name: String,
    /// Last name
    pub last_name: String,
    /// Contact e-mail
    pub email: String,
    /// Street line
    pub street: String,
    /// City
    pub city: String,
    /// Postal code
    pub postcode: String,
    /// ISO country code
    pub country: String,
    /// Phone number
    pub phone: String,
}

impl Address {
    /// The fixture address used by every scenario
    #[must_use]
    pub fn minimal(email: impl Into<String>) -> Self {
        Self {
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            email: email.into(),
            street: "123 Test Street".to_string(),
            city: "Test City".to_string(),
            postcode: "12345".to_string(),
            country: "US".to_string(),
            phone: "1234567890".to_string(),
        }
    }

    /// Names of required fields that are blank
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("email", &self.email),
            ("street", &self.street),
            ("city", &self.city),
            ("postcode", &self.postcode),
            ("country", &self.country),
            ("phone", &self.phone),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

/// How `add_item_to_cart` chooses a product
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectorPolicy {
    /// First purchasable product on the landing page
    FirstAvailable,
    /// A specific product
    Product(ProductRef),
    /// First purchasable product whose reference is not in the list
    FirstAvailableExcept(Vec<ProductRef>),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_display_formats() {
        assert_eq!(Money::parse_display("$19.99").unwrap().cents(), 1999);
        assert_eq!(Money::parse_display("$1,234.50").unwrap().cents(), 123_450);
        assert_eq!(Money::parse_display("1.234,50 €").unwrap().cents(), 123_450);
        assert_eq!(Money::parse_display("  USD 7 ").unwrap().cents(), 700);
        assert_eq!(Money::parse_display("$1,000").unwrap().cents(), 100_000);
        assert_eq!(Money::parse_display("€3,5").unwrap().cents(), 350);
        assert_eq!(Money::parse_display("-$4.00").unwrap().cents(), -400);
        assert_eq!(Money::parse_display("($4.00)").unwrap().cents(), -400);
    }

    #[test]
    fn rejects_text_without_digits() {
        let err = Money::parse_display("N/A").unwrap_err();
        assert_eq!(err.reason, "no digits");
    }

    #[test]
    fn money_display_round_trips_through_parse() {
        let money = Money::from_cents(123_456);
        assert_eq!(money.to_string(), "$1234.56");
        assert_eq!(Money::parse_display(&money.to_string()).unwrap(), money);
    }

    #[test]
    fn arithmetic_saturates_instead_of_overflowing() {
        let huge = Money::from_cents(i64::MAX - 1);
        assert_eq!(huge.times(3), Money::from_cents(i64::MAX));
        assert_eq!(huge + Money::from_cents(10), Money::from_cents(i64::MAX));
        assert_eq!(Money::from_cents(i64::MIN) + Money::from_cents(-1), Money::from_cents(i64::MIN));
        assert_eq!(Money::from_cents(250).times(4), Money::from_cents(1_000));
    }

    #[test]
    fn same_total_compares_normalised_amounts() {
        let dollars = OrderSummary::new(OrderId::new("1"), "$1,200.00", 0);
        let plain = OrderSummary::new(OrderId::new("2"), "1200", 1);
        let other = OrderSummary::new(OrderId::new("3"), "$12.00", 2);
        assert!(dollars.same_total(&plain));
        assert!(!dollars.same_total(&other));

        let unreadable = OrderSummary::new(OrderId::new("4"), " n/a ", 3);
        assert!(unreadable.same_total(&OrderSummary::new(OrderId::new("5"), "n/a", 4)));
        assert!(!unreadable.same_total(&plain));
    }

    #[test]
    fn cart_merges_repeated_products_and_rejects_zero() {
        let cart = CartSnapshot::from_lines([
            LineItem::new("shirt", 1, Money::from_cents(1000)),
            LineItem::new("shirt", 2, Money::from_cents(1000)),
            LineItem::new("hat", 1, Money::from_cents(500)),
        ])
        .unwrap();
        assert_eq!(cart.len(), 2);
        assert_eq!(cart.total(), Money::from_cents(3500));

        let err = CartSnapshot::from_lines([LineItem::new("sock", 0, Money::ZERO)]).unwrap_err();
        assert_eq!(err, CartError::ZeroQuantity(ProductRef::new("sock")));
    }

    #[test]
    fn empty_cart_is_valid() {
        let cart = CartSnapshot::from_lines(Vec::new()).unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.total(), Money::ZERO);
    }

    #[test]
    fn identity_debug_redacts_secrets() {
        let customer = Identity::customer("a@example.com", "hunter2");
        let rendered = format!("{customer:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("a@example.com"));

        let guest = Identity::guest("tok-123");
        assert!(!format!("{guest:?}").contains("tok-123"));
    }

    #[test]
    fn account_key_is_case_insensitive_for_customers() {
        assert_eq!(
            Identity::customer("A@Example.com", "x").account_key(),
            Identity::customer("a@example.com", "y").account_key()
        );
    }

    #[test]
    fn address_reports_blank_fields() {
        let mut address = Address::minimal("a@example.com");
        assert!(address.missing_fields().is_empty());
        address.city = "  ".to_string();
        assert_eq!(address.missing_fields(), vec!["city"]);
    }
}
