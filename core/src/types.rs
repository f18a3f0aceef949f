//! Domain types for the reservation engine.
//!
//! Value objects (identifiers, [`Money`]) and the records persisted by the
//! stores: [`StockItem`], [`Session`], [`Booking`], [`Reservation`] and
//! [`Order`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Wrap a raw value as a `", stringify!($name), "`")]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw value
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True when the value is empty or whitespace only
            #[must_use]
            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a reservation
    ReservationId
);
uuid_id!(
    /// Unique identifier for an order
    OrderId
);
uuid_id!(
    /// Unique identifier for a scheduled class session
    SessionId
);
uuid_id!(
    /// Unique identifier for a course (the owner of sessions)
    CourseId
);

string_id!(
    /// Catalog identifier of a sellable unit (variant, bundle or equipment SKU)
    ItemId
);
string_id!(
    /// Reference assigned by the payment processor; at most one order per value
    PaymentReference
);
string_id!(
    /// Unique, customer-facing booking code
    BookingReference
);

impl BookingReference {
    /// Generate a short random booking code (`BK-` followed by 10 hex digits).
    #[must_use]
    pub fn generate() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        Self(format!("BK-{}", simple[..10].to_uppercase()))
    }
}

// ============================================================================
// Money
// ============================================================================

/// Monetary amount in minor units (cents).
///
/// Arithmetic is checked; callers turn overflow into a validation error.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checked addition
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Checked multiplication by a quantity
    #[must_use]
    pub const fn times(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Stock
// ============================================================================

/// Where a stock counter comes from in the catalog.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A product variant (size/colour combination)
    Variant,
    /// A product sold as a bundle with its own counter
    BundledProduct,
    /// Rentable or sellable equipment
    Equipment,
}

impl SourceKind {
    /// Stable lowercase name used in storage and logs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Variant => "variant",
            Self::BundledProduct => "bundled_product",
            Self::Equipment => "equipment",
        }
    }

    /// Parse the storage name back into a kind
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "variant" => Some(Self::Variant),
            "bundled_product" => Some(Self::BundledProduct),
            "equipment" => Some(Self::Equipment),
            _ => None,
        }
    }
}

/// Addresses one stock counter: item id plus its source kind.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    /// Catalog item
    pub item_id: ItemId,
    /// Which catalog collection owns the counter
    pub source_kind: SourceKind,
}

impl StockKey {
    /// Build a key
    #[must_use]
    pub fn new(item_id: impl Into<String>, source_kind: SourceKind) -> Self {
        Self {
            item_id: ItemId::new(item_id),
            source_kind,
        }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_kind.as_str(), self.item_id)
    }
}

/// One sellable unit and its available quantity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    /// Counter address
    pub key: StockKey,
    /// Units available for sale
    pub quantity: u32,
}

/// A stock mutation applied on behalf of a reservation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    /// Counter that changed
    pub key: StockKey,
    /// Units taken
    pub quantity: u32,
    /// Counter value before the decrement
    pub before: u32,
    /// Counter value after the decrement
    pub after: u32,
}

// ============================================================================
// Sessions and bookings
// ============================================================================

/// A scheduled occurrence of a bookable class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session id
    pub id: SessionId,
    /// Owning course
    pub course_id: CourseId,
    /// Start time
    pub starts_at: DateTime<Utc>,
    /// End time
    pub ends_at: DateTime<Utc>,
    /// Seats available in total (always positive)
    pub capacity: u32,
}

impl Session {
    /// A session whose end time is not strictly after `now` can no longer be booked.
    #[must_use]
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.ends_at <= now
    }
}

/// Lifecycle of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Seats held, payment not yet confirmed
    Pending,
    /// Seats sold
    Confirmed,
    /// Seats returned to the session
    Cancelled,
}

impl BookingStatus {
    /// Whether the booking counts against session capacity
    #[must_use]
    pub const fn holds_seats(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A commitment of attendee seats against one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Unique booking code
    pub reference: BookingReference,
    /// Booked session
    pub session_id: SessionId,
    /// Number of seats (at least one)
    pub attendee_count: u32,
    /// Lifecycle status
    pub status: BookingStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Reservations
// ============================================================================

/// A stock line requested at checkout, with the price quoted at that moment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationItem {
    /// Counter to decrement
    pub key: StockKey,
    /// Display name captured at checkout
    pub name: String,
    /// Units requested
    pub quantity: u32,
    /// Unit price captured at checkout
    pub unit_price: Money,
}

/// A seat line requested at checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatRequest {
    /// Session to book
    pub session_id: SessionId,
    /// Display name captured at checkout
    pub label: String,
    /// Seats requested
    pub attendees: u32,
    /// Price per seat captured at checkout
    pub unit_price: Money,
}

/// Seats held by a reservation through a pending booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatHold {
    /// Booked session
    pub session_id: SessionId,
    /// The pending booking holding the seats
    pub booking_reference: BookingReference,
    /// Display name captured at checkout
    pub label: String,
    /// Seats held
    pub attendees: u32,
    /// Price per seat captured at checkout
    pub unit_price: Money,
}

/// Everything a checkout wants to commit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Stock lines
    #[serde(default)]
    pub items: Vec<ReservationItem>,
    /// Seat lines
    #[serde(default)]
    pub seats: Vec<SeatRequest>,
    /// Shipping quoted at checkout
    #[serde(default)]
    pub shipping: Money,
    /// Payment reference, when the payment intent already exists
    #[serde(default)]
    pub payment_reference: Option<PaymentReference>,
}

impl ReservationRequest {
    /// True when nothing would be reserved
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.seats.is_empty()
    }
}

/// Reservation lifecycle.
//
//  Reserved ──consume──► Consumed   (changes permanent)
//     │
//     └──release / expiry──► Released   (changes reversed)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Stock decremented, waiting for payment
    Reserved,
    /// Converted into an order
    Consumed,
    /// Stock returned
    Released,
}

impl ReservationStatus {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Reserved => "reserved",
            Self::Consumed => "consumed",
            Self::Released => "released",
        }
    }

    /// Parse the storage name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reserved" => Some(Self::Reserved),
            "consumed" => Some(Self::Consumed),
            "released" => Some(Self::Released),
            _ => None,
        }
    }
}

/// A provisional hold that has already mutated stock counters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation id
    pub id: ReservationId,
    /// Payment reference, once the payment intent exists
    pub payment_reference: Option<PaymentReference>,
    /// Stock lines in request order
    pub items: Vec<ReservationItem>,
    /// Seat holds in request order
    pub seats: Vec<SeatHold>,
    /// Applied stock decrements
    pub stock_changes: Vec<StockChange>,
    /// Shipping quoted at checkout
    pub shipping: Money,
    /// Lifecycle status
    pub status: ReservationStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// After this instant an unconsumed reservation may be released
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    /// Garbage-collection predicate: still reserved and past its expiry.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::Reserved && self.expires_at <= now
    }
}

// ============================================================================
// Orders
// ============================================================================

/// What an order line refers to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LineSubject {
    /// Physical stock
    Stock {
        /// Counter the line was taken from
        key: StockKey,
    },
    /// Class seats
    Seats {
        /// Booked session
        session_id: SessionId,
        /// Booking holding the seats, when known
        #[serde(default)]
        booking_reference: Option<BookingReference>,
    },
    /// Anything the payment payload carries without a catalog link
    Other,
}

/// A line of an order with prices recorded at the time of sale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Display name
    pub description: String,
    /// What was sold
    pub subject: LineSubject,
    /// Units sold
    pub quantity: u32,
    /// Price per unit
    pub unit_price: Money,
    /// `unit_price * quantity`
    pub total: Money,
}

impl OrderLine {
    /// Build a line, computing its total. Returns `None` on overflow.
    #[must_use]
    pub fn new(
        description: impl Into<String>,
        subject: LineSubject,
        quantity: u32,
        unit_price: Money,
    ) -> Option<Self> {
        Some(Self {
            description: description.into(),
            subject,
            quantity,
            unit_price,
            total: unit_price.times(quantity)?,
        })
    }
}

/// Order lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created but not paid
    Pending,
    /// Payment confirmed
    Paid,
    /// Handed to the carrier
    Shipped,
    /// Payment arrived but the order could not be fulfilled
    Failed,
    /// Cancelled or refunded
    Cancelled,
}

impl OrderStatus {
    /// Stable lowercase name
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "shipped" => Some(Self::Shipped),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Postal address captured from the payment processor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Recipient
    pub name: String,
    /// Street line
    pub line1: String,
    /// Optional second line
    #[serde(default)]
    pub line2: Option<String>,
    /// City
    pub city: String,
    /// Postal code
    pub postal_code: String,
    /// ISO country code
    pub country: String,
}

/// Free-form order metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMetadata {
    /// Set once the shipping confirmation has been recorded
    #[serde(default)]
    pub shipping_confirmed: bool,
    /// Additional annotations (failure reasons, carrier ids)
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
}

/// The canonical record of a completed purchase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order id
    pub id: OrderId,
    /// Unique when present; only paid orders carry one
    pub payment_reference: Option<PaymentReference>,
    /// Reservation the order was built from
    pub reservation_id: Option<ReservationId>,
    /// Lines with prices at time of sale
    pub lines: Vec<OrderLine>,
    /// Sum of line totals
    pub subtotal: Money,
    /// Shipping charged
    pub shipping: Money,
    /// `subtotal + shipping`
    pub total: Money,
    /// Lifecycle status
    pub status: OrderStatus,
    /// Shipping address
    pub shipping_address: Option<Address>,
    /// Billing address
    pub billing_address: Option<Address>,
    /// Metadata bag
    pub metadata: OrderMetadata,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Sum line totals and shipping. Returns `(subtotal, total)` or `None` on overflow.
#[must_use]
pub fn order_totals(lines: &[OrderLine], shipping: Money) -> Option<(Money, Money)> {
    let subtotal = lines
        .iter()
        .try_fold(Money::ZERO, |acc, line| acc.checked_add(line.total))?;
    Some((subtotal, subtotal.checked_add(shipping)?))
}
