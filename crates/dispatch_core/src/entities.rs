//! Core records and state enums: drivers, rides, trips, payments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type DriverId = Uuid;
pub type RideId = Uuid;
pub type TripId = Uuid;
pub type PaymentId = Uuid;

/// Service class. Drives pricing and candidate filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Standard,
    Premium,
    Xl,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Standard, Tier::Premium, Tier::Xl];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Standard => "standard",
            Tier::Premium => "premium",
            Tier::Xl => "xl",
        }
    }

    pub fn parse(value: &str) -> Option<Tier> {
        match value {
            "standard" => Some(Tier::Standard),
            "premium" => Some(Tier::Premium),
            "xl" => Some(Tier::Xl),
            _ => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Offline,
    Available,
    OnTrip,
    Unavailable,
}

impl DriverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverStatus::Offline => "offline",
            DriverStatus::Available => "available",
            DriverStatus::OnTrip => "on_trip",
            DriverStatus::Unavailable => "unavailable",
        }
    }

    pub fn parse(value: &str) -> Option<DriverStatus> {
        match value {
            "offline" => Some(DriverStatus::Offline),
            "available" => Some(DriverStatus::Available),
            "on_trip" => Some(DriverStatus::OnTrip),
            "unavailable" => Some(DriverStatus::Unavailable),
            _ => None,
        }
    }
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ride lifecycle: `REQUESTED → MATCHED → STARTED → COMPLETED`, with terminal
/// `CANCELLED` reachable from `REQUESTED` or `MATCHED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Requested,
    Matched,
    Started,
    Completed,
    Cancelled,
}

impl RideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "REQUESTED",
            RideStatus::Matched => "MATCHED",
            RideStatus::Started => "STARTED",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<RideStatus> {
        match value {
            "REQUESTED" => Some(RideStatus::Requested),
            "MATCHED" => Some(RideStatus::Matched),
            "STARTED" => Some(RideStatus::Started),
            "COMPLETED" => Some(RideStatus::Completed),
            "CANCELLED" => Some(RideStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    Active,
    Completed,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Active => "active",
            TripStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<TripStatus> {
        match value {
            "active" => Some(TripStatus::Active),
            "completed" => Some(TripStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Card,
    Wallet,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Cash => "cash",
        }
    }

    pub fn parse(value: &str) -> Option<PaymentMethod> {
        match value {
            "card" => Some(PaymentMethod::Card),
            "wallet" => Some(PaymentMethod::Wallet),
            "cash" => Some(PaymentMethod::Cash),
            _ => None,
        }
    }
}

/// Payment lifecycle: `pending` with at most one terminal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<PaymentStatus> {
        match value {
            "pending" => Some(PaymentStatus::Pending),
            "success" => Some(PaymentStatus::Success),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverRecord {
    pub id: DriverId,
    pub name: String,
    pub phone: String,
    pub tier: Tier,
    pub status: DriverStatus,
    pub last_lat: Option<f64>,
    pub last_lng: Option<f64>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DriverRecord {
    pub fn last_position(&self) -> Option<GeoPoint> {
        match (self.last_lat, self.last_lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRecord {
    pub id: RideId,
    pub rider_id: String,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub dest_lat: f64,
    pub dest_lng: f64,
    pub tier: Tier,
    pub payment_method: PaymentMethod,
    pub status: RideStatus,
    /// Set exactly when entering `MATCHED` and never rewritten.
    pub assigned_driver_id: Option<DriverId>,
    pub estimated_fare: f64,
    /// Captured at ride creation and frozen for the trip's lifetime.
    pub surge_multiplier: f64,
    pub cancel_reason: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RideRecord {
    pub fn pickup(&self) -> GeoPoint {
        GeoPoint::new(self.pickup_lat, self.pickup_lng)
    }

    pub fn dest(&self) -> GeoPoint {
        GeoPoint::new(self.dest_lat, self.dest_lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub id: TripId,
    /// Exactly one trip per ride; created by the matching commit.
    pub ride_id: RideId,
    pub driver_id: DriverId,
    pub rider_id: String,
    pub started_at: DateTime<Utc>,
    pub driver_confirmed_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub final_lat: Option<f64>,
    pub final_lng: Option<f64>,
    pub distance_km: Option<f64>,
    pub final_fare: Option<f64>,
    pub status: TripStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub trip_id: TripId,
    pub amount: f64,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub psp_ref: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public contact card for an assigned driver, embedded in ride reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverBrief {
    pub id: DriverId,
    pub name: String,
    pub phone: String,
}

/// The `get_ride` view; also the unit cached by the ride-status read cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideSnapshot {
    pub id: RideId,
    pub rider_id: String,
    pub status: RideStatus,
    pub driver: Option<DriverBrief>,
    pub estimated_fare: f64,
    pub surge_multiplier: f64,
    pub cancel_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_string_round_trips() {
        for tier in Tier::ALL {
            assert_eq!(Tier::parse(tier.as_str()), Some(tier));
        }
        for status in [
            RideStatus::Requested,
            RideStatus::Matched,
            RideStatus::Started,
            RideStatus::Completed,
            RideStatus::Cancelled,
        ] {
            assert_eq!(RideStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DriverStatus::parse("on_trip"), Some(DriverStatus::OnTrip));
        assert_eq!(PaymentStatus::parse("nope"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(RideStatus::Cancelled.is_terminal());
        assert!(RideStatus::Completed.is_terminal());
        assert!(!RideStatus::Matched.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
    }
}
