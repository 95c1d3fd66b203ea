//! Public operations, one module per endpoint. Each module owns its typed
//! request/response records, a pure validation function, and the handler that
//! runs behind the stage pipeline.

pub mod accept_ride;
pub mod capture_payment;
pub mod create_ride;
pub mod driver_status;
pub mod end_trip;
pub mod get_ride;
pub mod location_update;
pub mod register_driver;
pub mod start_trip;

pub use accept_ride::{AcceptRide, AcceptRideRequest, AcceptRideResponse};
pub use capture_payment::{CapturePayment, CapturePaymentRequest, CapturePaymentResponse};
pub use create_ride::{CreateRide, CreateRideRequest, CreateRideResponse};
pub use driver_status::{SetDriverStatus, SetDriverStatusRequest, SetDriverStatusResponse};
pub use end_trip::{EndTrip, EndTripRequest, EndTripResponse};
pub use get_ride::{GetRide, GetRideRequest};
pub use location_update::{LocationUpdate, LocationUpdateRequest, LocationUpdateResponse};
pub use register_driver::{RegisterDriver, RegisterDriverRequest, RegisterDriverResponse};
pub use start_trip::{StartTrip, StartTripRequest, StartTripResponse};

use crate::error::{DispatchError, Result};

pub(crate) fn check_lat(field: &'static str, value: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&value) || !value.is_finite() {
        return Err(DispatchError::validation(
            field,
            format!("{value} is outside [-90, 90]"),
        ));
    }
    Ok(())
}

pub(crate) fn check_lng(field: &'static str, value: f64) -> Result<()> {
    if !(-180.0..=180.0).contains(&value) || !value.is_finite() {
        return Err(DispatchError::validation(
            field,
            format!("{value} is outside [-180, 180]"),
        ));
    }
    Ok(())
}
