//! Device layer: driver boundary, controller kinds, sessions.
//!
//! The wire protocol itself is an external collaborator behind the
//! [`TagDriver`] trait; [`DeviceSession`] wraps one driver connection with
//! the reconnect/error-count policy the poll loops rely on.

mod driver;
pub mod sim;
mod session;

pub use driver::{
    ControllerKind, DeviceDescriptor, DriverConstructor, DriverError, DriverFamily,
    DriverRegistry, TagDriver,
};
pub use session::{DeviceSession, DeviceStatus, MAX_CONSECUTIVE_ERRORS, SessionState};
