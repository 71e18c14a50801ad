// src/models/mod.rs
pub mod driver;
pub mod fare;
pub mod geo;
pub mod identity;
pub mod payment;
pub mod review;
pub mod rider;
pub mod trip;

pub use driver::*;
pub use fare::*;
pub use geo::*;
pub use identity::*;
pub use payment::*;
pub use review::*;
pub use rider::*;
pub use trip::*;
