pub mod location;
pub mod meter;
pub mod mutation;
pub mod reading;

pub use location::{derive_locations, Location, LocationKey};
pub use meter::{EnergyType, Meter, UnknownEnergyType};
pub use mutation::{Method, MutationRequest, QueuedMutation, OBJECTS_ENDPOINT_PREFIX, READINGS_ENDPOINT};
pub use reading::{Reading, ReadingDraft};
