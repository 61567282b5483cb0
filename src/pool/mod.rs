//! Transfer buffer pooling and in-flight tracking

pub mod in_flight;
pub mod layout;
pub mod transfer;

pub use in_flight::InFlightTracker;
pub use layout::{SlotLayout, SLOT_ALIGNMENT};
pub use transfer::{Backing, PicturePool, Slot, TransferPool, MAX_BUFFERS, MIN_MAPPED_SLOTS};
