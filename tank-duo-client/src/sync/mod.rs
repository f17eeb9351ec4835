//! Host/Guest Synchronization
//!
//! - `host`: id assignment, input application and snapshot building on the
//!   authoritative peer
//! - `guest`: snapshot reconciliation and input streaming on the mirroring peer

pub mod host;
pub mod guest;

pub use host::{
    coalesce_inputs, HostSession, HostSimulation, HostSync, NetworkIdAllocator, NetworkVisible, PlayerControl,
    TileDiff,
};
pub use guest::{GuestMirror, GuestSession, MirroredEntity, ReconcileReport, INTERPOLATION_FACTOR};
