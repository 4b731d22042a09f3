//! Adapters: one module per upstream protocol plus the shared lifecycle
//! machinery. Only the DSP adapter lives in this crate; other protocols
//! plug in through [`traits::AdapterLogic`].

pub mod handle;
pub mod hqp;
pub mod traits;

pub use handle::{AdapterHandle, RestartPolicy};
pub use traits::{AdapterContext, AdapterLogic, AdapterStatus, Capabilities, ControlAction};
