//! Source and destination chain monitors (§4.4, §4.5).

pub mod destination;
pub mod source;

pub use destination::{DestinationMonitor, SecretRevealed};
pub use source::{NewOrder, SourceMonitor};
