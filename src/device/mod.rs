pub mod controls;
pub mod dispatcher;
pub mod transport;

pub use controls::{Coalescer, Controls, Subwoofer};
pub use dispatcher::Dispatcher;
pub use transport::{Transport, TransportError};
