mod centrifugo;
mod listener;
mod transport;

pub use centrifugo::CentrifugoTransport;
pub use listener::{DonationListener, RealtimeSession, SessionAuth};
pub use transport::{RealtimeTransport, TransportError, TransportResult};
