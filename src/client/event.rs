//! Events surfaced to the application

use crate::protocol::{Auth, ConnAck, Disconnect, Publish};

/// Something the broker or the transport did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// CONNACK received, successful or not
    Connack(ConnAck),
    /// Application message, with any topic alias already resolved
    Publish(Publish),
    /// Broker sent DISCONNECT (v5.0)
    Disconnect(Disconnect),
    /// Broker sent AUTH (v5.0)
    Auth(Auth),
    /// Connection ended without a DISCONNECT from either side, or was torn
    /// down after a protocol violation
    Closed,
}
