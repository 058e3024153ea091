use std::time::Duration;

/// Default per-request deadline for client members.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Which side may send on a pipe or wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Both,
    /// Only the service sends.
    ReadOnly,
    /// Only the client sends.
    WriteOnly,
}

impl Direction {
    /// Returns true when a sender on the given side is allowed.
    pub fn allows(self, role: Role) -> bool {
        !matches!(
            (self, role),
            (Direction::ReadOnly, Role::Client) | (Direction::WriteOnly, Role::Service)
        )
    }
}

/// Side of a member connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Service,
}

/// Configuration for pipe endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeConfig {
    /// Ask the peer to acknowledge every sent packet.
    pub request_packet_ack: bool,
    /// Drop late packets instead of holding for gaps.
    pub unreliable: bool,
    /// Inbound queue bound; the oldest packet is dropped beyond it.
    pub max_recv_queue: Option<usize>,
    pub direction: Direction,
    /// Deadline for connect and close requests.
    pub request_timeout: Option<Duration>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            request_packet_ack: false,
            unreliable: false,
            max_recv_queue: None,
            direction: Direction::Both,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

/// Configuration for pipe broadcasters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcasterConfig {
    /// Unacknowledged packets allowed per endpoint before new packets are
    /// dropped for it. `None` means unbounded.
    pub maximum_backlog: Option<usize>,
}

/// Configuration for wire connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireConfig {
    pub in_value_lifespan: Option<Duration>,
    pub out_value_lifespan: Option<Duration>,
    /// Discard received values. Used by pure senders.
    pub ignore_in_value: bool,
    pub direction: Direction,
    /// Deadline for connect, peek and poke requests.
    pub request_timeout: Option<Duration>,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            in_value_lifespan: None,
            out_value_lifespan: None,
            ignore_in_value: false,
            direction: Direction::Both,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

/// Configuration for memory clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Largest element count moved by one flat request.
    pub max_transfer_size: u64,
    pub request_timeout: Option<Duration>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_transfer_size: 64 * 1024,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }
}

/// Configuration for pipe subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscriptionConfig {
    /// Aggregated queue bound; the oldest packet is dropped beyond it.
    pub max_recv_packets: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_gates_senders() {
        assert!(Direction::Both.allows(Role::Client));
        assert!(Direction::Both.allows(Role::Service));
        assert!(!Direction::ReadOnly.allows(Role::Client));
        assert!(Direction::ReadOnly.allows(Role::Service));
        assert!(Direction::WriteOnly.allows(Role::Client));
        assert!(!Direction::WriteOnly.allows(Role::Service));
    }

    #[test]
    fn defaults() {
        let pipe = PipeConfig::default();
        assert!(!pipe.unreliable);
        assert_eq!(pipe.request_timeout, Some(DEFAULT_REQUEST_TIMEOUT));
        assert_eq!(BroadcasterConfig::default().maximum_backlog, None);
        assert_eq!(MemoryConfig::default().max_transfer_size, 65536);
        assert!(!WireConfig::default().ignore_in_value);
    }
}
