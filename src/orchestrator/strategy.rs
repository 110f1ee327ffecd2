//! Strategy composition

use crate::allocate::{Allocator, Available, Random, RoundRobin, Static};
use crate::config::{AllocatorKind, Config, ConfirmationKind, TransmitterKind};
use crate::confirm::{ConfirmationTracker, EventSubscribe, Polling};
use crate::transmit::{MultiBurst, OneByOne, Transmitter};
use std::fmt;
use std::sync::Arc;

/// One allocator, one transmitter and one confirmation tracker
#[derive(Clone)]
pub struct Strategy {
    pub allocator: Arc<dyn Allocator>,
    pub transmitter: Arc<dyn Transmitter>,
    pub tracker: Arc<dyn ConfirmationTracker>,
}

impl Strategy {
    /// Compose the strategies named in the configuration
    pub fn from_config(config: &Config) -> Self {
        let allocator: Arc<dyn Allocator> = match config.strategy.allocator {
            AllocatorKind::Static => Arc::new(Static),
            AllocatorKind::RoundRobin => Arc::new(RoundRobin),
            AllocatorKind::Random => Arc::new(Random::new(config.allocation.random_seed)),
            AllocatorKind::Available => Arc::new(Available::from_config(&config.allocation)),
        };

        let tracker: Arc<dyn ConfirmationTracker> = match config.strategy.confirmation {
            ConfirmationKind::Polling => Arc::new(Polling::from_config(&config.confirmation)),
            ConfirmationKind::Events => Arc::new(EventSubscribe),
        };

        let transmitter: Arc<dyn Transmitter> = match config.strategy.transmitter {
            TransmitterKind::OneByOne => Arc::new(OneByOne),
            TransmitterKind::MultiBurst => Arc::new(MultiBurst::new(
                Arc::clone(&tracker),
                config.confirmation_timeout(),
            )),
        };

        Strategy {
            allocator,
            transmitter,
            tracker,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.allocator.name(),
            self.transmitter.name(),
            self.tracker.name()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_from_names() {
        let mut config = Config::example();
        assert_eq!(Strategy::from_config(&config).to_string(), "static/onebyone/polling");

        config.strategy.allocator = "available".parse().unwrap();
        config.strategy.transmitter = "multi-burst".parse().unwrap();
        config.strategy.confirmation = "subscribe".parse().unwrap();
        assert_eq!(Strategy::from_config(&config).to_string(), "available/multiburst/events");

        config.strategy.allocator = AllocatorKind::Random;
        config.strategy.confirmation = ConfirmationKind::Polling;
        assert_eq!(Strategy::from_config(&config).to_string(), "random/multiburst/polling");
    }
}
