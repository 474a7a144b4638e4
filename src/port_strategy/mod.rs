//! Decides the order in which ports are handed to the probe workers.
use crate::input::{PortSpec, ScanOrder};
use rand::rng;
use rand::seq::SliceRandom;

/// Represents the dispatch order of a port scan.
///
/// The order only affects when each probe starts; the scheduler always
/// reports open ports sorted ascending.
#[derive(Debug)]
pub enum PortStrategy {
    Serial(PortSpec),
    Random(PortSpec),
}

impl PortStrategy {
    pub fn pick(ports: PortSpec, order: ScanOrder) -> Self {
        match order {
            ScanOrder::Serial => PortStrategy::Serial(ports),
            ScanOrder::Random => PortStrategy::Random(ports),
        }
    }

    pub fn order(&self) -> Vec<u16> {
        match self {
            PortStrategy::Serial(ports) => ports.ports().to_vec(),
            PortStrategy::Random(ports) => {
                let mut shuffled = ports.ports().to_vec();
                shuffled.shuffle(&mut rng());
                shuffled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PortStrategy;
    use crate::input::{PortSpec, ScanOrder};

    #[test]
    fn serial_strategy_keeps_ascending_order() {
        let spec = PortSpec::new([443, 22, 80]).unwrap();
        let strategy = PortStrategy::pick(spec, ScanOrder::Serial);

        assert_eq!(vec![22, 80, 443], strategy.order());
    }

    #[test]
    fn random_strategy_covers_every_port_once() {
        let spec = PortSpec::new(1..=1000).unwrap();
        let strategy = PortStrategy::pick(spec, ScanOrder::Random);
        let mut result = strategy.order();
        let expected = (1..=1000).collect::<Vec<u16>>();
        assert_ne!(expected, result);

        result.sort_unstable();
        assert_eq!(expected, result);
    }
}
