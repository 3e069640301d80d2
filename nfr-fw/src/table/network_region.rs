use nfr_core::Name;

use crate::config::NetworkRegionConfig;

/// Producer region prefixes this forwarder belongs to. Used to decide
/// whether a forwarding hint delegation has reached its target region.
#[derive(Debug, Default)]
pub struct NetworkRegionTable {
    regions: Vec<Name>,
}

impl NetworkRegionTable {
    /// Build from the (already validated) configuration.
    pub fn from_config(config: &NetworkRegionConfig) -> Self {
        let regions = config
            .regions
            .iter()
            .filter_map(|uri| Name::from_str(uri).ok())
            .collect();
        Self { regions }
    }

    pub fn add(&mut self, region: Name) {
        self.regions.push(region);
    }

    /// Whether `name` is a prefix of any of this forwarder's regions,
    /// i.e. the producer region named by a forwarding hint is here.
    pub fn is_producer(&self, name: &Name) -> bool {
        self.regions.iter().any(|region| name.is_prefix_of(region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_producer() {
        let mut table = NetworkRegionTable::default();
        table.add(Name::from_str("/example/region/site1").unwrap());

        assert!(table.is_producer(&Name::from_str("/example/region").unwrap()));
        assert!(table.is_producer(&Name::from_str("/example/region/site1").unwrap()));
        assert!(!table.is_producer(&Name::from_str("/example/region/site2").unwrap()));
        assert!(!table.is_producer(&Name::from_str("/other").unwrap()));
    }

    #[test]
    fn test_from_config() {
        let table = NetworkRegionTable::from_config(&NetworkRegionConfig {
            regions: vec!["/a/b".to_string()],
        });
        assert!(table.is_producer(&Name::from_str("/a").unwrap()));
    }
}
