//! Per-interface network counters, from `/proc/net/dev`.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use super::{
    DomainConfig, ScrapeContext, ScrapeError, ScrapeOutput, Scraper, ScraperSettings,
    check_names, name_allowed,
};
use crate::pdata::{MetricDef, MetricsBuilder};
use crate::platform::procfs::parser::parse_net_dev;
use crate::platform::procfs::{HostPaths, read_proc};
use crate::platform::traits::FileSystem;

const NETWORK_IO: MetricDef = MetricDef::sum(
    "system.network.io",
    "The number of bytes transmitted and received.",
    "By",
    true,
);
const NETWORK_PACKETS: MetricDef = MetricDef::sum(
    "system.network.packets",
    "The number of packets transferred.",
    "{packets}",
    true,
);
const NETWORK_ERRORS: MetricDef = MetricDef::sum(
    "system.network.errors",
    "The number of errors encountered.",
    "{errors}",
    true,
);
const NETWORK_DROPPED: MetricDef = MetricDef::sum(
    "system.network.dropped",
    "The number of packets dropped.",
    "{packets}",
    true,
);

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub include_interfaces: Vec<String>,
    pub exclude_interfaces: Vec<String>,
}

impl DomainConfig for NetworkConfig {
    const KEY: &'static str = "network";

    fn validate(&self) -> Result<(), String> {
        check_names("include_interfaces", &self.include_interfaces)?;
        check_names("exclude_interfaces", &self.exclude_interfaces)
    }
}

pub struct NetworkScraper {
    config: NetworkConfig,
    fs: Arc<dyn FileSystem>,
    paths: HostPaths,
}

impl NetworkScraper {
    pub fn new(config: NetworkConfig, settings: &ScraperSettings) -> Self {
        Self {
            config,
            fs: Arc::clone(&settings.fs),
            paths: settings.paths.clone(),
        }
    }
}

impl Scraper for NetworkScraper {
    fn start(&mut self, _ctx: &ScrapeContext) -> Result<(), ScrapeError> {
        read_proc(self.fs.as_ref(), &self.paths, "net/dev").map(drop)
    }

    fn scrape(&mut self, ctx: &ScrapeContext) -> Result<ScrapeOutput, ScrapeError> {
        let interfaces = parse_net_dev(&read_proc(self.fs.as_ref(), &self.paths, "net/dev")?)?;
        ctx.check()?;

        let mut mb = MetricsBuilder::new(Utc::now());
        for nic in interfaces.iter().filter(|n| {
            name_allowed(
                &n.interface,
                &self.config.include_interfaces,
                &self.config.exclude_interfaces,
            )
        }) {
            let rx = [("device", nic.interface.as_str()), ("direction", "receive")];
            let tx = [("device", nic.interface.as_str()), ("direction", "transmit")];

            mb.record(&NETWORK_IO, &rx, nic.rx_bytes);
            mb.record(&NETWORK_IO, &tx, nic.tx_bytes);
            mb.record(&NETWORK_PACKETS, &rx, nic.rx_packets);
            mb.record(&NETWORK_PACKETS, &tx, nic.tx_packets);
            mb.record(&NETWORK_ERRORS, &rx, nic.rx_errs);
            mb.record(&NETWORK_ERRORS, &tx, nic.tx_errs);
            mb.record(&NETWORK_DROPPED, &rx, nic.rx_drop);
            mb.record(&NETWORK_DROPPED, &tx, nic.tx_drop);
        }
        Ok(ScrapeOutput::new(mb.finish()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdata::NumberValue;
    use crate::platform::mock::MockFs;
    use crate::scraper::test_support::settings;

    #[test]
    fn test_network_counters() {
        let fs = MockFs::typical_system();
        let mut scraper = NetworkScraper::new(NetworkConfig::default(), &settings(&fs));
        let output = scraper.scrape(&ScrapeContext::background()).unwrap();

        let io = output.metrics.iter().find(|m| m.name == "system.network.io").unwrap();
        let rx = io.point(&[("device", "eth0"), ("direction", "receive")]).unwrap();
        assert_eq!(rx.value, NumberValue::Int(987_654_321));

        let dropped = output
            .metrics
            .iter()
            .find(|m| m.name == "system.network.dropped")
            .unwrap();
        let tx = dropped.point(&[("device", "eth0"), ("direction", "transmit")]).unwrap();
        assert_eq!(tx.value, NumberValue::Int(5));
    }

    #[test]
    fn test_exclude_loopback() {
        let fs = MockFs::typical_system();
        let config = NetworkConfig {
            exclude_interfaces: vec!["lo".into()],
            ..Default::default()
        };
        let mut scraper = NetworkScraper::new(config, &settings(&fs));
        let output = scraper.scrape(&ScrapeContext::background()).unwrap();
        assert!(
            output
                .metrics
                .iter()
                .flat_map(|m| &m.data_points)
                .all(|dp| dp.attribute("device") == Some("eth0"))
        );
    }

    #[test]
    fn test_missing_net_dev_fails_start() {
        let fs = MockFs::typical_system();
        fs.remove("/proc/net/dev");
        let mut scraper = NetworkScraper::new(NetworkConfig::default(), &settings(&fs));
        assert!(scraper.start(&ScrapeContext::background()).is_err());
    }
}
