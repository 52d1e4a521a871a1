//! The set of services this daemon publishes, with their in-flight probes.
//!
//! Insertion order is kept so that batch operations like unpublish-all
//! tear services down in the order they were published.

use crate::prober::Prober;
use crate::records::dns_name_eq;
use crate::service::Service;
use std::collections::HashMap;

#[derive(Default)]
pub(crate) struct Registry {
    services: Vec<Service>,

    /// In-flight probes keyed by fqdn.
    probes: HashMap<String, Prober>,
}

impl Registry {
    /// Adds a service. The caller has already validated it.
    pub(crate) fn add(&mut self, service: Service) {
        self.services.push(service);
    }

    pub(crate) fn get_mut(&mut self, fqdn: &str) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| dns_name_eq(&s.fqdn, fqdn))
    }

    /// Removes and returns the service named `fqdn`. The removal is
    /// immediate; the goodbye packet is the caller's business.
    pub(crate) fn remove(&mut self, fqdn: &str) -> Option<Service> {
        let idx = self.services.iter().position(|s| dns_name_eq(&s.fqdn, fqdn))?;
        self.probes.remove(fqdn);
        Some(self.services.remove(idx))
    }

    /// Removes and returns all services, in insertion order.
    pub(crate) fn take_all(&mut self) -> Vec<Service> {
        self.probes.clear();
        std::mem::take(&mut self.services)
    }

    /// Destroys every service in place, without removing them. Used on
    /// daemon exit where no goodbye packets are sent.
    pub(crate) fn destroy_all(&mut self) {
        self.probes.clear();
        for service in self.services.iter_mut() {
            service.destroy();
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub(crate) fn add_probe(&mut self, prober: Prober) {
        self.probes.insert(prober.fqdn.clone(), prober);
    }

    pub(crate) fn probe_mut(&mut self, fqdn: &str) -> Option<&mut Prober> {
        self.probes.get_mut(fqdn)
    }

    pub(crate) fn remove_probe(&mut self, fqdn: &str) -> Option<Prober> {
        self.probes.remove(fqdn)
    }

    /// Returns the fqdn of the first in-flight probe that `packet`
    /// conflicts with, if any.
    pub(crate) fn find_conflict(&self, packet: &crate::transport::Packet) -> Option<String> {
        self.probes
            .values()
            .find(|p| p.conflicts_with(packet))
            .map(|p| p.fqdn.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::Registry;
    use crate::prober::Prober;
    use crate::service::{Service, ServiceConfig};

    fn make(name: &str) -> Service {
        let (tx, _rx) = flume::unbounded();
        let config = ServiceConfig::new(name, "test", 8000).with_host("h.local");
        Service::new(config, tx).unwrap()
    }

    #[test]
    fn test_add_remove_keeps_order() {
        let mut registry = Registry::default();
        registry.add(make("a"));
        registry.add(make("b"));
        registry.add(make("c"));

        assert!(registry.remove("b._test._tcp.local").is_some());
        assert!(registry.remove("b._test._tcp.local").is_none());

        let rest: Vec<_> = registry.take_all().into_iter().map(|s| s.name).collect();
        assert_eq!(rest, vec!["a".to_string(), "c".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removal_drops_probe() {
        let mut registry = Registry::default();
        registry.add(make("a"));
        registry.add_probe(Prober::new("a._test._tcp.local".to_string()));
        registry.remove("a._test._tcp.local");
        assert!(registry.probe_mut("a._test._tcp.local").is_none());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut registry = Registry::default();
        registry.add(make("Foo"));
        assert!(registry.get_mut("foo._test._TCP.local").is_some());
    }
}
