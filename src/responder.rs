//! The authoritative record store, answering incoming queries.
//!
//! Records are bucketed by type. Address (A and AAAA) records are not
//! answered straight out of the buckets: they resolve at query time from
//! the owning service's addresses, filtered to what the requester can
//! reach directly, so a host with several interfaces does not advertise
//! unreachable addresses across subnets.

#[cfg(feature = "logging")]
use crate::log::trace;
use crate::intf::NetIf;
use crate::records::{
    dns_name_eq, record_name_matches, Question, RRType, ResourceRecord, DNS_HOST_TTL, DNS_PTR_TTL,
    META_QUERY,
};
use crate::transport::Packet;
use std::collections::HashMap;
use std::net::IpAddr;

/// What the record store knows about one publishing service, beyond its
/// records: enough to resolve addresses and answer the DNS-SD meta-query.
#[derive(Clone, Debug)]
pub(crate) struct ServiceSource {
    pub(crate) fqdn: String,
    pub(crate) host: String,
    pub(crate) ty_domain: String,

    /// Explicit addresses. Empty means "use the host interfaces".
    pub(crate) addresses: Vec<IpAddr>,
}

#[derive(Default)]
pub(crate) struct RecordStore {
    /// Registered records bucketed by type.
    buckets: HashMap<RRType, Vec<ResourceRecord>>,

    /// Sources keyed by fqdn.
    sources: HashMap<String, ServiceSource>,
}

impl RecordStore {
    /// Registers `records`, skipping exact duplicates by (type, name,
    /// data). `source` ties the records to a publishing service.
    pub(crate) fn register(&mut self, records: Vec<ResourceRecord>, source: Option<ServiceSource>) {
        for record in records {
            let bucket = self.buckets.entry(record.rr_type).or_default();
            if !bucket.iter().any(|r| r.is_duplicate_of(&record)) {
                bucket.push(record);
            }
        }
        if let Some(source) = source {
            self.sources.insert(source.fqdn.clone(), source);
        }
    }

    /// Removes every registered record matching the (type, name) of one
    /// of `records`. `fqdn` also drops the service source of that name.
    pub(crate) fn unregister(&mut self, records: &[ResourceRecord], fqdn: Option<&str>) {
        for record in records {
            if let Some(bucket) = self.buckets.get_mut(&record.rr_type) {
                bucket.retain(|r| !dns_name_eq(&r.name, &record.name));
            }
        }
        if let Some(fqdn) = fqdn {
            self.sources.remove(fqdn);
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buckets.values().all(|b| b.is_empty())
    }

    /// Builds the response to one question, or `None` if this store has
    /// nothing to say about it.
    ///
    /// `requester` is the source address of the query when known; it
    /// limits resolved addresses to subnets the requester is on.
    pub(crate) fn answer(
        &self,
        question: &Question,
        requester: Option<IpAddr>,
        ifaces: &[NetIf],
    ) -> Option<Packet> {
        let answers = match question.rr_type {
            _ if dns_name_eq(&question.name, META_QUERY) => self.answer_meta_query(),
            RRType::ANY => {
                let mut answers: Vec<ResourceRecord> = Vec::new();
                for bucket in self.buckets.values() {
                    for record in bucket.iter() {
                        if record_name_matches(&record.name, &question.name)
                            && !answers.iter().any(|r| r.is_duplicate_of(record))
                        {
                            answers.push(record.clone());
                        }
                    }
                }
                for record in self.resolve_addresses(&question.name, RRType::ANY, requester, ifaces)
                {
                    if !answers.iter().any(|r| r.is_duplicate_of(&record)) {
                        answers.push(record);
                    }
                }
                answers
            }
            RRType::A | RRType::AAAA => {
                self.resolve_addresses(&question.name, question.rr_type, requester, ifaces)
            }
            rr_type => match self.buckets.get(&rr_type) {
                Some(bucket) => bucket
                    .iter()
                    .filter(|r| record_name_matches(&r.name, &question.name))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            },
        };

        if answers.is_empty() {
            return None;
        }

        let additionals = if question.rr_type == RRType::ANY {
            Vec::new()
        } else {
            self.additionals_for(&answers, requester, ifaces)
        };

        trace!(
            "answering {} {}: {} answers {} additionals",
            question.rr_type,
            &question.name,
            answers.len(),
            additionals.len()
        );
        Some(Packet::response(answers, additionals))
    }

    /// Answers "_services._dns-sd._udp.local" with one PTR per distinct
    /// registered service type.
    /// See [RFC 6763 section 9](https://datatracker.ietf.org/doc/html/rfc6763#section-9)
    fn answer_meta_query(&self) -> Vec<ResourceRecord> {
        let mut answers: Vec<ResourceRecord> = Vec::new();
        for source in self.sources.values() {
            if !answers
                .iter()
                .any(|r| r.ptr_target().is_some_and(|t| dns_name_eq(t, &source.ty_domain)))
            {
                answers.push(ResourceRecord::ptr(
                    META_QUERY,
                    DNS_PTR_TTL,
                    source.ty_domain.clone(),
                ));
            }
        }
        answers
    }

    /// Resolves address records for `name` at query time.
    ///
    /// Candidates are the owning service's explicit addresses, or the
    /// host interface addresses when none were given. With a known
    /// requester, a candidate is kept only when some interface subnet
    /// contains both the candidate and the requester.
    fn resolve_addresses(
        &self,
        name: &str,
        family: RRType,
        requester: Option<IpAddr>,
        ifaces: &[NetIf],
    ) -> Vec<ResourceRecord> {
        let mut records: Vec<ResourceRecord> = Vec::new();
        for source in self.sources.values() {
            if !record_name_matches(&source.host, name) {
                continue;
            }
            let candidates: Vec<IpAddr> = if source.addresses.is_empty() {
                ifaces.iter().map(|i| i.addr).collect()
            } else {
                source.addresses.clone()
            };
            for addr in candidates {
                let record = ResourceRecord::addr(&source.host, DNS_HOST_TTL, addr);
                if family != RRType::ANY && record.rr_type != family {
                    continue;
                }
                if let Some(from) = requester {
                    let reachable = ifaces
                        .iter()
                        .any(|intf| intf.contains(&addr) && intf.contains(&from));
                    if !reachable {
                        continue;
                    }
                }
                if !records.iter().any(|r| r.is_duplicate_of(&record)) {
                    records.push(record);
                }
            }
        }
        records
    }

    /// Collects the additional section for a set of answers: the SRV and
    /// TXT of every pointed-at instance, then the addresses of every SRV
    /// target.
    fn additionals_for(
        &self,
        answers: &[ResourceRecord],
        requester: Option<IpAddr>,
        ifaces: &[NetIf],
    ) -> Vec<ResourceRecord> {
        let mut additionals: Vec<ResourceRecord> = Vec::new();
        let mut push = |record: ResourceRecord, answers: &[ResourceRecord]| {
            if !answers.iter().any(|r| r.is_duplicate_of(&record))
                && !additionals.iter().any(|r| r.is_duplicate_of(&record))
            {
                additionals.push(record);
            }
        };

        for ptr in answers.iter() {
            let target = match ptr.ptr_target() {
                Some(t) => t,
                None => continue,
            };
            for rr_type in [RRType::SRV, RRType::TXT] {
                if let Some(bucket) = self.buckets.get(&rr_type) {
                    for record in bucket.iter().filter(|r| dns_name_eq(&r.name, target)) {
                        push(record.clone(), answers);
                    }
                }
            }
        }

        // One address lookup per distinct SRV target.
        let mut hosts: Vec<&str> = Vec::new();
        let srv_iter = answers.iter().chain(additionals.iter());
        for record in srv_iter {
            if let crate::records::RecordData::Srv { target, .. } = &record.data {
                if !hosts.iter().any(|h| dns_name_eq(h, target)) {
                    hosts.push(target);
                }
            }
        }
        let mut addr_records = Vec::new();
        for host in hosts {
            addr_records.extend(self.resolve_addresses(host, RRType::ANY, requester, ifaces));
        }
        for record in addr_records {
            if !answers.iter().any(|r| r.is_duplicate_of(&record))
                && !additionals.iter().any(|r| r.is_duplicate_of(&record))
            {
                additionals.push(record);
            }
        }

        additionals
    }
}

#[cfg(test)]
mod tests {
    use super::{RecordStore, ServiceSource};
    use crate::intf::NetIf;
    use crate::records::{Question, RRType, RecordData, ResourceRecord, META_QUERY};
    use std::net::{IpAddr, Ipv4Addr};

    fn test_ifaces() -> Vec<NetIf> {
        vec![
            NetIf {
                addr: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
                netmask: IpAddr::V4(Ipv4Addr::new(255, 255, 255, 0)),
            },
            NetIf {
                addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 10)),
                netmask: IpAddr::V4(Ipv4Addr::new(255, 255, 255, 0)),
            },
        ]
    }

    fn service_records() -> Vec<ResourceRecord> {
        vec![
            ResourceRecord::ptr("_web._tcp.local", 28800, "Foo._web._tcp.local".to_string()),
            ResourceRecord::srv("Foo._web._tcp.local", 120, 3000, "myhost.local".to_string()),
            ResourceRecord::txt("Foo._web._tcp.local", 4500, vec![0]),
        ]
    }

    fn source() -> ServiceSource {
        ServiceSource {
            fqdn: "Foo._web._tcp.local".to_string(),
            host: "myhost.local".to_string(),
            ty_domain: "_web._tcp.local".to_string(),
            addresses: Vec::new(),
        }
    }

    #[test]
    fn test_register_dedups() {
        let mut store = RecordStore::default();
        store.register(service_records(), Some(source()));
        store.register(service_records(), Some(source()));

        let packet = store
            .answer(
                &Question::new("_web._tcp.local", RRType::PTR),
                None,
                &test_ifaces(),
            )
            .unwrap();
        assert_eq!(packet.answers.len(), 1);
    }

    #[test]
    fn test_ptr_answer_carries_additionals() {
        let mut store = RecordStore::default();
        store.register(service_records(), Some(source()));

        let packet = store
            .answer(
                &Question::new("_web._tcp.local", RRType::PTR),
                None,
                &test_ifaces(),
            )
            .unwrap();

        assert_eq!(packet.answers.len(), 1);
        // SRV + TXT + two interface addresses
        assert_eq!(packet.additionals.len(), 4);
        assert!(packet
            .additionals
            .iter()
            .any(|r| r.rr_type == RRType::SRV && r.name == "Foo._web._tcp.local"));
        assert!(packet
            .additionals
            .iter()
            .filter(|r| r.rr_type == RRType::A)
            .all(|r| r.name == "myhost.local"));
    }

    #[test]
    fn test_requester_filters_addresses() {
        let mut store = RecordStore::default();
        store.register(service_records(), Some(source()));

        let requester = Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 99)));
        let packet = store
            .answer(
                &Question::new("myhost.local", RRType::A),
                requester,
                &test_ifaces(),
            )
            .unwrap();

        // Only the 10.0.0.0/24 interface shares a subnet with the requester.
        assert_eq!(packet.answers.len(), 1);
        assert_eq!(
            packet.answers[0].data,
            RecordData::Addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 10)))
        );
    }

    #[test]
    fn test_explicit_addresses_win() {
        let mut store = RecordStore::default();
        let mut src = source();
        src.addresses = vec![IpAddr::V4(Ipv4Addr::new(192, 168, 1, 77))];
        store.register(service_records(), Some(src));

        let packet = store
            .answer(&Question::new("myhost.local", RRType::A), None, &test_ifaces())
            .unwrap();
        assert_eq!(packet.answers.len(), 1);
        assert_eq!(
            packet.answers[0].data,
            RecordData::Addr(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 77)))
        );
    }

    #[test]
    fn test_loose_name_match_for_dot_free_query() {
        let mut store = RecordStore::default();
        store.register(service_records(), Some(source()));

        let packet = store
            .answer(&Question::new("myhost", RRType::A), None, &test_ifaces())
            .unwrap();
        assert_eq!(packet.answers.len(), 2);
    }

    #[test]
    fn test_any_query_unions_buckets() {
        let mut store = RecordStore::default();
        store.register(service_records(), Some(source()));

        let packet = store
            .answer(
                &Question::new("Foo._web._tcp.local", RRType::ANY),
                None,
                &test_ifaces(),
            )
            .unwrap();
        // SRV + TXT named by the fqdn; no additionals for ANY
        assert_eq!(packet.answers.len(), 2);
        assert!(packet.additionals.is_empty());
    }

    #[test]
    fn test_meta_query_lists_types_once() {
        let mut store = RecordStore::default();
        store.register(service_records(), Some(source()));
        let mut other = source();
        other.fqdn = "Bar._web._tcp.local".to_string();
        store.register(
            vec![ResourceRecord::ptr(
                "_web._tcp.local",
                28800,
                "Bar._web._tcp.local".to_string(),
            )],
            Some(other),
        );

        let packet = store
            .answer(&Question::new(META_QUERY, RRType::PTR), None, &test_ifaces())
            .unwrap();
        assert_eq!(packet.answers.len(), 1);
        assert_eq!(
            packet.answers[0].data,
            RecordData::Ptr("_web._tcp.local".to_string())
        );
    }

    #[test]
    fn test_unregister_silences_store() {
        let mut store = RecordStore::default();
        let records = service_records();
        store.register(records.clone(), Some(source()));
        store.unregister(&records, Some("Foo._web._tcp.local"));

        assert!(store.is_empty());
        assert!(store
            .answer(
                &Question::new("_web._tcp.local", RRType::PTR),
                None,
                &test_ifaces()
            )
            .is_none());
        assert!(store
            .answer(&Question::new("myhost.local", RRType::A), None, &test_ifaces())
            .is_none());
    }
}
