//! Browsing for service instances on the network.
//!
//! A browser watches one or more PTR names: the service type domain, one
//! name per requested subtype, or in wildcard mode the DNS-SD meta-query
//! name plus every type it discovers through it. Inbound responses are
//! assembled into [`ServiceDescriptor`]s: a PTR pointing at an instance,
//! the SRV and TXT of that instance, and the addresses of the SRV target.

#[cfg(feature = "logging")]
use crate::log::{debug, error};
use crate::records::{dns_name_eq, RRType, RecordData, ResourceRecord, META_QUERY, TLD};
use crate::transport::{Packet, Transport};
use crate::txt::TxtProperties;
use std::net::{IpAddr, SocketAddr};

/// What to browse for. The default config (no type) browses every
/// service type on the network.
#[derive(Clone, Debug, Default)]
pub struct BrowseConfig {
    /// Service type without underscores or domain, e.g. "http".
    /// `None` browses all types via the DNS-SD meta-query.
    pub(crate) ty: Option<String>,

    /// "tcp" or "udp". Defaults to "tcp".
    pub(crate) protocol: Option<String>,

    /// Restricts browsing to these subtypes of the service type.
    pub(crate) subtypes: Vec<String>,

    /// Only report instances with this exact instance name.
    pub(crate) name: Option<String>,
}

impl BrowseConfig {
    /// Browses instances of the given service type, e.g. "http".
    pub fn new(ty: &str) -> Self {
        Self {
            ty: Some(ty.to_string()),
            ..Default::default()
        }
    }

    /// Browses every service type on the network.
    pub fn wildcard() -> Self {
        Self::default()
    }

    /// Sets the protocol, "tcp" or "udp".
    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.protocol = Some(protocol.to_string());
        self
    }

    /// Restricts browsing to a subtype, e.g. "printer".
    pub fn with_subtype(mut self, subtype: &str) -> Self {
        self.subtypes.push(subtype.to_string());
        self
    }

    /// Only report the instance with this name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    fn protocol(&self) -> &str {
        self.protocol.as_deref().unwrap_or("tcp")
    }

    /// The PTR names to watch for this config.
    fn watch_names(&self) -> Vec<String> {
        let ty = match &self.ty {
            None => return vec![META_QUERY.to_string()],
            Some(ty) => ty,
        };
        let ty_domain = format!("_{}._{}{}", ty, self.protocol(), TLD);
        if self.subtypes.is_empty() {
            vec![ty_domain]
        } else {
            self.subtypes
                .iter()
                .map(|sub| format!("_{}._sub.{}", sub, ty_domain))
                .collect()
        }
    }
}

/// A discovered service instance.
#[derive(Clone, Debug)]
pub struct ServiceDescriptor {
    /// Instance name, the first label of the fqdn.
    pub name: String,

    /// Full service instance name.
    pub fqdn: String,

    /// Hostname the instance's SRV record targets.
    pub host: String,

    /// Port of the instance.
    pub port: u16,

    /// Service type without underscores, e.g. "http".
    pub ty: String,

    /// "tcp" or "udp".
    pub protocol: String,

    /// Subtypes the instance was seen under.
    pub subtypes: Vec<String>,

    /// Addresses of the SRV target seen in the same response.
    pub addresses: Vec<IpAddr>,

    /// The TXT rdata as received.
    pub raw_txt: Vec<u8>,

    /// The TXT rdata decoded into properties.
    pub txt: TxtProperties,

    /// Source address of the response that revealed the instance.
    pub referer: Option<SocketAddr>,
}

/// Events from a browser, delivered on its handle channel.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum BrowseEvent {
    /// A new instance appeared, or a known one was seen under a new
    /// subtype.
    Up(ServiceDescriptor),

    /// An instance said goodbye.
    Down(ServiceDescriptor),
}

pub(crate) enum BrowseListener {
    /// Stream every up and down event.
    Events(flume::Sender<BrowseEvent>),

    /// Deliver the first matching instance, then stop.
    OneShot(flume::Sender<ServiceDescriptor>),
}

pub(crate) struct Browser {
    config: BrowseConfig,

    /// PTR names currently watched. Grows in wildcard mode.
    watch: Vec<String>,

    wildcard: bool,
    running: bool,

    /// Known instances, in discovery order.
    services: Vec<ServiceDescriptor>,

    listener: BrowseListener,
}

impl Browser {
    pub(crate) fn new(config: BrowseConfig, listener: BrowseListener) -> Self {
        let wildcard = config.ty.is_none();
        Self {
            config,
            watch: Vec::new(),
            wildcard,
            running: false,
            services: Vec::new(),
            listener,
        }
    }

    /// Starts watching and sends the initial queries. Calling this while
    /// already running is a no-op, so a redundant start cannot discard
    /// names added to the watch set by a wildcard browse.
    pub(crate) fn start(&mut self, transport: &dyn Transport) {
        if self.running {
            return;
        }
        self.running = true;
        self.watch = self.config.watch_names();
        self.query_watched(transport);
    }

    pub(crate) fn stop(&mut self) {
        self.running = false;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running
    }

    /// One-shot browsers are dropped by the daemon once they stop.
    pub(crate) fn is_one_shot(&self) -> bool {
        matches!(self.listener, BrowseListener::OneShot(_))
    }

    /// Re-queries every watched name.
    pub(crate) fn update(&self, transport: &dyn Transport) {
        self.query_watched(transport);
    }

    fn query_watched(&self, transport: &dyn Transport) {
        for name in self.watch.iter() {
            if let Err(e) = transport.query(name, RRType::PTR) {
                error!("failed to query {}: {}", name, e);
            }
        }
    }

    /// The currently known instances.
    pub(crate) fn services(&self) -> Vec<ServiceDescriptor> {
        self.services.clone()
    }

    /// Processes one inbound response packet.
    pub(crate) fn handle_response(
        &mut self,
        packet: &Packet,
        referer: Option<SocketAddr>,
        transport: &dyn Transport,
    ) {
        if !self.running {
            return;
        }

        if self.wildcard {
            self.expand_wildcard(packet, transport);
        }

        for name in self.watch.clone() {
            for fqdn in goodbyes(&name, packet) {
                self.remove_service(&fqdn);
            }
            for descriptor in build_services_for(&name, packet, referer) {
                self.add_service(descriptor);
                if !self.running {
                    return;
                }
            }
        }
    }

    /// In wildcard mode, every PTR answer to the meta-query names a
    /// service type. New types join the watch set and get queried.
    fn expand_wildcard(&mut self, packet: &Packet, transport: &dyn Transport) {
        for rr in packet.answers.iter() {
            let target = match rr.ptr_target() {
                Some(t) if dns_name_eq(&rr.name, META_QUERY) => t,
                _ => continue,
            };
            if self.watch.iter().any(|w| dns_name_eq(w, target)) {
                continue;
            }
            debug!("wildcard browse found type {}", target);
            self.watch.push(target.to_string());
            if let Err(e) = transport.query(target, RRType::PTR) {
                error!("failed to query {}: {}", target, e);
            }
        }
    }

    fn add_service(&mut self, descriptor: ServiceDescriptor) {
        if let Some(name) = &self.config.name {
            if &descriptor.name != name {
                return;
            }
        }

        if let Some(known) = self
            .services
            .iter_mut()
            .find(|s| dns_name_eq(&s.fqdn, &descriptor.fqdn))
        {
            // Re-announce the instance only when a new subtype shows up.
            let mut new_subtype = false;
            for sub in descriptor.subtypes {
                if !known.subtypes.contains(&sub) {
                    known.subtypes.push(sub);
                    new_subtype = true;
                }
            }
            if new_subtype {
                let updated = known.clone();
                self.emit_up(updated);
            }
            return;
        }

        self.services.push(descriptor.clone());
        self.emit_up(descriptor);
    }

    fn remove_service(&mut self, fqdn: &str) {
        let idx = match self.services.iter().position(|s| dns_name_eq(&s.fqdn, fqdn)) {
            Some(idx) => idx,
            None => return,
        };
        let descriptor = self.services.remove(idx);
        if let BrowseListener::Events(sender) = &self.listener {
            if let Err(e) = sender.send(BrowseEvent::Down(descriptor)) {
                error!("failed to send service down event: {}", e);
            }
        }
    }

    fn emit_up(&mut self, descriptor: ServiceDescriptor) {
        match &self.listener {
            BrowseListener::Events(sender) => {
                if let Err(e) = sender.send(BrowseEvent::Up(descriptor)) {
                    error!("failed to send service up event: {}", e);
                }
            }
            BrowseListener::OneShot(sender) => {
                if let Err(e) = sender.send(descriptor) {
                    error!("failed to send found service: {}", e);
                }
                self.running = false;
            }
        }
    }
}

/// All records of a response, answers then additionals.
fn all_records(packet: &Packet) -> impl Iterator<Item = &ResourceRecord> {
    packet.answers.iter().chain(packet.additionals.iter())
}

/// The fqdns withdrawn by `packet` under the watched `name`.
fn goodbyes(name: &str, packet: &Packet) -> Vec<String> {
    all_records(packet)
        .filter(|rr| rr.is_goodbye() && dns_name_eq(&rr.name, name))
        .filter_map(|rr| rr.ptr_target().map(|t| t.to_string()))
        .collect()
}

/// Assembles service descriptors out of one response packet, for PTR
/// records under the watched `name`.
fn build_services_for(
    name: &str,
    packet: &Packet,
    referer: Option<SocketAddr>,
) -> Vec<ServiceDescriptor> {
    let records: Vec<&ResourceRecord> = all_records(packet).filter(|rr| rr.ttl > 0).collect();

    let mut found = Vec::new();
    for ptr in records
        .iter()
        .filter(|rr| rr.rr_type == RRType::PTR && dns_name_eq(&rr.name, name))
    {
        let fqdn = match ptr.ptr_target() {
            Some(t) => t,
            None => continue,
        };

        let srv = records.iter().find(|rr| {
            rr.rr_type == RRType::SRV && dns_name_eq(&rr.name, fqdn)
        });
        let (port, host) = match srv.map(|rr| &rr.data) {
            Some(RecordData::Srv { port, target }) => (*port, target.clone()),
            _ => continue, // a PTR without its SRV is not assembleable
        };

        let labels: Vec<&str> = fqdn.split('.').collect();
        if labels.len() < 4 {
            continue;
        }
        let instance = labels[0].to_string();
        let middle = &labels[1..labels.len() - 1];
        let protocol = middle[middle.len() - 1].trim_start_matches('_').to_string();
        let ty = middle[..middle.len() - 1]
            .iter()
            .map(|l| l.trim_start_matches('_'))
            .collect::<Vec<_>>()
            .join(".");

        // A watched subtype name has more labels than the instance's own
        // type domain. Its first label is the subtype.
        let mut subtypes = Vec::new();
        let ptr_labels = ptr.name.split('.').count();
        if ptr_labels > labels.len() - 1 {
            if let Some(first) = ptr.name.split('.').next() {
                subtypes.push(first.trim_start_matches('_').to_string());
            }
        }

        let (raw_txt, txt) = match records
            .iter()
            .find(|rr| rr.rr_type == RRType::TXT && dns_name_eq(&rr.name, fqdn))
            .map(|rr| &rr.data)
        {
            Some(RecordData::Txt(bytes)) => (bytes.clone(), TxtProperties::decode(bytes)),
            _ => (Vec::new(), TxtProperties::default()),
        };

        let addresses: Vec<IpAddr> = records
            .iter()
            .filter(|rr| {
                (rr.rr_type == RRType::A || rr.rr_type == RRType::AAAA)
                    && dns_name_eq(&rr.name, &host)
            })
            .filter_map(|rr| match &rr.data {
                RecordData::Addr(addr) => Some(*addr),
                _ => None,
            })
            .collect();

        found.push(ServiceDescriptor {
            name: instance,
            fqdn: fqdn.to_string(),
            host,
            port,
            ty,
            protocol,
            subtypes,
            addresses,
            raw_txt,
            txt,
            referer,
        });
    }

    found
}
