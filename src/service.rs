//! A published service instance and its resource records.
//!
//! `fqdn` refers to a full Service Instance Name, i.e. <instance>.<service>.<domain>
//!     for example: `my_home._my-service._udp.local`
//!
//! One service corresponds to a set of DNS Resource Records: a PTR from
//! the service type (and each subtype) to the fqdn, one SRV and one TXT
//! named by the fqdn, and one address record per reachable host address.

use crate::error::e_fmt;
use crate::intf::NetIf;
use crate::records::{ResourceRecord, DNS_HOST_TTL, DNS_PTR_TTL, DNS_TXT_TTL, TLD};
use crate::responder::ServiceSource;
use crate::txt::{IntoTxtProperties, Txt};
use crate::{Error, Result};
use flume::Sender;
use std::net::IpAddr;

/// The initial delay before a scheduled re-announcement, in millis.
const REANNOUNCE_DELAY_MS: u64 = 1000;

/// Re-announcements stop once the delay grows to one hour.
const REANNOUNCE_MAX_MS: u64 = 60 * 60 * 1000;

/// Events about one published service, delivered on its handle channel.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum ServiceEvent {
    /// The first announcement of the service went out. The name is now
    /// claimed on the network.
    Up,

    /// Publishing failed. After a [`Error::NameConflict`] the service has
    /// already been withdrawn.
    Error(Error),
}

/// Describes a service to publish. Build one with [`ServiceConfig::new`]
/// and the with_* setters, then pass it to `Bonjour::publish`.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Instance name, e.g. "My Printer".
    pub(crate) name: String,

    /// Service type without underscores or domain, e.g. "http".
    pub(crate) ty: String,

    /// "tcp" or "udp". Defaults to "tcp".
    pub(crate) protocol: String,

    /// The port the service listens on.
    pub(crate) port: u16,

    /// Hostname the SRV record targets. Defaults to the OS hostname
    /// with the ".local" suffix.
    pub(crate) host: Option<String>,

    /// TXT data of the service.
    pub(crate) txt: Txt,

    /// Subtypes to advertise, without the leading underscore.
    pub(crate) subtypes: Vec<String>,

    /// Whether to probe for name conflicts before announcing.
    pub(crate) probe: bool,

    /// Explicit addresses to advertise. When empty, the addresses of all
    /// non-loopback host interfaces are used.
    pub(crate) addresses: Vec<IpAddr>,
}

impl ServiceConfig {
    /// Creates a config for instance `name` of service type `ty` on `port`.
    pub fn new(name: &str, ty: &str, port: u16) -> Self {
        Self {
            name: name.to_string(),
            ty: ty.to_string(),
            protocol: "tcp".to_string(),
            port,
            host: None,
            txt: Txt::default(),
            subtypes: Vec::new(),
            probe: true,
            addresses: Vec::new(),
        }
    }

    /// Sets the protocol, "tcp" or "udp".
    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.protocol = protocol.to_string();
        self
    }

    /// Sets the hostname the SRV record targets.
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Sets the TXT data from key/value properties.
    pub fn with_properties(mut self, properties: impl IntoTxtProperties) -> Self {
        self.txt = Txt::Decoded(properties.into_txt_properties());
        self
    }

    /// Sets the TXT data directly, decoded or raw.
    pub fn with_txt(mut self, txt: Txt) -> Self {
        self.txt = txt;
        self
    }

    /// Adds a subtype to advertise, e.g. "printer".
    pub fn with_subtype(mut self, subtype: &str) -> Self {
        self.subtypes.push(subtype.to_string());
        self
    }

    /// Skips probing and announces immediately.
    pub fn skip_probe(mut self) -> Self {
        self.probe = false;
        self
    }

    /// Adds an explicit address to advertise instead of the host
    /// interface addresses.
    pub fn with_address(mut self, addr: IpAddr) -> Self {
        self.addresses.push(addr);
        self
    }
}

/// The daemon-side state of one published service.
#[derive(Debug)]
pub(crate) struct Service {
    /// Full service instance name: `<name>.<ty_domain>`.
    pub(crate) fqdn: String,

    /// Instance name, the first label of the fqdn.
    pub(crate) name: String,

    /// Service type domain: `_<ty>._<protocol>.local`.
    pub(crate) ty_domain: String,

    pub(crate) port: u16,
    pub(crate) host: String,
    pub(crate) txt: Txt,
    pub(crate) subtypes: Vec<String>,
    pub(crate) probe: bool,
    pub(crate) addresses: Vec<IpAddr>,

    /// True from publish until unpublish or conflict removal.
    activated: bool,

    /// True once the first announcement went out.
    published: bool,

    /// True once torn down. A destroyed service never re-announces.
    destroyed: bool,

    /// The record set most recently announced, kept so that teardown
    /// withdraws exactly what was advertised.
    records_cache: Option<Vec<ResourceRecord>>,

    /// Current re-announcement delay in millis, tripled on each round.
    delay: u64,

    /// Where `ServiceEvent`s for this service are delivered.
    pub(crate) listener: Sender<ServiceEvent>,
}

impl Service {
    /// Validates `config` and creates the daemon-side service.
    pub(crate) fn new(config: ServiceConfig, listener: Sender<ServiceEvent>) -> Result<Self> {
        if config.name.is_empty() {
            return Err(Error::MissingField("name"));
        }
        if config.ty.is_empty() {
            return Err(Error::MissingField("type"));
        }
        if config.port == 0 {
            return Err(Error::MissingField("port"));
        }

        let host = match config.host {
            Some(h) => h,
            None => default_host()?,
        };
        let ty_domain = format!("_{}._{}{}", config.ty, config.protocol, TLD);
        let fqdn = format!("{}.{}", config.name, ty_domain);

        Ok(Self {
            fqdn,
            name: config.name,
            ty_domain,
            port: config.port,
            host,
            txt: config.txt,
            subtypes: config.subtypes,
            probe: config.probe,
            addresses: config.addresses,
            activated: true,
            published: false,
            destroyed: false,
            records_cache: None,
            delay: REANNOUNCE_DELAY_MS,
            listener,
        })
    }

    pub(crate) fn is_activated(&self) -> bool {
        self.activated
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// Returns the record set of this service, building and caching it on
    /// first use so that repeated announcements stay identical.
    pub(crate) fn records(&mut self, ifaces: &[NetIf]) -> Vec<ResourceRecord> {
        if self.records_cache.is_none() {
            self.records_cache = Some(self.build_records(ifaces));
        }
        match &self.records_cache {
            Some(records) => records.clone(),
            None => Vec::new(),
        }
    }

    /// Returns a freshly built record set with every TTL set to 0, used
    /// as the goodbye packet on teardown.
    pub(crate) fn goodbye_records(&self, ifaces: &[NetIf]) -> Vec<ResourceRecord> {
        let mut records = self.build_records(ifaces);
        for r in records.iter_mut() {
            r.ttl = 0;
        }
        records
    }

    fn build_records(&self, ifaces: &[NetIf]) -> Vec<ResourceRecord> {
        let mut records = vec![
            ResourceRecord::ptr(&self.ty_domain, DNS_PTR_TTL, self.fqdn.clone()),
            ResourceRecord::srv(&self.fqdn, DNS_HOST_TTL, self.port, self.host.clone()),
            ResourceRecord::txt(&self.fqdn, DNS_TXT_TTL, self.txt.encode()),
        ];

        for sub in self.subtypes.iter() {
            let sub_domain = format!("_{}._sub.{}", sub, self.ty_domain);
            records.push(ResourceRecord::ptr(&sub_domain, DNS_PTR_TTL, self.fqdn.clone()));
        }

        if self.addresses.is_empty() {
            for intf in ifaces.iter() {
                records.push(ResourceRecord::addr(&self.host, DNS_HOST_TTL, intf.addr));
            }
        } else {
            for addr in self.addresses.iter() {
                records.push(ResourceRecord::addr(&self.host, DNS_HOST_TTL, *addr));
            }
        }

        records
    }

    /// Replaces the TXT data. The cached record set is invalidated so the
    /// next announcement carries the new TXT.
    pub(crate) fn set_txt(&mut self, txt: Txt) {
        self.txt = txt;
        self.published = false;
        self.records_cache = None;
    }

    /// Identifies this service to the record store for address
    /// resolution and meta-query answering.
    pub(crate) fn source(&self) -> ServiceSource {
        ServiceSource {
            fqdn: self.fqdn.clone(),
            host: self.host.clone(),
            ty_domain: self.ty_domain.clone(),
            addresses: self.addresses.clone(),
        }
    }

    /// Marks one announcement round done. Returns true on the first
    /// round, i.e. when the service just came up.
    pub(crate) fn complete_announce(&mut self) -> bool {
        if self.published {
            false
        } else {
            self.published = true;
            true
        }
    }

    /// Triples the re-announcement delay and returns the delay to wait
    /// before the next round, or `None` when re-announcing should stop.
    pub(crate) fn advance_delay(&mut self) -> Option<u64> {
        if !self.activated || self.destroyed {
            return None;
        }
        self.delay *= 3;
        if self.delay < REANNOUNCE_MAX_MS {
            Some(self.delay)
        } else {
            None
        }
    }

    /// Restarts the re-announcement schedule from the initial delay.
    pub(crate) fn reset_delay(&mut self) {
        self.delay = REANNOUNCE_DELAY_MS;
    }

    /// Takes the service off the air logically. Pending timers for it
    /// become no-ops.
    pub(crate) fn deactivate(&mut self) {
        self.activated = false;
        self.published = false;
    }

    pub(crate) fn destroy(&mut self) {
        self.deactivate();
        self.destroyed = true;
    }
}

/// Returns the OS hostname qualified with the mDNS domain.
fn default_host() -> Result<String> {
    let name = hostname::get().map_err(|e| e_fmt!("failed to get hostname: {}", e))?;
    let name = name.to_string_lossy();
    let name = name.trim_end_matches('.');
    if name.is_empty() {
        return Err(Error::MissingField("host"));
    }
    if name.to_lowercase().ends_with(TLD) {
        Ok(name.to_string())
    } else {
        Ok(format!("{}{}", name, TLD))
    }
}
