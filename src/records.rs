//! The DNS resource record shapes produced and consumed by the rest of
//! the library.
//!
//! In mDNS and DNS, the basic data structure is "Resource Record" (RR),
//! where in Service Discovery, one service instance corresponds to a set
//! of DNS Resource Records: a PTR record from the service type to the
//! instance, one SRV and one TXT record named by the instance, and one
//! address record per reachable host address.

use std::fmt;
use std::net::IpAddr;

/// The top level domain used in Multicast DNS.
pub const TLD: &str = ".local";

/// Special meta-query name "_services._dns-sd._udp.<Domain>".
/// See [RFC 6763 section 9](https://datatracker.ietf.org/doc/html/rfc6763#section-9)
pub const META_QUERY: &str = "_services._dns-sd._udp.local";

/// Default TTL values in seconds
pub(crate) const DNS_PTR_TTL: u32 = 28800; // 8 hours for PTR records
pub(crate) const DNS_HOST_TTL: u32 = 120; // 2 minutes for host records (A, SRV etc) per RFC6762
pub(crate) const DNS_TXT_TTL: u32 = 4500; // 75 minutes for TXT records per RFC6762

/// The resource record types handled by this library.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u16)]
pub enum RRType {
    /// DNS record type for IPv4 address
    A = 1,

    /// DNS record type for Pointer
    PTR = 12,

    /// DNS record type for Text (properties)
    TXT = 16,

    /// DNS record type for IPv6 address
    AAAA = 28,

    /// DNS record type for Service
    SRV = 33,

    /// DNS record type for any records (wildcard)
    ANY = 255,
}

impl fmt::Display for RRType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RRType::A => write!(f, "TYPE_A"),
            RRType::PTR => write!(f, "TYPE_PTR"),
            RRType::TXT => write!(f, "TYPE_TXT"),
            RRType::AAAA => write!(f, "TYPE_AAAA"),
            RRType::SRV => write!(f, "TYPE_SRV"),
            RRType::ANY => write!(f, "TYPE_ANY"),
        }
    }
}

/// Returns the RR type of an IP address, i.e. A or AAAA.
pub const fn ip_address_rr_type(addr: &IpAddr) -> RRType {
    match addr {
        IpAddr::V4(_) => RRType::A,
        IpAddr::V6(_) => RRType::AAAA,
    }
}

/// The rdata portion of a [`ResourceRecord`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RecordData {
    /// PTR: the target name the pointer record points at.
    Ptr(String),

    /// SRV: the port and target host of a service instance.
    Srv {
        /// Port of the service instance.
        port: u16,
        /// Hostname of the service instance.
        target: String,
    },

    /// TXT: raw bytes of an encoded key/value map.
    Txt(Vec<u8>),

    /// A or AAAA: a literal IP address.
    Addr(IpAddr),
}

/// One DNS resource record.
///
/// A `ttl` of 0 is the "goodbye" sentinel: it is only valid transiently in
/// outbound teardown packets and in inbound response parsing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResourceRecord {
    /// Name of the record.
    pub name: String,

    /// Type of the record.
    pub rr_type: RRType,

    /// Time-to-live in seconds. 0 means a withdrawal ("goodbye").
    pub ttl: u32,

    /// The rdata of the record.
    pub data: RecordData,
}

impl ResourceRecord {
    /// Creates a new PTR record pointing `name` at `target`.
    pub fn ptr(name: &str, ttl: u32, target: String) -> Self {
        Self {
            name: name.to_string(),
            rr_type: RRType::PTR,
            ttl,
            data: RecordData::Ptr(target),
        }
    }

    /// Creates a new SRV record for a service instance.
    pub fn srv(name: &str, ttl: u32, port: u16, target: String) -> Self {
        Self {
            name: name.to_string(),
            rr_type: RRType::SRV,
            ttl,
            data: RecordData::Srv { port, target },
        }
    }

    /// Creates a new TXT record with already-encoded `text`.
    pub fn txt(name: &str, ttl: u32, text: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            rr_type: RRType::TXT,
            ttl,
            data: RecordData::Txt(text),
        }
    }

    /// Creates a new A or AAAA record, depending on the family of `addr`.
    pub fn addr(name: &str, ttl: u32, addr: IpAddr) -> Self {
        Self {
            name: name.to_string(),
            rr_type: ip_address_rr_type(&addr),
            ttl,
            data: RecordData::Addr(addr),
        }
    }

    /// Returns true if this record withdraws its name (TTL of 0).
    pub fn is_goodbye(&self) -> bool {
        self.ttl == 0
    }

    /// Returns true if `other` carries the same (type, name, data).
    ///
    /// The TTL is deliberately not compared: a re-announced record with a
    /// fresh TTL is still the same record.
    pub(crate) fn is_duplicate_of(&self, other: &ResourceRecord) -> bool {
        self.rr_type == other.rr_type && dns_name_eq(&self.name, &other.name) && self.data == other.data
    }

    /// Returns the PTR target if this is a PTR record.
    pub(crate) fn ptr_target(&self) -> Option<&str> {
        match &self.data {
            RecordData::Ptr(target) => Some(target),
            _ => None,
        }
    }
}

/// One question of an incoming or outgoing DNS query.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Question {
    /// The queried name.
    pub name: String,

    /// The queried record type. `ANY` matches every type.
    pub rr_type: RRType,
}

impl Question {
    /// Creates a new question.
    pub fn new(name: &str, rr_type: RRType) -> Self {
        Self {
            name: name.to_string(),
            rr_type,
        }
    }
}

/// Compares two DNS names. DNS names are case insensitive per RFC 1035.
pub(crate) fn dns_name_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Checks a record name against a queried name.
///
/// If the queried name contains a dot it must match the full record name;
/// otherwise only the first label of the record name is compared. The
/// latter supports loosely-qualified internal queries like "myhost".
pub(crate) fn record_name_matches(record_name: &str, queried: &str) -> bool {
    if queried.contains('.') {
        dns_name_eq(record_name, queried)
    } else {
        let first_label = record_name.split('.').next().unwrap_or(record_name);
        dns_name_eq(first_label, queried)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_dns_name_eq_ignores_case() {
        assert!(dns_name_eq("Foo._bar._tcp.local", "foo._bar._TCP.local"));
        assert!(!dns_name_eq("foo._bar._tcp.local", "fooo._bar._tcp.local"));
    }

    #[test]
    fn test_record_name_matches_first_label() {
        // A dot-free query matches only on the first label.
        assert!(record_name_matches("myhost.local", "myhost"));
        assert!(record_name_matches("MyHost.local", "myhost"));
        assert!(!record_name_matches("myhost.local", "local"));

        // A dotted query requires the full name.
        assert!(record_name_matches("myhost.local", "myhost.local"));
        assert!(!record_name_matches("myhost.local", "myhost.lan"));
    }

    #[test]
    fn test_duplicate_ignores_ttl() {
        let a = ResourceRecord::addr("host.local", 120, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)));
        let mut b = a.clone();
        b.ttl = 0;
        assert!(a.is_duplicate_of(&b));

        let c = ResourceRecord::addr("host.local", 120, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 6)));
        assert!(!a.is_duplicate_of(&c));
    }

    #[test]
    fn test_goodbye_sentinel() {
        let rr = ResourceRecord::ptr("_x._tcp.local", 0, "i._x._tcp.local".to_string());
        assert!(rr.is_goodbye());
        assert_eq!(ip_address_rr_type(&IpAddr::V4(Ipv4Addr::LOCALHOST)), RRType::A);
    }
}
