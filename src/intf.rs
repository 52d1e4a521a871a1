//! Host network interface enumeration and subnet checks.

use std::net::IpAddr;

/// One usable address of a host network interface.
///
/// Only the pieces the record store needs are kept: the interface address
/// itself and its netmask, which together define the subnet used when
/// deciding whether a requester can reach a candidate address directly.
#[derive(Clone, Debug)]
pub struct NetIf {
    /// The address assigned to the interface.
    pub addr: IpAddr,

    /// The netmask of the interface address, in the same family.
    pub netmask: IpAddr,
}

impl NetIf {
    /// Returns true if `addr` is in the same subnet as this interface.
    /// Addresses of a different family never match.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.addr, self.netmask, addr) {
            (IpAddr::V4(if_ip), IpAddr::V4(mask), IpAddr::V4(ip)) => {
                let netmask = u32::from(mask);
                u32::from(if_ip) & netmask == u32::from(*ip) & netmask
            }
            (IpAddr::V6(if_ip), IpAddr::V6(mask), IpAddr::V6(ip)) => {
                let mask = mask.octets();
                let if_ip = if_ip.octets();
                let ip = ip.octets();
                (0..16).all(|i| if_ip[i] & mask[i] == ip[i] & mask[i])
            }
            _ => false,
        }
    }
}

/// Returns valid network interfaces in the host system.
/// Loopback interfaces are excluded.
pub fn my_ip_interfaces() -> Vec<NetIf> {
    if_addrs::get_if_addrs()
        .unwrap_or_default()
        .into_iter()
        .filter(|i| !i.is_loopback())
        .map(|i| match i.addr {
            if_addrs::IfAddr::V4(a) => NetIf {
                addr: IpAddr::V4(a.ip),
                netmask: IpAddr::V4(a.netmask),
            },
            if_addrs::IfAddr::V6(a) => NetIf {
                addr: IpAddr::V6(a.ip),
                netmask: IpAddr::V6(a.netmask),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::NetIf;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_v4_subnet_check() {
        let intf = NetIf {
            addr: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)),
            netmask: IpAddr::V4(Ipv4Addr::new(255, 255, 255, 0)),
        };
        assert!(intf.contains(&IpAddr::V4(Ipv4Addr::new(192, 168, 1, 200))));
        assert!(!intf.contains(&IpAddr::V4(Ipv4Addr::new(192, 168, 2, 1))));
        // different family never matches
        assert!(!intf.contains(&IpAddr::V6(Ipv6Addr::LOCALHOST)));
    }

    #[test]
    fn test_v6_subnet_check() {
        let intf = NetIf {
            addr: IpAddr::V6("fe80::1".parse::<Ipv6Addr>().unwrap()),
            netmask: IpAddr::V6("ffff:ffff:ffff:ffff::".parse::<Ipv6Addr>().unwrap()),
        };
        assert!(intf.contains(&IpAddr::V6("fe80::22".parse::<Ipv6Addr>().unwrap())));
        assert!(!intf.contains(&IpAddr::V6("fe81::22".parse::<Ipv6Addr>().unwrap())));
    }

    #[test]
    fn test_my_ip_interfaces() {
        for intf in super::my_ip_interfaces() {
            assert!(!intf.addr.is_loopback());
            // address and netmask come from the same family
            assert_eq!(intf.addr.is_ipv4(), intf.netmask.is_ipv4());
        }
    }
}
