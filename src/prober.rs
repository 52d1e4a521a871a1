//! Probing for name conflicts before announcing a service.
//!
//! Per [RFC 6762 section 8.1](https://datatracker.ietf.org/doc/html/rfc6762#section-8.1),
//! a host that intends to claim a name sends up to three queries of type
//! ANY for it, 250 millis apart, after an initial random delay of up to
//! 250 millis. Any response naming the fqdn while probing means another
//! host owns the name.

use crate::records::dns_name_eq;
use crate::transport::Packet;

/// Number of probe queries sent before the name is considered free.
pub(crate) const PROBE_TRIES: u8 = 3;

/// Spacing between probe queries, in millis.
pub(crate) const PROBE_INTERVAL_MS: u64 = 250;

/// Upper bound of the random delay before the first probe, in millis.
pub(crate) const PROBE_JITTER_MS: u64 = 250;

/// Conflict detection state for one in-flight probe.
pub(crate) struct Prober {
    /// The full service instance name being probed.
    pub(crate) fqdn: String,

    /// True once the first probe query went out. Responses seen before
    /// then are stale traffic and do not count as conflicts.
    pub(crate) sent: bool,

    /// Probe queries sent so far.
    pub(crate) tries: u8,
}

impl Prober {
    pub(crate) fn new(fqdn: String) -> Self {
        Self {
            fqdn,
            sent: false,
            tries: 0,
        }
    }

    /// Returns true if `packet` claims the probed name.
    pub(crate) fn conflicts_with(&self, packet: &Packet) -> bool {
        if !self.sent {
            return false;
        }
        packet
            .answers
            .iter()
            .chain(packet.additionals.iter())
            .any(|rr| dns_name_eq(&rr.name, &self.fqdn))
    }

    /// Returns true once all probe queries went out unanswered.
    pub(crate) fn is_complete(&self) -> bool {
        self.tries >= PROBE_TRIES
    }
}

#[cfg(test)]
mod tests {
    use super::Prober;
    use crate::records::ResourceRecord;
    use crate::transport::Packet;

    fn claim(name: &str) -> Packet {
        Packet::response(
            vec![ResourceRecord::srv(name, 120, 80, "other.local".to_string())],
            Vec::new(),
        )
    }

    #[test]
    fn test_conflict_only_after_first_send() {
        let mut prober = Prober::new("Foo._bar._tcp.local".to_string());
        let packet = claim("foo._bar._tcp.local");

        // stale response before any probe went out
        assert!(!prober.conflicts_with(&packet));

        prober.sent = true;
        assert!(prober.conflicts_with(&packet));
    }

    #[test]
    fn test_additionals_count_as_claims() {
        let mut prober = Prober::new("Foo._bar._tcp.local".to_string());
        prober.sent = true;

        let packet = Packet::response(
            vec![ResourceRecord::ptr(
                "_bar._tcp.local",
                120,
                "Foo._bar._tcp.local".to_string(),
            )],
            vec![ResourceRecord::srv("Foo._bar._tcp.local", 120, 80, "h.local".to_string())],
        );
        assert!(prober.conflicts_with(&packet));
    }

    #[test]
    fn test_unrelated_names_do_not_conflict() {
        let mut prober = Prober::new("Foo._bar._tcp.local".to_string());
        prober.sent = true;
        assert!(!prober.conflicts_with(&claim("Baz._bar._tcp.local")));
    }

    #[test]
    fn test_completion() {
        let mut prober = Prober::new("x._y._tcp.local".to_string());
        assert!(!prober.is_complete());
        prober.tries = super::PROBE_TRIES;
        assert!(prober.is_complete());
    }
}
