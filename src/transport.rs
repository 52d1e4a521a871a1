//! The wire boundary of the daemon.
//!
//! The daemon itself never touches sockets. It emits queries and response
//! packets through a [`Transport`] and consumes [`TransportEvent`]s from
//! the transport's event channel. [`LoopbackBus`] is the in-process
//! transport used in tests and demos: every endpoint receives every
//! packet, including its own, which mirrors multicast delivery.

use crate::error::e_fmt;
use crate::records::{Question, RRType, ResourceRecord};
use crate::{Error, Result};
use flume::{Receiver, Sender};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One mDNS message, either a query or a response.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    /// The question section.
    pub questions: Vec<Question>,

    /// The answer section.
    pub answers: Vec<ResourceRecord>,

    /// The additional section.
    pub additionals: Vec<ResourceRecord>,
}

impl Packet {
    /// Creates a query packet with a single question.
    pub fn query(name: &str, rr_type: RRType) -> Self {
        Self {
            questions: vec![Question::new(name, rr_type)],
            answers: Vec::new(),
            additionals: Vec::new(),
        }
    }

    /// Creates a response packet.
    pub fn response(answers: Vec<ResourceRecord>, additionals: Vec<ResourceRecord>) -> Self {
        Self {
            questions: Vec::new(),
            answers,
            additionals,
        }
    }

    /// Returns true if the packet carries no questions and no records.
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty() && self.answers.is_empty() && self.additionals.is_empty()
    }
}

/// An inbound message delivered by a transport, with the sender address
/// when the transport knows it.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// An incoming query.
    Query(Packet, Option<SocketAddr>),

    /// An incoming response.
    Response(Packet, Option<SocketAddr>),
}

/// The packet-level interface between the daemon and the network.
pub trait Transport: Send {
    /// Sends out a one-shot query for `name`.
    fn query(&self, name: &str, rr_type: RRType) -> Result<()>;

    /// Sends out a response packet.
    fn respond(&self, packet: Packet) -> Result<()>;

    /// Returns the channel of inbound messages. Every call returns a
    /// handle to the same underlying channel.
    fn events(&self) -> Receiver<TransportEvent>;

    /// Detaches this transport from the network. Afterwards sends are
    /// dropped silently and no more events arrive.
    fn destroy(&self);
}

struct BusMember {
    id: usize,
    sender: Sender<TransportEvent>,
}

/// An in-process message bus emulating a multicast network segment.
///
/// Cloning the bus is cheap; all clones share the same member list. Each
/// [`LoopbackBus::endpoint`] behaves like one host joined to the group.
#[derive(Clone, Default)]
pub struct LoopbackBus {
    members: Arc<Mutex<Vec<BusMember>>>,
    next_id: Arc<AtomicUsize>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new endpoint with a synthetic source address derived
    /// from the endpoint id.
    pub fn endpoint(&self) -> LoopbackEndpoint {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let addr = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            5000 + (id as u16),
        );
        self.join(id, addr)
    }

    /// Creates a new endpoint whose packets appear to come from `addr`.
    /// Useful to exercise subnet-aware answering.
    pub fn endpoint_at(&self, addr: SocketAddr) -> LoopbackEndpoint {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.join(id, addr)
    }

    fn join(&self, id: usize, addr: SocketAddr) -> LoopbackEndpoint {
        let (sender, receiver) = flume::unbounded();
        if let Ok(mut members) = self.members.lock() {
            members.push(BusMember { id, sender });
        }
        LoopbackEndpoint {
            id,
            addr,
            bus: self.clone(),
            receiver,
        }
    }

    /// Delivers `event` to every current member, the sender included.
    fn broadcast(&self, event: TransportEvent) -> Result<()> {
        let members = self
            .members
            .lock()
            .map_err(|e| e_fmt!("failed to lock bus members: {}", e))?;
        for member in members.iter() {
            // A member with a dropped receiver is cleaned up on `destroy`.
            let _ = member.sender.send(event.clone());
        }
        Ok(())
    }

    fn leave(&self, id: usize) {
        if let Ok(mut members) = self.members.lock() {
            members.retain(|m| m.id != id);
        }
    }
}

/// One endpoint of a [`LoopbackBus`].
pub struct LoopbackEndpoint {
    id: usize,
    addr: SocketAddr,
    bus: LoopbackBus,
    receiver: Receiver<TransportEvent>,
}

impl LoopbackEndpoint {
    /// The source address attached to packets sent from this endpoint.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Transport for LoopbackEndpoint {
    fn query(&self, name: &str, rr_type: RRType) -> Result<()> {
        let packet = Packet::query(name, rr_type);
        self.bus
            .broadcast(TransportEvent::Query(packet, Some(self.addr)))
    }

    fn respond(&self, packet: Packet) -> Result<()> {
        if packet.is_empty() {
            return Err(Error::Msg("refusing to send an empty response".to_string()));
        }
        self.bus
            .broadcast(TransportEvent::Response(packet, Some(self.addr)))
    }

    fn events(&self) -> Receiver<TransportEvent> {
        self.receiver.clone()
    }

    fn destroy(&self) {
        self.bus.leave(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::{LoopbackBus, Transport, TransportEvent};
    use crate::records::RRType;

    #[test]
    fn test_broadcast_reaches_all_endpoints() {
        let bus = LoopbackBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();

        a.query("_svc._tcp.local", RRType::PTR).unwrap();

        // Both endpoints see the query, including the sender.
        for ep in [&a, &b] {
            match ep.events().try_recv().unwrap() {
                TransportEvent::Query(pkt, from) => {
                    assert_eq!(pkt.questions[0].name, "_svc._tcp.local");
                    assert_eq!(from, Some(a.addr()));
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[test]
    fn test_destroyed_endpoint_stops_receiving() {
        let bus = LoopbackBus::new();
        let a = bus.endpoint();
        let b = bus.endpoint();

        b.destroy();
        a.query("x.local", RRType::ANY).unwrap();

        assert!(a.events().try_recv().is_ok());
        assert!(b.events().try_recv().is_err());
    }

    #[test]
    fn test_empty_response_rejected() {
        let bus = LoopbackBus::new();
        let a = bus.endpoint();
        assert!(a.respond(super::Packet::default()).is_err());
    }
}
