//! A small and safe library for DNS-SD (DNS-based Service Discovery).
//!
//! This library creates one new thread to run a daemon, and exposes an
//! API that interacts with the daemon via a
//! [`flume`](https://crates.io/crates/flume) channel. The channel supports
//! both `recv()` and `recv_async()`.
//!
//! For example, publishing a service behaves like this:
//!```text
//!  Client       <channel>       daemon thread
//!    |                             | starts its run-loop.
//!    |       --- Publish -->       |
//!    |                             | probes for name conflicts
//!    |                             | announces the records
//!    |       <-- Up --             |
//!    |           ...               | re-announces with backoff,
//!    |                             | answers incoming queries
//!```
//! All commands in the public API are sent to the daemon using the unblocking `try_send()`
//! so that the caller can use it with both sync and async code, with no dependency on any
//! particular async runtimes.
//!
//! The daemon itself never opens sockets: it sends and receives packets
//! through a [`Transport`]. [`LoopbackBus`] is the in-process transport,
//! emulating one multicast segment between daemons in the same process.
//!
//! # Usage
//!
//! The user starts with creating a daemon by calling [`Bonjour::new()`]
//! with a transport. Then as a responder, the user would call
//! [`publish`](`Bonjour::publish`) to announce a service, and/or as a
//! querier call [`find`](`Bonjour::find`) to browse for instances. The
//! handle type can be cloned and passed around between threads.
//!
//! ## Example: publish a service and browse for it.
//!
//! ```rust
//! use bonjour_sd::{Bonjour, BrowseConfig, BrowseEvent, ServiceConfig};
//!
//! let bus = bonjour_sd::LoopbackBus::new();
//! let bonjour = Bonjour::new(bus.endpoint()).expect("Failed to create daemon");
//!
//! // Publish a service instance.
//! let config = ServiceConfig::new("My Web Server", "http", 3000)
//!     .with_host("myhost.local")
//!     .skip_probe();
//! let service = bonjour.publish(config).expect("Failed to publish");
//!
//! // Browse for instances of the type.
//! let browser = bonjour.find(BrowseConfig::new("http")).expect("Failed to browse");
//!
//! // Receive the browse events in sync or async. Here is an example of
//! // using a thread. Users can call `.recv_async().await` if running in
//! // an async environment.
//! let events = browser.events().clone();
//! std::thread::spawn(move || {
//!     while let Ok(event) = events.recv() {
//!         match event {
//!             BrowseEvent::Up(descriptor) => {
//!                 println!("Found service: {}", descriptor.fqdn);
//!             }
//!             other_event => {
//!                 println!("Received other event: {:?}", &other_event);
//!             }
//!         }
//!     }
//! });
//! # drop(service);
//! ```
//!
//! # Limitations
//!
//! This implementation is based on the following RFCs:
//! - mDNS:   [RFC 6762](https://tools.ietf.org/html/rfc6762)
//! - DNS-SD: [RFC 6763](https://tools.ietf.org/html/rfc6763)
//! - DNS:    [RFC 1035](https://tools.ietf.org/html/rfc1035)
//!
//! We focus on the common use cases at first, and currently have the
//! following limitations:
//! - No DNS wire-format codec is included; transports carry structured
//!   packets and bring their own encoding.
//! - No automatic renaming on conflicts: a name conflict is reported to
//!   the caller instead.
//! - Only the ".local" domain is supported.

#![forbid(unsafe_code)]

// log for logging (optional).
#[cfg(feature = "logging")]
pub(crate) mod log {
    pub(crate) use ::log::{debug, error, trace};
}

#[cfg(not(feature = "logging"))]
#[macro_use]
pub(crate) mod log {
    macro_rules! debug {
        ($($arg:expr),*) => {
            {
                let _ = ($($arg),*); // avoid warnings about unused variables.
            }
        };
    }
    macro_rules! error {
        ($($arg:expr),*) => {
            {
                let _ = ($($arg),*);
            }
        };
    }
    macro_rules! trace {
        ($($arg:expr),*) => {
            {
                let _ = ($($arg),*);
            }
        };
    }
}

mod browser;
mod daemon;
mod error;
mod intf;
mod prober;
mod records;
mod registry;
mod responder;
mod service;
mod transport;
mod txt;

pub use browser::{BrowseConfig, BrowseEvent, ServiceDescriptor};
pub use daemon::{Bonjour, BrowserHandle, DaemonEvent, ServiceHandle};
pub use error::{Error, Result};
pub use intf::NetIf;
pub use records::{Question, RRType, RecordData, ResourceRecord, META_QUERY};
pub use service::{ServiceConfig, ServiceEvent};
pub use transport::{LoopbackBus, LoopbackEndpoint, Packet, Transport, TransportEvent};
pub use txt::{IntoTxtProperties, Txt, TxtProperties, TxtProperty};

/// Re-export from `flume`.
pub use flume::Receiver;
