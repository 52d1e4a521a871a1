//! The daemon thread and its public handles.
//!
//! [`Bonjour`] is a cloneable handle; all real work happens on a single
//! daemon thread that owns the transport, the registry of published
//! services, the record store and every active browser. Handles talk to
//! the thread over a bounded flume channel, and results come back on
//! per-operation channels.
//!
//! ```text
//! Bonjour / ServiceHandle / BrowserHandle
//!     |  Command channel (bounded)
//!     v
//! daemon thread: { Registry, RecordStore, Browsers, timers }
//!     |  Transport
//!     v
//! the network (or a LoopbackBus in tests)
//! ```

#[cfg(feature = "logging")]
use crate::log::{debug, error, trace};
use crate::browser::{BrowseConfig, BrowseEvent, BrowseListener, Browser, ServiceDescriptor};
use crate::error::e_fmt;
use crate::intf::{my_ip_interfaces, NetIf};
use crate::prober::{Prober, PROBE_INTERVAL_MS, PROBE_JITTER_MS};
use crate::records::{dns_name_eq, RRType};
use crate::registry::Registry;
use crate::responder::RecordStore;
use crate::service::{Service, ServiceConfig, ServiceEvent};
use crate::transport::{Packet, Transport, TransportEvent};
use crate::txt::Txt;
use crate::{Error, Result};
use flume::{bounded, Receiver, Selector, Sender, TrySendError};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

/// A handle to the DNS-SD daemon. Cloneable and cheap to pass around.
///
/// Creating one spawns the daemon thread. Dropping every clone closes
/// the command channel and the thread winds down, without goodbye
/// packets; call [`Bonjour::unpublish_all`] first for a graceful exit.
#[derive(Clone)]
pub struct Bonjour {
    /// Used to send commands to the daemon.
    sender: Sender<Command>,

    /// Browser ids handed out by this handle and its clones.
    next_browser_id: Arc<AtomicUsize>,
}

impl Bonjour {
    /// Creates a new daemon over `transport` and spawns its thread.
    pub fn new(transport: impl Transport + 'static) -> Result<Self> {
        let (sender, receiver) = bounded(100);

        let transport: Box<dyn Transport> = Box::new(transport);
        thread::Builder::new()
            .name("dns-sd_daemon".to_string())
            .spawn(move || Self::daemon_thread(transport, receiver))
            .map_err(|e| e_fmt!("thread builder failed to spawn: {}", e))?;

        Ok(Self {
            sender,
            next_browser_id: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Publishes a service described by `config`.
    ///
    /// The service is validated here, synchronously. The returned handle
    /// carries the event channel on which [`ServiceEvent::Up`] arrives
    /// once the name survived probing and the first announcement is out.
    pub fn publish(&self, config: ServiceConfig) -> Result<ServiceHandle> {
        let (resp_s, resp_r) = bounded(10);
        let service = Service::new(config, resp_s)?;
        let fqdn = service.fqdn.clone();

        self.send_cmd(Command::Publish(Box::new(service)))?;

        Ok(ServiceHandle {
            fqdn,
            sender: self.sender.clone(),
            events: resp_r,
        })
    }

    /// Withdraws every published service with a single goodbye packet.
    ///
    /// Returns a channel that receives `()` once the teardown is done.
    pub fn unpublish_all(&self) -> Result<Receiver<()>> {
        let (resp_s, resp_r) = bounded(1);
        self.send_cmd(Command::UnpublishAll(resp_s))?;
        Ok(resp_r)
    }

    /// Starts browsing per `config`.
    ///
    /// Returns a handle whose event channel streams [`BrowseEvent`]s.
    pub fn find(&self, config: BrowseConfig) -> Result<BrowserHandle> {
        let (resp_s, resp_r) = bounded(10);
        let id = self.next_browser_id.fetch_add(1, Ordering::Relaxed);
        let browser = Browser::new(config, BrowseListener::Events(resp_s));

        self.send_cmd(Command::Browse(id, Box::new(browser)))?;

        Ok(BrowserHandle {
            id,
            sender: self.sender.clone(),
            events: resp_r,
        })
    }

    /// Browses until one matching instance is found.
    ///
    /// The browser stops itself after delivering the first match on the
    /// returned channel.
    pub fn find_one(&self, config: BrowseConfig) -> Result<Receiver<ServiceDescriptor>> {
        let (resp_s, resp_r) = bounded(1);
        let id = self.next_browser_id.fetch_add(1, Ordering::Relaxed);
        let browser = Browser::new(config, BrowseListener::OneShot(resp_s));

        self.send_cmd(Command::Browse(id, Box::new(browser)))?;
        Ok(resp_r)
    }

    /// Starts to monitor events from the daemon.
    ///
    /// Returns a channel [`Receiver`] of [`DaemonEvent`].
    pub fn monitor(&self) -> Result<Receiver<DaemonEvent>> {
        let (resp_s, resp_r) = bounded(100);
        self.send_cmd(Command::Monitor(resp_s))?;
        Ok(resp_r)
    }

    /// Shuts down the daemon thread and returns a channel to receive
    /// the confirmation.
    ///
    /// Published services are dropped without goodbye packets; use
    /// [`Bonjour::unpublish_all`] before shutting down to say goodbye.
    ///
    /// When an error is returned, the caller should retry only when
    /// the error is `Error::Again`, otherwise should log and move on.
    pub fn shutdown(&self) -> Result<Receiver<()>> {
        let (resp_s, resp_r) = bounded(1);
        self.send_cmd(Command::Exit(resp_s))?;
        Ok(resp_r)
    }

    /// Sends `cmd` to the daemon via its channel.
    fn send_cmd(&self, cmd: Command) -> Result<()> {
        send_cmd(&self.sender, cmd)
    }

    fn daemon_thread(transport: Box<dyn Transport>, receiver: Receiver<Command>) {
        let daemon = Daemon::new(transport);

        if let Some(cmd) = Daemon::run(daemon, receiver) {
            match cmd {
                Command::Exit(resp_s) => {
                    if let Err(e) = resp_s.send(()) {
                        debug!("exit: failed to send response of shutdown: {}", e);
                    }
                }
                other => {
                    debug!("unexpected command at exit: {}", other);
                }
            }
        }
    }
}

/// Sends a command without blocking the caller. A full channel maps to
/// [`Error::Again`] so callers can retry.
fn send_cmd(sender: &Sender<Command>, cmd: Command) -> Result<()> {
    sender.try_send(cmd).map_err(|e| match e {
        TrySendError::Full(_) => Error::Again,
        e => e_fmt!("flume::channel::send failed: {}", e),
    })
}

/// A handle to one published service.
pub struct ServiceHandle {
    fqdn: String,
    sender: Sender<Command>,
    events: Receiver<ServiceEvent>,
}

impl ServiceHandle {
    /// The full service instance name this handle publishes.
    pub fn fqdn(&self) -> &str {
        &self.fqdn
    }

    /// The event channel of this service. The caller can call
    /// `.recv_async().await` on it in an async environment or `.recv()`
    /// in a sync environment.
    pub fn events(&self) -> &Receiver<ServiceEvent> {
        &self.events
    }

    /// Replaces the TXT data of the service and re-announces it.
    pub fn update_txt(&self, txt: Txt) -> Result<()> {
        send_cmd(&self.sender, Command::UpdateTxt(self.fqdn.clone(), txt))
    }

    /// Withdraws the service with a goodbye packet. Returns a channel
    /// that receives `()` once the teardown is done.
    pub fn stop(&self) -> Result<Receiver<()>> {
        let (resp_s, resp_r) = bounded(1);
        send_cmd(&self.sender, Command::Unpublish(self.fqdn.clone(), resp_s))?;
        Ok(resp_r)
    }
}

/// A handle to one browser.
pub struct BrowserHandle {
    id: usize,
    sender: Sender<Command>,
    events: Receiver<BrowseEvent>,
}

impl BrowserHandle {
    /// The event channel of this browser. The caller can call
    /// `.recv_async().await` on it in an async environment or `.recv()`
    /// in a sync environment.
    pub fn events(&self) -> &Receiver<BrowseEvent> {
        &self.events
    }

    /// Restarts a stopped browser and re-sends its initial queries.
    pub fn start(&self) -> Result<()> {
        send_cmd(&self.sender, Command::BrowseStart(self.id))
    }

    /// Stops browsing. Known instances are kept for a later restart.
    pub fn stop(&self) -> Result<()> {
        send_cmd(&self.sender, Command::BrowseStop(self.id))
    }

    /// Re-queries every watched name.
    pub fn update(&self) -> Result<()> {
        send_cmd(&self.sender, Command::BrowseUpdate(self.id))
    }

    /// Returns a channel delivering a snapshot of the currently known
    /// instances.
    pub fn services(&self) -> Result<Receiver<Vec<ServiceDescriptor>>> {
        let (resp_s, resp_r) = bounded(1);
        send_cmd(&self.sender, Command::BrowseServices(self.id, resp_s))?;
        Ok(resp_r)
    }
}

/// Noticeable events from the daemon, for observability. Subscribe with
/// [`Bonjour::monitor`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum DaemonEvent {
    /// Daemon announced a service. The string is its fqdn.
    Announce(String),

    /// Daemon answered a query. The string is the queried name.
    Respond(String),

    /// Daemon encountered an error.
    Error(Error),
}

/// Commands supported by the daemon.
enum Command {
    /// Publish a service.
    Publish(Box<Service>),

    /// Withdraw a service. (fqdn, response channel)
    Unpublish(String, Sender<()>),

    /// Withdraw every service with one goodbye packet.
    UnpublishAll(Sender<()>),

    /// Replace the TXT data of a service and re-announce.
    UpdateTxt(String, Txt),

    /// Install a new browser under the given id.
    Browse(usize, Box<Browser>),

    /// Restart a stopped browser.
    BrowseStart(usize),

    /// Stop a browser.
    BrowseStop(usize),

    /// Re-query a browser's watched names.
    BrowseUpdate(usize),

    /// Snapshot a browser's known instances.
    BrowseServices(usize, Sender<Vec<ServiceDescriptor>>),

    /// One round of probing for a service name. (fqdn)
    ProbeTick(String),

    /// Scheduled re-announcement of a service. Unlike the initial
    /// announcement it does not reset the backoff schedule. (fqdn)
    Reannounce(String),

    /// Monitor noticeable events in the daemon.
    Monitor(Sender<DaemonEvent>),

    Exit(Sender<()>),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish(_) => write!(f, "Command Publish"),
            Self::Unpublish(_, _) => write!(f, "Command Unpublish"),
            Self::UnpublishAll(_) => write!(f, "Command UnpublishAll"),
            Self::UpdateTxt(_, _) => write!(f, "Command UpdateTxt"),
            Self::Browse(_, _) => write!(f, "Command Browse"),
            Self::BrowseStart(_) => write!(f, "Command BrowseStart"),
            Self::BrowseStop(_) => write!(f, "Command BrowseStop"),
            Self::BrowseUpdate(_) => write!(f, "Command BrowseUpdate"),
            Self::BrowseServices(_, _) => write!(f, "Command BrowseServices"),
            Self::ProbeTick(_) => write!(f, "Command ProbeTick"),
            Self::Reannounce(_) => write!(f, "Command Reannounce"),
            Self::Monitor(_) => write!(f, "Command Monitor"),
            Self::Exit(_) => write!(f, "Command Exit"),
        }
    }
}

/// A command scheduled to run at a later time.
struct ReRun {
    /// The time (in millis) when to execute the command.
    next_time: u64,

    command: Command,
}

/// What the daemon thread selected on in one round.
enum Wake {
    Cmd(core::result::Result<Command, flume::RecvError>),
    Net(core::result::Result<TransportEvent, flume::RecvError>),
    Timeout,
}

struct Daemon {
    transport: Box<dyn Transport>,

    /// Host interfaces, captured at startup. Used to build address
    /// records and to scope answers to the requester's subnets.
    ifaces: Vec<NetIf>,

    /// Services published by this daemon.
    registry: Registry,

    /// The records this daemon answers queries from.
    store: RecordStore,

    /// Active browsers keyed by handle id.
    browsers: HashMap<usize, Browser>,

    /// Commands scheduled to run later.
    retransmissions: Vec<ReRun>,

    /// Timestamps of scheduled work, earliest first.
    timers: BinaryHeap<Reverse<u64>>,

    monitors: Vec<Sender<DaemonEvent>>,
}

impl Daemon {
    fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            ifaces: my_ip_interfaces(),
            registry: Registry::default(),
            store: RecordStore::default(),
            browsers: HashMap::new(),
            retransmissions: Vec::new(),
            timers: BinaryHeap::new(),
            monitors: Vec::new(),
        }
    }

    /// The main event loop of the daemon thread.
    ///
    /// In each round, it will:
    /// 1. select on the command channel and the transport events, with a
    ///    timeout at the earliest scheduled work.
    /// 2. drain and execute pending commands.
    /// 3. drain and process inbound packets.
    /// 4. run scheduled commands whose time is up.
    fn run(mut daemon: Daemon, receiver: Receiver<Command>) -> Option<Command> {
        let net_events = daemon.transport.events();

        loop {
            let now = current_time_millis();

            let earliest_timer = daemon.peek_earliest_timer();
            let timeout = earliest_timer.map(|timer| {
                // If `timer` already passed, set `timeout` to be 1ms.
                let millis = if timer > now { timer - now } else { 1 };
                Duration::from_millis(millis)
            });

            let selector = Selector::new()
                .recv(&receiver, Wake::Cmd)
                .recv(&net_events, Wake::Net);
            let wake = match timeout {
                Some(timeout) => selector.wait_timeout(timeout).unwrap_or(Wake::Timeout),
                None => selector.wait(),
            };

            match wake {
                Wake::Cmd(Ok(command)) => {
                    if matches!(command, Command::Exit(_)) {
                        daemon.shutdown();
                        return Some(command);
                    }
                    daemon.exec_command(command, false);
                }
                Wake::Cmd(Err(_)) => {
                    // Every handle is gone. Nothing can reach the daemon
                    // anymore, wind down.
                    debug!("command channel closed, daemon thread exits");
                    daemon.shutdown();
                    return None;
                }
                Wake::Net(Ok(event)) => daemon.handle_event(event),
                Wake::Net(Err(_)) => {
                    debug!("transport event channel closed, daemon thread exits");
                    daemon.shutdown();
                    return None;
                }
                Wake::Timeout => {}
            }

            // Drain whatever else queued up while we were busy.
            while let Ok(command) = receiver.try_recv() {
                if matches!(command, Command::Exit(_)) {
                    daemon.shutdown();
                    return Some(command);
                }
                daemon.exec_command(command, false);
            }
            while let Ok(event) = net_events.try_recv() {
                daemon.handle_event(event);
            }

            // Remove timers that already passed.
            let now = current_time_millis();
            while let Some(timer) = daemon.peek_earliest_timer() {
                if now >= timer {
                    daemon.pop_earliest_timer();
                } else {
                    break;
                }
            }

            // Check for scheduled commands and run them if their time is up.
            let mut i = 0;
            while i < daemon.retransmissions.len() {
                if now >= daemon.retransmissions[i].next_time {
                    let rerun = daemon.retransmissions.remove(i);
                    daemon.exec_command(rerun.command, true);
                } else {
                    i += 1;
                }
            }
        }
    }

    /// Best-effort cleanup on exit: no goodbye packets are sent.
    fn shutdown(&mut self) {
        self.registry.destroy_all();
        self.transport.destroy();
    }

    fn exec_command(&mut self, command: Command, repeating: bool) {
        match command {
            Command::Publish(service) => self.exec_publish(*service),

            Command::Unpublish(fqdn, resp_s) => {
                trace!("unpublish service {} repeat {}", &fqdn, &repeating);
                self.exec_unpublish(fqdn, resp_s);
            }

            Command::UnpublishAll(resp_s) => {
                let services = self.registry.take_all();
                self.tear_down_many(services);
                if let Err(e) = resp_s.send(()) {
                    debug!("failed to respond to unpublish-all: {}", e);
                }
            }

            Command::UpdateTxt(fqdn, txt) => self.exec_update_txt(fqdn, txt),

            Command::Browse(id, mut browser) => {
                browser.start(self.transport.as_ref());
                self.browsers.insert(id, *browser);
            }

            Command::BrowseStart(id) => {
                if let Some(browser) = self.browsers.get_mut(&id) {
                    browser.start(self.transport.as_ref());
                }
            }

            Command::BrowseStop(id) => {
                if let Some(browser) = self.browsers.get_mut(&id) {
                    browser.stop();
                }
            }

            Command::BrowseUpdate(id) => {
                if let Some(browser) = self.browsers.get(&id) {
                    browser.update(self.transport.as_ref());
                }
            }

            Command::BrowseServices(id, resp_s) => {
                let services = self
                    .browsers
                    .get(&id)
                    .map(|b| b.services())
                    .unwrap_or_default();
                if let Err(e) = resp_s.send(services) {
                    debug!("failed to send browsed services: {}", e);
                }
            }

            Command::ProbeTick(fqdn) => self.exec_probe_tick(fqdn),

            Command::Reannounce(fqdn) => self.exec_announce(&fqdn, false),

            Command::Monitor(resp_s) => {
                self.monitors.push(resp_s);
            }

            other => {
                debug!("unexpected command: {}", other);
            }
        }
    }

    fn exec_publish(&mut self, service: Service) {
        let fqdn = service.fqdn.clone();
        if self.registry.get_mut(&fqdn).is_some() {
            call_service_listener(
                &service.listener,
                ServiceEvent::Error(e_fmt!("service {} is already published", &fqdn)),
            );
            return;
        }

        let probe = service.probe;
        self.registry.add(service);

        if probe {
            self.registry.add_probe(Prober::new(fqdn.clone()));
            // Random delay before the first probe, per RFC 6762 section 8.1.
            let next_time = current_time_millis() + fastrand::u64(0..PROBE_JITTER_MS);
            self.schedule(next_time, Command::ProbeTick(fqdn));
        } else {
            self.exec_announce(&fqdn, true);
        }
    }

    /// One round of probing: send the next query, or conclude the name
    /// free once all queries went out unanswered.
    fn exec_probe_tick(&mut self, fqdn: String) {
        let prober = match self.registry.probe_mut(&fqdn) {
            Some(prober) => prober,
            // The service was unpublished mid-probe.
            None => return,
        };

        if prober.is_complete() {
            self.registry.remove_probe(&fqdn);
            self.exec_announce(&fqdn, true);
            return;
        }

        prober.sent = true;
        prober.tries += 1;

        // A failed send does not abort probing.
        if let Err(e) = self.transport.query(&fqdn, RRType::ANY) {
            debug!("failed to send probe query for {}: {}", &fqdn, e);
        }

        let next_time = current_time_millis() + PROBE_INTERVAL_MS;
        self.schedule(next_time, Command::ProbeTick(fqdn));
    }

    /// Registers the service records, broadcasts them, and schedules the
    /// next re-announcement. `reset` restarts the backoff schedule.
    fn exec_announce(&mut self, fqdn: &str, reset: bool) {
        let service = match self.registry.get_mut(fqdn) {
            Some(service) if service.is_activated() && !service.is_destroyed() => service,
            _ => return,
        };
        if reset {
            service.reset_delay();
        }

        let records = service.records(&self.ifaces);
        let source = service.source();
        let first_time = service.complete_announce();
        let next_delay = service.advance_delay();
        let listener = service.listener.clone();

        self.store.register(records.clone(), Some(source));

        trace!("announce {}: {} records", fqdn, records.len());
        if let Err(e) = self.transport.respond(Packet::response(records, Vec::new())) {
            error!("failed to announce {}: {}", fqdn, &e);
            notify_monitors(&mut self.monitors, DaemonEvent::Error(e));
        }

        if first_time {
            call_service_listener(&listener, ServiceEvent::Up);
            notify_monitors(&mut self.monitors, DaemonEvent::Announce(fqdn.to_string()));
        }

        if let Some(delay) = next_delay {
            let next_time = current_time_millis() + delay;
            self.schedule(next_time, Command::Reannounce(fqdn.to_string()));
        }
    }

    fn exec_update_txt(&mut self, fqdn: String, txt: Txt) {
        let service = match self.registry.get_mut(&fqdn) {
            Some(service) => service,
            None => {
                debug!("update-txt: service {} not found", &fqdn);
                return;
            }
        };

        let old_records = service.records(&self.ifaces);
        service.set_txt(txt);

        self.store.unregister(&old_records, None);
        self.cancel_pending(&fqdn);
        self.exec_announce(&fqdn, true);
    }

    fn exec_unpublish(&mut self, fqdn: String, resp_s: Sender<()>) {
        if let Some(service) = self.registry.remove(&fqdn) {
            self.tear_down_many(vec![service]);
        }
        if let Err(e) = resp_s.send(()) {
            debug!("failed to respond to unpublish: {}", e);
        }
    }

    /// Tears down services, withdrawing all their records in a single
    /// goodbye packet.
    fn tear_down_many(&mut self, services: Vec<Service>) {
        let mut goodbye = Vec::new();
        for mut service in services {
            self.cancel_pending(&service.fqdn);
            if service.is_activated() {
                let records = service.goodbye_records(&self.ifaces);
                self.store.unregister(&records, Some(&service.fqdn));
                goodbye.extend(records);
            }
            service.destroy();
        }

        if goodbye.is_empty() {
            return;
        }
        if let Err(e) = self.transport.respond(Packet::response(goodbye, Vec::new())) {
            error!("failed to send goodbye packet: {}", &e);
            notify_monitors(&mut self.monitors, DaemonEvent::Error(e));
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Query(packet, from) => self.handle_query(&packet, from.map(|a| a.ip())),
            TransportEvent::Response(packet, from) => {
                if let Some(fqdn) = self.registry.find_conflict(&packet) {
                    self.handle_conflict(fqdn);
                }
                for browser in self.browsers.values_mut() {
                    browser.handle_response(&packet, from, self.transport.as_ref());
                }
                // Finished one-shot browsers have nothing left to do.
                self.browsers
                    .retain(|_, b| b.is_running() || !b.is_one_shot());
            }
        }
    }

    fn handle_query(&mut self, packet: &Packet, requester: Option<std::net::IpAddr>) {
        for question in packet.questions.iter() {
            let response = match self.store.answer(question, requester, &self.ifaces) {
                Some(response) => response,
                None => continue,
            };
            match self.transport.respond(response) {
                Ok(()) => {
                    notify_monitors(&mut self.monitors, DaemonEvent::Respond(question.name.clone()));
                }
                Err(e) => {
                    error!("failed to answer {}: {}", &question.name, &e);
                    notify_monitors(&mut self.monitors, DaemonEvent::Error(e));
                }
            }
        }
    }

    /// Someone else claimed a name we were probing: remove the service
    /// and report the conflict on its event channel.
    fn handle_conflict(&mut self, fqdn: String) {
        debug!("name conflict detected for {}", &fqdn);
        self.registry.remove_probe(&fqdn);

        if let Some(mut service) = self.registry.remove(&fqdn) {
            self.cancel_pending(&fqdn);
            // Never announced; there are no records to withdraw.
            service.destroy();
            call_service_listener(
                &service.listener,
                ServiceEvent::Error(Error::NameConflict(fqdn.clone())),
            );
        }

        notify_monitors(&mut self.monitors, DaemonEvent::Error(Error::NameConflict(fqdn)));
    }

    /// Drops scheduled probes and re-announcements of `fqdn`.
    fn cancel_pending(&mut self, fqdn: &str) {
        self.retransmissions.retain(|rerun| match &rerun.command {
            Command::ProbeTick(f) | Command::Reannounce(f) => !dns_name_eq(f, fqdn),
            _ => true,
        });
    }

    fn schedule(&mut self, next_time: u64, command: Command) {
        self.retransmissions.push(ReRun { next_time, command });
        self.add_timer(next_time);
    }

    fn add_timer(&mut self, next_time: u64) {
        self.timers.push(Reverse(next_time));
    }

    fn peek_earliest_timer(&self) -> Option<u64> {
        self.timers.peek().map(|Reverse(v)| *v)
    }

    fn pop_earliest_timer(&mut self) -> Option<u64> {
        self.timers.pop().map(|Reverse(v)| v)
    }
}

fn call_service_listener(listener: &Sender<ServiceEvent>, event: ServiceEvent) {
    if let Err(e) = listener.send(event) {
        debug!("failed to send service event: {}", e);
    }
}

fn notify_monitors(monitors: &mut Vec<Sender<DaemonEvent>>, event: DaemonEvent) {
    // Only retain the monitors that are still connected.
    monitors.retain(|sender| {
        if let Err(e) = sender.try_send(event.clone()) {
            debug!("notify_monitors: try_send: {}", &e);
            if matches!(e, TrySendError::Disconnected(_)) {
                return false; // This monitor is dropped.
            }
        }
        true
    });
}

/// Returns UNIX time in millis
pub(crate) fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{current_time_millis, Command, Daemon};
    use crate::records::{RRType, RecordData};
    use crate::service::{Service, ServiceConfig, ServiceEvent};
    use crate::transport::{LoopbackBus, Transport, TransportEvent};
    use std::net::{IpAddr, Ipv4Addr};

    fn daemon_on(bus: &LoopbackBus) -> Daemon {
        Daemon::new(Box::new(bus.endpoint()))
    }

    fn make_service(name: &str) -> (Service, flume::Receiver<ServiceEvent>) {
        let (tx, rx) = flume::unbounded();
        let config = ServiceConfig::new(name, "test", 8000)
            .with_host("h.local")
            .with_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
            .skip_probe();
        (Service::new(config, tx).unwrap(), rx)
    }

    #[test]
    fn test_publish_without_probe_announces_immediately() {
        let bus = LoopbackBus::new();
        let watcher = bus.endpoint();
        let mut daemon = daemon_on(&bus);

        let (service, events) = make_service("Foo");
        daemon.exec_command(Command::Publish(Box::new(service)), false);

        assert!(matches!(events.try_recv().unwrap(), ServiceEvent::Up));

        match watcher.events().try_recv().unwrap() {
            TransportEvent::Response(packet, _) => {
                assert!(packet
                    .answers
                    .iter()
                    .any(|r| r.rr_type == RRType::PTR && r.name == "_test._tcp.local"));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // and a re-announcement got scheduled
        assert_eq!(daemon.retransmissions.len(), 1);
        assert!(daemon.peek_earliest_timer().is_some());
    }

    #[test]
    fn test_probing_sends_any_queries() {
        let bus = LoopbackBus::new();
        let watcher = bus.endpoint();
        let mut daemon = daemon_on(&bus);

        let (tx, events) = flume::unbounded();
        let config = ServiceConfig::new("Foo", "test", 8000)
            .with_host("h.local")
            .with_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        let service = Service::new(config, tx).unwrap();
        daemon.exec_command(Command::Publish(Box::new(service)), false);

        // no announcement yet, only a scheduled probe
        assert!(events.try_recv().is_err());
        assert!(watcher.events().try_recv().is_err());

        for _ in 0..3 {
            daemon.exec_command(Command::ProbeTick("Foo._test._tcp.local".to_string()), true);
            match watcher.events().try_recv().unwrap() {
                TransportEvent::Query(packet, _) => {
                    assert_eq!(packet.questions[0].name, "Foo._test._tcp.local");
                    assert_eq!(packet.questions[0].rr_type, RRType::ANY);
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }

        // fourth tick concludes the probe and announces
        daemon.exec_command(Command::ProbeTick("Foo._test._tcp.local".to_string()), true);
        assert!(matches!(events.try_recv().unwrap(), ServiceEvent::Up));
    }

    #[test]
    fn test_unpublish_sends_one_goodbye_packet() {
        let bus = LoopbackBus::new();
        let watcher = bus.endpoint();
        let mut daemon = daemon_on(&bus);

        let (service, _events) = make_service("Foo");
        daemon.exec_command(Command::Publish(Box::new(service)), false);
        let _announce = watcher.events().try_recv().unwrap();

        let (resp_s, resp_r) = flume::bounded(1);
        daemon.exec_command(
            Command::Unpublish("Foo._test._tcp.local".to_string(), resp_s),
            false,
        );
        assert!(resp_r.try_recv().is_ok());

        match watcher.events().try_recv().unwrap() {
            TransportEvent::Response(packet, _) => {
                assert!(!packet.answers.is_empty());
                assert!(packet.answers.iter().all(|r| r.is_goodbye()));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // records are gone and timers for the service were cancelled
        assert!(daemon.store.is_empty());
        assert!(daemon.retransmissions.is_empty());
    }

    #[test]
    fn test_unpublish_unknown_service_still_responds() {
        let bus = LoopbackBus::new();
        let mut daemon = daemon_on(&bus);

        let (resp_s, resp_r) = flume::bounded(1);
        daemon.exec_command(Command::Unpublish("nope._x._tcp.local".to_string(), resp_s), false);
        assert!(resp_r.try_recv().is_ok());
    }

    #[test]
    fn test_update_txt_reannounces_with_new_data() {
        let bus = LoopbackBus::new();
        let watcher = bus.endpoint();
        let mut daemon = daemon_on(&bus);

        let (service, events) = make_service("Foo");
        daemon.exec_command(Command::Publish(Box::new(service)), false);
        let _first = watcher.events().try_recv().unwrap();
        let _up = events.try_recv().unwrap();

        let new_txt = crate::Txt::Raw(vec![3, b'x', b'=', b'y']);
        daemon.exec_command(
            Command::UpdateTxt("Foo._test._tcp.local".to_string(), new_txt),
            false,
        );

        // the fresh announcement carries the new TXT, and the service
        // reports up again
        match watcher.events().try_recv().unwrap() {
            TransportEvent::Response(packet, _) => {
                let txt = packet
                    .answers
                    .iter()
                    .find(|r| r.rr_type == RRType::TXT)
                    .unwrap();
                assert_eq!(txt.data, RecordData::Txt(vec![3, b'x', b'=', b'y']));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(events.try_recv().unwrap(), ServiceEvent::Up));
    }

    #[test]
    fn test_reannounce_does_not_reset_backoff() {
        let bus = LoopbackBus::new();
        let mut daemon = daemon_on(&bus);

        let (service, _events) = make_service("Foo");
        daemon.exec_command(Command::Publish(Box::new(service)), false);

        let first_delay = daemon.retransmissions[0].next_time - current_time_millis();
        daemon.retransmissions.clear();

        daemon.exec_command(Command::Reannounce("Foo._test._tcp.local".to_string()), true);
        let second_delay = daemon.retransmissions[0].next_time - current_time_millis();
        assert!(second_delay > first_delay);
    }
}
