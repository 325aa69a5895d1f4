//! Service publication state machine over the mDNS daemon.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use mdns_sd::{DaemonEvent, ServiceDaemon, ServiceInfo};
use tracing::{debug, error};

use crate::error::DiscoveryError;
use crate::{ServicePublisher, SERVICE_TYPE};

/// Publication lifecycle. `Failed` is terminal; every other state can reach
/// it when the daemon reports an error or the publisher is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PublisherState {
    /// Daemon not confirmed running yet.
    Starting,
    /// Daemon running, no registration submitted.
    CanPublish,
    /// Registration submitted, waiting for the daemon to announce it.
    PublishPending,
    /// The service is visible on the network.
    Published,
    /// Daemon failure or closure; waiters get a terminal error.
    Failed,
}

/// What a `publish()` caller has to do after consulting the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PublishAction {
    /// This caller won the race and must submit the registration.
    Register,
    /// Another caller is already registering; just wait for `Published`.
    Wait,
    /// Already published, nothing to do.
    Done,
}

struct GateState {
    state: PublisherState,
    failure: Option<String>,
    closed: bool,
}

/// Mutex + condvar bridge between the daemon's event channel and blocking
/// `publish()` callers. Every state change wakes all waiters.
pub(crate) struct PublishGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl PublishGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                state: PublisherState::Starting,
                failure: None,
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn terminal_error(st: &GateState) -> DiscoveryError {
        if let Some(msg) = &st.failure {
            DiscoveryError::Daemon(msg.clone())
        } else {
            DiscoveryError::Closed
        }
    }

    /// Decide this caller's role. Blocks while the daemon is still starting.
    /// The CanPublish -> PublishPending transition happens here, under the
    /// lock, so exactly one concurrent caller observes `Register`.
    pub(crate) fn begin_publish(&self) -> Result<PublishAction, DiscoveryError> {
        let mut st = self.state.lock().unwrap();
        while st.state == PublisherState::Starting && !st.closed && st.failure.is_none() {
            st = self.cv.wait(st).unwrap();
        }
        if st.closed || st.failure.is_some() {
            return Err(Self::terminal_error(&st));
        }
        match st.state {
            PublisherState::CanPublish => {
                st.state = PublisherState::PublishPending;
                self.cv.notify_all();
                Ok(PublishAction::Register)
            }
            PublisherState::PublishPending => Ok(PublishAction::Wait),
            PublisherState::Published => Ok(PublishAction::Done),
            PublisherState::Starting | PublisherState::Failed => unreachable!("guarded above"),
        }
    }

    /// Block until the service is announced, or a terminal state is reached.
    pub(crate) fn await_published(&self) -> Result<(), DiscoveryError> {
        let mut st = self.state.lock().unwrap();
        while st.state != PublisherState::Published && !st.closed && st.failure.is_none() {
            st = self.cv.wait(st).unwrap();
        }
        if st.state == PublisherState::Published {
            Ok(())
        } else {
            Err(Self::terminal_error(&st))
        }
    }

    pub(crate) fn set_can_publish(&self) {
        let mut st = self.state.lock().unwrap();
        if st.state == PublisherState::Starting {
            st.state = PublisherState::CanPublish;
            self.cv.notify_all();
        }
    }

    pub(crate) fn set_published(&self) {
        let mut st = self.state.lock().unwrap();
        if !st.closed && st.failure.is_none() {
            st.state = PublisherState::Published;
            self.cv.notify_all();
        }
    }

    /// Roll an existing registration back to `CanPublish`. Returns whether
    /// there was a registration to clear.
    pub(crate) fn reset_to_can_publish(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.closed || st.failure.is_some() {
            return false;
        }
        match st.state {
            PublisherState::PublishPending | PublisherState::Published => {
                st.state = PublisherState::CanPublish;
                self.cv.notify_all();
                true
            }
            _ => false,
        }
    }

    pub(crate) fn fail(&self, message: String) {
        let mut st = self.state.lock().unwrap();
        st.state = PublisherState::Failed;
        st.failure.get_or_insert(message);
        self.cv.notify_all();
    }

    /// Returns true on the first call only.
    pub(crate) fn close(&self) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.closed {
            return false;
        }
        st.closed = true;
        st.state = PublisherState::Failed;
        self.cv.notify_all();
        true
    }
}

/// Advertises a named `_ircom._tcp` service on the local network.
///
/// Construction starts the mDNS daemon (its own thread) and a monitor
/// thread that drives the state machine from daemon events.
pub struct Publisher {
    gate: Arc<PublishGate>,
    daemon: ServiceDaemon,
    info: ServiceInfo,
    fullname: String,
    monitor: Option<thread::JoinHandle<()>>,
}

impl Publisher {
    /// Create a publisher for `service_name` advertising `port`.
    ///
    /// Fails if the mDNS daemon cannot be started (daemon unreachable).
    pub fn new(service_name: &str, port: u16) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::Daemon(format!("failed to create daemon: {e}")))?;

        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "ircom".to_string());
        let host = format!("{host}.local.");

        let info = ServiceInfo::new(
            SERVICE_TYPE,
            service_name,
            &host,
            "",
            port,
            None::<HashMap<String, String>>,
        )
        .map_err(|e| DiscoveryError::Daemon(format!("invalid service info: {e}")))?
        .enable_addr_auto();
        let fullname = info.get_fullname().to_string();

        let events = daemon
            .monitor()
            .map_err(|e| DiscoveryError::Daemon(format!("failed to monitor daemon: {e}")))?;

        let gate = Arc::new(PublishGate::new());
        // A constructed mdns-sd daemon is already running; there is no
        // separate client-running callback to wait for.
        gate.set_can_publish();

        let monitor = {
            let gate = Arc::clone(&gate);
            let fullname = fullname.clone();
            thread::Builder::new()
                .name("ircom-publish-monitor".into())
                .spawn(move || {
                    while let Ok(event) = events.recv() {
                        match event {
                            DaemonEvent::Announce(name, addrs) => {
                                if name.eq_ignore_ascii_case(&fullname) {
                                    debug!(fullname = %name, addrs = %addrs, "service announced");
                                    gate.set_published();
                                }
                            }
                            DaemonEvent::Error(e) => {
                                error!(error = %e, "mDNS daemon failed");
                                gate.fail(e.to_string());
                                break;
                            }
                            _ => {}
                        }
                    }
                    // Daemon gone; make sure no caller stays blocked.
                    gate.close();
                })
                .map_err(|e| DiscoveryError::Daemon(format!("failed to spawn monitor: {e}")))?
        };

        Ok(Self {
            gate,
            daemon,
            info,
            fullname,
            monitor: Some(monitor),
        })
    }

    /// Clear the current registration and return to `CanPublish`, so a later
    /// `publish()` re-registers. No-op when nothing is registered.
    pub fn reset(&self) {
        if self.gate.reset_to_can_publish() {
            let _ = self.daemon.unregister(&self.fullname);
            debug!(fullname = %self.fullname, "publication reset");
        }
    }
}

impl ServicePublisher for Publisher {
    fn publish(&self) -> Result<(), DiscoveryError> {
        match self.gate.begin_publish()? {
            PublishAction::Register => {
                debug!(fullname = %self.fullname, "registering service");
                if let Err(e) = self.daemon.register(self.info.clone()) {
                    self.gate.fail(format!("registration failed: {e}"));
                    return Err(DiscoveryError::Registration(e.to_string()));
                }
            }
            PublishAction::Wait => {}
            PublishAction::Done => return Ok(()),
        }
        self.gate.await_published()
    }

    fn close(&self) {
        if self.gate.close() {
            let _ = self.daemon.shutdown();
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        ServicePublisher::close(self);
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
    }
}
