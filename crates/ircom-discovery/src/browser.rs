//! Service browsing: a live list of resolved instances of the target name.

use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use mdns_sd::{DaemonEvent, ServiceDaemon, ServiceEvent};
use tracing::{debug, error};

use crate::error::DiscoveryError;
use crate::{instance_name, ServiceLocator, ServiceRecord, RESOLVE_IPV4, SERVICE_TYPE};

struct BoardState {
    records: Vec<ServiceRecord>,
    closed: bool,
    failure: Option<String>,
}

/// The record list shared between the daemon event thread and blocking
/// callers. Insertion order is kept; "latest" is the most recent append.
pub(crate) struct RecordBoard {
    state: Mutex<BoardState>,
    cv: Condvar,
}

impl RecordBoard {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(BoardState {
                records: Vec::new(),
                closed: false,
                failure: None,
            }),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn insert(&self, record: ServiceRecord) {
        let mut st = self.state.lock().unwrap();
        if st.closed {
            return;
        }
        st.records.push(record);
        self.cv.notify_all();
    }

    /// Delete every record carrying `fullname`. Returns how many were
    /// removed.
    pub(crate) fn remove(&self, fullname: &str) -> usize {
        let mut st = self.state.lock().unwrap();
        let before = st.records.len();
        st.records.retain(|r| r.fullname != fullname);
        before - st.records.len()
    }

    /// Block until a record exists, the board is closed, or discovery has
    /// failed. Closure takes precedence over any remaining records.
    pub(crate) fn latest(&self) -> Result<ServiceRecord, DiscoveryError> {
        let mut st = self.state.lock().unwrap();
        loop {
            if st.closed {
                return Err(DiscoveryError::Closed);
            }
            if let Some(msg) = &st.failure {
                return Err(DiscoveryError::Daemon(msg.clone()));
            }
            if let Some(record) = st.records.last() {
                return Ok(record.clone());
            }
            st = self.cv.wait(st).unwrap();
        }
    }

    pub(crate) fn fail(&self, message: String) {
        let mut st = self.state.lock().unwrap();
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
        self.cv.notify_all();
        true
    }
}

/// Watches the network for instances of one named `_ircom._tcp` service.
///
/// The daemon delivers browse events on its own thread; a bridge thread
/// filters them onto the [`RecordBoard`], which blocking callers wait on.
pub struct Browser {
    board: Arc<RecordBoard>,
    daemon: ServiceDaemon,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Browser {
    /// Start browsing for `target_service_name` instances advertising
    /// `port`. Fails if the mDNS daemon cannot be started.
    pub fn new(target_service_name: &str, port: u16) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::Daemon(format!("failed to create daemon: {e}")))?;
        let events = daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| DiscoveryError::Daemon(format!("failed to browse: {e}")))?;
        let daemon_events = daemon
            .monitor()
            .map_err(|e| DiscoveryError::Daemon(format!("failed to monitor daemon: {e}")))?;

        let board = Arc::new(RecordBoard::new());
        let mut threads = Vec::new();

        {
            let board = Arc::clone(&board);
            let target = target_service_name.to_string();
            threads.push(
                thread::Builder::new()
                    .name("ircom-browse".into())
                    .spawn(move || {
                        while let Ok(event) = events.recv() {
                            match event {
                                ServiceEvent::ServiceResolved(info) => {
                                    let fullname = info.get_fullname();
                                    if instance_name(fullname) != target {
                                        continue;
                                    }
                                    if info.get_port() != port {
                                        debug!(
                                            fullname,
                                            port = info.get_port(),
                                            "ignoring service on unexpected port"
                                        );
                                        continue;
                                    }
                                    let Some(address) = info
                                        .get_addresses()
                                        .iter()
                                        .find(|a| !RESOLVE_IPV4 || a.is_ipv4())
                                        .copied()
                                    else {
                                        debug!(
                                            fullname,
                                            "no address in the configured family, skipping"
                                        );
                                        continue;
                                    };
                                    debug!(fullname, address = %address, "found new service");
                                    board.insert(ServiceRecord {
                                        fullname: fullname.to_string(),
                                        address,
                                        port: info.get_port(),
                                    });
                                }
                                ServiceEvent::ServiceRemoved(_, fullname) => {
                                    if instance_name(&fullname) != target {
                                        continue;
                                    }
                                    let removed = board.remove(&fullname);
                                    if removed > 0 {
                                        debug!(fullname, removed, "removed service");
                                    }
                                }
                                ServiceEvent::SearchStopped(_) => break,
                                _ => {}
                            }
                        }
                    })
                    .map_err(|e| {
                        DiscoveryError::Daemon(format!("failed to spawn browse thread: {e}"))
                    })?,
            );
        }

        {
            let board = Arc::clone(&board);
            threads.push(
                thread::Builder::new()
                    .name("ircom-browse-monitor".into())
                    .spawn(move || {
                        while let Ok(event) = daemon_events.recv() {
                            if let DaemonEvent::Error(e) = event {
                                error!(error = %e, "mDNS daemon failed");
                                board.fail(e.to_string());
                                break;
                            }
                        }
                    })
                    .map_err(|e| {
                        DiscoveryError::Daemon(format!("failed to spawn monitor thread: {e}"))
                    })?,
            );
        }

        Ok(Self {
            board,
            daemon,
            threads,
        })
    }
}

impl ServiceLocator for Browser {
    fn latest_service(&self) -> Result<ServiceRecord, DiscoveryError> {
        self.board.latest()
    }

    fn close(&self) {
        if self.board.close() {
            let _ = self.daemon.stop_browse(SERVICE_TYPE);
            let _ = self.daemon.shutdown();
        }
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        ServiceLocator::close(self);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}
