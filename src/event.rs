//! Notifications raised by a session for other collaborators (log capture,
//! screenshot tooling, test execution) to react to.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

/// Events emitted on the session's bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The adb bridge answered its first device listing.
    BridgeInitialized,

    /// An AVD exists and can be booted. `generated` is set when this session
    /// created it.
    AvdAvailable { name: String, generated: bool },

    /// A device finished booting (or was attached) and is registered.
    DeviceReady { serial: String, qualifier: String },

    /// The emulator behind `serial` was confirmed offline.
    EmulatorShutdown { serial: String },

    /// A generated AVD was deleted.
    AvdDeleted { name: String },

    /// A deployment's package was installed.
    DeploymentInstalled { deployment: String, package: String },

    /// A deployment's package was uninstalled.
    DeploymentUninstalled { deployment: String, package: String },

    /// The instrumentation agent is serving requests for `deployment`.
    InstrumentationPerformed {
        deployment: String,
        agent_package: String,
        port: u16,
    },

    /// The instrumentation agent for `deployment` was removed.
    InstrumentationRemoved { deployment: String, port: u16 },
}

type Callback = Box<dyn Fn(&Event) + Send + Sync>;

enum Listener {
    Channel(Sender<Event>),
    Callback(Callback),
}

/// Publish/subscribe bus for [`Event`]s. Cloning shares the listener list.
#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Vec<Listener>>>,
}

impl EventBus {
    /// Create a new bus with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event published from now on. Dropping the receiver
    /// unsubscribes.
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = mpsc::channel();
        self.push(Listener::Channel(tx));
        rx
    }

    /// Call `callback` synchronously for every event published from now on.
    pub fn on<F>(&self, callback: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.push(Listener::Callback(Box::new(callback)));
    }

    fn push(&self, listener: Listener) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Send `event` to every live listener, in subscription order.
    pub fn publish(&self, event: Event) {
        tracing::debug!(?event, "event");
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|listener| match listener {
            Listener::Channel(tx) => tx.send(event.clone()).is_ok(),
            Listener::Callback(callback) => {
                callback(&event);
                true
            }
        });
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
