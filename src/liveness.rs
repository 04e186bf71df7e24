//! Node liveness waiting.
//!
//! A node is online once `GET /ping` on its published port returns 200.
//! Waits poll at a fixed interval against an injected [`Clock`] and always
//! end at a deadline; there is no unbounded wait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;
use tracing::info;

use crate::clock::Clock;
use crate::clock::Deadline;
use crate::constants::HEALTH_PATH;
use crate::error::ConductorError;
use crate::error::Result;
use crate::topology::NodeEndpoint;

/// A single readiness check.
pub trait HealthProbe: Send + Sync {
    /// Whether the node answered its health endpoint successfully.
    fn is_online(&self, node: &dyn NodeEndpoint) -> bool;
}

/// Health probe issuing `GET <external_url>/ping`.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: reqwest::blocking::Client,
}

impl HttpHealthProbe {
    /// Probe with a per-request timeout.
    pub fn new(request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }
}

impl HealthProbe for HttpHealthProbe {
    fn is_online(&self, node: &dyn NodeEndpoint) -> bool {
        let url = format!("{}{}", node.external_url(), HEALTH_PATH);
        match self.client.get(&url).send() {
            Ok(response) => response.status() == reqwest::StatusCode::OK,
            Err(e) => {
                debug!(node = node.name(), error = %e, "node is not online");
                false
            }
        }
    }
}

/// Scripted probe for tests.
///
/// Each node answers "offline" a configured number of times and then
/// "online"; nodes with no script never come online.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    remaining_failures: Mutex<HashMap<String, u32>>,
    polls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    /// A probe where no node is online yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A probe where every named node is online immediately.
    pub fn all_online<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let probe = Self::new();
        for name in names {
            probe.online_after(name, 0);
        }
        probe
    }

    /// Make `node` report online after `failures` offline answers.
    pub fn online_after(&self, node: &str, failures: u32) {
        self.remaining_failures.lock().insert(node.to_string(), failures);
    }

    /// Node names in the order they were polled.
    pub fn polls(&self) -> Vec<String> {
        self.polls.lock().clone()
    }
}

impl HealthProbe for ScriptedProbe {
    fn is_online(&self, node: &dyn NodeEndpoint) -> bool {
        self.polls.lock().push(node.name().to_string());
        match self.remaining_failures.lock().get_mut(node.name()) {
            Some(0) => true,
            Some(n) => {
                *n -= 1;
                false
            }
            None => false,
        }
    }
}

/// Blocks until nodes answer their health endpoint.
pub struct LivenessWaiter {
    probe: Arc<dyn HealthProbe>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
}

impl std::fmt::Debug for LivenessWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LivenessWaiter").field("poll_interval", &self.poll_interval).finish_non_exhaustive()
    }
}

impl LivenessWaiter {
    /// Waiter polling every `poll_interval`.
    pub fn new(probe: Arc<dyn HealthProbe>, clock: Arc<dyn Clock>, poll_interval: Duration) -> Self {
        Self {
            probe,
            clock,
            poll_interval,
        }
    }

    /// The clock deadlines are measured on.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Wait up to `timeout` for `node` to come online.
    ///
    /// # Errors
    ///
    /// Returns [`ConductorError::NodeNotOnline`] when the timeout elapses.
    pub fn wait_online(&self, node: &dyn NodeEndpoint, timeout: Duration) -> Result<()> {
        let deadline = Deadline::after(self.clock.as_ref(), timeout);
        self.wait_online_until(node, deadline)
    }

    /// Wait for `node` until a deadline that may be shared with other nodes.
    pub fn wait_online_until(&self, node: &dyn NodeEndpoint, deadline: Deadline) -> Result<()> {
        loop {
            if self.probe.is_online(node) {
                info!(node = node.name(), "node online");
                return Ok(());
            }

            if deadline.is_expired(self.clock.as_ref()) {
                return Err(ConductorError::NodeNotOnline {
                    node: node.name().to_string(),
                    timeout: deadline.budget(),
                });
            }

            let pause = self.poll_interval.min(deadline.remaining(self.clock.as_ref()));
            self.clock.sleep(pause);
        }
    }
}
