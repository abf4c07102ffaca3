//! Monitor handed to backends with each load.
//!
//! Holds only the load's identity token and a weak sender into the
//! orchestrator's command queue. Reports for unloaded handles, or after the
//! orchestrator is gone, are dropped.

use crate::item::LoadToken;
use crate::orchestrator::Command;
use bridge_traits::{BackendEvent, PlaybackMonitor};
use tokio::sync::mpsc::WeakUnboundedSender;
use tracing::trace;

pub(crate) struct MonitorSink {
    token: LoadToken,
    commands: WeakUnboundedSender<Command>,
}

impl MonitorSink {
    pub fn new(token: LoadToken, commands: WeakUnboundedSender<Command>) -> Self {
        Self { token, commands }
    }
}

impl PlaybackMonitor for MonitorSink {
    fn report(&self, event: BackendEvent) {
        let Some(commands) = self.commands.upgrade() else {
            trace!(session_id = %self.token.session_id, event = event.name(), "Orchestrator gone, dropping report");
            return;
        };
        let _ = commands.send(Command::Backend {
            token: self.token,
            event,
        });
    }
}
