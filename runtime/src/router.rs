//! Command Router.
//!
//! Classifies a decoded [`DomainEvent`] by its action and service action and
//! runs exactly one handler for it. Dispatch always resolves to a
//! [`CommandResponse`]; unknown actions are answered with an error rather
//! than dropped.

use crate::handlers;
use crate::metrics::CommandMetrics;
use crate::response::ResponseEmitter;
use crate::sale::StockDecrementCoordinator;
use inventory_cmd_core::command::{EventAction, ServiceAction};
use inventory_cmd_core::{
    CommandError, CommandResponse, DomainEvent, LockCoordinator, RecordStore,
};
use std::time::Instant;

/// The handler an event is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    /// Create one record.
    Insert,
    /// Generic multi-record field update.
    Update,
    /// Remove matching records.
    Delete,
    /// Stock decrement for a sale.
    Sale(ServiceAction),
}

impl CommandKind {
    /// Metric/log label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Sale(ServiceAction::CreateSale) => "create_sale",
            Self::Sale(ServiceAction::CreateFlashSale) => "create_flash_sale",
        }
    }
}

/// Routes events to the CRUD translators and the stock decrement coordinator.
#[derive(Clone, Debug, Default)]
pub struct CommandRouter {
    sales: StockDecrementCoordinator,
}

impl CommandRouter {
    /// Router handing sales to `sales`.
    #[must_use]
    pub const fn new(sales: StockDecrementCoordinator) -> Self {
        Self { sales }
    }

    /// Pick the handler for `event`.
    ///
    /// An `update` whose service action is not a recognised sale action is a
    /// generic update.
    ///
    /// # Errors
    ///
    /// [`CommandError::UnknownAction`] if the primary action is not
    /// `insert`, `update` or `delete`.
    pub fn classify(event: &DomainEvent) -> Result<CommandKind, CommandError> {
        let action = EventAction::parse(&event.action)
            .ok_or_else(|| CommandError::UnknownAction(event.action.clone()))?;

        Ok(match action {
            EventAction::Insert => CommandKind::Insert,
            EventAction::Delete => CommandKind::Delete,
            EventAction::Update => event
                .service_action
                .as_deref()
                .and_then(ServiceAction::parse)
                .map_or(CommandKind::Update, CommandKind::Sale),
        })
    }

    /// Handle `event` and build its response.
    pub async fn dispatch(
        &self,
        store: &dyn RecordStore,
        locks: &dyn LockCoordinator,
        event: &DomainEvent,
    ) -> CommandResponse {
        let started = Instant::now();

        let (label, outcome) = match Self::classify(event) {
            Ok(kind) => {
                tracing::debug!(
                    event_id = %event.event_id,
                    correlation_id = %event.correlation_id,
                    action = kind.label(),
                    "Dispatching command"
                );
                (kind.label(), self.run(kind, store, locks, &event.data).await)
            }
            Err(err) => ("unknown", Err(err)),
        };

        let response = ResponseEmitter::respond(event, outcome);
        let result = if response.is_error() { "error" } else { "ok" };
        CommandMetrics::record_command(label, result, started.elapsed());
        response
    }

    async fn run(
        &self,
        kind: CommandKind,
        store: &dyn RecordStore,
        locks: &dyn LockCoordinator,
        data: &[u8],
    ) -> Result<Vec<u8>, CommandError> {
        match kind {
            CommandKind::Insert => handlers::insert(store, data).await,
            CommandKind::Update => handlers::update(store, data).await,
            CommandKind::Delete => handlers::delete(store, data).await,
            CommandKind::Sale(_) => self.sales.handle(store, locks, data).await,
        }
    }
}
