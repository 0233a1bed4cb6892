//! The request-dispatch envelope.
//!
//! A request carries the database blob URL, optional assume-role
//! parameters, and exactly one action field out of six commands and two
//! queries. Commands return an empty response; a query fills the response
//! field paralleling its request field. Teardown (database backup and
//! upload) always runs, even when the action failed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, Instrument};

use baler_core::credentials::{AssumeRole, CredentialBroker};
use baler_core::storage::StorageBackend;

use crate::commands::{
    LoadInventory, PlanNewObjects, PutObjectSet, TakeInventory, UpdateObjectsState,
    WriteDestinationObject,
};
use crate::container::Container;
use crate::error::{Error, Result};
use crate::queries::{
    GetSourceStats, GetSourceStatsOutput, ListObjectsByState, ListObjectsByStateOutput,
};

/// A single request: the database blob URL, optional assume-role
/// parameters, and exactly one action.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// URL of the database blob (`s3://…`), or a `file://` path for local
    /// operation.
    pub db_url: String,

    /// ARN of a role to assume for object access.
    #[serde(default)]
    pub assume_role: Option<String>,
    /// External id presented alongside the assumed role.
    #[serde(default)]
    pub external_id: Option<String>,

    /// Create or update an object set.
    #[serde(default)]
    pub put_object_set: Option<PutObjectSet>,
    /// Capture a source listing as an inventory stream.
    #[serde(default)]
    pub take_inventory: Option<TakeInventory>,
    /// Reconcile an inventory stream into the row store.
    #[serde(default)]
    pub load_inventory: Option<LoadInventory>,
    /// Plan NEW sources into destination blocks.
    #[serde(default)]
    pub plan_new_objects: Option<PlanNewObjects>,
    /// Materialize one planned block in the remote store.
    #[serde(default)]
    pub write_destination_object: Option<WriteDestinationObject>,
    /// Apply operator-driven state transitions.
    #[serde(default)]
    pub update_object_state: Option<UpdateObjectsState>,
    /// List rows by state, paginated.
    #[serde(default)]
    pub list_objects_by_state: Option<ListObjectsByState>,
    /// Aggregate statistics over a set's sources.
    #[serde(default)]
    pub get_source_stats: Option<GetSourceStats>,
}

/// The response to a request. Command actions leave both fields null.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Response {
    /// Output of `list_objects_by_state`, when that action ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_objects_by_state: Option<ListObjectsByStateOutput>,
    /// Output of `get_source_stats`, when that action ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub get_source_stats: Option<GetSourceStatsOutput>,
}

enum Action<'r> {
    PutObjectSet(&'r PutObjectSet),
    TakeInventory(&'r TakeInventory),
    LoadInventory(&'r LoadInventory),
    PlanNewObjects(&'r PlanNewObjects),
    WriteDestinationObject(&'r WriteDestinationObject),
    UpdateObjectsState(&'r UpdateObjectsState),
    ListObjectsByState(&'r ListObjectsByState),
    GetSourceStats(&'r GetSourceStats),
}

impl Action<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::PutObjectSet(_) => "put_object_set",
            Self::TakeInventory(_) => "take_inventory",
            Self::LoadInventory(_) => "load_inventory",
            Self::PlanNewObjects(_) => "plan_new_objects",
            Self::WriteDestinationObject(_) => "write_destination_object",
            Self::UpdateObjectsState(_) => "update_object_state",
            Self::ListObjectsByState(_) => "list_objects_by_state",
            Self::GetSourceStats(_) => "get_source_stats",
        }
    }
}

impl Request {
    /// The single action this request selects.
    fn action(&self) -> Result<Action<'_>> {
        let mut found = None;
        let mut count = 0usize;

        if let Some(a) = &self.put_object_set {
            found = Some(Action::PutObjectSet(a));
            count += 1;
        }
        if let Some(a) = &self.take_inventory {
            found = Some(Action::TakeInventory(a));
            count += 1;
        }
        if let Some(a) = &self.load_inventory {
            found = Some(Action::LoadInventory(a));
            count += 1;
        }
        if let Some(a) = &self.plan_new_objects {
            found = Some(Action::PlanNewObjects(a));
            count += 1;
        }
        if let Some(a) = &self.write_destination_object {
            found = Some(Action::WriteDestinationObject(a));
            count += 1;
        }
        if let Some(a) = &self.update_object_state {
            found = Some(Action::UpdateObjectsState(a));
            count += 1;
        }
        if let Some(a) = &self.list_objects_by_state {
            found = Some(Action::ListObjectsByState(a));
            count += 1;
        }
        if let Some(a) = &self.get_source_stats {
            found = Some(Action::GetSourceStats(a));
            count += 1;
        }

        match (found, count) {
            (Some(action), 1) => Ok(action),
            _ => Err(Error::invalid_input(
                "invalid request, operation could not be determined",
            )),
        }
    }
}

/// Dispatches requests: validates the action, wires dependencies, invokes
/// it, and always tears resources down.
pub struct Handler {
    storage: Arc<dyn StorageBackend>,
    broker: Arc<dyn CredentialBroker>,
}

impl Handler {
    /// Creates a handler over the ambient storage backend and credential
    /// broker.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, broker: Arc<dyn CredentialBroker>) -> Self {
        Self { storage, broker }
    }

    /// Handles one request end to end.
    ///
    /// # Errors
    ///
    /// Returns an invalid-input error when zero or several action fields
    /// are set; otherwise the action's own error. Teardown runs either
    /// way; when the action succeeded but teardown failed, the teardown
    /// error is returned.
    pub async fn handle(&self, request: &Request) -> Result<Response> {
        let action = request.action()?;
        let span = tracing::info_span!("action", name = action.name());

        let assume_role = request.assume_role.as_ref().map(|arn| AssumeRole {
            role_arn: arn.clone(),
            external_id: request.external_id.clone(),
        });
        let mut cx = Container::new(
            self.storage.clone(),
            self.broker.clone(),
            request.db_url.clone(),
            assume_role,
        );

        // A canceled action is dropped mid-flight; teardown below still
        // runs and uploads whatever earlier transactions committed.
        let result = tokio::select! {
            result = Self::dispatch(&action, &mut cx).instrument(span) => result,
            _ = tokio::signal::ctrl_c() => Err(Error::Core(baler_core::Error::Canceled(
                "interrupted".to_string(),
            ))),
        };

        info!("starting teardown");
        let teardown = cx.close().await;
        info!(ok = teardown.is_ok(), "completed teardown");

        match result {
            Ok(response) => {
                teardown?;
                Ok(response)
            }
            Err(err) => {
                if let Err(teardown_err) = teardown {
                    error!(error = %teardown_err, "teardown failed after action error");
                }
                Err(err)
            }
        }
    }

    async fn dispatch(action: &Action<'_>, cx: &mut Container) -> Result<Response> {
        info!("running action");
        let mut response = Response::default();
        match action {
            Action::PutObjectSet(a) => a.run(cx).await?,
            Action::TakeInventory(a) => a.run(cx).await?,
            Action::LoadInventory(a) => a.run(cx).await?,
            Action::PlanNewObjects(a) => a.run(cx).await?,
            Action::WriteDestinationObject(a) => a.run(cx).await?,
            Action::UpdateObjectsState(a) => a.run(cx).await?,
            Action::ListObjectsByState(a) => {
                response.list_objects_by_state = Some(a.run(cx).await?);
            }
            Action::GetSourceStats(a) => {
                response.get_source_stats = Some(a.run(cx).await?);
            }
        }
        Ok(response)
    }
}
