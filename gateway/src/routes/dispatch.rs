//! `POST /dispatch`: the ambient HTTP surface a caller uses to invoke the
//! dispatcher directly, standing in for an out-of-scope natural-language
//! front-end.

use std::time::Duration;

use axum::extract::State;
use axum::Json;

use common::model::{DispatchRequest, TaskResult};

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use crate::state::SharedState;

pub async fn dispatch(
    State(state): State<SharedState>,
    Json(body): Json<DispatchRequest>,
) -> Result<Json<TaskResult>, DispatchError> {
    let dispatcher = Dispatcher::new(&state.keystore, &state.sessions, &state.pending);
    let result = dispatcher
        .dispatch(
            &body.agent_id,
            &body.task,
            body.args,
            Duration::from_secs(body.timeout_secs),
        )
        .await?;
    Ok(Json(result))
}
