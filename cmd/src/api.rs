// Copyright 2022 Zinc Labs Inc. and Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;

use cardpatrol::gauge::{GaugeSink, PatrolMetrics};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub metric: String,
    pub label: String,
}

pub async fn metrics(State(metrics): State<Arc<PatrolMetrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => Ok(([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body)),
        Err(err) => {
            tracing::error!(error = %err, "failed to render metrics");
            Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
        }
    }
}

/// Zeroes the exploding-label gauge of one metric/label pair, once its
/// suppression has been lifted.
pub async fn reset(
    State(metrics): State<Arc<PatrolMetrics>>,
    Query(req): Query<ResetRequest>,
) -> StatusCode {
    metrics.set(&req.metric, &req.label, 0.0).await;
    tracing::info!(metric = %req.metric, label = %req.label, "reset exploding label gauge");
    StatusCode::OK
}
