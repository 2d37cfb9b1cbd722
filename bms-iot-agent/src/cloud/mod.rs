//! Cloud HTTP: pushes the controller inventory to the URL supplied by a
//! configuration upload command.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use serde_json::json;

use crate::persistence::inventory::ControllerSpec;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs `{"config": …}` with the bearer token. Returns whether the cloud
/// accepted it; transport failures and non-2xx answers are logged and
/// reported as `false`. The next configuration upload is the retry unit.
pub async fn upload_config(url: &str, jwt_token: &str, inventory: Vec<ControllerSpec>) -> bool {
    let url = url.to_string();
    let token = jwt_token.to_string();

    let outcome = tokio::task::spawn_blocking(move || {
        let connector = match native_tls::TlsConnector::new() {
            Ok(connector) => Arc::new(connector),
            Err(e) => {
                error!("Unable to build TLS connector for config upload: {e}");
                return false;
            }
        };
        let agent = ureq::AgentBuilder::new()
            .tls_connector(connector)
            .timeout(REQUEST_TIMEOUT)
            .build();

        let response = agent
            .post(&url)
            .set("Content-Type", "application/json")
            .set("Authorization", &format!("Bearer {token}"))
            .send_json(json!({ "config": inventory }));

        match response {
            Ok(response) => {
                info!("Config upload accepted with status {}", response.status());
                true
            }
            Err(ureq::Error::Status(status, _)) => {
                error!("Config upload rejected with status {status}");
                false
            }
            Err(e) => {
                error!("Config upload failed: {e}");
                false
            }
        }
    })
    .await;

    outcome.unwrap_or_else(|e| {
        error!("Config upload task failed: {e}");
        false
    })
}
