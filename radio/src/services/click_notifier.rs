//! Click notifier (§4.12): fire-and-forget notification to the upstream
//! directory's click-counting endpoint. Never blocks the client response
//! and never surfaces a failure beyond a warning log line.

use reqwest::Client;

pub fn notify(client: Client, host: String, station_id: String) {
    tokio::spawn(async move {
        let url = format!("{}/json/url/{}", host.trim_end_matches('/'), station_id);
        match client.get(&url).send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(status = %response.status(), station_id, "click notification rejected upstream");
            }
            Err(err) => {
                tracing::warn!(error = %err, station_id, "click notification failed");
            }
            _ => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawns_without_panicking_on_unreachable_host() {
        let client = Client::new();
        notify(client, "https://127.0.0.1:1".to_string(), "station-1".to_string());
    }
}
