//! Webhook notifications.

use serde_json::{json, Value};
use std::time::Duration;

/// Embed color for the "server online" message.
pub const COLOR_ONLINE: u32 = 0x00FF00;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the JSON body posted to the webhook.
pub fn webhook_payload(title: &str, message: &str, color: u32) -> Value {
    json!({
        "embeds": [{
            "title": title,
            "description": message,
            "color": color,
        }]
    })
}

/// Posts a message to `url`. Blocking; run it on a worker thread.
pub fn send_webhook(url: &str, title: &str, message: &str, color: u32) -> Result<(), reqwest::Error> {
    let client = reqwest::blocking::Client::builder()
        .timeout(WEBHOOK_TIMEOUT)
        .build()?;
    client
        .post(url)
        .json(&webhook_payload(title, message, color))
        .send()?
        .error_for_status()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let payload = webhook_payload("Server is now online", "Realm has started.", COLOR_ONLINE);
        let embed = &payload["embeds"][0];
        assert_eq!(embed["title"], "Server is now online");
        assert_eq!(embed["description"], "Realm has started.");
        assert_eq!(embed["color"], 0x00FF00);
    }

    #[test]
    fn test_unreachable_webhook_is_an_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let url = format!("http://127.0.0.1:{}/hook", port);
        assert!(send_webhook(&url, "t", "m", COLOR_ONLINE).is_err());
    }
}
