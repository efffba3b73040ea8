use std::error::Error;
use std::time::Duration;

use secrecy::SecretString;
use sessionsync_sdk::stream::session::{SessionConfig, StreamSession};

fn main() -> Result<(), Box<dyn Error>> {
    let base_url =
        std::env::var("SESSIONSYNC_BASE_URL").unwrap_or_else(|_| "http://localhost:8000".into());
    let token = std::env::var("SESSIONSYNC_TOKEN").unwrap_or_else(|_| "REPLACE_WITH_TOKEN".into());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let session = StreamSession::new(SessionConfig::new(base_url))?;

        session.on_connection_change(|status| {
            println!("connection status: {status:?}");
        });
        session.on("notification", |payload| {
            println!("notification: {payload}");
        });
        session.on("session_update", |payload| {
            println!("session update: {payload}");
        });
        session.on("connection_failed", |payload| {
            println!("gave up reconnecting: {payload}");
        });

        let report = session.test_connection(SecretString::new(token.clone())).await;
        println!("probe: success={} message={}", report.success, report.message);

        session.connect(SecretString::new(token));
        tokio::time::sleep(Duration::from_secs(30)).await;
        session.disconnect();

        Ok::<(), Box<dyn Error>>(())
    })
}
