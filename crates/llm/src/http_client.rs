use std::{sync::OnceLock, time::Duration};

use reqwest::Client;

/// Returns a shared HTTP client with connection pooling enabled.
///
/// One pool per process; all provider adapters clone handles to it. Requests
/// carry their own deadlines, so no total timeout is set here.
pub(crate) fn http_client() -> Client {
    static CLIENT: OnceLock<Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .pool_idle_timeout(Duration::from_secs(90))
                .build()
                .unwrap_or_else(|_| Client::new())
        })
        .clone()
}
