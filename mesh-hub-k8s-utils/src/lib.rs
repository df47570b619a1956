use std::fmt::{Debug, Display};
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::serde::de::DeserializeOwned;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Resource};
use thiserror::Error;
use tracing::{error, trace, warn};

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to create store: {0}")]
    StoreCreation(String),

    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Starts a reflector for `api` in the background and waits for its initial list.
pub async fn create_store<K>(api: Api<K>, timeout: Option<Duration>) -> Result<Store<K>>
where
    K: Resource + Send + Clone + Debug + DeserializeOwned + Sync + 'static,
    <K as Resource>::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    let (store, writer) = reflector::store();

    let stream = watcher(api, watcher::Config::default().any_semantic())
        .default_backoff()
        .reflect(writer)
        .for_each(|res| async move {
            match res {
                Ok(ev) => trace!("received event: {:?}", ev),
                Err(e) => {
                    error!(%e, "unexpected error with stream")
                }
            }
        });

    tokio::spawn(stream);
    let wait = store.wait_until_ready();
    if let Some(timeout) = timeout {
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::StoreCreation("timed out waiting for store".into()))?
            .map_err(|e| Error::StoreCreation(e.to_string()))?;
    } else {
        wait.await
            .map_err(|e| Error::StoreCreation(e.to_string()))?;
    }
    Ok(store)
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

/// Exponential backoff schedule for bounded retries.
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    pub initial_delay: Duration,
    pub factor: u32,
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        // 100ms doubling over 7 attempts, a little over 6s of sleeping in total
        Self {
            initial_delay: Duration::from_millis(100),
            factor: 2,
            max_attempts: 7,
        }
    }
}

impl Backoff {
    /// Delays slept between consecutive attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut delay = self.initial_delay;
        (1..self.max_attempts).map(move |_| {
            let current = delay;
            delay *= self.factor;
            current
        })
    }
}

/// Runs `operation` until it succeeds or `backoff.max_attempts` is reached,
/// returning the last error in the latter case.
pub async fn retry_with_backoff<F, Fut, T, E>(
    backoff: &Backoff,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Display,
{
    let mut delays = backoff.delays();
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(t) => return Ok(t),
            Err(e) => {
                let Some(delay) = delays.next() else {
                    error!(operation = %operation_name, attempt, error = %e, "giving up after max attempts");
                    return Err(e);
                };
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
