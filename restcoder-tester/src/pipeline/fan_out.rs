//! Fail-fast fan-out for provisioning units
//!
//! Units of one stage run concurrently. The stage fails as soon as any unit
//! fails, but sibling units are not cancelled: they keep running so that
//! every resource they create still lands in the rollback ledger. Their
//! tasks are parked in [`Stragglers`] and awaited before rollback.

use std::future::Future;
use std::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};

use crate::error::PipelineError;

/// Units still in flight after their stage failed
#[derive(Default)]
pub struct Stragglers {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Stragglers {
    pub fn new() -> Self {
        Self::default()
    }

    fn park(&self, handle: JoinHandle<()>) {
        self.handles.lock().unwrap().push(handle);
    }

    /// Waits until every parked unit has finished
    pub async fn wait(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// Runs all units concurrently and returns their outputs in input order
///
/// # Returns
/// All outputs, or the first error observed
pub async fn try_join_all<T, F>(units: Vec<F>, stragglers: &Stragglers) -> Result<Vec<T>, PipelineError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, PipelineError>> + Send + 'static,
{
    let count = units.len();
    let mut set = JoinSet::new();
    for (index, unit) in units.into_iter().enumerate() {
        set.spawn(async move { (index, unit.await) });
    }

    let mut outputs: Vec<Option<T>> = (0..count).map(|_| None).collect();

    while let Some(joined) = set.join_next().await {
        let failure = match joined {
            Ok((index, Ok(output))) => {
                outputs[index] = Some(output);
                continue;
            }
            Ok((_, Err(e))) => e,
            Err(e) => PipelineError::Internal(anyhow::anyhow!("provisioning task failed: {}", e)),
        };

        if !set.is_empty() {
            stragglers.park(tokio::spawn(async move {
                while set.join_next().await.is_some() {}
            }));
        }
        return Err(failure);
    }

    Ok(outputs.into_iter().flatten().collect())
}
