//! Bounded decode look-ahead.
//!
//! Sequential playback knows which frames it will ask for next; a [`Prefetcher`]
//! resolves them on a worker thread while the current frame renders. The request
//! channel is bounded, so a slow decoder applies backpressure instead of ballooning
//! memory. Unrequested lookups fall through to the inner resolver synchronously, so a
//! prefetcher is always a drop-in [`SourceResolver`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::exec::source::{ResolvedSource, SourceResolver};
use crate::timeline::AssetRef;

type RequestKey = (String, u64);

fn request_key(asset: &AssetRef, time_s: f64) -> RequestKey {
    (asset.0.clone(), time_s.to_bits())
}

/// Look-ahead wrapper around a [`SourceResolver`].
pub struct Prefetcher {
    inner: Arc<dyn SourceResolver>,
    ready: Arc<Mutex<HashMap<RequestKey, Option<ResolvedSource>>>>,
    requests: Option<Sender<(AssetRef, f64)>>,
    worker: Option<JoinHandle<()>>,
}

impl Prefetcher {
    /// Wrap `inner`, resolving up to `look_ahead` queued requests ahead of playback.
    pub fn new(inner: Arc<dyn SourceResolver>, look_ahead: usize) -> Self {
        let (tx, rx): (Sender<(AssetRef, f64)>, Receiver<(AssetRef, f64)>) =
            bounded(look_ahead.max(1));
        let ready: Arc<Mutex<HashMap<RequestKey, Option<ResolvedSource>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let worker_inner = Arc::clone(&inner);
        let worker_ready = Arc::clone(&ready);
        let worker = std::thread::spawn(move || {
            for (asset, time_s) in rx {
                let resolved = worker_inner.resolve(&asset, time_s);
                if let Ok(mut map) = worker_ready.lock() {
                    map.insert(request_key(&asset, time_s), resolved);
                }
            }
        });

        Self {
            inner,
            ready,
            requests: Some(tx),
            worker: Some(worker),
        }
    }

    /// Queue `asset` at `time_s` for background resolution. Blocks only when the
    /// look-ahead window is already full.
    pub fn request(&self, asset: &AssetRef, time_s: f64) {
        if let Some(tx) = &self.requests {
            // A closed channel means the worker is gone; the synchronous path covers it.
            let _ = tx.send((asset.clone(), time_s));
        }
    }
}

impl SourceResolver for Prefetcher {
    fn resolve(&self, asset: &AssetRef, time_s: f64) -> Option<ResolvedSource> {
        let key = request_key(asset, time_s);
        if let Ok(mut map) = self.ready.lock()
            && let Some(resolved) = map.remove(&key)
        {
            return resolved;
        }
        self.inner.resolve(asset, time_s)
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        // Closing the channel ends the worker's receive loop.
        self.requests.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
