use std::fmt;
use std::sync::Arc;

use cairn_store::{BlobData, BlobStore};
use cairn_types::{BlobHash, CancellationToken};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// Sizing of a [`BlobPipeline`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Number of worker tasks reading blobs concurrently.
    pub max_concurrency: usize,
    /// Requests that may wait in the queue before `submit` blocks.
    pub queue_capacity: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            queue_capacity: 256,
        }
    }
}

impl PipelineOptions {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.max_concurrency == 0 {
            return Err(PipelineError::InvalidOptions(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(PipelineError::InvalidOptions(
                "queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// A completed read.
pub struct BlobResponse<T> {
    pub hash: BlobHash,
    /// Whatever the caller passed to [`BlobPipeline::submit`].
    pub payload: T,
    pub result: PipelineResult<BlobData>,
}

impl<T: fmt::Debug> fmt::Debug for BlobResponse<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobResponse")
            .field("hash", &self.hash)
            .field("payload", &self.payload)
            .field("ok", &self.result.is_ok())
            .finish()
    }
}

struct Request<T> {
    hash: BlobHash,
    payload: T,
}

/// Bounded queue of blob reads served by a fixed pool of workers.
///
/// Must be created inside a tokio runtime. Call
/// [`finish_submitting`](Self::finish_submitting) once every request is in,
/// otherwise [`next`](Self::next) waits forever after the last response.
pub struct BlobPipeline<T> {
    requests: Option<mpsc::Sender<Request<T>>>,
    responses: mpsc::UnboundedReceiver<BlobResponse<T>>,
    workers: Vec<JoinHandle<()>>,
    submitted: u64,
    received: u64,
}

impl<T: Send + 'static> BlobPipeline<T> {
    pub fn new(
        store: Arc<dyn BlobStore>,
        options: PipelineOptions,
        cancel: CancellationToken,
    ) -> PipelineResult<Self> {
        options.validate()?;
        let (request_tx, request_rx) = mpsc::channel(options.queue_capacity);
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let request_rx = Arc::new(Mutex::new(request_rx));

        let workers = (0..options.max_concurrency)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    store.clone(),
                    request_rx.clone(),
                    response_tx.clone(),
                    cancel.clone(),
                ))
            })
            .collect();

        debug!(
            workers = options.max_concurrency,
            capacity = options.queue_capacity,
            "blob pipeline started"
        );
        Ok(Self {
            requests: Some(request_tx),
            responses: response_rx,
            workers,
            submitted: 0,
            received: 0,
        })
    }

    /// Queue a read. Waits while the request queue is full.
    pub async fn submit(&mut self, hash: BlobHash, payload: T) -> PipelineResult<()> {
        let sender = self.requests.as_ref().ok_or(PipelineError::Closed)?;
        sender
            .send(Request { hash, payload })
            .await
            .map_err(|_| PipelineError::Closed)?;
        self.submitted += 1;
        Ok(())
    }

    /// Close the request queue. Workers drain what is queued and then exit.
    pub fn finish_submitting(&mut self) {
        self.requests = None;
    }

    /// Next completed read, or `None` once the queue is closed and drained.
    pub async fn next(&mut self) -> Option<BlobResponse<T>> {
        let response = self.responses.recv().await?;
        self.received += 1;
        Some(response)
    }

    /// A completed read if one is ready, without waiting.
    pub fn try_next(&mut self) -> Option<BlobResponse<T>> {
        let response = self.responses.try_recv().ok()?;
        self.received += 1;
        Some(response)
    }

    /// Requests submitted but not yet handed back.
    pub fn in_flight(&self) -> u64 {
        self.submitted - self.received
    }
}

impl<T> Drop for BlobPipeline<T> {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

impl<T> fmt::Debug for BlobPipeline<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobPipeline")
            .field("workers", &self.workers.len())
            .field("open", &self.requests.is_some())
            .field("submitted", &self.submitted)
            .field("received", &self.received)
            .finish()
    }
}

async fn run_worker<T: Send + 'static>(
    id: usize,
    store: Arc<dyn BlobStore>,
    requests: Arc<Mutex<mpsc::Receiver<Request<T>>>>,
    responses: mpsc::UnboundedSender<BlobResponse<T>>,
    cancel: CancellationToken,
) {
    loop {
        let request = requests.lock().await.recv().await;
        let Some(Request { hash, payload }) = request else {
            break;
        };
        let result = if cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            let store = store.clone();
            match tokio::task::spawn_blocking(move || store.fetch(&hash)).await {
                Ok(read) => read.map_err(PipelineError::from),
                Err(e) => Err(PipelineError::Worker(e.to_string())),
            }
        };
        if responses
            .send(BlobResponse {
                hash,
                payload,
                result,
            })
            .is_err()
        {
            break;
        }
    }
    debug!(worker = id, "blob pipeline worker exiting");
}

#[cfg(test)]
mod tests {
    use cairn_store::{BlobType, InMemoryBlobStore, StoreError};

    use super::*;

    fn populated(count: usize) -> (Arc<InMemoryBlobStore>, Vec<BlobHash>) {
        let store = Arc::new(InMemoryBlobStore::new());
        let hashes = (0..count)
            .map(|i| {
                store
                    .write(BlobData::new(
                        BlobType::RAW,
                        format!("blob {i}").into_bytes(),
                        Vec::new(),
                    ))
                    .unwrap()
            })
            .collect();
        (store, hashes)
    }

    async fn drain<T: Send + 'static>(pipeline: &mut BlobPipeline<T>) -> Vec<BlobResponse<T>> {
        let mut out = Vec::new();
        while let Some(response) = pipeline.next().await {
            out.push(response);
        }
        out
    }

    // ----------------------------------------------------------------------
    // Reads
    // ----------------------------------------------------------------------

    #[tokio::test]
    async fn every_request_gets_its_payload_back() {
        let (store, hashes) = populated(40);
        let mut pipeline = BlobPipeline::new(
            store,
            PipelineOptions {
                max_concurrency: 4,
                queue_capacity: 3,
            },
            CancellationToken::none(),
        )
        .unwrap();

        let mut responses = Vec::new();
        for (i, hash) in hashes.iter().enumerate() {
            pipeline.submit(*hash, i).await.unwrap();
            while let Some(response) = pipeline.try_next() {
                responses.push(response);
            }
        }
        pipeline.finish_submitting();
        responses.extend(drain(&mut pipeline).await);
        assert_eq!(pipeline.in_flight(), 0);

        responses.sort_by_key(|r| r.payload);
        assert_eq!(responses.len(), hashes.len());
        for (i, response) in responses.into_iter().enumerate() {
            assert_eq!(response.hash, hashes[i]);
            let blob = response.result.unwrap();
            assert_eq!(&blob.payload[..], format!("blob {i}").as_bytes());
        }
    }

    #[tokio::test]
    async fn missing_blob_fails_only_its_request() {
        let (store, hashes) = populated(2);
        let missing = BlobHash::from_bytes(b"nowhere");
        let mut pipeline =
            BlobPipeline::new(store, PipelineOptions::default(), CancellationToken::none())
                .unwrap();
        pipeline.submit(hashes[0], "a").await.unwrap();
        pipeline.submit(missing, "gone").await.unwrap();
        pipeline.submit(hashes[1], "b").await.unwrap();
        pipeline.finish_submitting();

        let responses = drain(&mut pipeline).await;
        assert_eq!(responses.len(), 3);
        for response in responses {
            if response.payload == "gone" {
                assert!(matches!(
                    response.result,
                    Err(PipelineError::Store(StoreError::NotFound(h))) if h == missing
                ));
            } else {
                assert!(response.result.is_ok());
            }
        }
    }

    // ----------------------------------------------------------------------
    // Lifecycle
    // ----------------------------------------------------------------------

    #[tokio::test]
    async fn cancelled_requests_are_answered_without_reading() {
        let (store, hashes) = populated(5);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut pipeline =
            BlobPipeline::new(store, PipelineOptions::default(), cancel).unwrap();
        for hash in &hashes {
            pipeline.submit(*hash, ()).await.unwrap();
        }
        pipeline.finish_submitting();
        let responses = drain(&mut pipeline).await;
        assert_eq!(responses.len(), 5);
        assert!(responses
            .iter()
            .all(|r| matches!(r.result, Err(PipelineError::Cancelled))));
    }

    #[tokio::test]
    async fn submit_after_finish_is_rejected() {
        let (store, hashes) = populated(1);
        let mut pipeline =
            BlobPipeline::new(store, PipelineOptions::default(), CancellationToken::none())
                .unwrap();
        pipeline.finish_submitting();
        assert!(matches!(
            pipeline.submit(hashes[0], ()).await,
            Err(PipelineError::Closed)
        ));
        assert!(pipeline.next().await.is_none());
    }

    #[tokio::test]
    async fn zero_sized_pools_are_rejected() {
        let store: Arc<dyn BlobStore> = Arc::new(InMemoryBlobStore::new());
        for options in [
            PipelineOptions {
                max_concurrency: 0,
                queue_capacity: 1,
            },
            PipelineOptions {
                max_concurrency: 1,
                queue_capacity: 0,
            },
        ] {
            assert!(matches!(
                BlobPipeline::<()>::new(store.clone(), options, CancellationToken::none()),
                Err(PipelineError::InvalidOptions(_))
            ));
        }
    }
}
