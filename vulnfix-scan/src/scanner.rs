//! Batch scanner: splits purls into API-sized chunks and keeps a bounded
//! number of chunk-streams in flight, yielding records as they arrive.

use crate::error::ScanError;
use crate::source::{AlertSource, ChunkStream};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, FuturesUnordered, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vulnfix_types::alert::ArtifactRecord;

/// Maximum purls per API request.
pub const BATCH_SIZE: usize = 25;

pub const DEFAULT_CONCURRENCY: usize = 50;

/// What happens to the rest of a scan when one chunk fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanErrorMode {
    /// Yield the error and end the scan.
    #[default]
    Propagate,
    /// Log the failed chunk and keep going.
    SkipAndContinue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    pub concurrency: usize,
    pub error_mode: ScanErrorMode,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            error_mode: ScanErrorMode::Propagate,
        }
    }
}

enum Step {
    Opened {
        result: Result<ChunkStream, ScanError>,
        token: CancellationToken,
    },
    Next {
        item: Option<Result<ArtifactRecord, ScanError>>,
        rest: ChunkStream,
        token: CancellationToken,
    },
}

struct ScanState {
    source: Arc<dyn AlertSource>,
    chunks: VecDeque<Vec<String>>,
    pending: FuturesUnordered<BoxFuture<'static, Step>>,
    root: CancellationToken,
    options: ScanOptions,
    finished: bool,
}

impl ScanState {
    fn refill(&mut self) {
        while self.pending.len() < self.options.concurrency.max(1) {
            let Some(chunk) = self.chunks.pop_front() else {
                break;
            };
            let source = Arc::clone(&self.source);
            let token = self.root.child_token();
            self.pending.push(
                async move {
                    let result = source.open_chunk(chunk, token.clone()).await;
                    Step::Opened { result, token }
                }
                .boxed(),
            );
        }
    }

    fn poll_next_of(&mut self, rest: ChunkStream, token: CancellationToken) {
        self.pending.push(
            rest.into_future()
                .map(move |(item, rest)| Step::Next { item, rest, token })
                .boxed(),
        );
    }

    /// Returns the error to yield, or `None` when the scan should carry on.
    fn chunk_failed(&mut self, err: ScanError) -> Option<ScanError> {
        match self.options.error_mode {
            ScanErrorMode::Propagate => {
                self.root.cancel();
                self.pending.clear();
                self.chunks.clear();
                self.finished = true;
                Some(err)
            }
            ScanErrorMode::SkipAndContinue => {
                warn!(error = %err, "alert chunk failed; continuing with remaining chunks");
                self.refill();
                None
            }
        }
    }

    async fn advance(&mut self) -> Option<Result<ArtifactRecord, ScanError>> {
        loop {
            if self.finished {
                return None;
            }
            let polled = tokio::select! {
                biased;
                _ = self.root.cancelled() => None,
                step = self.pending.next() => Some(step),
            };
            let Some(step) = polled else {
                self.finished = true;
                return None;
            };
            let Some(step) = step else {
                debug!("alert scan complete");
                return None;
            };

            match step {
                Step::Opened { result: Ok(rest), token } => self.poll_next_of(rest, token),
                Step::Opened { result: Err(err), token } => {
                    drop(token);
                    if let Some(err) = self.chunk_failed(err) {
                        return Some(Err(err));
                    }
                }
                Step::Next { item: Some(Ok(record)), rest, token } => {
                    self.poll_next_of(rest, token);
                    return Some(Ok(record));
                }
                Step::Next { item: Some(Err(err)), rest, token } => {
                    drop(rest);
                    token.cancel();
                    if let Some(err) = self.chunk_failed(err) {
                        return Some(Err(err));
                    }
                }
                Step::Next { item: None, rest, token } => {
                    drop(rest);
                    drop(token);
                    self.refill();
                }
            }
        }
    }
}

/// Streams artifact records for `purls`.
///
/// At most `options.concurrency` chunk-streams (opening or reading) are
/// pending at any time. The returned stream is finite and ends early when
/// `cancel` fires.
pub fn scan(
    source: Arc<dyn AlertSource>,
    purls: Vec<String>,
    options: ScanOptions,
    cancel: &CancellationToken,
) -> impl Stream<Item = Result<ArtifactRecord, ScanError>> + Send + 'static {
    let chunks: VecDeque<Vec<String>> = purls
        .chunks(BATCH_SIZE)
        .map(<[String]>::to_vec)
        .collect();
    debug!(
        purls = purls.len(),
        chunks = chunks.len(),
        concurrency = options.concurrency,
        "starting alert scan"
    );

    let mut state = ScanState {
        source,
        chunks,
        pending: FuturesUnordered::new(),
        root: cancel.child_token(),
        options,
        finished: false,
    };
    state.refill();

    stream::unfold(state, |mut state| async move {
        let item = state.advance().await?;
        Some((item, state))
    })
}

/// Drains a scan into records keyed by purl.
pub async fn collect_alerts<S>(scan: S) -> Result<BTreeMap<String, ArtifactRecord>, ScanError>
where
    S: Stream<Item = Result<ArtifactRecord, ScanError>>,
{
    let mut out = BTreeMap::new();
    futures::pin_mut!(scan);
    while let Some(record) = scan.next().await {
        let record = record?;
        out.insert(record.purl().to_string(), record);
    }
    Ok(out)
}
