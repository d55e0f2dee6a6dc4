use super::{collate, Batch, SampleBuilder};
use crate::common::*;
use std::any::Any;

#[derive(Debug, Clone)]
pub struct DataLoaderInit {
    pub batch_size: NonZeroUsize,
    /// Builds samples in the calling thread if zero.
    pub num_workers: usize,
    /// The bounded queue length per worker.
    pub prefetch: NonZeroUsize,
    pub shuffle: bool,
    pub seed: u64,
}

impl DataLoaderInit {
    pub fn build(self, builder: Arc<SampleBuilder>, indices: Vec<usize>) -> Result<DataLoader> {
        let Self {
            batch_size,
            num_workers,
            prefetch,
            shuffle,
            seed,
        } = self;

        if let Some(&index) = indices.iter().find(|&&index| index >= builder.len()) {
            bail!(
                "sample index {} out of range, the dataset has {} images",
                index,
                builder.len()
            );
        }

        Ok(DataLoader {
            builder,
            indices,
            batch_size: batch_size.get(),
            num_workers,
            prefetch: prefetch.get(),
            shuffle,
            seed,
        })
    }
}

/// Iterates batches of samples over a subset of the dataset.
#[derive(Debug, Clone)]
pub struct DataLoader {
    builder: Arc<SampleBuilder>,
    indices: Vec<usize>,
    batch_size: usize,
    num_workers: usize,
    prefetch: usize,
    shuffle: bool,
    seed: u64,
}

impl DataLoader {
    pub fn num_samples(&self) -> usize {
        self.indices.len()
    }

    pub fn num_batches(&self) -> usize {
        (self.indices.len() + self.batch_size - 1) / self.batch_size
    }

    /// Starts one pass over the data. Batch order depends only on the seed and the epoch.
    pub fn epoch(&self, epoch: usize) -> Result<BatchIter> {
        let mut indices = self.indices.clone();
        if self.shuffle {
            let mut rng = StdRng::seed_from_u64(self.seed ^ (epoch as u64).rotate_left(32));
            indices.shuffle(&mut rng);
        }
        let chunks: Vec<Vec<usize>> = indices
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let num_batches = chunks.len();

        if self.num_workers == 0 {
            return Ok(BatchIter {
                source: BatchSource::Inline {
                    builder: self.builder.clone(),
                    chunks: chunks.into_iter(),
                },
                epoch,
                position: 0,
                num_batches,
                done: false,
            });
        }

        let num_workers = self.num_workers.min(num_batches.max(1));
        let mut receivers = vec![];
        let mut handles = vec![];

        for worker_index in 0..num_workers {
            let (tx, rx) = flume::bounded(self.prefetch);
            let builder = self.builder.clone();
            let worker_chunks: Vec<_> = chunks
                .iter()
                .skip(worker_index)
                .step_by(num_workers)
                .cloned()
                .collect();

            let handle = thread::Builder::new()
                .name(format!("data-worker-{}", worker_index))
                .spawn(move || {
                    for chunk in worker_chunks {
                        let result = build_batch(&builder, &chunk, epoch);
                        let failed = result.is_err();
                        if tx.send(result).is_err() || failed {
                            break;
                        }
                    }
                })
                .with_context(|| format!("unable to spawn data worker {}", worker_index))?;

            receivers.push(rx);
            handles.push(handle);
        }

        Ok(BatchIter {
            source: BatchSource::Workers { receivers, handles },
            epoch,
            position: 0,
            num_batches,
            done: false,
        })
    }
}

/// The batches of one epoch. It stops after the first error.
#[derive(Debug)]
pub struct BatchIter {
    source: BatchSource,
    epoch: usize,
    position: usize,
    num_batches: usize,
    done: bool,
}

#[derive(Debug)]
enum BatchSource {
    Inline {
        builder: Arc<SampleBuilder>,
        chunks: std::vec::IntoIter<Vec<usize>>,
    },
    Workers {
        receivers: Vec<flume::Receiver<Result<Batch>>>,
        handles: Vec<thread::JoinHandle<()>>,
    },
}

impl Iterator for BatchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.position >= self.num_batches {
            return None;
        }

        let result = match &mut self.source {
            BatchSource::Inline { builder, chunks } => {
                let chunk = chunks.next()?;
                build_batch(builder, &chunk, self.epoch)
            }
            BatchSource::Workers { receivers, .. } => {
                let worker_index = self.position % receivers.len();
                receivers[worker_index].recv().unwrap_or_else(|_| {
                    Err(format_err!(
                        "data worker {} terminated unexpectedly",
                        worker_index
                    ))
                })
            }
        };

        self.position += 1;
        self.done = result.is_err();
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.num_batches - self.position;
        (0, Some(remaining))
    }
}

impl Drop for BatchIter {
    fn drop(&mut self) {
        if let BatchSource::Workers { receivers, handles } = &mut self.source {
            // disconnect the channels so that blocked workers return
            receivers.clear();
            handles.drain(..).enumerate().for_each(|(index, handle)| {
                if let Err(payload) = handle.join() {
                    warn!(
                        "data worker {} panicked: {}",
                        index,
                        panic_message(payload.as_ref())
                    );
                }
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic payload"
    }
}

fn build_batch(builder: &SampleBuilder, chunk: &[usize], epoch: usize) -> Result<Batch> {
    let samples: Vec<_> = chunk
        .iter()
        .map(|&index| builder.build_nth(index, epoch))
        .try_collect()?;
    Ok(collate(samples))
}
