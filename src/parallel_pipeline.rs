// THEORY:
// A rotation sweep is 360 independent, CPU-bound jobs per representative image, so
// it parallelizes trivially. `SweepPool` spreads them over a fixed set of workers:
//
// 1.  **Dispatcher**: a single task receives every job and hands them to the workers
//     round-robin, each worker owning its own channel.
// 2.  **Workers**: each worker runs its jobs on the blocking thread pool, so the async
//     runtime threads never spin on pixel work, and answers on the job's `oneshot`.
// 3.  **Ordered results**: callers await the replies in degree order, so the output
//     order never depends on which worker finished first.
//
// Jobs share the pristine image and classwise mask through `Arc`; nothing mutable is
// shared between workers.

use crate::core_modules::mask::ClasswiseMask;
use crate::core_modules::representative_image::RepresentativeImage;
use crate::core_modules::rotation_sweep::{RotatedSample, SWEEP_STEPS, rotate_sample};
use crate::error::{GeometryError, Result, SynthError};
use futures::future::join_all;
use image::RgbImage;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub struct SweepTask {
    pub image: Arc<RgbImage>,
    pub classwise: Arc<ClasswiseMask>,
    pub degrees: u32,
    pub result_sender: oneshot::Sender<Result<RotatedSample, GeometryError>>,
}

pub struct SweepPool {
    task_sender: mpsc::UnboundedSender<SweepTask>,
    workers: Vec<JoinHandle<()>>,
}

impl SweepPool {
    /// Spawns the dispatcher and `n_worker` workers (at least one) on the current runtime.
    pub fn new(n_worker: usize) -> Self {
        let n_worker = n_worker.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<SweepTask>();
        let mut workers = Vec::with_capacity(n_worker + 1);

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) =
            (0..n_worker).map(|_| mpsc::unbounded_channel::<SweepTask>()).unzip();

        // Spawn dispatcher
        workers.push(tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                let _ = worker_senders[worker_idx].send(task);
                worker_idx = (worker_idx + 1) % n_worker;
            }
        }));

        // Spawn workers
        for mut worker_receiver in worker_receivers {
            workers.push(tokio::spawn(async move {
                while let Some(task) = worker_receiver.recv().await {
                    let SweepTask {
                        image,
                        classwise,
                        degrees,
                        result_sender,
                    } = task;
                    let rotated = tokio::task::spawn_blocking(move || rotate_sample(&image, &classwise, degrees)).await;
                    // a panicked job drops its sender and the caller sees the failure
                    if let Ok(result) = rotated {
                        let _ = result_sender.send(result);
                    }
                }
            }));
        }

        debug!(workers = n_worker, "sweep pool started");
        Self { task_sender, workers }
    }

    /// One worker per logical CPU.
    pub fn with_available_parallelism() -> Self {
        Self::new(num_cpus::get())
    }

    pub async fn rotate(&self, image: Arc<RgbImage>, classwise: Arc<ClasswiseMask>, degrees: u32) -> Result<RotatedSample> {
        let (result_sender, result_receiver) = oneshot::channel();

        let task = SweepTask {
            image,
            classwise,
            degrees,
            result_sender,
        };

        self.task_sender
            .send(task)
            .map_err(|_| SynthError::WorkerPool("failed to send task to worker pool"))?;

        let sample = result_receiver
            .await
            .map_err(|_| SynthError::WorkerPool("failed to receive result from worker"))??;
        Ok(sample)
    }

    /// Runs the full sweep of `rep_image` in batches of `batch_size` degrees and
    /// hands every sample to `sink` in degree order.
    pub async fn sweep_each<F>(&self, rep_image: &RepresentativeImage, batch_size: usize, mut sink: F) -> Result<()>
    where
        F: FnMut(RotatedSample) -> Result<()>,
    {
        let image = Arc::new(rep_image.pristine().clone());
        let classwise = Arc::new(rep_image.classwise_mask().clone());
        let degrees: Vec<u32> = (0..SWEEP_STEPS).collect();

        for batch in degrees.chunks(batch_size.max(1)) {
            let replies = join_all(
                batch
                    .iter()
                    .map(|&d| self.rotate(Arc::clone(&image), Arc::clone(&classwise), d)),
            )
            .await;
            for sample in replies {
                sink(sample?)?;
            }
        }

        info!(image = rep_image.name(), samples = SWEEP_STEPS, "rotation sweep finished");
        Ok(())
    }

    /// The full sweep of `rep_image`, collected in memory.
    pub async fn sweep(&self, rep_image: &RepresentativeImage) -> Result<Vec<RotatedSample>> {
        let mut samples = Vec::with_capacity(SWEEP_STEPS as usize);
        self.sweep_each(rep_image, SWEEP_STEPS as usize, |sample| {
            samples.push(sample);
            Ok(())
        })
        .await?;
        Ok(samples)
    }

    /// Stops accepting work and waits for every queued job to finish.
    pub async fn shutdown(self) {
        drop(self.task_sender);
        join_all(self.workers).await;
    }
}
