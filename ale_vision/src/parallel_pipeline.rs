// THEORY:
// `InstancePool` steps many independent game instances at once. Each instance
// owns a complete `VisionPipeline`; the pool moves every pipeline into its own
// blocking task for the duration of one step and takes it back afterwards, so
// no pipeline is ever shared or locked. The pipelines themselves stay strictly
// single-threaded.
//
// Concurrency is bounded by the number of CPUs, since every step is pure
// computation.

use crate::calibration::Calibration;
use crate::core_modules::action::Action;
use crate::core_modules::frame::Frame;
use crate::error::{Result, VisionError};
use crate::pipeline::{FrameSummary, PipelineConfig, VisionPipeline};
use futures::future::join_all;
use log::warn;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Input for one instance: a frame and its action, or `None` to skip the step.
pub type InstanceInput = Option<(Frame, Action)>;

pub struct InstancePool {
    pipelines: Vec<VisionPipeline>,
    permits: Arc<Semaphore>,
}

impl InstancePool {
    /// One uncalibrated pipeline per configuration.
    pub fn new(configs: Vec<PipelineConfig>) -> Result<Self> {
        let pipelines = configs
            .into_iter()
            .map(VisionPipeline::new)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_pipelines(pipelines))
    }

    pub fn from_pipelines(pipelines: Vec<VisionPipeline>) -> Self {
        Self {
            pipelines,
            permits: Arc::new(Semaphore::new(num_cpus::get().max(1))),
        }
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    pub fn pipelines(&self) -> &[VisionPipeline] {
        &self.pipelines
    }

    /// Steps every instance with its input, concurrently. Results come back in
    /// instance order; a skipped instance yields `Ok(None)`.
    ///
    /// An instance whose step panics is rebuilt from its configuration and
    /// calibration and reports `VisionError::Worker`. Dropping the future before
    /// it completes rebuilds every instance still in flight the same way.
    pub async fn process_all(&mut self, inputs: Vec<InstanceInput>) -> Result<Vec<Result<Option<FrameSummary>>>> {
        if inputs.len() != self.pipelines.len() {
            return Err(VisionError::InstanceCount {
                expected: self.pipelines.len(),
                actual: inputs.len(),
            });
        }

        let permits = Arc::clone(&self.permits);
        let pipelines = std::mem::take(&mut self.pipelines);
        let mut guard = StepGuard {
            blueprints: pipelines
                .iter()
                .map(|p| (p.config().clone(), p.calibration().clone()))
                .collect(),
            pipelines: &mut self.pipelines,
        };

        let tasks = pipelines.into_iter().zip(inputs).map(|(mut pipeline, input)| {
            let permits = Arc::clone(&permits);
            tokio::spawn(async move {
                let _permit = permits.acquire_owned().await;
                tokio::task::spawn_blocking(move || {
                    let result = match input {
                        Some((frame, action)) => pipeline.process_frame(&frame, action).map(Some),
                        None => Ok(None),
                    };
                    (pipeline, result)
                })
                .await
            })
        });

        let mut results = Vec::with_capacity(guard.blueprints.len());
        for (index, outcome) in join_all(tasks).await.into_iter().enumerate() {
            match outcome {
                Ok(Ok((pipeline, result))) => {
                    guard.pipelines.push(pipeline);
                    results.push(result);
                }
                Ok(Err(e)) | Err(e) => {
                    warn!("instance {index} failed, rebuilding it: {e}");
                    let (config, calibration) = guard.blueprints[index].clone();
                    guard.pipelines.push(VisionPipeline::with_calibration(config, calibration)?);
                    results.push(Err(VisionError::Worker(e.to_string())));
                }
            }
        }
        Ok(results)
    }
}

/// Puts a pipeline back for every instance that has not returned from its step,
/// so a cancelled or failed `process_all` never shrinks the pool. Instances that
/// did not return restart from their configuration and calibration.
struct StepGuard<'a> {
    pipelines: &'a mut Vec<VisionPipeline>,
    blueprints: Vec<(PipelineConfig, Calibration)>,
}

impl Drop for StepGuard<'_> {
    fn drop(&mut self) {
        let returned = self.pipelines.len();
        for (index, (config, calibration)) in self.blueprints.iter().enumerate().skip(returned) {
            match VisionPipeline::with_calibration(config.clone(), calibration.clone()) {
                Ok(pipeline) => self.pipelines.push(pipeline),
                Err(e) => warn!("instance {index} could not be rebuilt: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn config() -> PipelineConfig {
        PipelineConfig {
            image_width: 16,
            image_height: 16,
            history_len: 3,
            ..Default::default()
        }
    }

    fn frame_with_block(x: u32) -> Frame {
        let mut frame = Frame::filled(16, 16, 0);
        for dy in 0..2 {
            for dx in 0..2 {
                frame.set(x + dx, 4 + dy, 1);
            }
        }
        frame
    }

    #[tokio::test]
    async fn instances_advance_independently() {
        let mut pool = InstancePool::new(vec![config(), config(), config()]).unwrap();

        for step in 0..3 {
            let results = pool
                .process_all(vec![
                    Some((frame_with_block(step), Action::Right)),
                    None,
                    Some((Frame::filled(16, 16, 0), Action::Noop)),
                ])
                .await
                .unwrap();

            assert!(matches!(results[0], Ok(Some(_))));
            assert!(matches!(results[1], Ok(None)));
            assert!(matches!(results[2], Ok(Some(_))));
        }

        let pipelines = pool.pipelines();
        assert_eq!(pipelines[0].frame_count(), 3);
        assert_eq!(pipelines[1].frame_count(), 0);
        assert_eq!(pipelines[2].frame_count(), 3);
        assert_eq!(pipelines[0].objects().len(), 1);
        assert!(pipelines[2].objects().is_empty());
    }

    #[tokio::test]
    async fn input_count_must_match() {
        let mut pool = InstancePool::new(vec![config()]).unwrap();
        let err = pool.process_all(vec![None, None]).await.unwrap_err();
        assert!(matches!(err, VisionError::InstanceCount { expected: 1, actual: 2 }));
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn frame_errors_stay_per_instance() {
        let mut pool = InstancePool::new(vec![config(), config()]).unwrap();
        let results = pool
            .process_all(vec![
                Some((Frame::filled(8, 8, 0), Action::Noop)),
                Some((frame_with_block(2), Action::Noop)),
            ])
            .await
            .unwrap();

        assert!(matches!(results[0], Err(VisionError::FrameSizeMismatch { .. })));
        assert!(matches!(results[1], Ok(Some(_))));
        assert_eq!(pool.pipelines()[0].frame_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_step_keeps_every_instance() {
        let mut pool = InstancePool::new(vec![config(), config()]).unwrap();
        pool.process_all(vec![Some((frame_with_block(1), Action::Noop)), None])
            .await
            .unwrap();
        assert_eq!(pool.pipelines()[0].frame_count(), 1);

        // Polled once, the step is still waiting on its workers when dropped.
        let step = pool.process_all(vec![Some((frame_with_block(2), Action::Noop)), None]);
        assert!(step.now_or_never().is_none());

        assert_eq!(pool.len(), 2);
        assert!(pool.pipelines().iter().all(|p| p.frame_count() == 0));

        let results = pool
            .process_all(vec![Some((frame_with_block(3), Action::Noop)), None])
            .await
            .unwrap();
        assert!(matches!(results[0], Ok(Some(_))));
    }
}
