//! Job completion state machine
//!
//! A job is only trusted to be done once its executor says so: the reaper
//! writes a marker file as its very last action, and the file's content
//! tells success from failure. Kubernetes job status is the fallback once
//! no pod is active anymore.
//!
//! Transitions are pure: each poll gathers a [`Tick`] of observations and
//! [`WaitPhase::next`] decides the new phase from it.

use drover_core::TaskStatus;
use drover_kube::JobStatus;

/// Vocabulary of the dog-food marker file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DogFoodMarker {
    /// Content written by the executor when it failed
    pub fail: String,
}

impl DogFoodMarker {
    pub fn new(fail: impl Into<String>) -> Self {
        Self { fail: fail.into() }
    }

    /// Terminal status announced by the marker file content
    pub fn classify(&self, content: &str) -> TaskStatus {
        if content.trim() == self.fail {
            TaskStatus::Failed
        } else {
            TaskStatus::Passed
        }
    }
}

impl Default for DogFoodMarker {
    fn default() -> Self {
        Self::new("fail")
    }
}

/// What a pod of the job looked like during one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodProbe {
    Pending,
    Failed,
    /// Exited without failing
    Finished,
    /// Running; `dog_food` holds the marker content if the file exists
    Running { dog_food: Option<String> },
}

/// Observations of one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tick {
    pub cancelled: bool,
    /// The overall subtask timeout has elapsed
    pub timed_out: bool,
    /// The job has not been seen active within the start timeout
    pub start_expired: bool,
    /// Job status, `None` when the job could not be read
    pub job: Option<JobStatus>,
    pub pods: Vec<PodProbe>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPhase {
    /// Job created, no pod activity seen yet
    NotStarted,
    /// At least one pod has been active
    Active,
    Done(TaskStatus),
}

impl WaitPhase {
    pub fn is_done(self) -> bool {
        matches!(self, WaitPhase::Done(_))
    }

    /// Phase after observing `tick`
    ///
    /// Cancellation is checked before anything else, so a cancelled run is
    /// never reported as passed even when the job finished in the same tick.
    pub fn next(self, tick: &Tick, marker: &DogFoodMarker, check_dog_food: bool) -> WaitPhase {
        if let WaitPhase::Done(_) = self {
            return self;
        }
        if tick.cancelled {
            return WaitPhase::Done(TaskStatus::Cancelled);
        }
        if tick.timed_out {
            return WaitPhase::Done(TaskStatus::Timeout);
        }

        match self {
            WaitPhase::NotStarted => match tick.job {
                Some(job) if job.active > 0 || job.succeeded > 0 || job.failed > 0 => {
                    WaitPhase::Active.next(tick, marker, check_dog_food)
                }
                _ if tick.start_expired => WaitPhase::Done(TaskStatus::Timeout),
                _ => WaitPhase::NotStarted,
            },
            WaitPhase::Active => Self::active(tick, marker, check_dog_food),
            WaitPhase::Done(_) => self,
        }
    }

    fn active(tick: &Tick, marker: &DogFoodMarker, check_dog_food: bool) -> WaitPhase {
        let Some(job) = tick.job else {
            return WaitPhase::Done(TaskStatus::Failed);
        };

        if job.active != 0 {
            if !check_dog_food {
                return WaitPhase::Active;
            }
            let mut announced = None;
            for pod in &tick.pods {
                match pod {
                    PodProbe::Pending => continue,
                    PodProbe::Failed => return WaitPhase::Done(TaskStatus::Failed),
                    PodProbe::Finished => {}
                    PodProbe::Running { dog_food: None } => return WaitPhase::Active,
                    PodProbe::Running {
                        dog_food: Some(content),
                    } => announced = Some(marker.classify(content)),
                }
            }
            return match announced {
                Some(status) => WaitPhase::Done(status),
                None => WaitPhase::Active,
            };
        }

        if job.succeeded != 0 {
            WaitPhase::Done(TaskStatus::Passed)
        } else {
            WaitPhase::Done(TaskStatus::Failed)
        }
    }
}
