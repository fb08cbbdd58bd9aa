use std::time::Instant;

use async_trait::async_trait;
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, error};

use crate::components::recipe::Assembly;
use crate::errors::BuildError;

pub enum BuildEvent {
    Update(String),
    StepFinished(String, usize),
    Finished(String, usize),
    StepFailed(String, String),
}

pub type BuildResult = Result<(), BuildError>;

/// Progress of an image through its assembly.
///
/// States are ordered: a build only moves forward, `Partitioned` being skipped by images
/// without partition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildState {
    Empty,
    Partitioned,
    Formatted,
    Stage1Installed,
    Stage2Installed,
    Populated,
}

#[async_trait]
pub trait BuildStep: Send + Sync {
    /// Short description of the step, used in progress messages.
    fn name(&self) -> &str;

    /// State of the image once this step succeeded.
    fn reaches(&self) -> BuildState;

    async fn build(&self, assembly: &Assembly<'_>, master: &Sender<BuildEvent>) -> BuildResult;
}

pub struct BuildBlueprint {
    pub steps: Vec<Box<dyn BuildStep>>,
    pub incoming: Receiver<BuildEvent>,
    outgoing: Sender<BuildEvent>,
    state: BuildState,
}

impl Default for BuildBlueprint {
    fn default() -> Self {
        let (s, r) = unbounded();
        Self {
            steps: vec![],
            incoming: r,
            outgoing: s,
            state: BuildState::Empty,
        }
    }
}

impl BuildBlueprint {
    pub fn add_step<T>(&mut self, step: T)
    where
        T: BuildStep + 'static,
    {
        self.steps.push(Box::new(step));
    }

    pub fn get_receiver(&self) -> Receiver<BuildEvent> {
        self.incoming.clone()
    }

    /// Last state reached by the image.
    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Runs every step in order, stopping at the first failure.
    ///
    /// Nothing is retried nor rolled back: on failure the image stays in the last state
    /// reached.
    pub async fn build(&mut self, assembly: &Assembly<'_>) -> BuildResult {
        let total = Instant::now();

        for step in &self.steps {
            let start = Instant::now();
            let _ = self
                .outgoing
                .send(BuildEvent::Update(format!("{}...", step.name())));

            if let Err(err) = step.build(assembly, &self.outgoing).await {
                error!(target: "build", "{} failed in state {:?}", step.name(), self.state);
                let output = err.tool_output().unwrap_or_default().to_string();
                let _ = self.outgoing.send(BuildEvent::StepFailed(
                    format!("Failed to {}: {err}", step.name()),
                    output,
                ));

                return Err(err);
            }

            self.state = step.reaches();
            debug!(target: "build", "reached {:?}", self.state);

            let _ = self.outgoing.send(BuildEvent::StepFinished(
                String::from(step.name()),
                start.elapsed().as_micros() as usize,
            ));
        }

        let _ = self.outgoing.send(BuildEvent::Finished(
            assembly.image().path().display().to_string(),
            total.elapsed().as_micros() as usize,
        ));

        Ok(())
    }

    pub fn steps_count(&self) -> usize {
        self.steps.len()
    }
}
