use std::io::{self, IsTerminal, Write};
use std::thread::{self, JoinHandle};

use crossbeam::channel::Receiver;
use crossterm::style::{Color, Stylize};

use crate::components::build::BuildEvent;

/// Prints the progress of a build.
#[derive(Debug)]
pub struct Reporter {
    steps_count: usize,
    steps_finished: usize,
    verbose: bool,
    colored: bool,
}

impl Reporter {
    pub fn new(steps_count: usize, verbose: bool) -> Self {
        Self {
            steps_count,
            steps_finished: 0,
            verbose,
            colored: io::stdout().is_terminal(),
        }
    }

    /// Disables colors.
    pub fn plain(mut self) -> Self {
        self.colored = false;
        self
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.colored {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    /// Returns the lines printed for `event`.
    pub fn render(&mut self, event: &BuildEvent) -> Vec<String> {
        match event {
            BuildEvent::Update(msg) => vec![msg.clone()],
            BuildEvent::StepFinished(msg, time) => {
                self.steps_finished += 1;
                vec![format!(
                    "[{}] {msg} {} / {} in {:.3} s",
                    self.paint("✔", Color::Green),
                    self.steps_finished,
                    self.steps_count,
                    *time as f64 / 1_000_000_f64
                )]
            }
            BuildEvent::StepFailed(msg, output) => {
                let mut lines = vec![format!("[{}] {msg}", self.paint("✗", Color::Red))];

                if self.verbose {
                    if !output.trim().is_empty() {
                        lines.push(self.paint("➤ Tool output: ", Color::Magenta));
                        lines.extend(output.lines().map(|line| format!("    {line}")));
                    }
                } else {
                    lines.push(self.paint(
                        "    Get more information on the error by using the -v argument",
                        Color::Yellow,
                    ));
                }

                lines
            }
            BuildEvent::Finished(image, time) => vec![format!(
                "Built {image} in {:.3} s",
                *time as f64 / 1_000_000_f64
            )],
        }
    }

    /// Prints events from `receiver` on a dedicated thread, until the build ends.
    pub fn spawn(mut self, receiver: Receiver<BuildEvent>) -> JoinHandle<()> {
        thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                let lines = self.render(&event);
                let mut out = io::stdout().lock();
                for line in lines {
                    let _ = writeln!(out, "{line}");
                }

                if matches!(
                    event,
                    BuildEvent::Finished(..) | BuildEvent::StepFailed(..)
                ) {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;

    #[test]
    fn step_lines() {
        let mut reporter = Reporter::new(4, false).plain();

        assert_eq!(
            reporter.render(&BuildEvent::StepFinished(String::from("format filesystem"), 1_500_000)),
            ["[✔] format filesystem 1 / 4 in 1.500 s"]
        );
        assert_eq!(
            reporter.render(&BuildEvent::StepFinished(String::from("install stage1"), 250)),
            ["[✔] install stage1 2 / 4 in 0.000 s"]
        );
    }

    #[test]
    fn failures_show_output_when_verbose() {
        let failed = BuildEvent::StepFailed(
            String::from("Failed to format filesystem"),
            String::from("mkfs.fat: bad geometry\n"),
        );

        let quiet = Reporter::new(4, false).plain().render(&failed);
        assert_eq!(quiet[0], "[✗] Failed to format filesystem");
        assert!(quiet[1].contains("-v"));

        let verbose = Reporter::new(4, true).plain().render(&failed);
        assert_eq!(verbose[2], "    mkfs.fat: bad geometry");
    }

    #[test]
    fn thread_stops_on_finish() {
        let (sender, receiver) = unbounded();
        let handle = Reporter::new(1, false).plain().spawn(receiver);

        sender
            .send(BuildEvent::StepFinished(String::from("copy files"), 10))
            .unwrap();
        sender
            .send(BuildEvent::Finished(String::from("floppy.img"), 20))
            .unwrap();

        handle.join().unwrap();
    }
}
