use crate::orchestrator::HaltReason;
use crate::phase::Phase;
use crate::ui::icons::{CHECK, CROSS, PAUSE, SPARKLE};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Diagnostic lines shown for a halt when not verbose.
const HALT_TAIL_LINES: usize = 8;

/// Terminal UI for a pipeline run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Phase bar: how many declared phases have passed their gates
/// - Step spinner: ticks while a worker call is outstanding
pub struct PipelineUi {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    spinner: Mutex<Option<ProgressBar>>,
    verbose: bool,
}

impl PipelineUi {
    /// Create the UI sized for `total_phases`.
    pub fn new(total_phases: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let phase_bar = multi.add(ProgressBar::new(total_phases));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        Self {
            multi,
            phase_bar,
            spinner: Mutex::new(None),
            verbose,
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the rich UI fails.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    fn start_spinner(&self, msg: String) {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .expect("progress bar template is a valid static string");

        let spinner = self.multi.add(ProgressBar::new_spinner());
        spinner.set_style(spinner_style);
        spinner.set_prefix("  Step");
        spinner.set_message(msg);
        spinner.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut slot) = self.spinner.lock()
            && let Some(previous) = slot.replace(spinner)
        {
            previous.finish_and_clear();
        }
    }

    fn stop_spinner(&self) {
        if let Ok(mut slot) = self.spinner.lock()
            && let Some(spinner) = slot.take()
        {
            spinner.finish_and_clear();
        }
    }

    /// Print the phase header and start the spinner for its worker call.
    pub fn start_phase(&self, index: usize, phase: &Phase) {
        self.print_phase_header(index, phase);
        self.phase_bar
            .set_message(format!("{}", style(&phase.name).yellow()));
        self.start_spinner(format!(
            "{} via {}",
            style(&phase.name).cyan(),
            style(&phase.worker).dim()
        ));
    }

    /// Advance the phase bar and print a completion line.
    pub fn phase_complete(&self, phase: &str) {
        self.stop_spinner();
        self.phase_bar.inc(1);
        self.print_line(format!(
            "\n{} Phase {} complete!\n",
            SPARKLE,
            style(phase).green().bold()
        ));
    }

    /// Stop ticking before the approval prompt takes over the terminal.
    pub fn awaiting_decision(&self, phase: &str) {
        self.stop_spinner();
        self.print_line(format!(
            "{} Phase {} passed its gate, awaiting decision",
            PAUSE,
            style(phase).yellow().bold()
        ));
    }

    /// Spinner for a post-phase stage (review, convergence, lessons).
    pub fn start_step(&self, label: &str) {
        self.start_spinner(label.to_string());
    }

    pub fn finish_step(&self, summary: &str) {
        self.stop_spinner();
        self.print_line(format!("{} {}", CHECK, summary));
    }

    /// Print the halt reason with the tail of its diagnostics.
    pub fn halted(&self, reason: &HaltReason) {
        self.stop_spinner();
        self.print_line(format!(
            "\n{} {}",
            CROSS,
            style(reason.to_string()).red().bold()
        ));

        let lines: Vec<String> = reason
            .diagnostics()
            .iter()
            .flat_map(|d| d.lines().map(str::to_string).collect::<Vec<_>>())
            .collect();
        let shown = if self.verbose {
            &lines[..]
        } else {
            &lines[lines.len().saturating_sub(HALT_TAIL_LINES)..]
        };
        if shown.len() < lines.len() {
            self.print_line(format!(
                "    {}",
                style(format!("... {} earlier line(s), see the run logs", lines.len() - shown.len())).dim()
            ));
        }
        for line in shown {
            self.print_line(format!("    {}", style(line).dim()));
        }
    }

    /// Clear the bars once the run has stopped.
    pub fn finish(&self) {
        self.stop_spinner();
        self.phase_bar.finish_and_clear();
    }

    /// Print a full-width cyan separator line.
    pub fn print_separator(&self) {
        self.print_line(format!("{}", style("═".repeat(70)).cyan()));
    }

    /// Print the header block for a phase before its worker runs.
    pub fn print_phase_header(&self, index: usize, phase: &Phase) {
        self.print_line("");
        self.print_separator();
        self.print_line(format!(
            "{} Phase {}: {} ({})",
            style("▶").green().bold(),
            style(index + 1).yellow().bold(),
            phase.name,
            style(phase.kind).dim()
        ));
        self.print_separator();
        self.print_line("");
        self.print_line(format!("{}  {}", style("Marker:").dim(), phase.marker));
        self.print_line(format!(
            "{}  {} retries max",
            style("Budget:").dim(),
            phase.max_retries
        ));
        if self.verbose && !phase.task.is_empty() {
            self.print_line(format!("{}  {}", style("Task:").dim(), phase.task.trim()));
        }
        self.print_line("");
    }
}
