// Copyright (c) Facebook, Inc. and its affiliates.
use indicatif::{ProgressBar, ProgressStyle};

/// One tick per cpu step. Hidden unless stderr is a terminal so that logs
/// and redirected output stay clean.
pub struct SearchProgress {
    bar: ProgressBar,
}

impl SearchProgress {
    pub fn new(nr_steps: usize, hidden: bool) -> Self {
        let bar = match hidden || !console::user_attended_stderr() {
            false => ProgressBar::new(nr_steps as u64),
            true => ProgressBar::hidden(),
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} cpu steps ({eta})")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }

    pub fn step(&self) {
        self.bar.inc(1);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
