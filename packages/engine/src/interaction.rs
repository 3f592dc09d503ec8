// ABOUTME: User interaction seams for confirmations and progress reporting
// ABOUTME: The engine never touches the terminal directly; the CLI supplies real implementations

/// Yes/no confirmation
pub trait Prompter: Send + Sync {
    fn confirm(&self, message: &str) -> bool;
}

/// Progress indicator shown while long operations run
pub trait Progress: Send + Sync {
    fn set_message(&self, message: &str);

    /// Hide the indicator while `f` runs (e.g. while prompting)
    fn suspend(&self, f: &mut dyn FnMut());

    fn finish(&self);
}

/// Answers every prompt with a fixed value
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Prompter for FixedAnswer {
    fn confirm(&self, _message: &str) -> bool {
        self.0
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn set_message(&self, _message: &str) {}

    fn suspend(&self, f: &mut dyn FnMut()) {
        f()
    }

    fn finish(&self) {}
}
