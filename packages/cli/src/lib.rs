// ABOUTME: Terminal front end for the kl devbox engine
// ABOUTME: Spinner and prompt adapters, log setup and human readable rendering of engine results

pub mod logging;
pub mod output;
pub mod terminal;

pub use terminal::{InquirePrompter, SpinnerProgress};
