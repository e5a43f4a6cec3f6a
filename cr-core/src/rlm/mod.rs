//! RLM controller: the reasoning/code/execute/observe loop

pub mod answer;
mod controller;
mod events;
pub mod prompt;
mod session;

pub use answer::{parse_action, parse_answer_blocks, ActionStep};
pub use controller::{AskOutcome, AskParams, Controller};
pub use events::{sse_frame, SessionEvent};
pub use session::{ReviewSession, SessionStatus};
