pub mod prompts;
pub mod render;

pub use prompts::{closest_match, prompt_yes_no, ConsolePrompt, NoPrompt, OperatorPrompt};
pub use render::{display_points, display_report};
