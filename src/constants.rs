// Settings for the web surface come from the environment (or a .env file);
// conversation timings are fixed.

use std::env;
use std::time::Duration;

lazy_static::lazy_static! {
    pub static ref TEMPLATE_DIR: String = env::var("SPACE_TEMPLATE_DIR").unwrap_or_else(|_| "templates".to_string());
    pub static ref STATIC_DIR: String = env::var("SPACE_STATIC_DIR").unwrap_or_else(|_| "static".to_string());
}

/// How long the assistant "thinks" before each stage completes.
pub const STAGE_DELAY: Duration = Duration::from_millis(2000);

/// Clarification cycles allowed before a turn ends in an error.
pub const CLARIFICATION_THRESHOLD: u32 = 2;

/// Per-character delay of the typed-text renderer.
pub const TYPING_SPEED: Duration = Duration::from_millis(30);

/// Bounds (inclusive) for the number of questions in one clarification sequence.
pub const MIN_SEQUENCE_QUESTIONS: usize = 2;
pub const MAX_SEQUENCE_QUESTIONS: usize = 4;

/// Conversion factor of the mock calculator.
pub const EMISSION_FACTOR: f64 = 0.5;

/// Default port of the web server.
pub const DEFAULT_PORT: u16 = 9900;

/// Capacity of the per-conversation event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

pub const ERROR_TEXT: &str =
    "The build failed while applying your latest changes. Some calculator components could not be generated.";

pub const INITIAL_FEATURES: [&str; 3] = [
    "Basic calculator layout",
    "Carbon footprint metrics",
    "Input validation",
];

pub const REFINEMENT_FEATURES: [&str; 2] = ["Refined calculator layout", "Updated emission factors"];

pub const FIX_FEATURES: [&str; 3] = [
    "Resolved build error",
    "Restored component state",
    "Re-ran input validation",
];
