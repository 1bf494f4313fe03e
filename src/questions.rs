//! Static seed content: the clarification bank and the landing prompts.

use std::path::Path;

use anyhow::{bail, Context, Result};

/// First clarification of every conversation; not part of the bank.
pub const SEED_QUESTION: &str = "Would you like to include transportation emissions in the calculator?";

pub const CLARIFICATION_QUESTIONS: [&str; 15] = [
    "Should I add email notifications to keep users informed about their carbon footprint reports and important updates? This would help users stay engaged and track their progress.",
    "Would you like to include data visualization features such as graphs and charts to help users better understand their carbon footprint trends over time?",
    "Should I implement user authentication to allow users to securely save their carbon calculations and track their progress across multiple sessions?",
    "Do you want to add a search functionality that allows users to quickly find specific carbon calculations or historical data from their previous entries?",
    "Should I include export to PDF capability so users can download and share their carbon footprint reports with detailed breakdowns and recommendations?",
    "Would you like to add multi-language support to make the calculator accessible to users from different regions and language backgrounds?",
    "Should I implement real-time updates that show immediate carbon impact calculations as users input their data, providing instant feedback?",
    "Do you want to include a feedback rating system where users can rate the accuracy and usefulness of their carbon calculations?",
    "Should I add a comparison feature that allows users to benchmark their carbon footprint against regional averages or similar households?",
    "Would you like to include social sharing capabilities so users can share their carbon reduction achievements and inspire others on social media?",
    "Should I implement offline mode support to allow users to calculate their carbon footprint even without an internet connection?",
    "Do you want to add gamification elements such as achievements and challenges to encourage users to reduce their carbon footprint?",
    "Should I include integration with smart home devices to automatically collect energy usage data for more accurate carbon calculations?",
    "Would you like to add a carbon offset marketplace where users can browse and purchase verified carbon offset projects to neutralize their footprint?",
    "Should I implement personalized recommendations that suggest specific actions users can take to reduce their carbon footprint based on their usage patterns?",
];

/// Prompts offered on the landing view.
pub const EXAMPLE_PROMPTS: [&str; 3] = [
    "Create a carbon calculator app",
    "Build a booking system for government facilities",
    "Design a survey form for public feedback",
];

/// Rotating placeholders of the landing composer.
pub const PLACEHOLDER_PROMPTS: [&str; 5] = [
    "I need to create a secure document submission portal...",
    "Help me design an accessible citizen feedback system...",
    "How do I implement multi-factor authentication for government staff...",
    "Create a public service announcement notification system...",
    "Build a permit application tracking system...",
];

pub fn default_bank() -> Vec<String> {
    CLARIFICATION_QUESTIONS.iter().map(|q| q.to_string()).collect()
}

/// Loads a replacement bank from a JSON array of strings.
pub fn load_bank(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read question bank {}", path.display()))?;
    let bank: Vec<String> = serde_json::from_str(&raw)
        .with_context(|| format!("Question bank {} is not a JSON array of strings", path.display()))?;
    let bank: Vec<String> = bank
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .collect();
    if bank.is_empty() {
        bail!("Question bank {} contains no questions", path.display());
    }
    Ok(bank)
}
