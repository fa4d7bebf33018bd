use std::collections::HashMap;

use once_cell::sync::Lazy;

pub const GENERAL: &str = "general";

/// The closed set of consulting categories the service understands.
pub const CATEGORIES: [&str; 5] = [GENERAL, "finance", "marketing", "operations", "hr"];

static CONTEXTS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (
            "general",
            "You are a business consultant specializing in helping MSMEs. Provide practical, actionable advice.",
        ),
        (
            "finance",
            "You are a financial advisor for small businesses. Focus on cash flow management, budgeting, and financial planning.",
        ),
        (
            "marketing",
            "You are a marketing consultant for small businesses. Provide strategies for digital marketing, branding, and customer acquisition.",
        ),
        (
            "operations",
            "You are an operations consultant for MSMEs. Focus on process improvement, efficiency, and resource optimization.",
        ),
        (
            "hr",
            "You are an HR consultant for small businesses. Provide guidance on employee management, recruitment, and workplace culture.",
        ),
    ])
});

/// Map an arbitrary category label onto the closed set, case-insensitively.
/// Anything outside the set resolves to `general` rather than an error.
pub fn normalize(category: &str) -> &'static str {
    let lower = category.trim().to_lowercase();
    CATEGORIES
        .iter()
        .copied()
        .find(|known| *known == lower)
        .unwrap_or(GENERAL)
}

pub fn context_for(category: &str) -> &'static str {
    CONTEXTS[normalize(category)]
}

/// Build the exact text submitted to the model. The decode step strips only
/// the continuation past this prompt, so the template must not change
/// independently of it.
pub fn build(question: &str, category: &str) -> String {
    format!("{} Question: {}\n\nAnswer:", context_for(category), question)
}
