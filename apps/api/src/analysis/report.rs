//! Plain-text report rendered from a session snapshot.

use chrono::{DateTime, Utc};

use crate::analysis::models::AnalysisResult;
use crate::analysis::request::AnalysisInputs;

const NOT_AVAILABLE: &str = "(not available)";

/// Renders the report. Missing sections and blank fields read "(not available)".
pub fn render_report(
    inputs: Option<&AnalysisInputs>,
    result: &AnalysisResult,
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();

    out.push_str("CAREER ANALYSIS REPORT\n");
    out.push_str(&format!("Generated: {}\n", generated_at.format("%Y-%m-%d %H:%M UTC")));
    if let Some(inputs) = inputs {
        out.push_str(&format!("Target occupation: {}\n", inputs.occupation));
        out.push_str(&format!("Current field of study: {}\n", inputs.field_of_study));
    }

    heading(&mut out, "Common misperception");
    match &result.misperception {
        Some(m) => {
            field(&mut out, "Type", &m.kind);
            field(&mut out, "Title", &m.title);
            field(&mut out, "Statement", &m.content);
        }
        None => missing(&mut out),
    }

    heading(&mut out, "1. Occupation essence & industry position");
    match &result.essence {
        Some(e) => {
            field(&mut out, "Summary", &e.summary);
            field(&mut out, "Industry", &e.industry);
            field(&mut out, "Role", &e.role);
        }
        None => missing(&mut out),
    }

    heading(&mut out, "2. Professional threshold: what knowledge to add");
    match &result.threshold {
        Some(t) => {
            field(&mut out, "Threshold level", &t.level);
            field(&mut out, "Match with current major", &t.fit);
            list(&mut out, "Paths to close the gap", &t.path);
        }
        None => missing(&mut out),
    }

    heading(&mut out, "3. General skills: what to practise");
    match &result.skills {
        Some(s) => {
            list(&mut out, "Core skills", &s.core);
            field(&mut out, "Skill match", &s.fit);
            list(&mut out, "Ways to practise", &s.practice);
        }
        None => missing(&mut out),
    }

    heading(&mut out, "4. Experience & motivation: will you enjoy it and keep going");
    match &result.experience {
        Some(x) => {
            field(&mut out, "Day-to-day scene", &x.scene);
            field(&mut out, "Motivation", &x.value);
            field(&mut out, "Fit test", &x.fit_test);
        }
        None => missing(&mut out),
    }

    heading(&mut out, "5. Feasibility conclusion");
    match &result.conclusion {
        Some(c) => {
            field(&mut out, "Feasibility", &c.feasibility);
            field(&mut out, "Priority action", &c.priority_action);
        }
        None => missing(&mut out),
    }

    out
}

fn heading(out: &mut String, title: &str) {
    out.push_str(&format!("\n{title}\n"));
    out.push_str(&format!("{}\n", "-".repeat(title.chars().count())));
}

fn field(out: &mut String, label: &str, value: &str) {
    let value = value.trim();
    let value = if value.is_empty() { NOT_AVAILABLE } else { value };
    out.push_str(&format!("{label}: {value}\n"));
}

fn list(out: &mut String, label: &str, items: &[String]) {
    out.push_str(&format!("{label}:\n"));
    if items.is_empty() {
        out.push_str(&format!("  {NOT_AVAILABLE}\n"));
        return;
    }
    for (i, item) in items.iter().enumerate() {
        out.push_str(&format!("  {}. {}\n", i + 1, item.trim()));
    }
}

fn missing(out: &mut String) {
    out.push_str(&format!("{NOT_AVAILABLE}\n"));
}
