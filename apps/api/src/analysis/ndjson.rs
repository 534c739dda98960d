//! NDJSON Section Parser: pulls newline-terminated `{"section", "data"}`
//! objects out of model output as soon as each line is complete.
//!
//! The parser knows nothing about SSE; it is fed plain text. The streaming path
//! feeds it deltas from the SSE decoder, and the non-streaming fallback feeds
//! it a whole message at once.

use serde_json::Value;

/// One `{"section": <name>, "data": {...}}` line.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionLine {
    pub section: String,
    pub data: Value,
}

/// Outcome of parsing one candidate line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Section(SectionLine),
    /// Blank, malformed, or not a section object. Scanning continues.
    Skip,
}

/// Parses one trimmed line. Never fails: anything unusable is `Skip`.
pub fn parse_section_line(line: &str) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() {
        return LineOutcome::Skip;
    }
    let Ok(Value::Object(mut object)) = serde_json::from_str::<Value>(line) else {
        return LineOutcome::Skip;
    };

    let section = match object.get("section") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return LineOutcome::Skip,
    };
    match object.remove("data") {
        Some(data) if !data.is_null() => LineOutcome::Section(SectionLine { section, data }),
        _ => LineOutcome::Skip,
    }
}

/// Buffers model output and yields complete section lines.
#[derive(Debug, Default)]
pub struct NdjsonSectionParser {
    buffer: String,
    transcript: String,
}

impl NdjsonSectionParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends text and returns every section completed by it.
    pub fn push(&mut self, text: &str) -> Vec<SectionLine> {
        self.buffer.push_str(text);
        self.transcript.push_str(text);
        self.drain_lines()
    }

    /// Scans the buffer for newline-terminated lines. The trailing partial line
    /// stays buffered. With nothing buffered this is a no-op.
    pub fn drain_lines(&mut self) -> Vec<SectionLine> {
        let mut sections = Vec::new();
        while let Some(idx) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=idx).collect();
            if let LineOutcome::Section(section) = parse_section_line(&line) {
                sections.push(section);
            }
        }
        sections
    }

    /// End-of-stream reconciliation: flushes complete lines, then tries the
    /// unterminated remainder as one more standalone object.
    pub fn finish(&mut self) -> Vec<SectionLine> {
        let mut sections = self.drain_lines();
        let tail = std::mem::take(&mut self.buffer);
        if let LineOutcome::Section(section) = parse_section_line(&tail) {
            sections.push(section);
        }
        sections
    }

    /// Everything ever pushed, for the whole-object fallback.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Text still waiting for a newline.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_section_line_accepts_section_object() {
        let outcome = parse_section_line(r#" {"section":"essence","data":{"summary":"s"}} "#);
        assert_eq!(
            outcome,
            LineOutcome::Section(SectionLine {
                section: "essence".to_string(),
                data: json!({"summary": "s"}),
            })
        );
    }

    #[test]
    fn test_parse_section_line_skips_non_sections() {
        assert_eq!(parse_section_line("not json"), LineOutcome::Skip);
        assert_eq!(parse_section_line(""), LineOutcome::Skip);
        assert_eq!(parse_section_line("[1,2,3]"), LineOutcome::Skip);
        assert_eq!(parse_section_line(r#"{"data":{}}"#), LineOutcome::Skip);
        assert_eq!(
            parse_section_line(r#"{"section":"","data":{}}"#),
            LineOutcome::Skip
        );
        assert_eq!(
            parse_section_line(r#"{"section":"essence","data":null}"#),
            LineOutcome::Skip
        );
        assert_eq!(
            parse_section_line(r#"{"section":"essence"}"#),
            LineOutcome::Skip
        );
    }

    #[test]
    fn test_malformed_line_does_not_stop_later_lines() {
        let mut parser = NdjsonSectionParser::new();
        let sections = parser.push(concat!(
            r#"{"section":"essence","data":{"summary":"a"}}"#,
            "\nnot json\n",
            r#"{"section":"skills","data":{"core":["x"]}}"#,
            "\n"
        ));
        let names: Vec<_> = sections.iter().map(|s| s.section.as_str()).collect();
        assert_eq!(names, vec!["essence", "skills"]);
    }

    #[test]
    fn test_partial_line_waits_for_newline() {
        let mut parser = NdjsonSectionParser::new();
        assert!(parser.push(r#"{"section":"essence","#).is_empty());
        assert!(parser.push(r#""data":{"summary":"a"}}"#).is_empty());
        assert_eq!(parser.pending(), r#"{"section":"essence","data":{"summary":"a"}}"#);
        let sections = parser.push("\n");
        assert_eq!(sections.len(), 1);
        assert_eq!(parser.pending(), "");
    }

    #[test]
    fn test_drain_on_empty_buffer_is_noop() {
        let mut parser = NdjsonSectionParser::new();
        assert!(parser.drain_lines().is_empty());
        assert!(parser.drain_lines().is_empty());
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn test_finish_recognizes_unterminated_tail() {
        let mut parser = NdjsonSectionParser::new();
        let first = parser.push(concat!(
            r#"{"section":"essence","data":{}}"#,
            "\n",
            r#"{"section":"conclusion","data":{"feasibility":"ok"}}"#
        ));
        assert_eq!(first.len(), 1);
        let rest = parser.finish();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].section, "conclusion");
        assert_eq!(parser.pending(), "");
    }

    #[test]
    fn test_transcript_keeps_consumed_lines() {
        let mut parser = NdjsonSectionParser::new();
        parser.push("{\n  \"essence\": {}\n");
        parser.push("}");
        assert_eq!(parser.transcript(), "{\n  \"essence\": {}\n}");
        assert_eq!(parser.pending(), "}");
    }
}
