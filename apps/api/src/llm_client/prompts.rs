// Shared prompt fragments for streaming, sectioned output.
// Each feature that calls the LLM defines its own prompts.rs alongside it;
// this file holds the fragments that describe the wire contract itself.

/// System prompt fragment that enforces the NDJSON section protocol.
/// Replace `{section_list}` and `{line_count}` before use.
pub const NDJSON_SECTION_CONTRACT: &str = "\
    Respond strictly as NDJSON: one JSON object per line, {line_count} lines in total, \
    in exactly this order:\n{section_list}\n\
    Each line has the shape {\"section\":\"<name>\",\"data\":{...}} and ends with \\n. \
    Do NOT output a summary object, explanations, or any other text. \
    Do NOT wrap the lines in an array or an outer object. \
    Do NOT use markdown code fences.";

/// Renders the numbered section list used inside `NDJSON_SECTION_CONTRACT`.
pub fn section_list<'a>(names: impl IntoIterator<Item = &'a str>) -> (String, usize) {
    let lines: Vec<String> = names
        .into_iter()
        .enumerate()
        .map(|(i, name)| format!("{}) {{\"section\":\"{}\",\"data\":{{...}}}}", i + 1, name))
        .collect();
    let count = lines.len();
    (lines.join("\n"), count)
}

/// Fills `NDJSON_SECTION_CONTRACT` for the given section names.
pub fn ndjson_contract<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let (list, count) = section_list(names);
    render_template(
        NDJSON_SECTION_CONTRACT,
        &[("section_list", &list), ("line_count", &count.to_string())],
    )
}

/// Substitutes `{key}` placeholders in one pass over `template`.
/// Substituted values are never scanned again, and braces that do not name a
/// known key are copied through unchanged.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let value = after.find('}').and_then(|close| {
            let key = &after[..close];
            vars.iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value, close))
        });
        match value {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
