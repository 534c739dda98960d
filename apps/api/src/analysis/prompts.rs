// All LLM prompt constants for the Analysis module.
// Reuses the NDJSON wire contract from llm_client::prompts.

/// System prompt for career analysis. Replace `{ndjson_contract}` before sending.
pub const ANALYSIS_SYSTEM_TEMPLATE: &str = "You are a career analysis assistant for university \
    students. Write in a plain, conversational, practical voice. Every suggestion must be \
    concrete and actionable: name specific books, courses, small exercises, or tools.\n\
    {ndjson_contract}";

/// User prompt template. Replace `{occupation}` and `{field_of_study}`.
pub const ANALYSIS_PROMPT_TEMPLATE: &str = r#"Background: the user's target occupation and current field of study are
- Target occupation: {occupation}
- Current field of study: {field_of_study}

Goal: using the four-dimension model "industry → professional threshold → general skills → experience and motivation", produce a concrete, actionable career analysis.

Data shape of each section (replace the placeholder text with real content):
1) misperception: {"type":"Myth","title":"Major ≠ occupation","content":"One sentence that challenges a common assumption"}
2) essence: {"summary":"One-sentence summary","industry":"Industry it belongs to","role":"What the role actually does (with an example)"}
3) threshold: {"level":"High/Medium/Low + reason","match":"How the current major matches and where it falls short","path":["Path to close the gap 1 (may include a master's, PhD, or changing major)","Path to close the gap 2 (state cost, benefit, alternatives)"]}
4) skills: {"core":["Skill 1 (with a scenario)","Skill 2 (with a scenario)"],"match":"Skills from the current major that already transfer","practice":["Small exercise 1","Small exercise 2"]}
5) experience: {"scene":"Concrete description of workspace, collaboration, and pace","value":"Motivation it offers (growth / helping others / income / creating)","fit_test":"A low-cost way to test the fit"}
6) conclusion: {"feasibility":"Feasibility summary (say whether a graduate degree or change of major is advisable)","priority_action":"The single highest-priority next action"}

Special requirement: threshold.path MUST also cover the feasibility, pros and cons, and time and money cost of a master's degree, a PhD, a cross-disciplinary program, or changing major, compared against self-study and internship routes. Output the sections line by line in NDJSON order."#;
