//! Prompt templates for the built-in task kinds

pub const SUMMARY_SYSTEM: &str =
    "You're an AI assistant tasked with summarizing the text given to you by the user.";
pub const HEADLINE_SYSTEM: &str =
    "You're an AI assistant tasked with finding a headline for the text given to you by the user.";
pub const TOPICS_SYSTEM: &str =
    "You're an AI assistant tasked with finding the topics of the text given to you by the user.";
pub const SIMPLIFY_SYSTEM: &str =
    "You're an AI assistant tasked with simplifying the text given to you by the user.";
pub const REFORMULATE_SYSTEM: &str =
    "You're an AI assistant tasked with reformulating the text given to you by the user.";
pub const CONTEXT_WRITE_SYSTEM: &str =
    "You're an AI assistant tasked with writing a text in a given style from the material given to you by the user.";
pub const FREE_PROMPT_SYSTEM: &str =
    "You're an AI assistant tasked with helping the user to the best of your ability.";
pub const PROOFREAD_SYSTEM: &str =
    "You're an AI assistant tasked with proofreading the text given to you by the user.";
pub const CHANGE_TONE_SYSTEM: &str =
    "You're an AI assistant tasked with rewriting the text given to you by the user in another tone.";

pub fn summary(text: &str) -> String {
    format!(
        "Summarize the following text. Detect the language of the text. Use the same language as the text. Here is the text:\n\"\n{text}\n\"\nOutput only the summary. Here is your summary in the same language as the text:"
    )
}

pub fn headline(text: &str) -> String {
    format!(
        "Find a headline for the following text\n\"\n{text}\n\"\nWrite a single headline for the above text in one sentence"
    )
}

pub fn topics(text: &str) -> String {
    format!(
        "Find a maximum of 5 topics keywords for the following text:\n\"\n{text}\n\"\nList 5 topics of the above text as keywords separated by commas:"
    )
}

pub fn simplify(text: &str) -> String {
    format!(
        "Rewrite and rephrase the following text to make it easier to understand, so that a 5-year-old child can understand it.\n\"\n{text}\n\"\nDescribe difficult concepts in the text instead of using jargon terms directly. Do not make up anything new that is not in the original text. Only return the new, rewritten text."
    )
}

pub fn reformulate(text: &str) -> String {
    format!(
        "Rewrite the following text and rephrase it:\n\n\"\n{text}\n\"\n\nWrite the above text again and rephrase it using different words, in the language of the original text. Output only the new text without quotes, no introductory or explanatory text, and do not mention the language."
    )
}

pub fn context_write(style_input: &str, source_input: &str) -> String {
    format!(
        "You're a professional copywriter tasked with copying an instructed or demonstrated *WRITING STYLE* and writing a text on the provided *SOURCE MATERIAL*.\n*WRITING STYLE*:\n{style_input}\n\n*SOURCE MATERIAL*:\n{source_input}\n\nNow write a text in the same style detailed or demonstrated under *WRITING STYLE* using the *SOURCE MATERIAL* as source of facts and instruction on what to write about. Do not invent any facts or events yourself. Use the *WRITING STYLE* only as a guide for how to write, not as a source of facts. Write in the language of the *SOURCE MATERIAL* without mentioning it. Only output the newly written text without quotes, no introductory or explanatory text."
    )
}

pub fn proofread(text: &str) -> String {
    format!(
        "Detect all grammar and spelling mistakes of the following text in its original language. Output only the list of mistakes in bullet points.\n\n\"\n{text}\n\"\n\nGive me the list of all mistakes in the above text in its original language. Do not output the language. Output only the list in bullet points, no introductory or explanatory text."
    )
}

pub fn change_tone(text: &str, tone: &str) -> String {
    format!(
        "Reformulate the following text in a \" {tone} \" tone in its original language without mentioning the language. Output only the reformulation, nothing else, no introductory sentence. Here is the text:\n\n\"\n{text}\n\"\n\nOutput only the reformulated text, nothing else. Do not add an introductory sentence."
    )
}

/// Render a model-specific prompt template.
///
/// Templates reference `{system_prompt}` and `{user_prompt}`; the result is
/// sent as a single raw prompt.
pub fn render_template(template: &str, system: &str, user: &str) -> String {
    template
        .replace("{system_prompt}", system)
        .replace("{user_prompt}", user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_embed_input() {
        assert!(summary("Lorem ipsum").contains("\"\nLorem ipsum\n\""));
        assert!(change_tone("Hi", "formal").contains("\" formal \" tone"));
        let prompt = context_write("terse", "facts");
        assert!(prompt.contains("*WRITING STYLE*:\nterse"));
        assert!(prompt.contains("*SOURCE MATERIAL*:\nfacts"));
    }

    #[test]
    fn test_render_template_substitutes_both_slots() {
        let rendered = render_template(
            "<|system|>{system_prompt}<|user|>{user_prompt}<|assistant|>",
            "be brief",
            "hello",
        );
        assert_eq!(rendered, "<|system|>be brief<|user|>hello<|assistant|>");
    }
}
